//! Per-user and per-chat rename preferences
//!
//! Persistence is an external concern; the pipeline reads preferences through
//! [`PreferenceStore`]. [`MemoryPreferenceStore`] backs the CLI and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::transport::MediaKind;

/// Metadata values written into every stream of the muxed container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFields {
    pub title: String,
    pub artist: String,
    pub author: String,
    pub video_title: String,
    pub audio_title: String,
    pub subtitle: String,
}

#[async_trait]
pub trait PreferenceStore: Send + Sync + 'static {
    /// Rename template, absent when the user never set one
    async fn get_template(&self, user_id: i64) -> Option<String>;

    /// Caption template for deliveries into a chat
    async fn get_caption(&self, chat_id: i64) -> Option<String>;

    /// Stored custom thumbnail for a chat
    async fn get_thumbnail(&self, chat_id: i64) -> Option<String>;

    async fn get_metadata_fields(&self, user_id: i64) -> MetadataFields;

    /// Preferred delivery kind, overriding the inbound kind when set
    async fn get_media_preference(&self, user_id: i64) -> Option<MediaKind>;
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    templates: RwLock<HashMap<i64, String>>,
    captions: RwLock<HashMap<i64, String>>,
    thumbnails: RwLock<HashMap<i64, String>>,
    metadata: RwLock<HashMap<i64, MetadataFields>>,
    media: RwLock<HashMap<i64, MediaKind>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_template(&self, user_id: i64, template: impl Into<String>) {
        self.templates.write().insert(user_id, template.into());
    }

    pub fn set_caption(&self, chat_id: i64, caption: impl Into<String>) {
        self.captions.write().insert(chat_id, caption.into());
    }

    pub fn set_thumbnail(&self, chat_id: i64, thumbnail: impl Into<String>) {
        self.thumbnails.write().insert(chat_id, thumbnail.into());
    }

    pub fn set_metadata_fields(&self, user_id: i64, fields: MetadataFields) {
        self.metadata.write().insert(user_id, fields);
    }

    pub fn set_media_preference(&self, user_id: i64, kind: MediaKind) {
        self.media.write().insert(user_id, kind);
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get_template(&self, user_id: i64) -> Option<String> {
        self.templates.read().get(&user_id).cloned()
    }

    async fn get_caption(&self, chat_id: i64) -> Option<String> {
        self.captions.read().get(&chat_id).cloned()
    }

    async fn get_thumbnail(&self, chat_id: i64) -> Option<String> {
        self.thumbnails.read().get(&chat_id).cloned()
    }

    async fn get_metadata_fields(&self, user_id: i64) -> MetadataFields {
        self.metadata.read().get(&user_id).cloned().unwrap_or_default()
    }

    async fn get_media_preference(&self, user_id: i64) -> Option<MediaKind> {
        self.media.read().get(&user_id).copied()
    }
}
