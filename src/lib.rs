//! Filename-driven media renaming
//!
//! Infers season, episode, quality and audio tags from a filename, renders
//! them into a user template and drives the fetch, metadata, thumbnail and
//! delivery stages with guaranteed cleanup.

pub mod config;
pub mod services;
