// src/ingest/providers/mod.rs
pub mod changelog;
pub mod documents;
pub mod feed;
