// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::NewBlip;

/// Common capability of every source adapter.
///
/// Adapters only read their external source; they never touch the store.
/// Returned events are all strictly newer than `since`.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_new_events(&self, since: DateTime<Utc>) -> Result<Vec<NewBlip>>;
    fn name(&self) -> &str;
}
