//! Remote source contracts and the paged fetcher that drives them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recon_core::{JobId, RemoteRecord, SyncMode};
use recon_storage::{FetchError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod crm;
pub mod erp;
pub mod ledger;

pub use crm::CrmReservationsSource;
pub use erp::ErpContractsSource;
pub use ledger::{connect_ledger, LedgerConfig, LedgerLandValueSource};

pub const CRATE_NAME: &str = "recon-adapters";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("ledger query failed: {0}")]
    Ledger(#[from] sqlx::Error),
    #[error("reading local targets failed: {0}")]
    Targets(#[from] StoreError),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Position in the remote result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Start,
    Token(String),
    Offset(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchFilter {
    pub mode: SyncMode,
    pub since: Option<DateTime<Utc>>,
}

impl FetchFilter {
    pub fn full() -> Self {
        Self {
            mode: SyncMode::Full,
            since: None,
        }
    }

    /// Delta runs without a checkpoint look back a fixed window instead of
    /// fetching everything or nothing.
    pub fn resolve(
        mode: SyncMode,
        checkpoint: Option<DateTime<Utc>>,
        default_lookback: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        match mode {
            SyncMode::Full => Self::full(),
            SyncMode::Delta => {
                let fallback = chrono::Duration::from_std(default_lookback)
                    .map(|lookback| now - lookback)
                    .unwrap_or(now);
                Self {
                    mode,
                    since: Some(checkpoint.unwrap_or(fallback)),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RemoteRecord>,
    /// Ids the source knows about but could not read this time (e.g. a ledger
    /// statement timeout). They count as failed, the run continues.
    pub unreadable: Vec<String>,
    pub next: Option<PageCursor>,
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    fn job(&self) -> JobId;

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        filter: &FetchFilter,
        cursor: PageCursor,
    ) -> Result<Page, SourceError>;
}

/// Pulls pages one at a time so a run never holds more than a page in memory.
pub struct RemoteFetcher<'a> {
    source: &'a dyn RemoteSource,
    ctx: AdapterContext,
    filter: FetchFilter,
    cursor: Option<PageCursor>,
    pages: usize,
}

impl<'a> RemoteFetcher<'a> {
    pub fn new(source: &'a dyn RemoteSource, ctx: AdapterContext, filter: FetchFilter) -> Self {
        Self {
            source,
            ctx,
            filter,
            cursor: Some(PageCursor::Start),
            pages: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// `Ok(None)` once the source is exhausted. An error ends the sequence.
    pub async fn next_page(&mut self) -> Result<Option<Page>, SourceError> {
        let Some(cursor) = self.cursor.take() else {
            return Ok(None);
        };
        let page = self
            .source
            .fetch_page(&self.ctx, &self.filter, cursor.clone())
            .await?;
        if page.next.as_ref() == Some(&cursor) {
            return Err(SourceError::Message(format!(
                "{} pagination did not advance past {cursor:?}",
                self.source.job()
            )));
        }
        self.pages += 1;
        self.cursor = page.next.clone();
        debug!(
            job = %self.source.job(),
            page = self.pages,
            records = page.records.len(),
            unreadable = page.unreadable.len(),
            "page fetched"
        );
        Ok(Some(page))
    }
}

/// Remote identifiers arrive as JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(i64),
    Text(String),
}

impl RemoteId {
    pub fn into_string(self) -> String {
        match self {
            RemoteId::Number(n) => n.to_string(),
            RemoteId::Text(s) => s.trim().to_string(),
        }
    }
}

fn parse_remote_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value.and_then(recon_core::normalize::parse_instant)
}
