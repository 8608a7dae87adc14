//! ERP contracts API, paginated by offset/limit.

use async_trait::async_trait;
use recon_core::{ContractPayload, JobId, RecordPayload, RemoteRecord};
use recon_storage::{Credentials, HttpFetcher};
use serde::Deserialize;

use crate::{
    parse_remote_timestamp, AdapterContext, FetchFilter, Page, PageCursor, RemoteId,
    RemoteSource, SourceError,
};

#[derive(Debug, Deserialize)]
struct ErpPage {
    items: Vec<ErpContract>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErpContract {
    id: RemoteId,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(flatten)]
    payload: ContractPayload,
}

pub struct ErpContractsSource {
    http: HttpFetcher,
    base_url: String,
    credentials: Credentials,
    page_size: usize,
}

impl ErpContractsSource {
    pub fn new(
        http: HttpFetcher,
        base_url: impl Into<String>,
        credentials: Credentials,
        page_size: usize,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl RemoteSource for ErpContractsSource {
    fn job(&self) -> JobId {
        JobId::ErpContracts
    }

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        filter: &FetchFilter,
        cursor: PageCursor,
    ) -> Result<Page, SourceError> {
        let offset = match cursor {
            PageCursor::Start => 0,
            PageCursor::Offset(offset) => offset,
            PageCursor::Token(_) => {
                return Err(SourceError::Message(
                    "erp pagination is offset based".to_string(),
                ))
            }
        };

        let mut query = vec![
            ("offset".to_string(), offset.to_string()),
            ("limit".to_string(), self.page_size.to_string()),
        ];
        if let Some(since) = filter.since {
            query.push(("modified_since".to_string(), since.to_rfc3339()));
        }

        let url = format!("{}/contracts", self.base_url);
        let page: ErpPage = self
            .http
            .get_json(ctx.run_id, &url, &query, &self.credentials)
            .await?;

        let fetched = page.items.len() as u64;
        let end = offset + fetched;
        let exhausted = fetched < self.page_size as u64 || page.total.is_some_and(|total| end >= total);

        let records = page
            .items
            .into_iter()
            .map(|item| RemoteRecord {
                remote_id: item.id.into_string(),
                modified_at: parse_remote_timestamp(item.modified_at.as_deref()),
                payload: RecordPayload::Contract(item.payload),
            })
            .collect();

        Ok(Page {
            records,
            unreadable: Vec::new(),
            next: (!exhausted).then_some(PageCursor::Offset(end)),
        })
    }
}
