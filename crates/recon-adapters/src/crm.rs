//! CRM reservations API, paginated by opaque cursor.

use async_trait::async_trait;
use recon_core::{JobId, RecordPayload, RemoteRecord, ReservationPayload};
use recon_storage::{Credentials, HttpFetcher};
use serde::Deserialize;

use crate::{
    parse_remote_timestamp, AdapterContext, FetchFilter, Page, PageCursor, RemoteId,
    RemoteSource, SourceError,
};

#[derive(Debug, Deserialize)]
struct CrmPage {
    data: Vec<CrmReservation>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrmReservation {
    id: RemoteId,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(flatten)]
    payload: ReservationPayload,
}

pub struct CrmReservationsSource {
    http: HttpFetcher,
    base_url: String,
    credentials: Credentials,
    page_size: usize,
}

impl CrmReservationsSource {
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
impl RemoteSource for CrmReservationsSource {
    fn job(&self) -> JobId {
        JobId::Reservations
    }

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        filter: &FetchFilter,
        cursor: PageCursor,
    ) -> Result<Page, SourceError> {
        let mut query = vec![("limit".to_string(), self.page_size.to_string())];
        match cursor {
            PageCursor::Start => {}
            PageCursor::Token(token) => query.push(("cursor".to_string(), token)),
            PageCursor::Offset(_) => {
                return Err(SourceError::Message(
                    "crm pagination is cursor based".to_string(),
                ))
            }
        }
        if let Some(since) = filter.since {
            query.push(("updated_since".to_string(), since.to_rfc3339()));
        }

        let url = format!("{}/reservations", self.base_url);
        let page: CrmPage = self
            .http
            .get_json(ctx.run_id, &url, &query, &self.credentials)
            .await?;

        let records = page
            .data
            .into_iter()
            .map(|item| RemoteRecord {
                remote_id: item.id.into_string(),
                modified_at: parse_remote_timestamp(item.updated_at.as_deref()),
                payload: RecordPayload::Reservation(item.payload),
            })
            .collect();

        Ok(Page {
            records,
            unreadable: Vec::new(),
            next: page
                .next_cursor
                .filter(|c| !c.is_empty())
                .map(PageCursor::Token),
        })
    }
}
