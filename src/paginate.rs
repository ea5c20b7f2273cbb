//! Cursor and offset pagination over the request pipeline.
//!
//! Two wire conventions are supported:
//!
//! - cursor: `{ "nextCursor": "...", "items": [...] }`, request params
//!   `cursor` and `limit`;
//! - offset: `{ "offset": 0, "limit": 10, "total": 47, "items": [...] }`,
//!   request params `offset` and `limit`.
//!
//! Iteration stops as soon as any exhaustion signal fires: a missing or empty
//! next cursor, `hasMore: false`, a short page, or a satisfied total.

use std::collections::HashSet;

use futures::stream::{self, Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ConnectorError;
use crate::http::{RequestPipeline, RequestSpec};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageConvention {
    Cursor,
    Offset,
}

/// Position of the next page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Opaque continuation token issued by the provider.
    Token(String),
    Offset { offset: u64, limit: u32 },
}

#[derive(Debug, Clone)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// `None` once the collection is exhausted.
    pub next: Option<Cursor>,
    pub total: Option<u64>,
}

impl<T> PageResult<T> {
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorPage<T> {
    #[serde(default, alias = "next_cursor")]
    next_cursor: Option<String>,
    #[serde(default, alias = "has_more")]
    has_more: Option<bool>,
    #[serde(default)]
    total: Option<u64>,
    items: Vec<T>,
}

#[derive(Deserialize)]
struct OffsetPage<T> {
    #[serde(default)]
    total: Option<u64>,
    items: Vec<T>,
}

#[derive(Clone, Copy)]
pub struct Paginator<'a> {
    pipeline: &'a RequestPipeline,
    convention: PageConvention,
    page_size: u32,
}

impl std::fmt::Debug for Paginator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("convention", &self.convention)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl<'a> Paginator<'a> {
    pub fn new(pipeline: &'a RequestPipeline, convention: PageConvention) -> Self {
        Self {
            pipeline,
            convention,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetch one page. `cursor` is `None` for the first page.
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        query: &RequestSpec,
        cursor: Option<&Cursor>,
    ) -> Result<PageResult<T>, ConnectorError> {
        match self.convention {
            PageConvention::Cursor => {
                let token = match cursor {
                    None => None,
                    Some(Cursor::Token(t)) => Some(t.as_str()),
                    Some(other) => {
                        return Err(ConnectorError::Validation(format!(
                            "Cursor pagination cannot resume from {other:?}"
                        )))
                    }
                };
                let mut spec = query
                    .clone()
                    .set_query("limit", self.page_size.to_string());
                if let Some(t) = token {
                    spec = spec.set_query("cursor", t);
                }
                let page: CursorPage<T> = self.pipeline.execute_json(&spec).await?;
                let next = next_cursor(
                    token,
                    self.page_size,
                    page.next_cursor,
                    page.has_more,
                    page.items.len(),
                )?;
                Ok(PageResult {
                    items: page.items,
                    next,
                    total: page.total,
                })
            }
            PageConvention::Offset => {
                let (offset, limit) = match cursor {
                    None => (0, self.page_size),
                    Some(Cursor::Offset { offset, limit }) => (*offset, *limit),
                    Some(other) => {
                        return Err(ConnectorError::Validation(format!(
                            "Offset pagination cannot resume from {other:?}"
                        )))
                    }
                };
                let spec = query
                    .clone()
                    .set_query("offset", offset.to_string())
                    .set_query("limit", limit.to_string());
                let page: OffsetPage<T> = self.pipeline.execute_json(&spec).await?;
                let next = next_offset(offset, limit, page.items.len(), page.total);
                Ok(PageResult {
                    items: page.items,
                    next,
                    total: page.total,
                })
            }
        }
    }

    /// Lazily stream every item of the collection in server order. The stream
    /// ends with the first page-fetch error.
    pub fn fetch_all<T>(
        &self,
        query: RequestSpec,
    ) -> impl Stream<Item = Result<T, ConnectorError>> + 'a
    where
        T: DeserializeOwned + 'a,
    {
        let paginator = *self;
        let start = WalkState {
            next: Some(None),
            seen: HashSet::new(),
            yielded: 0,
        };

        stream::try_unfold(start, move |mut state| {
            let query = query.clone();
            async move {
                let Some(cursor) = state.next.take() else {
                    return Ok(None);
                };
                let page: PageResult<T> = paginator.fetch_page(&query, cursor.as_ref()).await?;
                if let Some(Cursor::Token(token)) = &page.next {
                    if !state.seen.insert(token.clone()) {
                        return Err(ConnectorError::ProtocolError(format!(
                            "Provider returned cursor '{token}' twice"
                        )));
                    }
                }
                tracing::debug!(
                    items = page.items.len(),
                    has_more = page.has_more(),
                    "Fetched page"
                );
                state.yielded += page.items.len() as u64;
                let satisfied = page.total.is_some_and(|t| state.yielded >= t);
                state.next = if satisfied { None } else { page.next.map(Some) };
                Ok::<_, ConnectorError>(Some((page.items, state)))
            }
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
        .try_flatten()
    }

    /// Collect every item into memory.
    pub async fn collect_all<T>(&self, query: RequestSpec) -> Result<Vec<T>, ConnectorError>
    where
        T: DeserializeOwned + 'a,
    {
        self.fetch_all(query).try_collect().await
    }
}

struct WalkState {
    /// `None` when exhausted; `Some(None)` before the first page.
    next: Option<Option<Cursor>>,
    seen: HashSet<String>,
    /// Items handed out so far, checked against a declared `total`.
    yielded: u64,
}

fn next_cursor(
    current: Option<&str>,
    page_size: u32,
    next: Option<String>,
    has_more: Option<bool>,
    len: usize,
) -> Result<Option<Cursor>, ConnectorError> {
    let Some(next) = next.filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if has_more == Some(false) || len == 0 || len < page_size as usize {
        return Ok(None);
    }
    if current == Some(next.as_str()) {
        return Err(ConnectorError::ProtocolError(format!(
            "Provider returned the same cursor '{next}' again"
        )));
    }
    Ok(Some(Cursor::Token(next)))
}

fn next_offset(offset: u64, limit: u32, len: usize, total: Option<u64>) -> Option<Cursor> {
    let consumed = offset + len as u64;
    let short = len < limit as usize;
    let satisfied = total.is_some_and(|t| consumed >= t);
    if len == 0 || short || satisfied {
        None
    } else {
        Some(Cursor::Offset {
            offset: consumed,
            limit,
        })
    }
}
