//! Continuation-key paging.
//!
//! Paged operations answer with `cont_yn = "Y"` and a `next_key` while more
//! rows remain. The follow-up request is the same request again with those
//! two values sent back as the `cont-yn`/`next-key` headers. [`Pager`] runs
//! that loop so callers never have to.

use futures::stream::{self, Stream, TryStreamExt};
use tracing::warn;

use super::client::{ApiClient, ApiRequest};
use super::envelope::ResponseEnvelope;
use crate::error::Result;

/// The `cont-yn`/`next-key` pair. Empty fields are never sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Continuation {
    pub cont_yn: String,
    pub next_key: String,
}

impl Continuation {
    /// No continuation: the first page of a paged fetch.
    pub fn none() -> Self {
        Self::default()
    }

    /// Cursor pointing at the page after `next_key`.
    pub fn next(next_key: impl Into<String>) -> Self {
        Self { cont_yn: "Y".to_string(), next_key: next_key.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.cont_yn.is_empty() && self.next_key.is_empty()
    }

    /// True when the gateway says another page is waiting.
    pub fn has_more(&self) -> bool {
        self.cont_yn == "Y" && !self.next_key.is_empty()
    }
}

/// Lazily walks every page of one request.
///
/// Each call to [`Pager::pages`] starts over from the first page, so a
/// `Pager` can be reused to re-read a result set.
#[derive(Clone)]
pub struct Pager {
    client: ApiClient,
    request: ApiRequest,
    max_pages: Option<usize>,
}

impl Pager {
    pub fn new(client: ApiClient, request: ApiRequest) -> Self {
        Self { client, request: request.continuation(Continuation::none()), max_pages: None }
    }

    /// Stop after `limit` pages even if the gateway reports more.
    pub fn max_pages(mut self, limit: usize) -> Self {
        self.max_pages = Some(limit);
        self
    }

    /// A fresh stream of envelopes, first page first.
    ///
    /// The stream ends after the first page without a continuation, at a
    /// page that hands back the same `next_key` it was fetched with, or at
    /// the first error.
    pub fn pages(&self) -> impl Stream<Item = Result<ResponseEnvelope>> + '_ {
        stream::try_unfold(
            (Some(Continuation::none()), 0_usize),
            move |(cursor, fetched)| async move {
                let Some(continuation) = cursor else {
                    return Ok(None);
                };
                if let Some(limit) = self.max_pages {
                    if fetched >= limit {
                        warn!(
                            api_id = %self.request.operation_id,
                            limit,
                            "page limit reached with more pages pending"
                        );
                        return Ok(None);
                    }
                }

                let request = self.request.clone().continuation(continuation);
                let envelope = self.client.execute(&request).await?;
                let next = envelope.continuation().filter(|next| {
                    let repeated = next.next_key == request.continuation.next_key;
                    if repeated {
                        warn!(
                            api_id = %self.request.operation_id,
                            next_key = %next.next_key,
                            "gateway repeated the cursor just sent; stopping"
                        );
                    }
                    !repeated
                });

                Ok(Some((envelope, (next, fetched + 1))))
            },
        )
    }

    /// Fetches every page into memory.
    pub async fn collect_pages(&self) -> Result<Vec<ResponseEnvelope>> {
        self.pages().try_collect().await
    }
}
