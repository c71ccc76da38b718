//! Paginated fetch for a single partition key
//!
//! A [`PageFetcher`] drives the list-entities call for one key until the
//! server stops returning continuation tokens. Every call goes through the
//! retry policy; pages are handed to the caller as soon as they arrive.

use crate::error::{FetchError, KeyFailure};
use crate::table::auth::TokenProvider;
use crate::table::client::{PageRequest, TableTransport};
use crate::table::retry::{Failure, RetryDecision, RetryPolicy, RetryState, Sleeper};
use crate::table::types::{ContinuationToken, Entity, Page, PartitionKey};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Totals for a key that was fetched to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub pages: u64,
    pub entities: u64,
    pub retries: u64,
    pub bytes: u64,
}

/// A successfully fetched page plus call accounting
struct FetchedPage {
    page: Page,
    retries: u32,
    bytes: u64,
}

/// Fetches every page for one partition key
pub struct PageFetcher {
    transport: Arc<dyn TableTransport>,
    credentials: Arc<dyn TokenProvider>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl PageFetcher {
    pub fn new(
        transport: Arc<dyn TableTransport>,
        credentials: Arc<dyn TokenProvider>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        timeout: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            credentials,
            policy,
            sleeper,
            timeout,
            shutdown,
        }
    }

    /// Fetch all pages for `key`, calling `on_page` for each one in order
    ///
    /// On error the returned [`KeyFailure`] reports how much was already
    /// delivered through `on_page`.
    pub fn fetch<F>(&self, key: &PartitionKey, mut on_page: F) -> Result<FetchSummary, KeyFailure>
    where
        F: FnMut(Page),
    {
        let mut summary = FetchSummary::default();
        let mut seen: HashSet<ContinuationToken> = HashSet::new();
        let mut continuation: Option<ContinuationToken> = None;

        let fail = |summary: &FetchSummary, error: FetchError| KeyFailure {
            key: key.clone(),
            error,
            pages: summary.pages,
            entities: summary.entities,
            retries: summary.retries,
        };

        loop {
            if self.is_cancelled() {
                return Err(fail(&summary, FetchError::Cancelled));
            }

            let fetched = match self.fetch_page(key, continuation.as_ref()) {
                Ok(fetched) => fetched,
                Err((error, retries)) => {
                    summary.retries += retries as u64;
                    return Err(fail(&summary, error));
                }
            };

            summary.pages += 1;
            summary.entities += fetched.page.entities.len() as u64;
            summary.retries += fetched.retries as u64;
            summary.bytes += fetched.bytes;

            let next = fetched.page.continuation.clone();
            trace!(
                key = %key,
                page = summary.pages,
                entities = fetched.page.entities.len(),
                "Page fetched"
            );
            on_page(fetched.page);

            match next {
                None => {
                    debug!(
                        key = %key,
                        pages = summary.pages,
                        entities = summary.entities,
                        "Partition complete"
                    );
                    return Ok(summary);
                }
                Some(token) => {
                    if !seen.insert(token.clone()) {
                        let error = FetchError::ContinuationCycle(token.to_string());
                        return Err(fail(&summary, error));
                    }
                    continuation = Some(token);
                }
            }
        }
    }

    /// Fetch all entities for `key` into memory
    pub fn fetch_all(&self, key: &PartitionKey) -> Result<Vec<Entity>, KeyFailure> {
        let mut entities = Vec::new();
        self.fetch(key, |page| entities.extend(page.entities))?;
        Ok(entities)
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// One page, retried per policy. Errors carry the retries spent.
    fn fetch_page(
        &self,
        key: &PartitionKey,
        continuation: Option<&ContinuationToken>,
    ) -> Result<FetchedPage, (FetchError, u32)> {
        let mut state = RetryState::new();

        loop {
            let token = self
                .credentials
                .token()
                .and_then(|t| t.validate(Utc::now()).map(|_| t))
                .map_err(|e| (FetchError::Auth(e), state.retries))?;

            let request = PageRequest {
                key,
                continuation,
                bearer_token: &token.secret,
                timeout: self.timeout,
            };

            let failure = match self.transport.list_entities(&request) {
                Ok(response) if response.is_success() => {
                    let bytes = response.body.len() as u64;
                    return Page::parse(key, &response.body, response.continuation)
                        .map(|page| FetchedPage {
                            page,
                            retries: state.retries,
                            bytes,
                        })
                        .map_err(|reason| (FetchError::Malformed(reason), state.retries));
                }
                Ok(response) => Failure::Status {
                    status: response.status,
                    retry_after: response.retry_after,
                    body: response.body,
                },
                Err(e) => Failure::Transport(e),
            };

            match self.policy.decide(&mut state, &failure) {
                RetryDecision::Retry(wait) => {
                    warn!(
                        key = %key,
                        retry = state.retries,
                        max = self.policy.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        reason = ?failure,
                        "Transient failure, retrying"
                    );
                    if self.is_cancelled() || !self.sleeper.sleep(wait) {
                        return Err((FetchError::Cancelled, state.retries));
                    }
                }
                RetryDecision::GiveUp(error) => return Err((error, state.retries)),
            }
        }
    }
}
