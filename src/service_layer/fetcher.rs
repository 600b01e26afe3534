//! Paginated Fetcher
//!
//! Aggregates an unbounded collection read into one logical result set. The
//! upstream's pagination metadata is unreliable: the total-count field is
//! sometimes absent and the server may silently cap page sizes below what was
//! requested, so termination degrades from "trust the server's count" to
//! "probe until empty". The policy lives in [`PaginationTracker`] as an
//! explicit state machine so it is testable without a network.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use super::response::{parse_page, ParsedPage};
use super::{Row, ServiceLayerClient};
use crate::cancel::CancelFlag;
use crate::config::FetcherConfig;
use crate::error::{InsightError, Result};

lazy_static! {
    /// `$top=N` inside a caller-supplied query fragment.
    static ref TOP_CLAUSE: Regex = Regex::new(r"(?i)\$top=\d+").unwrap();
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub resource: String,
    /// Raw OData query fragment (`$filter=...&$orderby=...`), possibly empty.
    pub filter: String,
    pub row_limit: Option<u64>,
    pub paginate: bool,
}

/// Why a fetch stopped. `Exhausted` and `CountSatisfied` both mean the data
/// ran out; the distinction matters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CountSatisfied,
    LimitReached,
    Exhausted,
    SafetyCeiling,
    SinglePage,
}

#[derive(Debug)]
pub struct RowSet {
    pub rows: Vec<Row>,
    pub total_hint: Option<u64>,
    pub pages_fetched: u32,
    pub stop: StopReason,
}

/// Decision after observing one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Keep requesting pages.
    Probing,
    /// Last page was empty; re-probe the same offset in case it was a
    /// transient glitch.
    DrainingTail,
    /// Enough consecutive empty pages: definitive end of data.
    Exhausted,
    /// Accumulated rows reached the caller's limit.
    LimitReached,
    /// Accumulated rows reached the upstream-reported total.
    CountSatisfied,
    /// Hard ceiling hit; terminate regardless of other signals.
    SafetyCeiling,
}

/// Per-execution pagination state. Created at the start of a fetch, mutated
/// once per page, discarded at termination.
pub(crate) struct PaginationTracker {
    config: FetcherConfig,
    row_limit: Option<u64>,
    rows_fetched: u64,
    next_offset: u64,
    total_hint: Option<u64>,
    empty_streak: u32,
    last_page_rows: Option<u64>,
    same_count_streak: u32,
}

impl PaginationTracker {
    pub(crate) fn new(config: FetcherConfig, row_limit: Option<u64>) -> Self {
        Self {
            config,
            row_limit,
            rows_fetched: 0,
            next_offset: 0,
            total_hint: None,
            empty_streak: 0,
            last_page_rows: None,
            same_count_streak: 0,
        }
    }

    pub(crate) fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn total_hint(&self) -> Option<u64> {
        self.total_hint
    }

    /// Page size for the next request, bounded by what the limit still
    /// allows.
    pub(crate) fn records_to_fetch(&self) -> u64 {
        match self.row_limit {
            Some(limit) => self.config.page_size.min(limit.saturating_sub(self.rows_fetched)),
            None => self.config.page_size,
        }
    }

    pub(crate) fn limit_reached(&self) -> bool {
        matches!(self.row_limit, Some(limit) if self.rows_fetched >= limit)
    }

    /// Records the total-count hint from the first page that carries one.
    /// Later pages never override it.
    pub(crate) fn record_total_hint(&mut self, hint: Option<u64>) {
        if self.total_hint.is_none() {
            if let Some(hint) = hint {
                debug!(total = hint, "upstream reported an inline total count");
                self.total_hint = Some(hint);
            }
        }
    }

    pub(crate) fn record_page(&mut self, received: u64) -> Phase {
        if received == 0 {
            self.empty_streak += 1;
            self.last_page_rows = Some(0);
            if self.empty_streak >= self.config.empty_page_tolerance {
                return Phase::Exhausted;
            }
            return Phase::DrainingTail;
        }

        self.empty_streak = 0;
        self.rows_fetched += received;
        // Advance by rows actually received, never by the nominal page size:
        // a capped upstream would otherwise skip or re-serve rows.
        self.next_offset += received;

        if self.last_page_rows == Some(received) {
            self.same_count_streak += 1;
            if self.same_count_streak == self.config.repeated_count_warn_streak + 1 {
                warn!(
                    page_rows = received,
                    streak = self.same_count_streak,
                    "upstream keeps returning identical page sizes; likely a server-imposed cap"
                );
            }
        } else {
            self.same_count_streak = 1;
            self.last_page_rows = Some(received);
        }

        if let Some(total) = self.total_hint {
            if self.rows_fetched >= total {
                return Phase::CountSatisfied;
            }
        }
        if self.limit_reached() {
            return Phase::LimitReached;
        }
        if self.rows_fetched >= self.config.safety_row_ceiling {
            warn!(
                rows = self.rows_fetched,
                "safety ceiling reached; terminating pagination"
            );
            return Phase::SafetyCeiling;
        }
        Phase::Probing
    }
}

pub struct PaginatedFetcher {
    client: ServiceLayerClient,
    config: FetcherConfig,
}

impl PaginatedFetcher {
    pub fn new(client: ServiceLayerClient, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    pub async fn fetch(
        &self,
        token: &str,
        request: &FetchRequest,
        cancel: &CancelFlag,
    ) -> Result<RowSet> {
        if !request.paginate {
            return self.fetch_single(token, request, cancel).await;
        }

        // The fetcher owns pagination; a caller-supplied $top would conflict
        // with it and is treated purely as the caller's row-limit clause.
        let base_filter = strip_top_clause(&request.filter);
        let mut tracker = PaginationTracker::new(self.config.clone(), request.row_limit);
        let mut rows: Vec<Row> = Vec::new();
        let mut pages: u32 = 0;

        loop {
            cancel.check()?;

            if tracker.limit_reached() || tracker.records_to_fetch() == 0 {
                return Ok(RowSet {
                    rows,
                    total_hint: tracker.total_hint(),
                    pages_fetched: pages,
                    stop: StopReason::LimitReached,
                });
            }

            let query = build_page_query(
                &base_filter,
                tracker.next_offset(),
                tracker.records_to_fetch(),
            );
            let (status, body) = self.client.get_raw(token, &request.resource, &query).await?;
            cancel.check()?;

            if !(200..300).contains(&status) {
                return Err(InsightError::Fetch {
                    status: Some(status),
                    message: summarize_error_body(&body),
                });
            }
            pages += 1;

            match parse_page(&body)? {
                ParsedPage::Collection {
                    rows: page_rows,
                    total_hint,
                } => {
                    tracker.record_total_hint(total_hint);

                    let received = page_rows.len() as u64;
                    let appended = match request.row_limit {
                        Some(limit) => (limit - rows.len() as u64).min(received),
                        None => received,
                    };
                    rows.extend(page_rows.into_iter().take(appended as usize));
                    debug!(
                        page = pages,
                        received,
                        accumulated = rows.len(),
                        "fetched page"
                    );

                    let stop = match tracker.record_page(appended) {
                        Phase::Probing | Phase::DrainingTail => continue,
                        Phase::Exhausted => StopReason::Exhausted,
                        Phase::LimitReached => StopReason::LimitReached,
                        Phase::CountSatisfied => StopReason::CountSatisfied,
                        Phase::SafetyCeiling => StopReason::SafetyCeiling,
                    };
                    return Ok(RowSet {
                        rows,
                        total_hint: tracker.total_hint(),
                        pages_fetched: pages,
                        stop,
                    });
                }
                ParsedPage::Single(row) => {
                    if request.row_limit.map_or(true, |limit| (rows.len() as u64) < limit) {
                        rows.push(row);
                    }
                    return Ok(RowSet {
                        rows,
                        total_hint: tracker.total_hint(),
                        pages_fetched: pages,
                        stop: StopReason::SinglePage,
                    });
                }
            }
        }
    }

    /// Single-request mode for small, known-bounded queries: the caller's
    /// filter (including any `$top` of their own) goes through verbatim.
    async fn fetch_single(
        &self,
        token: &str,
        request: &FetchRequest,
        cancel: &CancelFlag,
    ) -> Result<RowSet> {
        cancel.check()?;
        let (status, body) = self
            .client
            .get_raw(token, &request.resource, &request.filter)
            .await?;
        cancel.check()?;

        if !(200..300).contains(&status) {
            return Err(InsightError::Fetch {
                status: Some(status),
                message: summarize_error_body(&body),
            });
        }

        let (mut rows, total_hint) = match parse_page(&body)? {
            ParsedPage::Collection { rows, total_hint } => (rows, total_hint),
            ParsedPage::Single(row) => (vec![row], None),
        };
        if let Some(limit) = request.row_limit {
            rows.truncate(limit as usize);
        }

        Ok(RowSet {
            rows,
            total_hint,
            pages_fetched: 1,
            stop: StopReason::SinglePage,
        })
    }
}

/// Removes any `$top=N` clause and tidies the leftover separators.
pub(crate) fn strip_top_clause(filter: &str) -> String {
    let stripped = TOP_CLAUSE.replace_all(filter, "");
    stripped
        .split('&')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("&")
}

/// The caller's explicit row-limit clause, if their filter carried one.
pub(crate) fn extract_top_clause(filter: &str) -> Option<u64> {
    TOP_CLAUSE
        .find(filter)
        .and_then(|m| m.as_str().split('=').nth(1))
        .and_then(|n| n.parse().ok())
}

fn build_page_query(filter: &str, offset: u64, top: u64) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !filter.is_empty() {
        parts.push(filter.to_string());
    }
    parts.push(format!("$skip={}", offset));
    parts.push(format!("$top={}", top));
    parts.push("$inlinecount=allpages".to_string());
    parts.join("&")
}

/// Service Layer errors nest the useful text at `error.message.value`.
fn summarize_error_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message/value")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "no response body".to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        })
}
