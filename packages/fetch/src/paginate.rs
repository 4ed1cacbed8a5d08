//! The paginated fetch loop.
//!
//! [`Paginator`] yields one accepted page per call and knows when to stop;
//! [`fetch_all`] drains it into an [`Accumulator`].
//!
//! Termination:
//!
//! * a page with zero records always ends the fetch, whatever the total
//!   hint says;
//! * a page with fewer records than the limit is the last page;
//! * in page mode, a provider-reported total ends the fetch once
//!   `page * limit >= found`;
//! * a page that exhausts its retry budget ends the fetch early
//!   ([`Completion::Abandoned`]).

use envseries_fetch_models::{FetchConfig, FetchRequest, PageResult, PaginationMode, Record};

use crate::accumulator::Accumulator;
use crate::envelope::parse_page;
use crate::retry::{Delivery, send_with_retry};
use crate::transport::Transport;
use crate::{Completion, FetchError, RequestError};

/// Position of the next page to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Offset(u64),
    Page(u32),
}

/// What [`Paginator::next_page`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PageStep {
    /// An accepted page.
    Page(PageResult),
    /// There are no more pages.
    Finished(Completion),
}

/// Lazily walks the pages of one [`FetchRequest`].
pub struct Paginator<'a> {
    transport: &'a dyn Transport,
    request: &'a FetchRequest,
    config: &'a FetchConfig,
    cursor: Cursor,
    pages_accepted: u32,
    finished: Option<Completion>,
}

impl<'a> Paginator<'a> {
    /// Creates a paginator positioned at the first page.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] if the page size is zero.
    pub fn new(
        transport: &'a dyn Transport,
        request: &'a FetchRequest,
        config: &'a FetchConfig,
    ) -> Result<Self, FetchError> {
        if request.limit == 0 {
            return Err(FetchError::InvalidRequest(format!(
                "page size for {} must be positive",
                request.endpoint
            )));
        }

        let cursor = match request.pagination {
            PaginationMode::Offset => Cursor::Offset(request.start_offset),
            PaginationMode::Page => Cursor::Page(1),
        };

        Ok(Self {
            transport,
            request,
            config,
            cursor,
            pages_accepted: 0,
            finished: None,
        })
    }

    /// Number of pages accepted so far.
    #[must_use]
    pub const fn pages_accepted(&self) -> u32 {
        self.pages_accepted
    }

    /// Requests the next page.
    ///
    /// Once this returns [`PageStep::Finished`] or an error, every further
    /// call returns [`PageStep::Finished`] without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the page failed fatally or its body is
    /// malformed.
    pub async fn next_page(&mut self) -> Result<PageStep, RequestError> {
        if let Some(completion) = self.finished {
            return Ok(PageStep::Finished(completion));
        }

        if let Some(max) = self.config.max_pages
            && self.pages_accepted >= max
        {
            log::info!("Reached max pages ({max}) for {}, stopping", self.request.endpoint);
            return Ok(self.finish(Completion::PageLimit));
        }

        if self.pages_accepted > 0 && !self.config.page_delay().is_zero() {
            tokio::time::sleep(self.config.page_delay()).await;
        }

        let query = self.page_query();
        log::debug!("Fetching {} {:?}", self.request.endpoint, self.cursor);

        let delivery = send_with_retry(
            self.transport,
            &self.request.endpoint,
            &query,
            &self.config.retry,
        )
        .await
        .inspect_err(|_| self.finished = Some(Completion::Complete))?;

        let response = match delivery {
            Delivery::Delivered(response) => response,
            Delivery::Abandoned(state) => {
                return Ok(self.finish(Completion::Abandoned {
                    page: self.pages_accepted + 1,
                    attempts: state.attempt,
                    last_status: state.last_status,
                }));
            }
        };

        let page = parse_page(&response.body, response.status).map_err(|message| {
            self.finished = Some(Completion::Complete);
            RequestError::Malformed {
                endpoint: self.request.endpoint.clone(),
                message,
            }
        })?;

        self.pages_accepted += 1;
        let count = page.len();

        if self.is_last_page(&page) {
            self.finished = Some(Completion::Complete);
        } else {
            self.advance();
        }

        log::debug!(
            "Page {} of {}: {count} records, last={}",
            self.pages_accepted,
            self.request.endpoint,
            self.finished.is_some()
        );

        Ok(PageStep::Page(page))
    }

    const fn finish(&mut self, completion: Completion) -> PageStep {
        self.finished = Some(completion);
        PageStep::Finished(completion)
    }

    fn page_query(&self) -> Vec<(String, String)> {
        let params = &self.request.params;
        let mut query: Vec<(String, String)> = self
            .request
            .query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        query.push((params.limit_param.clone(), self.request.limit.to_string()));
        match self.cursor {
            Cursor::Offset(offset) => query.push((params.offset_param.clone(), offset.to_string())),
            Cursor::Page(page) => query.push((params.page_param.clone(), page.to_string())),
        }
        query
    }

    fn is_last_page(&self, page: &PageResult) -> bool {
        let count = page.len() as u64;
        let limit = u64::from(self.request.limit);

        if count == 0 || count < limit {
            return true;
        }

        match (self.cursor, page.found) {
            (Cursor::Page(number), Some(found)) => u64::from(number) * limit >= found,
            _ => false,
        }
    }

    fn advance(&mut self) {
        self.cursor = match self.cursor {
            Cursor::Offset(offset) => {
                Cursor::Offset(offset.saturating_add(u64::from(self.request.limit)))
            }
            Cursor::Page(page) => Cursor::Page(page.saturating_add(1)),
        };
    }
}

/// The records of a fetch that did not fail fatally.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Records in arrival order.
    pub records: Vec<Record>,
    /// Pages accepted.
    pub pages: u32,
    /// Whether the result set is known to be complete.
    pub completion: Completion,
}

impl FetchOutcome {
    /// Whether records may be missing.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.completion.is_partial()
    }
}

/// Fetches every page of `request`, accumulating records in arrival order.
///
/// A page that exhausts its retry budget ends the fetch early; the records
/// accepted so far are still returned, with
/// [`Completion::Abandoned`] in the outcome.
///
/// # Errors
///
/// Returns [`FetchError::Aborted`] if a page fails fatally (the error
/// carries the records accepted before it), or
/// [`FetchError::InvalidRequest`] if the request cannot be paginated.
pub async fn fetch_all(
    transport: &dyn Transport,
    request: &FetchRequest,
    config: &FetchConfig,
) -> Result<FetchOutcome, FetchError> {
    let mut paginator = Paginator::new(transport, request, config)?;
    let mut accumulator = Accumulator::new();

    let completion = loop {
        match paginator.next_page().await {
            Ok(PageStep::Page(page)) => accumulator.push_page(page),
            Ok(PageStep::Finished(completion)) => break completion,
            Err(source) => {
                log::error!(
                    "Fetch of {} aborted after {} records: {source}",
                    request.endpoint,
                    accumulator.record_count()
                );
                return Err(FetchError::Aborted {
                    source,
                    partial: accumulator.into_records(),
                });
            }
        }
    };

    if let Completion::Abandoned { page, attempts, .. } = completion {
        log::warn!(
            "Fetch of {} is partial: page {page} abandoned after {attempts} attempts, \
             returning {} records",
            request.endpoint,
            accumulator.record_count()
        );
    } else {
        log::info!(
            "Fetched {} records from {} in {} pages",
            accumulator.record_count(),
            request.endpoint,
            accumulator.page_count()
        );
    }

    Ok(FetchOutcome {
        pages: accumulator.page_count(),
        records: accumulator.into_records(),
        completion,
    })
}
