//! Cursor bookkeeping for paginated scheduler listings.

use chrono::{DateTime, Utc};

/// Offset/limit pair for the next list call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: i64,
    pub limit: i64,
}

/// Drives an offset-paginated listing until the remote total is exhausted.
///
/// Offsets only move forward, so one cursor never requests the same offset
/// twice.
#[derive(Debug, Clone)]
pub struct PageCursor {
    limit: i64,
    offset: i64,
    accumulated: i64,
    total: Option<i64>,
    exhausted: bool,
}

impl PageCursor {
    pub fn new(limit: i64) -> Self {
        Self {
            limit: limit.max(1),
            offset: 0,
            accumulated: 0,
            total: None,
            exhausted: false,
        }
    }

    /// The next request to issue, or `None` once the listing is done.
    pub fn next_request(&self) -> Option<PageRequest> {
        if self.exhausted {
            return None;
        }
        if let Some(total) = self.total
            && self.accumulated >= total
        {
            return None;
        }
        Some(PageRequest {
            offset: self.offset,
            limit: self.limit,
        })
    }

    /// Record a received page. `total` is what the remote reported for the
    /// whole listing.
    pub fn advance(&mut self, received: usize, total: i64) {
        self.total = Some(total);
        if received == 0 {
            self.exhausted = true;
            return;
        }
        self.accumulated += received as i64;
        self.offset += self.limit;
    }

    /// Stop regardless of what the remote reported.
    pub fn finish(&mut self) {
        self.exhausted = true;
    }

    pub fn accumulated(&self) -> i64 {
        self.accumulated
    }

    pub fn total(&self) -> Option<i64> {
        self.total
    }
}

/// Time-bounded listing request (`start..=end`, `cursor`, `count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cursor: i64,
    pub count: i64,
}

/// A [`PageCursor`] over a fixed time window that starts at the locally
/// persisted high-water mark.
#[derive(Debug, Clone)]
pub struct RangeCursor {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    pages: PageCursor,
}

impl RangeCursor {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, limit: i64) -> Self {
        Self {
            start,
            end,
            pages: PageCursor::new(limit),
        }
    }

    /// Window starting at `since` (or the epoch when nothing is stored yet)
    /// and ending now.
    pub fn since(since: Option<DateTime<Utc>>, limit: i64) -> Self {
        Self::new(since.unwrap_or(DateTime::UNIX_EPOCH), Utc::now(), limit)
    }

    pub fn next_request(&self) -> Option<RangeRequest> {
        self.pages.next_request().map(|page| RangeRequest {
            start: self.start,
            end: self.end,
            cursor: page.offset,
            count: page.limit,
        })
    }

    pub fn advance(&mut self, received: usize, total: i64) {
        self.pages.advance(received, total);
    }

    pub fn finish(&mut self) {
        self.pages.finish();
    }

    pub fn accumulated(&self) -> i64 {
        self.pages.accumulated()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }
}

/// True when a page holds nothing but the record we already stored last.
///
/// Range listings are inclusive of their start bound, so an unchanged remote
/// answers with exactly the latest known record.
pub fn only_latest_known<T>(
    page: &[T],
    latest: Option<&T>,
    same: impl Fn(&T, &T) -> bool,
) -> bool {
    match (page, latest) {
        ([only], Some(latest)) => same(only, latest),
        _ => false,
    }
}
