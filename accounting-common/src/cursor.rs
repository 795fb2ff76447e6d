//! Opaque `"<page>-<size>"` cursors handed out with paged search results.
//!
//! Decoding is lenient: anything malformed or out of range silently falls
//! back to the first page and the maximum page size, part by part, with a
//! warning in the logs. Internal batch paging passes `bypass_limit` to page
//! with sizes above the API ceiling.
use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page_number: u32,
    pub page_size: u32,
}

impl PageCursor {
    pub fn first(max_page_size: u32) -> Self {
        Self {
            page_number: 0,
            page_size: max_page_size,
        }
    }

    /// Rows to skip to reach this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number) * u64::from(self.page_size)
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.page_number, self.page_size)
    }
}

pub fn encode(page_number: i64, page_size: i64, max_page_size: u32, bypass_limit: bool) -> String {
    let page_number = resolve_page_number(page_number, &page_number.to_string());
    let page_size = resolve_page_size(page_size, &page_size.to_string(), max_page_size, bypass_limit);
    PageCursor {
        page_number,
        page_size,
    }
    .to_string()
}

pub fn decode(cursor: Option<&str>, max_page_size: u32, bypass_limit: bool) -> PageCursor {
    let cursor = match cursor.map(str::trim) {
        Some(cursor) if !cursor.is_empty() => cursor,
        _ => {
            debug!("no page cursor provided, using first page");
            return PageCursor::first(max_page_size);
        }
    };

    // Extra separators make the whole cursor malformed, so "1-2-3" is the
    // first page rather than page 1 at the default size.
    let parts: Vec<&str> = cursor.split('-').collect();
    let [page_number, page_size] = parts.as_slice() else {
        warn!(
            cursor,
            "page cursor is not formatted as <page>-<size>, using first page"
        );
        return PageCursor::first(max_page_size);
    };

    // A part that does not parse is treated like an out of range value.
    let parsed_number = page_number.trim().parse::<i64>().unwrap_or(-1);
    let parsed_size = page_size.trim().parse::<i64>().unwrap_or(0);

    PageCursor {
        page_number: resolve_page_number(parsed_number, page_number),
        page_size: resolve_page_size(parsed_size, page_size, max_page_size, bypass_limit),
    }
}

fn resolve_page_number(page_number: i64, raw: &str) -> u32 {
    match u32::try_from(page_number) {
        Ok(page_number) => page_number,
        Err(_) => {
            warn!(page_number = raw, "invalid page number, expected >= 0, using 0");
            0
        }
    }
}

fn resolve_page_size(page_size: i64, raw: &str, max_page_size: u32, bypass_limit: bool) -> u32 {
    let Ok(page_size) = u32::try_from(page_size) else {
        warn!(page_size = raw, max_page_size, "invalid page size, using maximum");
        return max_page_size;
    };
    if page_size == 0 {
        warn!(page_size = raw, max_page_size, "invalid page size, expected > 0, using maximum");
        return max_page_size;
    }
    if !bypass_limit && page_size > max_page_size {
        warn!(page_size = raw, max_page_size, "page size over limit, using maximum");
        return max_page_size;
    }
    page_size
}
