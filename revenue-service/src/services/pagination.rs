//! Provider-agnostic pagination driver.
//!
//! The walker only knows the paging protocol: it asks `fetch_page` for a page
//! at some [`Cursor`], hands items out one at a time in provider order, and
//! derives the next cursor from the page it just received. It never assumes the
//! requested page size was honored.

use crate::models::PageStats;
use std::collections::VecDeque;
use std::future::Future;
use thiserror::Error;

/// Upper bound on pages fetched by one walk.
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

/// One page of a list endpoint.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// Position to fetch the next page from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// First page of a last-item-id list.
    Start,
    /// Page following the item with this id.
    After(String),
    /// 1-based page number.
    Page(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// `starting_after=<id of last item>` style lists.
    LastItemId,
    /// `page=<n>` style lists.
    PageNumber,
}

impl CursorMode {
    fn first(self) -> Cursor {
        match self {
            CursorMode::LastItemId => Cursor::Start,
            CursorMode::PageNumber => Cursor::Page(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("page {page} claims more results but its last item has no id")]
    MissingCursor { page: u32 },

    #[error("page {page} repeated cursor '{cursor}'")]
    StalledCursor { page: u32, cursor: String },

    #[error("still claiming more results after {limit} pages")]
    PageLimit { limit: u32 },
}

/// Items that can serve as a last-item-id cursor.
pub trait Cursored {
    fn cursor_id(&self) -> Option<&str>;
}

impl Cursored for serde_json::Value {
    fn cursor_id(&self) -> Option<&str> {
        self.get("id").and_then(|id| id.as_str())
    }
}

pub struct PaginationWalker<T, F> {
    mode: CursorMode,
    fetch_page: F,
    buffer: VecDeque<T>,
    next_cursor: Option<Cursor>,
    stats: PageStats,
    max_pages: u32,
}

impl<T, F, Fut, E> PaginationWalker<T, F>
where
    T: Cursored,
    F: FnMut(Cursor) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    E: From<PaginationError>,
{
    pub fn new(mode: CursorMode, fetch_page: F) -> Self {
        Self {
            mode,
            fetch_page,
            buffer: VecDeque::new(),
            next_cursor: Some(mode.first()),
            stats: PageStats::default(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Next item, fetching another page when the current one is drained.
    /// Returns `Ok(None)` once the list is exhausted.
    pub async fn next(&mut self) -> Result<Option<T>, E> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.stats.items_seen += 1;
                return Ok(Some(item));
            }

            let Some(cursor) = self.next_cursor.take() else {
                return Ok(None);
            };

            let page = (self.fetch_page)(cursor.clone()).await?;
            self.stats.pages += 1;

            if page.items.is_empty() {
                if page.has_more {
                    tracing::warn!(
                        page = self.stats.pages,
                        "Empty page reported more results; stopping"
                    );
                }
                return Ok(None);
            }

            if page.has_more {
                self.next_cursor = Some(self.advance(&cursor, &page.items)?);
            }

            self.buffer.extend(page.items);
        }
    }

    /// Drain the walk into a vector.
    pub async fn collect_all(mut self) -> Result<(Vec<T>, PageStats), E> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok((items, self.stats))
    }

    pub fn stats(&self) -> PageStats {
        self.stats
    }

    fn advance(&self, current: &Cursor, items: &[T]) -> Result<Cursor, PaginationError> {
        let page = self.stats.pages;
        if page >= self.max_pages {
            return Err(PaginationError::PageLimit {
                limit: self.max_pages,
            });
        }
        match self.mode {
            CursorMode::PageNumber => match current {
                Cursor::Page(n) => Ok(Cursor::Page(n + 1)),
                _ => Ok(Cursor::Page(page + 1)),
            },
            CursorMode::LastItemId => {
                let id = items
                    .last()
                    .and_then(|item| item.cursor_id())
                    .ok_or(PaginationError::MissingCursor { page })?;

                if matches!(current, Cursor::After(previous) if previous == id) {
                    return Err(PaginationError::StalledCursor {
                        page,
                        cursor: id.to_string(),
                    });
                }

                Ok(Cursor::After(id.to_string()))
            }
        }
    }
}
