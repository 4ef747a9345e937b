use serde::Deserialize;

use crate::config::{MAX_POSTS_PER_PAGE, POSTS_PER_PAGE};

/// `?page=2&per_page=10` as sent by clients. Both are optional and
/// clamped rather than rejected.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

/// Resolved window into an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let limit = per_page.clamp(1, MAX_POSTS_PER_PAGE);
        Self {
            offset: (page - 1).saturating_mul(limit),
            limit,
        }
    }

    /// Everything, for internal callers that need the full listing.
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }

    pub fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        items.skip(self.offset).take(self.limit).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(1, POSTS_PER_PAGE)
    }
}

impl From<PageQuery> for Page {
    fn from(q: PageQuery) -> Self {
        Page::new(q.page.unwrap_or(1), q.per_page.unwrap_or(POSTS_PER_PAGE))
    }
}
