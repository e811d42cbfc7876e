use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

impl Pagination {
    /// Builds a window from 1-based `page` and `page_size` query values.
    /// ---
    /// Missing or zero values fall back to page 1 and
    /// `DEFAULT_PAGE_SIZE`, and the size is capped at `MAX_PAGE_SIZE`.
    pub fn from_page(page: Option<u64>, page_size: Option<u64>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = page_size
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);

        Self {
            limit,
            offset: (page - 1) * limit,
        }
    }

    pub fn page(&self) -> u64 {
        if self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// One page of results plus the unpaginated total.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64) -> Self {
        Self { items, total }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_defaults_and_caps() {
        assert_eq!(
            Pagination::from_page(None, None),
            Pagination {
                limit: 20,
                offset: 0
            }
        );
        assert_eq!(
            Pagination::from_page(Some(3), Some(10)),
            Pagination {
                limit: 10,
                offset: 20
            }
        );
        assert_eq!(Pagination::from_page(Some(2), Some(500)).limit, MAX_PAGE_SIZE);
        assert_eq!(Pagination::from_page(Some(0), Some(0)).offset, 0);
        assert_eq!(Pagination::from_page(Some(4), Some(25)).page(), 4);
    }
}
