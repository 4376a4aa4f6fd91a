use serde::Serialize;

/// One page of a paginated listing.
///
/// Remote services signal pagination out of band (response headers, bundle links). Clients turn
/// those signals into a `Page` so the continuation is an explicit value the caller can hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque continuation token, usually the absolute URL of the next page.
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Total number of matches, when the remote service reports it.
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, total: Option<u64>) -> Self {
        let next_cursor = next_cursor.filter(|c| !c.trim().is_empty());
        Self {
            items,
            has_more: next_cursor.is_some(),
            next_cursor,
            total,
        }
    }

    /// A page with no continuation.
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None, None)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            has_more: self.has_more,
            total: self.total,
        }
    }
}
