/// Offset/limit pair for the next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub limit: usize,
}

/// Offset pagination state for one scope.
///
/// The cursor has no concurrency guard. The owning controller must not ask for
/// another page while one is in flight or after the cursor is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    offset: usize,
    page_size: usize,
    exhausted: bool,
}

impl PaginationCursor {
    pub const DEFAULT_PAGE_SIZE: usize = 15;

    /// A zero page size falls back to [`Self::DEFAULT_PAGE_SIZE`].
    pub fn new(page_size: usize) -> Self {
        let page_size = if page_size == 0 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self {
            offset: 0,
            page_size,
            exhausted: false,
        }
    }

    /// The window for the upcoming fetch. Does not advance the cursor.
    pub fn next_page(&self) -> PageWindow {
        PageWindow {
            offset: self.offset,
            limit: self.page_size,
        }
    }

    /// Advance past a fetched page of `count` records.
    ///
    /// Ignored once exhausted: only [`reset`](Self::reset) re-opens a cursor.
    pub fn record_page_result(&mut self, count: usize) {
        if self.exhausted {
            tracing::debug!(count, "Page result recorded on exhausted cursor, ignoring");
            return;
        }
        self.offset = self.offset.saturating_add(self.page_size);
        self.exhausted = count < self.page_size;
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.exhausted = false;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_then_short_page() {
        let mut cursor = PaginationCursor::new(15);
        cursor.record_page_result(15);
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.offset(), 15);

        cursor.record_page_result(8);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_next_page_does_not_mutate() {
        let cursor = PaginationCursor::new(10);
        assert_eq!(cursor.next_page(), PageWindow { offset: 0, limit: 10 });
        assert_eq!(cursor.next_page(), PageWindow { offset: 0, limit: 10 });
    }

    #[test]
    fn test_reset_reopens_cursor() {
        let mut cursor = PaginationCursor::new(5);
        cursor.record_page_result(5);
        cursor.record_page_result(0);
        assert!(cursor.is_exhausted());

        cursor.reset();
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.next_page(), PageWindow { offset: 0, limit: 5 });
    }

    #[test]
    fn test_zero_page_size_uses_default() {
        let cursor = PaginationCursor::new(0);
        assert_eq!(cursor.page_size(), PaginationCursor::DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_empty_first_page_exhausts() {
        let mut cursor = PaginationCursor::new(15);
        cursor.record_page_result(0);
        assert!(cursor.is_exhausted());
    }

    proptest! {
        #[test]
        fn prop_exhausted_iff_a_short_page_was_seen(
            page_size in 1usize..20,
            counts in prop::collection::vec(0usize..25, 0..12),
        ) {
            let mut cursor = PaginationCursor::new(page_size);
            let mut was_exhausted = false;
            for count in counts {
                let expected = was_exhausted || count < page_size;
                cursor.record_page_result(count);
                prop_assert_eq!(cursor.is_exhausted(), expected);
                // Never reverts without reset
                prop_assert!(!was_exhausted || cursor.is_exhausted());
                was_exhausted = cursor.is_exhausted();
            }
        }
    }
}
