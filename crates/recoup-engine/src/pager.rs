//! Keyset pagination with a per-run cap.
//!
//! The pager only does the bookkeeping: the caller fetches `next_limit()`
//! rows after `cursor()` and reports back what it got.

/// Keyset pager over cursors of type `C`.
#[derive(Debug, Clone)]
pub struct Pager<C> {
    page_size: u32,
    cap: u64,
    fetched: u64,
    cursor: Option<C>,
    exhausted: bool,
}

impl<C: Clone> Pager<C> {
    /// Start after `cursor` (or from the beginning when `None`).
    pub fn new(page_size: u32, cap: u64, cursor: Option<C>) -> Self {
        Self {
            page_size: page_size.max(1),
            cap,
            fetched: 0,
            cursor,
            exhausted: false,
        }
    }

    /// Rows the next page consumes, or `None` when done.
    fn take(&self) -> Option<u32> {
        if self.exhausted || self.fetched >= self.cap {
            return None;
        }
        let remaining = self.cap - self.fetched;
        Some(u64::from(self.page_size).min(remaining) as u32)
    }

    /// Row limit for the next fetch, or `None` when done.
    ///
    /// One row more than the page consumes is requested, so a page that
    /// ends exactly on the cap still tells whether the keyspace goes on.
    pub fn next_limit(&self) -> Option<u32> {
        self.take().map(|take| take.saturating_add(1))
    }

    /// Position after the last row consumed so far.
    pub fn cursor(&self) -> Option<&C> {
        self.cursor.as_ref()
    }

    /// Record a page fetched with [`next_limit`](Self::next_limit).
    ///
    /// The lookahead row, if any, is dropped from `page`. A page without one
    /// means the keyspace is exhausted.
    pub fn advance<T>(&mut self, page: &mut Vec<T>, cursor_of: impl Fn(&T) -> C) {
        let Some(take) = self.take() else {
            page.clear();
            return;
        };
        if page.len() > take as usize {
            page.truncate(take as usize);
        } else {
            self.exhausted = true;
        }
        self.fetched += page.len() as u64;
        if let Some(last) = page.last() {
            self.cursor = Some(cursor_of(last));
        }
    }

    /// Rows fetched so far.
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    /// `true` when the run stopped at the cap before reaching the end.
    pub fn truncated(&self) -> bool {
        !self.exhausted && self.fetched >= self.cap
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a pager over `0..total` and return the limits requested.
    fn drain(pager: &mut Pager<u32>, total: u32) -> Vec<u32> {
        let mut limits = Vec::new();
        while let Some(limit) = pager.next_limit() {
            limits.push(limit);
            let start = pager.cursor().map_or(0, |c| c + 1);
            let mut page: Vec<u32> = (start..total).take(limit as usize).collect();
            pager.advance(&mut page, |row| *row);
        }
        limits
    }

    #[test]
    fn stops_on_short_page() {
        let mut pager = Pager::new(10, 1_000, None);
        assert_eq!(drain(&mut pager, 25), vec![11, 11, 11]);
        assert_eq!(pager.fetched(), 25);
        assert!(!pager.truncated());
    }

    #[test]
    fn cap_truncates_and_shrinks_last_page() {
        let mut pager = Pager::new(10, 25, None);
        assert_eq!(drain(&mut pager, 100), vec![11, 11, 6]);
        assert!(pager.truncated());
        assert_eq!(pager.cursor(), Some(&24));
    }

    #[test]
    fn resumes_after_cursor() {
        let mut pager = Pager::new(10, 1_000, Some(94));
        assert_eq!(drain(&mut pager, 100), vec![11]);
        assert_eq!(pager.fetched(), 5);
        assert_eq!(pager.cursor(), Some(&99));
    }

    #[test]
    fn empty_keyspace() {
        let mut pager: Pager<u32> = Pager::new(10, 1_000, None);
        assert_eq!(drain(&mut pager, 0), vec![11]);
        assert!(pager.cursor().is_none());
        assert!(!pager.truncated());
    }

    #[test]
    fn keyspace_ending_on_the_cap_is_not_truncated() {
        let mut pager = Pager::new(10, 3, None);
        assert_eq!(drain(&mut pager, 3), vec![4]);
        assert_eq!(pager.fetched(), 3);
        assert!(!pager.truncated());
        assert_eq!(pager.cursor(), Some(&2));
    }

    #[test]
    fn full_page_on_the_cap_with_rows_left_is_truncated() {
        let mut pager = Pager::new(10, 20, None);
        assert_eq!(drain(&mut pager, 21), vec![11, 11]);
        assert_eq!(pager.fetched(), 20);
        assert!(pager.truncated());
        assert_eq!(pager.cursor(), Some(&19));
    }

    #[test]
    fn lookahead_row_is_not_consumed() {
        let mut pager = Pager::new(2, 100, None);
        let mut page = vec![0u32, 1, 2];
        pager.advance(&mut page, |row| *row);
        assert_eq!(page, vec![0, 1]);
        assert_eq!(pager.cursor(), Some(&1));
        assert_eq!(pager.next_limit(), Some(3));
    }

    #[test]
    fn zero_cap_does_nothing() {
        let pager: Pager<u32> = Pager::new(10, 0, None);
        assert!(pager.next_limit().is_none());
    }
}
