//! Restartable cursor pagination.
//!
//! Every list endpoint in the remote API pages with an opaque cursor
//! carried in `response_metadata.next_cursor`. `Pager` turns a page
//! fetcher into a lazy, finite sequence of pages that can be restarted
//! from any previously observed cursor.

use std::future::Future;
use std::marker::PhantomData;

/// One page of results plus the cursor to the next one, if any.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Final page of a sequence.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Lazy walker over a cursor-paginated endpoint.
///
/// Requests within one sequence are strictly sequential: each page needs
/// the cursor from the previous one. The walker does not retry; the
/// fetcher owns its retry/backoff policy and reports only final outcomes.
pub struct Pager<T, E, F> {
    fetch: F,
    cursor: Option<String>,
    done: bool,
    _marker: PhantomData<(T, E)>,
}

impl<T, E, F, Fut> Pager<T, E, F>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    /// Start a fresh sequence from the beginning.
    pub fn new(fetch: F) -> Self {
        Self::resume_from(fetch, None)
    }

    /// Resume a sequence from a saved cursor. `None` starts from the
    /// beginning.
    pub fn resume_from(fetch: F, cursor: Option<String>) -> Self {
        Self {
            fetch,
            cursor,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Cursor that the next call will fetch with, for checkpointing.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Fetch the next page, or `None` once the sequence is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>, E> {
        if self.done {
            return Ok(None);
        }
        let page = (self.fetch)(self.cursor.take()).await?;
        self.cursor = page.next_cursor.filter(|c| !c.is_empty());
        if self.cursor.is_none() {
            self.done = true;
        }
        Ok(Some(page.items))
    }

    /// Drain the remaining pages into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<T>, E> {
        let mut all = Vec::new();
        while let Some(mut items) = self.next_page().await? {
            all.append(&mut items);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves fixed pages keyed by cursor, counting requests.
    fn fixture_fetch(
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut(Option<String>) -> std::future::Ready<Result<Page<u32>, String>> {
        move |cursor| {
            calls.fetch_add(1, Ordering::SeqCst);
            let page = match cursor.as_deref() {
                None => Page {
                    items: vec![1, 2],
                    next_cursor: Some("c1".to_string()),
                },
                Some("c1") => Page {
                    items: vec![3, 4],
                    next_cursor: Some("c2".to_string()),
                },
                Some("c2") => Page::last(vec![5]),
                other => panic!("unexpected cursor {other:?}"),
            };
            std::future::ready(Ok(page))
        }
    }

    #[tokio::test]
    async fn test_collects_all_pages_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = Pager::new(fixture_fetch(calls.clone()));
        let items = pager.collect_all().await.unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resume_from_saved_cursor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pager = Pager::resume_from(fixture_fetch(calls.clone()), Some("c1".to_string()));
        assert_eq!(pager.cursor(), Some("c1"));

        assert_eq!(pager.next_page().await.unwrap(), Some(vec![3, 4]));
        // The cursor now names the next unfetched page, ready to persist
        // as a checkpoint.
        assert_eq!(pager.cursor(), Some("c2"));

        assert_eq!(pager.next_page().await.unwrap(), Some(vec![5]));
        assert_eq!(pager.cursor(), None);
        assert_eq!(pager.next_page().await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pager_yields_none() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pager = Pager::resume_from(fixture_fetch(calls.clone()), Some("c2".to_string()));
        assert_eq!(pager.next_page().await.unwrap(), Some(vec![5]));
        assert_eq!(pager.next_page().await.unwrap(), None);
        assert_eq!(pager.next_page().await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_propagates_without_advancing() {
        let mut pager: Pager<u32, String, _> =
            Pager::new(|_cursor: Option<String>| std::future::ready(Err("boom".to_string())));
        assert_eq!(pager.next_page().await.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn test_empty_next_cursor_terminates() {
        // Some endpoints send an empty string instead of omitting the cursor.
        let mut pager = Pager::new(|_cursor: Option<String>| {
            std::future::ready(Ok::<_, String>(Page {
                items: vec![9],
                next_cursor: Some(String::new()),
            }))
        });
        assert_eq!(pager.next_page().await.unwrap(), Some(vec![9]));
        assert_eq!(pager.next_page().await.unwrap(), None);
    }
}
