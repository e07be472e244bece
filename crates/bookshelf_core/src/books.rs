//! crates/bookshelf_core/src/books.rs
//!
//! The book collection accessor: paginated listing, single-record mutation and
//! live subscriptions over one user's books.
//!
//! A `BookCollection` is scoped to the user id it was built with. It does not
//! check that id against the active session; callers obtain collections through
//! `AppContext::books`, which only hands them out for the signed-in user.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{
    BookDraft, BookId, BookPage, BookPatch, BookRecord, BookStatus, CollectionScope,
    CollectionStats, ListQuery,
};
use crate::error::{CoreError, CoreResult};
use crate::ports::{BookStore, ChangeFeed};
use crate::subscription::SubscriptionHandle;
use crate::validation;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Clone)]
pub struct BookCollection {
    store: Arc<dyn BookStore>,
    user_id: String,
    page_size: usize,
}

impl BookCollection {
    pub fn new(store: Arc<dyn BookStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides the fixed page size. Zero is treated as one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    // --- Mutations ---

    /// Stores a new book. Invalid drafts are rejected before the backend is contacted.
    pub async fn create(&self, draft: BookDraft) -> CoreResult<BookRecord> {
        validation::validate_draft(&draft)?;
        let record = self.store.insert_book(&self.user_id, &draft).await?;
        info!(user_id = %self.user_id, book_id = %record.id, "Book created.");
        Ok(record)
    }

    pub async fn get(&self, id: &BookId) -> CoreResult<BookRecord> {
        Ok(self.store.get_book(&self.user_id, id).await?)
    }

    pub async fn update(&self, id: &BookId, patch: BookPatch) -> CoreResult<()> {
        validation::validate_patch(&patch)?;
        self.store.update_book(&self.user_id, id, &patch).await?;
        debug!(user_id = %self.user_id, book_id = %id, "Book updated.");
        Ok(())
    }

    pub async fn delete(&self, id: &BookId) -> CoreResult<()> {
        self.store.delete_book(&self.user_id, id).await?;
        info!(user_id = %self.user_id, book_id = %id, "Book deleted.");
        Ok(())
    }

    /// Flips the favorite flag and returns the new value.
    ///
    /// This is a read followed by a separate write, not a compare-and-swap: two
    /// clients toggling the same record concurrently can both read the same
    /// value, in which case the last write wins.
    pub async fn toggle_favorite(&self, id: &BookId) -> CoreResult<bool> {
        let current = self.store.get_book(&self.user_id, id).await?;
        let favorite = !current.favorite;
        self.store
            .update_book(&self.user_id, id, &BookPatch::favorite(favorite))
            .await?;
        debug!(user_id = %self.user_id, book_id = %id, favorite, "Favorite toggled.");
        Ok(favorite)
    }

    /// Any status may follow any other; each call is persisted on its own.
    pub async fn set_status(&self, id: &BookId, status: BookStatus) -> CoreResult<()> {
        self.store
            .update_book(&self.user_id, id, &BookPatch::status(status))
            .await?;
        debug!(user_id = %self.user_id, book_id = %id, status = status.as_str(), "Status changed.");
        Ok(())
    }

    // --- Listing ---

    /// Fetches one page ordered by `query.sort_field` and applies the search,
    /// genre and status filters to that page only.
    ///
    /// `next_cursor` continues the unfiltered sequence, so a filtered page may
    /// hold fewer than `page_size` records while more matches exist later.
    /// A cursor is not stable across concurrent inserts or deletions.
    pub async fn list(&self, query: &ListQuery) -> CoreResult<BookPage> {
        let page = self
            .store
            .fetch_page(
                &self.user_id,
                query.sort_field,
                self.page_size,
                query.page_cursor.as_ref(),
            )
            .await?;

        let fetched = page.records.len();
        let records: Vec<BookRecord> = page
            .records
            .into_iter()
            .filter(|record| query.matches(record))
            .collect();
        debug!(user_id = %self.user_id, fetched, kept = records.len(), "Fetched book page.");

        Ok(BookPage {
            records,
            next_cursor: page.next_cursor,
        })
    }

    // --- Live updates ---

    /// Calls `on_change` with the current record and again after every change
    /// to it. Snapshots taken while the record does not exist are skipped, and
    /// so are snapshots equal to the last one delivered (the backend wakes the
    /// feed for changes anywhere in the shelf).
    pub async fn subscribe<F>(&self, id: &BookId, mut on_change: F) -> CoreResult<SubscriptionHandle>
    where
        F: FnMut(BookRecord) + Send + 'static,
    {
        let feed = self.store.watch_book(&self.user_id, id).await?;
        let feed: ChangeFeed<BookRecord> = feed
            .filter_map(|snapshot| async move { snapshot.transpose() })
            .boxed();
        let mut last: Option<BookRecord> = None;
        Ok(SubscriptionHandle::spawn(format!("book:{}", id), feed, move |record| {
            if last.as_ref() != Some(&record) {
                last = Some(record.clone());
                on_change(record);
            }
        }))
    }

    /// Live list of the records currently marked favorite.
    pub async fn subscribe_favorites<F>(&self, on_change: F) -> CoreResult<SubscriptionHandle>
    where
        F: FnMut(Vec<BookRecord>) + Send + 'static,
    {
        let feed = self
            .store
            .watch_collection(&self.user_id, CollectionScope::FavoritesOnly)
            .await?;
        Ok(SubscriptionHandle::spawn(
            format!("favorites:{}", self.user_id),
            feed,
            on_change,
        ))
    }

    /// Returns the current statistics and keeps `on_change` informed of later
    /// ones. Every notification triggers a full recount over the collection.
    pub async fn subscribe_collection_stats<F>(
        &self,
        on_change: F,
    ) -> CoreResult<(CollectionStats, SubscriptionHandle)>
    where
        F: FnMut(CollectionStats) + Send + 'static,
    {
        let mut feed = self
            .store
            .watch_collection(&self.user_id, CollectionScope::All)
            .await?
            .map(|snapshot| snapshot.map(|records| CollectionStats::from_records(&records)));

        let initial = feed
            .next()
            .await
            .ok_or_else(|| CoreError::Backend("collection feed closed before first snapshot".to_string()))??;

        let handle = SubscriptionHandle::spawn(format!("stats:{}", self.user_id), feed.boxed(), on_change);
        Ok((initial, handle))
    }
}
