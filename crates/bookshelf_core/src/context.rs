//! crates/bookshelf_core/src/context.rs
//!
//! The application context handed to every screen. It replaces a process-wide
//! global: whoever builds it decides which backends are used, `start` restores
//! the previous session, and book access is only available while someone is
//! signed in.

use std::sync::Arc;
use tracing::info;

use crate::books::{BookCollection, DEFAULT_PAGE_SIZE};
use crate::domain::Session;
use crate::ports::BookStore;
use crate::session::SessionManager;

pub struct AppContext {
    sessions: SessionManager,
    books: Arc<dyn BookStore>,
    page_size: usize,
}

impl AppContext {
    pub fn new(sessions: SessionManager, books: Arc<dyn BookStore>) -> Self {
        Self {
            sessions,
            books,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Restores whatever session survived the last run.
    pub async fn start(&self) -> Option<Session> {
        let restored = self.sessions.restore_session().await;
        info!(restored = restored.is_some(), "Application context started.");
        restored
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The signed-in user's collection, or `None` when nobody is signed in.
    pub async fn books(&self) -> Option<BookCollection> {
        let session = self.sessions.current().await?;
        Some(BookCollection::new(Arc::clone(&self.books), session.user_id).with_page_size(self.page_size))
    }

    /// Waits for outstanding profile mirrors, then ends the session.
    pub async fn logout(&self) {
        self.sessions.flush_mirrors().await;
        self.sessions.logout().await;
    }

    /// Lets background work finish without ending the session.
    pub async fn shutdown(&self) {
        self.sessions.flush_mirrors().await;
        info!("Application context shut down.");
    }
}
