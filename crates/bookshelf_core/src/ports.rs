//! crates/bookshelf_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete authenticator, document backend and local
//! key-value persistence.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{
    AuthIdentity, BookDraft, BookId, BookPage, BookPatch, BookRecord, CollectionScope,
    NewProfile, PageCursor, ProfilePatch, SortField, UserProfile,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A rejection from the identity provider. `code` follows the `auth/...` convention.
    #[error("Authentication rejected ({code}): {message}")]
    Auth { code: String, message: String },
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl PortError {
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A live feed of snapshots. The first item is the state at subscription time;
/// each later item is the state after a change reported by the backend.
pub type ChangeFeed<T> = Pin<Box<dyn Stream<Item = PortResult<T>> + Send>>;

/// Provider error codes the core knows how to interpret.
pub mod auth_codes {
    pub const USER_NOT_FOUND: &str = "auth/user-not-found";
    pub const WRONG_PASSWORD: &str = "auth/wrong-password";
    pub const INVALID_CREDENTIAL: &str = "auth/invalid-credential";
    pub const EMAIL_IN_USE: &str = "auth/email-already-in-use";
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait AuthenticatorService: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthIdentity>;

    /// Creates a new identity and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthIdentity>;

    /// Invalidates the provider-side session behind `token`.
    async fn sign_out(&self, token: &str) -> PortResult<()>;

    async fn send_password_reset(&self, email: &str) -> PortResult<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Writes the profile record of `user_id` with `active = true` and a
    /// server-assigned creation time.
    async fn create_profile(&self, user_id: &str, profile: &NewProfile) -> PortResult<()>;

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> PortResult<()>;

    async fn get_profile(&self, user_id: &str) -> PortResult<UserProfile>;

    /// Follows the profile record; `None` while it does not exist.
    async fn watch_profile(&self, user_id: &str) -> PortResult<ChangeFeed<Option<UserProfile>>>;
}

#[async_trait]
pub trait BookStore: Send + Sync {
    // --- Single-record access ---
    /// Stores a new record under `user_id`. The backend assigns the id and both timestamps.
    async fn insert_book(&self, user_id: &str, draft: &BookDraft) -> PortResult<BookRecord>;

    async fn get_book(&self, user_id: &str, id: &BookId) -> PortResult<BookRecord>;

    /// Applies `patch` and refreshes `updated_at`. `NotFound` if the record is absent.
    async fn update_book(&self, user_id: &str, id: &BookId, patch: &BookPatch) -> PortResult<()>;

    async fn delete_book(&self, user_id: &str, id: &BookId) -> PortResult<()>;

    // --- Queries ---
    /// Returns up to `page_size` records ordered by `sort`, starting after `after`.
    /// `next_cursor` is `None` once a page comes back short.
    async fn fetch_page(
        &self,
        user_id: &str,
        sort: SortField,
        page_size: usize,
        after: Option<&PageCursor>,
    ) -> PortResult<BookPage>;

    // --- Change notification ---
    /// Follows one record; `None` once it has been deleted.
    async fn watch_book(&self, user_id: &str, id: &BookId) -> PortResult<ChangeFeed<Option<BookRecord>>>;

    async fn watch_collection(
        &self,
        user_id: &str,
        scope: CollectionScope,
    ) -> PortResult<ChangeFeed<Vec<BookRecord>>>;
}

/// Local string key-value persistence surviving process restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> PortResult<()>;

    async fn remove(&self, key: &str) -> PortResult<()>;
}
