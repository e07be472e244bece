//! crates/bookshelf_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database; only `Session` carries a
//! serialization format, because it is persisted locally between restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//=========================================================================================
// Identity
//=========================================================================================

/// The locally held proof of authenticated identity plus cached profile fields.
///
/// At most one exists per process, owned by the `SessionManager`. The token is
/// never empty while a `Session` exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub email: String,
    pub session_token: String,
}

impl Session {
    /// A persisted session is only usable if it still carries an identity and a token.
    pub fn is_well_formed(&self) -> bool {
        !self.user_id.trim().is_empty() && !self.session_token.is_empty()
    }
}

/// What the authenticator hands back after a successful sign-in or sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub id_token: String,
}

/// Partial update of the cached profile fields of a `Session`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.email.is_none()
    }
}

// Profile record stored in the document backend, one per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields written when a profile is first created. `active` and `created_at`
/// are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub name: Option<String>,
}

impl From<&SessionPatch> for ProfilePatch {
    fn from(patch: &SessionPatch) -> Self {
        Self {
            email: patch.email.clone(),
            name: patch.display_name.clone(),
        }
    }
}

//=========================================================================================
// Books
//=========================================================================================

/// Opaque, backend-assigned identifier of a book record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookId(String);

impl BookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reading status of a book. Any status may move to any other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookStatus {
    #[default]
    WantToRead,
    Reading,
    Read,
}

impl BookStatus {
    pub const ALL: [BookStatus; 3] = [BookStatus::WantToRead, BookStatus::Reading, BookStatus::Read];

    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::WantToRead => "want_to_read",
            BookStatus::Reading => "reading",
            BookStatus::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// One user-owned book entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRecord {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub year: i32,
    pub genre: String,
    pub status: BookStatus,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields a user fills in to create a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDraft {
    pub title: String,
    pub author: String,
    pub year: i32,
    pub genre: String,
    pub status: BookStatus,
    pub favorite: bool,
}

impl BookDraft {
    /// A draft with the default status (`WantToRead`) and not marked favorite.
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        year: i32,
        genre: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            year,
            genre: genre.into(),
            status: BookStatus::default(),
            favorite: false,
        }
    }
}

/// Partial update of a book. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub status: Option<BookStatus>,
    pub favorite: Option<bool>,
}

impl BookPatch {
    pub fn status(status: BookStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn favorite(favorite: bool) -> Self {
        Self {
            favorite: Some(favorite),
            ..Self::default()
        }
    }

    /// Applies the patch to a record in place. Does not touch timestamps.
    pub fn apply_to(&self, record: &mut BookRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(author) = &self.author {
            record.author = author.clone();
        }
        if let Some(year) = self.year {
            record.year = year;
        }
        if let Some(genre) = &self.genre {
            record.genre = genre.clone();
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(favorite) = self.favorite {
            record.favorite = favorite;
        }
    }
}

//=========================================================================================
// Listing
//=========================================================================================

/// Server-side ordering for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    /// Alphabetical, ascending.
    Title,
    /// Most recent first.
    #[default]
    CreatedAt,
}

impl SortField {
    /// Name recorded in page cursors.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::CreatedAt => "created_at",
        }
    }
}

/// Opaque continuation token marking a position in a paginated result.
///
/// Only the adapter that produced a cursor knows how to read it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A list view's query.
///
/// Only `sort_field`, `page_cursor` and the page size reach the backend. The
/// search, genre and status filters are applied to the page after it has been
/// fetched, so a filtered page can come back shorter than the page size (or
/// empty) even though matching records exist further on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub search_text: String,
    pub genre_filter: Option<String>,
    pub status_filter: Option<BookStatus>,
    pub sort_field: SortField,
    pub page_cursor: Option<PageCursor>,
}

impl ListQuery {
    /// Whether a fetched record passes the client-side filters.
    pub fn matches(&self, record: &BookRecord) -> bool {
        let search = self.search_text.trim().to_lowercase();
        if !search.is_empty()
            && !record.title.to_lowercase().contains(&search)
            && !record.author.to_lowercase().contains(&search)
        {
            return false;
        }
        if let Some(genre) = &self.genre_filter {
            if &record.genre != genre {
                return false;
            }
        }
        if let Some(status) = self.status_filter {
            if record.status != status {
                return false;
            }
        }
        true
    }
}

/// One page as returned by the backend, before client-side filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPage {
    pub records: Vec<BookRecord>,
    pub next_cursor: Option<PageCursor>,
}

/// Which part of a user's collection a change feed follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionScope {
    All,
    FavoritesOnly,
}

/// Aggregate counts over a user's whole collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub total: usize,
    pub read: usize,
    pub reading: usize,
    pub favorites: usize,
}

impl CollectionStats {
    /// Full recount over a snapshot.
    pub fn from_records(records: &[BookRecord]) -> Self {
        records.iter().fold(Self::default(), |mut stats, record| {
            stats.total += 1;
            match record.status {
                BookStatus::Read => stats.read += 1,
                BookStatus::Reading => stats.reading += 1,
                BookStatus::WantToRead => {}
            }
            if record.favorite {
                stats.favorites += 1;
            }
            stats
        })
    }
}
