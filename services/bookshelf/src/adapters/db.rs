//! services/bookshelf/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! `BookStore` and `ProfileStore` ports from the core crate. It handles all
//! interactions with PostgreSQL using `sqlx`. Change feeds are driven by
//! LISTEN/NOTIFY: triggers publish the owning user id on `book_changes` and
//! `profile_changes`, and each feed re-reads its snapshot when its user is named.

use async_trait::async_trait;
use bookshelf_core::domain::{
    BookDraft, BookId, BookPage, BookPatch, BookRecord, BookStatus, CollectionScope, NewProfile,
    PageCursor, ProfilePatch, SortField, UserProfile,
};
use bookshelf_core::ports::{BookStore, ChangeFeed, PortError, PortResult, ProfileStore};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool};
use std::future::Future;
use uuid::Uuid;

const BOOK_CHANNEL: &str = "book_changes";
const PROFILE_CHANNEL: &str = "profile_changes";

const BOOK_COLUMNS: &str = "id, title, author, year, genre, status, favorite, created_at, updated_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the document-side ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn listen(&self, channel: &str) -> PortResult<PgListener> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(db_error)?;
        listener.listen(channel).await.map_err(db_error)?;
        Ok(listener)
    }
}

pub(crate) fn db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        other => PortError::Unexpected(other.to_string()),
    }
}

/// Ids that are not UUIDs cannot exist in the table.
fn parse_book_id(id: &BookId) -> PortResult<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| PortError::NotFound(format!("Book {} not found", id)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct BookRow {
    id: Uuid,
    title: String,
    author: String,
    year: i32,
    genre: String,
    status: String,
    favorite: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookRow {
    fn to_domain(self) -> PortResult<BookRecord> {
        let status = BookStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!("Book {} has unknown status '{}'", self.id, self.status))
        })?;
        Ok(BookRecord {
            id: BookId::new(self.id.to_string()),
            title: self.title,
            author: self.author,
            year: self.year,
            genre: self.genre,
            status,
            favorite: self.favorite,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ProfileRow {
    user_id: String,
    email: String,
    name: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl ProfileRow {
    fn to_domain(self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            email: self.email,
            name: self.name,
            active: self.active,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// Keyset Cursors
//=========================================================================================

#[derive(Serialize, Deserialize)]
struct CursorToken {
    sort: String,
    key: String,
    id: Uuid,
}

/// Where the next page starts, decoded from a `PageCursor`.
#[derive(Debug, PartialEq)]
enum CursorPosition {
    Title(String, Uuid),
    CreatedAt(DateTime<Utc>, Uuid),
}

fn encode_cursor(sort: SortField, last: &BookRecord) -> PortResult<PageCursor> {
    let key = match sort {
        SortField::Title => last.title.clone(),
        SortField::CreatedAt => last.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    };
    let token = CursorToken {
        sort: sort.as_str().to_string(),
        key,
        id: Uuid::parse_str(last.id.as_str()).map_err(|e| PortError::Unexpected(e.to_string()))?,
    };
    serde_json::to_string(&token)
        .map(PageCursor::new)
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

fn decode_cursor(sort: SortField, cursor: &PageCursor) -> PortResult<CursorPosition> {
    let malformed = |why: String| PortError::Unexpected(format!("Malformed page cursor: {}", why));
    let token: CursorToken = serde_json::from_str(cursor.as_str()).map_err(|e| malformed(e.to_string()))?;
    if token.sort != sort.as_str() {
        return Err(malformed(format!(
            "cursor was issued for '{}' ordering, not '{}'",
            token.sort,
            sort.as_str()
        )));
    }
    match sort {
        SortField::Title => Ok(CursorPosition::Title(token.key, token.id)),
        SortField::CreatedAt => {
            let at = DateTime::parse_from_rfc3339(&token.key)
                .map_err(|e| malformed(e.to_string()))?
                .with_timezone(&Utc);
            Ok(CursorPosition::CreatedAt(at, token.id))
        }
    }
}

//=========================================================================================
// Snapshot Queries
//=========================================================================================

async fn select_book(pool: &PgPool, user_id: &str, id: Uuid) -> PortResult<Option<BookRecord>> {
    let row = sqlx::query_as::<_, BookRow>(&format!(
        "SELECT {BOOK_COLUMNS} FROM books WHERE user_id = $1 AND id = $2"
    ))
    .bind(user_id)
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(db_error)?;
    row.map(BookRow::to_domain).transpose()
}

async fn select_collection(pool: &PgPool, user_id: &str, scope: CollectionScope) -> PortResult<Vec<BookRecord>> {
    let favorites_only = scope == CollectionScope::FavoritesOnly;
    let rows = sqlx::query_as::<_, BookRow>(&format!(
        "SELECT {BOOK_COLUMNS} FROM books WHERE user_id = $1 AND (NOT $2 OR favorite) ORDER BY created_at DESC, id DESC"
    ))
    .bind(user_id)
    .bind(favorites_only)
    .fetch_all(pool)
    .await
    .map_err(db_error)?;
    rows.into_iter().map(BookRow::to_domain).collect()
}

async fn select_profile(pool: &PgPool, user_id: &str) -> PortResult<Option<UserProfile>> {
    let row = sqlx::query_as::<_, ProfileRow>(
        "SELECT user_id, email, name, active, created_at FROM profiles WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(db_error)?;
    Ok(row.map(ProfileRow::to_domain))
}

/// Yields `read()` immediately, then again for every notification on the
/// listener whose payload is `user_id`. The listener is already subscribed
/// when the first snapshot is read, so no change can slip in between.
fn notification_feed<T, F, Fut>(listener: PgListener, user_id: String, read: F) -> ChangeFeed<T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PortResult<T>> + Send + 'static,
{
    stream::unfold(
        (listener, user_id, read, true),
        |(mut listener, user_id, read, first)| async move {
            if !first {
                loop {
                    match listener.recv().await {
                        Ok(notification) if notification.payload() == user_id => break,
                        Ok(_) => continue,
                        Err(e) => return Some((Err(db_error(e)), (listener, user_id, read, false))),
                    }
                }
            }
            let item = read().await;
            Some((item, (listener, user_id, read, false)))
        },
    )
    .boxed()
}

//=========================================================================================
// `BookStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl BookStore for DbAdapter {
    async fn insert_book(&self, user_id: &str, draft: &BookDraft) -> PortResult<BookRecord> {
        let row = sqlx::query_as::<_, BookRow>(&format!(
            "INSERT INTO books (id, user_id, title, author, year, genre, status, favorite) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {BOOK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&draft.title)
        .bind(&draft.author)
        .bind(draft.year)
        .bind(&draft.genre)
        .bind(draft.status.as_str())
        .bind(draft.favorite)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        row.to_domain()
    }

    async fn get_book(&self, user_id: &str, id: &BookId) -> PortResult<BookRecord> {
        select_book(&self.pool, user_id, parse_book_id(id)?)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Book {} not found", id)))
    }

    async fn update_book(&self, user_id: &str, id: &BookId, patch: &BookPatch) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE books SET \
                title = COALESCE($3, title), \
                author = COALESCE($4, author), \
                year = COALESCE($5, year), \
                genre = COALESCE($6, genre), \
                status = COALESCE($7, status), \
                favorite = COALESCE($8, favorite), \
                updated_at = now() \
             WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(parse_book_id(id)?)
        .bind(patch.title.as_deref())
        .bind(patch.author.as_deref())
        .bind(patch.year)
        .bind(patch.genre.as_deref())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.favorite)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Book {} not found", id)));
        }
        Ok(())
    }

    async fn delete_book(&self, user_id: &str, id: &BookId) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(parse_book_id(id)?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Book {} not found", id)));
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        user_id: &str,
        sort: SortField,
        page_size: usize,
        after: Option<&PageCursor>,
    ) -> PortResult<BookPage> {
        let position = after.map(|cursor| decode_cursor(sort, cursor)).transpose()?;
        let limit = i64::try_from(page_size).map_err(|e| PortError::Unexpected(e.to_string()))?;

        let rows = match position {
            None => {
                let order = match sort {
                    SortField::Title => r#"title COLLATE "C" ASC, id ASC"#,
                    SortField::CreatedAt => "created_at DESC, id DESC",
                };
                sqlx::query_as::<_, BookRow>(&format!(
                    "SELECT {BOOK_COLUMNS} FROM books WHERE user_id = $1 ORDER BY {order} LIMIT $2"
                ))
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            Some(CursorPosition::Title(title, id)) => {
                sqlx::query_as::<_, BookRow>(&format!(
                    r#"SELECT {BOOK_COLUMNS} FROM books
                       WHERE user_id = $1 AND (title COLLATE "C", id) > ($2::text COLLATE "C", $3)
                       ORDER BY title COLLATE "C" ASC, id ASC LIMIT $4"#
                ))
                .bind(user_id)
                .bind(title)
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            Some(CursorPosition::CreatedAt(created_at, id)) => {
                sqlx::query_as::<_, BookRow>(&format!(
                    "SELECT {BOOK_COLUMNS} FROM books \
                     WHERE user_id = $1 AND (created_at, id) < ($2, $3) \
                     ORDER BY created_at DESC, id DESC LIMIT $4"
                ))
                .bind(user_id)
                .bind(created_at)
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(db_error)?;

        let records = rows
            .into_iter()
            .map(BookRow::to_domain)
            .collect::<PortResult<Vec<_>>>()?;
        let next_cursor = match records.last() {
            Some(last) if records.len() == page_size => Some(encode_cursor(sort, last)?),
            _ => None,
        };
        Ok(BookPage { records, next_cursor })
    }

    async fn watch_book(&self, user_id: &str, id: &BookId) -> PortResult<ChangeFeed<Option<BookRecord>>> {
        let book_id = parse_book_id(id)?;
        let listener = self.listen(BOOK_CHANNEL).await?;
        let pool = self.pool.clone();
        let owner = user_id.to_string();
        Ok(notification_feed(listener, user_id.to_string(), move || {
            let pool = pool.clone();
            let owner = owner.clone();
            async move { select_book(&pool, &owner, book_id).await }
        }))
    }

    async fn watch_collection(
        &self,
        user_id: &str,
        scope: CollectionScope,
    ) -> PortResult<ChangeFeed<Vec<BookRecord>>> {
        let listener = self.listen(BOOK_CHANNEL).await?;
        let pool = self.pool.clone();
        let owner = user_id.to_string();
        Ok(notification_feed(listener, user_id.to_string(), move || {
            let pool = pool.clone();
            let owner = owner.clone();
            async move { select_collection(&pool, &owner, scope).await }
        }))
    }
}

//=========================================================================================
// `ProfileStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProfileStore for DbAdapter {
    async fn create_profile(&self, user_id: &str, profile: &NewProfile) -> PortResult<()> {
        // Overwrites like a document `set`: a re-registration resets the record.
        sqlx::query(
            "INSERT INTO profiles (user_id, email, name, active, created_at) \
             VALUES ($1, $2, $3, TRUE, now()) \
             ON CONFLICT (user_id) DO UPDATE \
             SET email = EXCLUDED.email, name = EXCLUDED.name, active = TRUE, created_at = EXCLUDED.created_at",
        )
        .bind(user_id)
        .bind(&profile.email)
        .bind(profile.name.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET email = COALESCE($2, email), name = COALESCE($3, name) WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(patch.email.as_deref())
        .bind(patch.name.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", user_id)));
        }
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> PortResult<UserProfile> {
        select_profile(&self.pool, user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
    }

    async fn watch_profile(&self, user_id: &str) -> PortResult<ChangeFeed<Option<UserProfile>>> {
        let listener = self.listen(PROFILE_CHANNEL).await?;
        let pool = self.pool.clone();
        let owner = user_id.to_string();
        Ok(notification_feed(listener, user_id.to_string(), move || {
            let pool = pool.clone();
            let owner = owner.clone();
            async move { select_profile(&pool, &owner).await }
        }))
    }
}
