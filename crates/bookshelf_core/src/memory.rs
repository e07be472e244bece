//! crates/bookshelf_core/src/memory.rs
//!
//! In-process implementations of every port. They keep all state behind
//! mutexes and publish change notifications through `tokio::sync::watch`
//! channels, which gives the "latest snapshot" semantics the live feeds need.
//! Suitable for development, demos and tests; nothing survives the process.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::{stream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::{
    AuthIdentity, BookDraft, BookId, BookPage, BookPatch, BookRecord, CollectionScope,
    NewProfile, PageCursor, ProfilePatch, SortField, UserProfile,
};
use crate::ports::{
    auth_codes, AuthenticatorService, BookStore, ChangeFeed, KeyValueStore, PortError,
    PortResult, ProfileStore,
};

fn lock<T>(mutex: &Mutex<T>) -> PortResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| PortError::Unexpected("in-memory state lock poisoned".to_string()))
}

/// Builds a feed that yields `read()` once immediately and again after every
/// change published on `rx`. Bursts of changes collapse into one snapshot.
fn snapshot_feed<T, F>(rx: watch::Receiver<u64>, read: F) -> ChangeFeed<T>
where
    T: Send + 'static,
    F: Fn() -> PortResult<T> + Send + Sync + 'static,
{
    stream::unfold((rx, read, true), |(mut rx, read, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        rx.borrow_and_update();
        let item = read();
        Some((item, (rx, read, false)))
    })
    .boxed()
}

//=========================================================================================
// Books
//=========================================================================================

#[derive(Default)]
struct Shelves {
    books: HashMap<String, BTreeMap<BookId, BookRecord>>,
    notifiers: HashMap<String, watch::Sender<u64>>,
    last_created: Option<DateTime<Utc>>,
}

impl Shelves {
    fn notifier(&mut self, user_id: &str) -> &watch::Sender<u64> {
        self.notifiers
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(0).0)
    }

    fn notify(&mut self, user_id: &str) {
        self.notifier(user_id).send_modify(|version| *version += 1);
    }

    /// Creation times are strictly increasing so that "most recent first" is
    /// deterministic even when the clock does not advance between writes.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_created {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(at);
        at
    }

    fn shelf(&self, user_id: &str) -> Vec<BookRecord> {
        self.books
            .get(user_id)
            .map(|shelf| shelf.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn sort_key(record: &BookRecord, sort: SortField) -> String {
    match sort {
        SortField::Title => record.title.clone(),
        SortField::CreatedAt => record.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
    }
}

fn encode_cursor(record: &BookRecord, sort: SortField) -> PortResult<PageCursor> {
    serde_json::to_string(&(sort.as_str(), sort_key(record, sort), record.id.as_str()))
        .map(PageCursor::new)
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

/// Returns the `(sort_key, id)` position, rejecting cursors issued for another ordering.
fn decode_cursor(sort: SortField, cursor: &PageCursor) -> PortResult<(String, String)> {
    let (issued_for, key, id): (String, String, String) = serde_json::from_str(cursor.as_str())
        .map_err(|e| PortError::Unexpected(format!("Malformed page cursor: {}", e)))?;
    if issued_for != sort.as_str() {
        return Err(PortError::Unexpected(format!(
            "Malformed page cursor: issued for '{}' ordering, not '{}'",
            issued_for,
            sort.as_str()
        )));
    }
    Ok((key, id))
}

/// In-memory `BookStore`. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryBookStore {
    state: Arc<Mutex<Shelves>>,
}

impl InMemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_book(state: &Mutex<Shelves>, user_id: &str, id: &BookId) -> PortResult<Option<BookRecord>> {
        Ok(lock(state)?.books.get(user_id).and_then(|shelf| shelf.get(id)).cloned())
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    async fn insert_book(&self, user_id: &str, draft: &BookDraft) -> PortResult<BookRecord> {
        let mut state = lock(&self.state)?;
        let created_at = state.next_created_at();
        let record = BookRecord {
            id: BookId::new(Uuid::new_v4().to_string()),
            title: draft.title.clone(),
            author: draft.author.clone(),
            year: draft.year,
            genre: draft.genre.clone(),
            status: draft.status,
            favorite: draft.favorite,
            created_at,
            updated_at: created_at,
        };
        state
            .books
            .entry(user_id.to_string())
            .or_default()
            .insert(record.id.clone(), record.clone());
        state.notify(user_id);
        Ok(record)
    }

    async fn get_book(&self, user_id: &str, id: &BookId) -> PortResult<BookRecord> {
        Self::read_book(&self.state, user_id, id)?
            .ok_or_else(|| PortError::NotFound(format!("Book {} not found", id)))
    }

    async fn update_book(&self, user_id: &str, id: &BookId, patch: &BookPatch) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        let record = state
            .books
            .get_mut(user_id)
            .and_then(|shelf| shelf.get_mut(id))
            .ok_or_else(|| PortError::NotFound(format!("Book {} not found", id)))?;
        patch.apply_to(record);
        record.updated_at = Utc::now().max(record.created_at);
        state.notify(user_id);
        Ok(())
    }

    async fn delete_book(&self, user_id: &str, id: &BookId) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        state
            .books
            .get_mut(user_id)
            .and_then(|shelf| shelf.remove(id))
            .ok_or_else(|| PortError::NotFound(format!("Book {} not found", id)))?;
        state.notify(user_id);
        Ok(())
    }

    async fn fetch_page(
        &self,
        user_id: &str,
        sort: SortField,
        page_size: usize,
        after: Option<&PageCursor>,
    ) -> PortResult<BookPage> {
        let after = after.map(|cursor| decode_cursor(sort, cursor)).transpose()?;
        let records = lock(&self.state)?.shelf(user_id);

        let mut keyed: Vec<(String, BookRecord)> =
            records.into_iter().map(|r| (sort_key(&r, sort), r)).collect();
        keyed.sort_by(|(a_key, a), (b_key, b)| {
            let ordering = (a_key, &a.id).cmp(&(b_key, &b.id));
            match sort {
                SortField::Title => ordering,
                SortField::CreatedAt => ordering.reverse(),
            }
        });

        let page: Vec<BookRecord> = keyed
            .into_iter()
            .filter(|(key, record)| match &after {
                None => true,
                Some((after_key, after_id)) => {
                    let position = (key.as_str(), record.id.as_str());
                    let cursor = (after_key.as_str(), after_id.as_str());
                    match sort {
                        SortField::Title => position > cursor,
                        SortField::CreatedAt => position < cursor,
                    }
                }
            })
            .map(|(_, record)| record)
            .take(page_size)
            .collect();

        let next_cursor = match page.last() {
            Some(last) if page.len() == page_size => Some(encode_cursor(last, sort)?),
            _ => None,
        };
        Ok(BookPage {
            records: page,
            next_cursor,
        })
    }

    async fn watch_book(&self, user_id: &str, id: &BookId) -> PortResult<ChangeFeed<Option<BookRecord>>> {
        let rx = lock(&self.state)?.notifier(user_id).subscribe();
        let state = Arc::clone(&self.state);
        let (user_id, id) = (user_id.to_string(), id.clone());
        Ok(snapshot_feed(rx, move || Self::read_book(&state, &user_id, &id)))
    }

    async fn watch_collection(
        &self,
        user_id: &str,
        scope: CollectionScope,
    ) -> PortResult<ChangeFeed<Vec<BookRecord>>> {
        let rx = lock(&self.state)?.notifier(user_id).subscribe();
        let state = Arc::clone(&self.state);
        let user_id = user_id.to_string();
        Ok(snapshot_feed(rx, move || {
            let mut records = lock(&state)?.shelf(&user_id);
            if scope == CollectionScope::FavoritesOnly {
                records.retain(|r| r.favorite);
            }
            Ok(records)
        }))
    }
}

//=========================================================================================
// Profiles
//=========================================================================================

#[derive(Default)]
struct Profiles {
    records: HashMap<String, UserProfile>,
    notifiers: HashMap<String, watch::Sender<u64>>,
}

impl Profiles {
    fn notifier(&mut self, user_id: &str) -> &watch::Sender<u64> {
        self.notifiers
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(0).0)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProfileStore {
    state: Arc<Mutex<Profiles>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn create_profile(&self, user_id: &str, profile: &NewProfile) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        state.records.insert(
            user_id.to_string(),
            UserProfile {
                user_id: user_id.to_string(),
                email: profile.email.clone(),
                name: profile.name.clone(),
                active: true,
                created_at: Utc::now(),
            },
        );
        state.notifier(user_id).send_modify(|v| *v += 1);
        Ok(())
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        let profile = state
            .records
            .get_mut(user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        if let Some(email) = &patch.email {
            profile.email = email.clone();
        }
        if let Some(name) = &patch.name {
            profile.name = Some(name.clone());
        }
        state.notifier(user_id).send_modify(|v| *v += 1);
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> PortResult<UserProfile> {
        lock(&self.state)?
            .records
            .get(user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
    }

    async fn watch_profile(&self, user_id: &str) -> PortResult<ChangeFeed<Option<UserProfile>>> {
        let rx = lock(&self.state)?.notifier(user_id).subscribe();
        let state = Arc::clone(&self.state);
        let user_id = user_id.to_string();
        Ok(snapshot_feed(rx, move || Ok(lock(&state)?.records.get(&user_id).cloned())))
    }
}

//=========================================================================================
// Local key-value persistence
//=========================================================================================

/// Clones share the same map, which lets tests simulate a restart by handing
/// the store to a fresh `SessionManager`.
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        lock(&self.entries)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }
}

//=========================================================================================
// Authenticator
//=========================================================================================

struct Account {
    uid: String,
    password: String,
    display_name: Option<String>,
}

#[derive(Default)]
struct Accounts {
    by_email: HashMap<String, Account>,
    live_tokens: HashMap<String, String>,
    password_resets: Vec<String>,
    sign_in_attempts: usize,
    unreachable: bool,
}

/// Email/password authenticator holding plaintext credentials in memory.
#[derive(Clone, Default)]
pub struct InMemoryAuthenticator {
    state: Arc<Mutex<Accounts>>,
}

impl InMemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account as if it had registered earlier.
    pub fn with_account(self, email: &str, password: &str, display_name: Option<&str>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.by_email.insert(
                email.to_string(),
                Account {
                    uid: Uuid::new_v4().to_string(),
                    password: password.to_string(),
                    display_name: display_name.map(str::to_string),
                },
            );
        }
        self
    }

    /// While unreachable, every call fails as a transport error would.
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unreachable = unreachable;
        }
    }

    pub fn sign_in_attempts(&self) -> usize {
        self.state.lock().map(|s| s.sign_in_attempts).unwrap_or_default()
    }

    pub fn live_tokens(&self) -> usize {
        self.state.lock().map(|s| s.live_tokens.len()).unwrap_or_default()
    }

    pub fn password_resets(&self) -> Vec<String> {
        self.state.lock().map(|s| s.password_resets.clone()).unwrap_or_default()
    }

    fn reachable(state: &Accounts) -> PortResult<()> {
        if state.unreachable {
            return Err(PortError::Unexpected("network unreachable".to_string()));
        }
        Ok(())
    }

    fn issue(state: &mut Accounts, email: &str) -> PortResult<AuthIdentity> {
        let account = state
            .by_email
            .get(email)
            .ok_or_else(|| PortError::auth(auth_codes::USER_NOT_FOUND, "no account for this email"))?;
        let identity = AuthIdentity {
            uid: account.uid.clone(),
            email: email.to_string(),
            display_name: account.display_name.clone(),
            id_token: Uuid::new_v4().to_string(),
        };
        state.live_tokens.insert(identity.id_token.clone(), identity.uid.clone());
        Ok(identity)
    }
}

#[async_trait]
impl AuthenticatorService for InMemoryAuthenticator {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthIdentity> {
        let mut state = lock(&self.state)?;
        state.sign_in_attempts += 1;
        Self::reachable(&state)?;
        let account = state
            .by_email
            .get(email)
            .ok_or_else(|| PortError::auth(auth_codes::USER_NOT_FOUND, "no account for this email"))?;
        if account.password != password {
            return Err(PortError::auth(auth_codes::WRONG_PASSWORD, "password does not match"));
        }
        Self::issue(&mut state, email)
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthIdentity> {
        let mut state = lock(&self.state)?;
        Self::reachable(&state)?;
        if state.by_email.contains_key(email) {
            return Err(PortError::auth(auth_codes::EMAIL_IN_USE, "email already registered"));
        }
        state.by_email.insert(
            email.to_string(),
            Account {
                uid: Uuid::new_v4().to_string(),
                password: password.to_string(),
                display_name: None,
            },
        );
        Self::issue(&mut state, email)
    }

    async fn sign_out(&self, token: &str) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        Self::reachable(&state)?;
        state.live_tokens.remove(token);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        Self::reachable(&state)?;
        if !state.by_email.contains_key(email) {
            return Err(PortError::auth(auth_codes::USER_NOT_FOUND, "no account for this email"));
        }
        state.password_resets.push(email.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_by_title_follow_the_cursor() {
        let store = InMemoryBookStore::new();
        for title in ["Duna", "Abril", "Caos", "Brisa", "Eco"] {
            store
                .insert_book("u1", &BookDraft::new(title, "autor", 2000, "Ficção"))
                .await
                .unwrap();
        }

        let first = store.fetch_page("u1", SortField::Title, 2, None).await.unwrap();
        let titles: Vec<_> = first.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Abril", "Brisa"]);

        let second = store
            .fetch_page("u1", SortField::Title, 2, first.next_cursor.as_ref())
            .await
            .unwrap();
        let titles: Vec<_> = second.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Caos", "Duna"]);

        let last = store
            .fetch_page("u1", SortField::Title, 2, second.next_cursor.as_ref())
            .await
            .unwrap();
        assert_eq!(last.records.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn shelves_are_isolated_per_user() {
        let store = InMemoryBookStore::new();
        let book = store
            .insert_book("alice", &BookDraft::new("Iracema", "José de Alencar", 1865, "Romance"))
            .await
            .unwrap();

        assert!(matches!(store.get_book("bob", &book.id).await, Err(PortError::NotFound(_))));
        let page = store.fetch_page("bob", SortField::CreatedAt, 10, None).await.unwrap();
        assert!(page.records.is_empty());
    }

    #[tokio::test]
    async fn malformed_cursor_is_rejected() {
        let store = InMemoryBookStore::new();
        let cursor = PageCursor::new("garbage");
        let result = store.fetch_page("u1", SortField::Title, 5, Some(&cursor)).await;
        assert!(matches!(result, Err(PortError::Unexpected(_))));
    }

    #[tokio::test]
    async fn cursor_from_another_ordering_is_rejected() {
        let store = InMemoryBookStore::new();
        for title in ["Abril", "Brisa"] {
            store
                .insert_book("u1", &BookDraft::new(title, "autor", 2000, "Ficção"))
                .await
                .unwrap();
        }
        let by_title = store.fetch_page("u1", SortField::Title, 1, None).await.unwrap();
        let cursor = by_title.next_cursor.expect("full page has a cursor");

        let result = store.fetch_page("u1", SortField::CreatedAt, 1, Some(&cursor)).await;
        assert!(matches!(result, Err(PortError::Unexpected(_))));
        assert!(store.fetch_page("u1", SortField::Title, 1, Some(&cursor)).await.is_ok());
    }

    #[tokio::test]
    async fn authenticator_reports_provider_codes() {
        let auth = InMemoryAuthenticator::new().with_account("ana@example.com", "secret1", None);

        let err = auth.sign_in("bia@example.com", "secret1").await.unwrap_err();
        assert!(matches!(err, PortError::Auth { ref code, .. } if code == auth_codes::USER_NOT_FOUND));

        let err = auth.sign_in("ana@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, PortError::Auth { ref code, .. } if code == auth_codes::WRONG_PASSWORD));

        let err = auth.sign_up("ana@example.com", "another").await.unwrap_err();
        assert!(matches!(err, PortError::Auth { ref code, .. } if code == auth_codes::EMAIL_IN_USE));

        let identity = auth.sign_in("ana@example.com", "secret1").await.unwrap();
        assert_eq!(auth.live_tokens(), 1);
        auth.sign_out(&identity.id_token).await.unwrap();
        assert_eq!(auth.live_tokens(), 0);
    }
}
