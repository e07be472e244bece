pub mod books;
pub mod context;
pub mod domain;
pub mod error;
pub mod memory;
pub mod ports;
pub mod session;
pub mod subscription;
pub mod validation;

pub use books::{BookCollection, DEFAULT_PAGE_SIZE};
pub use context::AppContext;
pub use domain::{
    AuthIdentity, BookDraft, BookId, BookPage, BookPatch, BookRecord, BookStatus, CollectionScope,
    CollectionStats, ListQuery, NewProfile, PageCursor, ProfilePatch, Session, SessionPatch,
    SortField, UserProfile,
};
pub use error::{AuthReason, CoreError, CoreResult, ValidationError};
pub use ports::{
    AuthenticatorService, BookStore, ChangeFeed, KeyValueStore, PortError, PortResult, ProfileStore,
};
pub use session::{MirrorFailure, SessionManager, SESSION_STORAGE_KEY};
pub use subscription::SubscriptionHandle;
