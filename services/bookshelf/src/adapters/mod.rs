pub mod auth;
pub mod db;
pub mod local_store;

pub use auth::PgAuthenticator;
pub use db::DbAdapter;
pub use local_store::FileKeyValueStore;
