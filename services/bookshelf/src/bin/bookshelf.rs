//! services/bookshelf/src/bin/bookshelf.rs
//!
//! Headless client: restores (or opens) a session, then follows the signed-in
//! user's collection statistics until interrupted.

use bookshelf_core::{AppContext, SessionManager};
use bookshelf_lib::{
    adapters::{DbAdapter, FileKeyValueStore, PgAuthenticator},
    config::Config,
    error::AppError,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(?config, "Configuration loaded.");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Wire the Session Manager and Context ---
    let sessions = SessionManager::new(
        Arc::new(PgAuthenticator::new(db_pool.clone())),
        db_adapter.clone(),
        Arc::new(FileKeyValueStore::new(config.session_store_path.clone())),
    );
    let context = AppContext::new(sessions, db_adapter).with_page_size(config.page_size);

    let mut mirror_failures = context.sessions().mirror_failures();
    tokio::spawn(async move {
        while let Ok(failure) = mirror_failures.recv().await {
            warn!(user_id = %failure.user_id, "Profile mirror failed: {}", failure.error);
        }
    });

    // --- 4. Restore or Open a Session ---
    let session = match context.start().await {
        Some(session) => session,
        None => match (config.email.as_deref(), config.password.as_deref()) {
            (Some(email), Some(password)) => context.sessions().login(email, password).await?,
            _ => {
                return Err(AppError::Internal(
                    "No stored session; set BOOKSHELF_EMAIL and BOOKSHELF_PASSWORD to sign in".to_string(),
                ))
            }
        },
    };
    info!(user_id = %session.user_id, "Signed in.");

    // --- 5. Follow the Collection Until Interrupted ---
    let books = context
        .books()
        .await
        .ok_or_else(|| AppError::Internal("Session ended before the collection opened".to_string()))?;
    let (stats, handle) = books
        .subscribe_collection_stats(|stats| {
            info!(
                total = stats.total,
                read = stats.read,
                reading = stats.reading,
                favorites = stats.favorites,
                "Collection changed."
            );
        })
        .await?;
    info!(
        total = stats.total,
        read = stats.read,
        reading = stats.reading,
        favorites = stats.favorites,
        "Collection loaded. Press Ctrl+C to exit."
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    handle.release().await;
    context.shutdown().await;
    db_pool.close().await;
    Ok(())
}
