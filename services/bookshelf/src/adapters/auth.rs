//! services/bookshelf/src/adapters/auth.rs
//!
//! Email/password authenticator backed by PostgreSQL. Passwords are stored as
//! argon2 hashes; a successful sign-in issues an opaque token that stays valid
//! for 30 days or until signed out.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use bookshelf_core::domain::AuthIdentity;
use bookshelf_core::ports::{auth_codes, AuthenticatorService, PortError, PortResult};
use chrono::{Duration, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{error, info};
use uuid::Uuid;

use super::db::db_error;

const TOKEN_TTL_DAYS: i64 = 30;
const RESET_TTL_HOURS: i64 = 1;
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgAuthenticator {
    pool: PgPool,
}

#[derive(FromRow)]
struct AccountRow {
    user_id: Uuid,
    email: String,
    password_hash: String,
    display_name: Option<String>,
}

impl PgAuthenticator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_account(&self, email: &str) -> PortResult<AccountRow> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT user_id, email, password_hash, display_name FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| PortError::auth(auth_codes::USER_NOT_FOUND, "There is no account for this email."))
    }

    async fn issue_token(&self, account: AccountRow) -> PortResult<AuthIdentity> {
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + Duration::days(TOKEN_TTL_DAYS);
        sqlx::query("INSERT INTO auth_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&token)
            .bind(account.user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(AuthIdentity {
            uid: account.user_id.to_string(),
            email: account.email,
            display_name: account.display_name,
            id_token: token,
        })
    }
}

fn hash_password(password: &str) -> PortResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            PortError::Unexpected("Failed to hash password".to_string())
        })
}

fn verify_password(password: &str, stored_hash: &str) -> PortResult<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        PortError::Unexpected("Stored password hash is unreadable".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

#[async_trait]
impl AuthenticatorService for PgAuthenticator {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthIdentity> {
        let account = self.find_account(email).await?;
        if !verify_password(password, &account.password_hash)? {
            return Err(PortError::auth(auth_codes::WRONG_PASSWORD, "The password is incorrect."));
        }
        self.issue_token(account).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthIdentity> {
        let password_hash = hash_password(password)?;
        let account = sqlx::query_as::<_, AccountRow>(
            "INSERT INTO accounts (user_id, email, password_hash) VALUES ($1, $2, $3) \
             RETURNING user_id, email, password_hash, display_name",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::auth(auth_codes::EMAIL_IN_USE, "This email is already registered.")
            } else {
                db_error(e)
            }
        })?;
        info!(user_id = %account.user_id, "Account created.");
        self.issue_token(account).await
    }

    async fn sign_out(&self, token: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Records a single-use reset token. Delivering it to the user's inbox is
    /// done by whatever mail relay consumes `password_resets`.
    async fn send_password_reset(&self, email: &str) -> PortResult<()> {
        let account = self.find_account(email).await?;
        let expires_at = Utc::now() + Duration::hours(RESET_TTL_HOURS);
        sqlx::query("INSERT INTO password_resets (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4().to_string())
            .bind(account.user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        info!(user_id = %account.user_id, "Password reset issued.");
        Ok(())
    }
}
