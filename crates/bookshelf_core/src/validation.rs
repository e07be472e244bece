//! crates/bookshelf_core/src/validation.rs
//!
//! Local input checks run before anything is sent to a backend.

use chrono::{Datelike, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::domain::{BookDraft, BookPatch, SessionPatch};
use crate::error::ValidationError;

pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

pub fn current_year() -> i32 {
    Utc::now().year()
}

pub fn require_credentials(email: &str, password: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::Required("email"));
    }
    if password.is_empty() {
        return Err(ValidationError::Required("password"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::Required("email"));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

/// Registration is stricter than login: the address must be well formed and
/// the password long enough for the provider to accept it.
pub fn validate_registration(email: &str, password: &str) -> Result<(), ValidationError> {
    require_credentials(email, password)?;
    validate_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LEN));
    }
    Ok(())
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required(field));
    }
    Ok(())
}

fn validate_year(year: i32) -> Result<(), ValidationError> {
    let max = current_year();
    if !(1..=max).contains(&year) {
        return Err(ValidationError::YearOutOfRange { value: year, max });
    }
    Ok(())
}

pub fn validate_draft(draft: &BookDraft) -> Result<(), ValidationError> {
    require_text("title", &draft.title)?;
    require_text("author", &draft.author)?;
    validate_year(draft.year)?;
    require_text("genre", &draft.genre)
}

pub fn validate_patch(patch: &BookPatch) -> Result<(), ValidationError> {
    if let Some(title) = &patch.title {
        require_text("title", title)?;
    }
    if let Some(author) = &patch.author {
        require_text("author", author)?;
    }
    if let Some(year) = patch.year {
        validate_year(year)?;
    }
    if let Some(genre) = &patch.genre {
        require_text("genre", genre)?;
    }
    Ok(())
}

pub fn validate_session_patch(patch: &SessionPatch) -> Result<(), ValidationError> {
    if let Some(name) = &patch.display_name {
        require_text("name", name)?;
    }
    if let Some(email) = &patch.email {
        require_text("email", email)?;
    }
    Ok(())
}
