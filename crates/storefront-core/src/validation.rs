//! Client-side checks run before credentials leave the machine.
//!
//! These mirror the rules the account forms enforce, so obviously bad
//! input fails fast without a round trip. The server remains the
//! authority; passing here does not guarantee acceptance.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::models::{LoginCredentials, LoginIdentifier, RegisterRequest};

/// Minimum password length accepted by the account API
pub const MIN_PASSWORD_LENGTH: usize = 6;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,20}$").expect("valid username pattern"));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Username must be 3-20 characters long and use only letters, numbers and underscores.")]
    InvalidUsername,

    #[error("Username is required.")]
    MissingUsername,

    #[error("Please enter a valid email address.")]
    InvalidEmail,

    #[error("Password must be at least {} characters long.", MIN_PASSWORD_LENGTH)]
    PasswordTooShort,

    #[error("Passwords do not match. Please make sure both password fields are identical.")]
    PasswordMismatch,
}

pub fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// Check a registration form. `confirmation` is the repeated password,
/// when the caller collected one.
pub fn validate_registration(
    request: &RegisterRequest,
    confirmation: Option<&str>,
) -> Result<(), ValidationError> {
    if let Some(confirm) = confirmation {
        if confirm != request.password {
            return Err(ValidationError::PasswordMismatch);
        }
    }
    validate_password(&request.password)?;
    if !is_valid_username(&request.username) {
        return Err(ValidationError::InvalidUsername);
    }
    if !is_valid_email(&request.email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

pub fn validate_login(credentials: &LoginCredentials) -> Result<(), ValidationError> {
    match &credentials.identifier {
        LoginIdentifier::Email(email) if !is_valid_email(email) => {
            return Err(ValidationError::InvalidEmail)
        }
        LoginIdentifier::Username(username) if username.trim().is_empty() => {
            return Err(ValidationError::MissingUsername)
        }
        _ => {}
    }
    validate_password(&credentials.password)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Fair,
    Good,
    Strong,
}

impl PasswordStrength {
    /// Score 0-6: one point each for length >= 6, length >= 8, an
    /// uppercase letter, a lowercase letter, a digit, and a symbol.
    pub fn score(password: &str) -> u8 {
        let len = password.chars().count();
        let checks = [
            len >= 6,
            len >= 8,
            password.chars().any(|c| c.is_ascii_uppercase()),
            password.chars().any(|c| c.is_ascii_lowercase()),
            password.chars().any(|c| c.is_ascii_digit()),
            password.chars().any(|c| !c.is_ascii_alphanumeric()),
        ];
        checks.iter().filter(|&&ok| ok).count() as u8
    }

    pub fn of(password: &str) -> Self {
        match Self::score(password) {
            0..=1 => PasswordStrength::Weak,
            2..=3 => PasswordStrength::Fair,
            4 => PasswordStrength::Good,
            _ => PasswordStrength::Strong,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PasswordStrength::Weak => "Weak",
            PasswordStrength::Fair => "Fair",
            PasswordStrength::Good => "Good",
            PasswordStrength::Strong => "Strong",
        }
    }
}
