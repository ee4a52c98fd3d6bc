//! Storefront core library.
//!
//! Client-side account and session handling for the storefront API:
//!
//! - `api`: HTTP transport and response envelope
//! - `auth`: the session manager, credential persistence, error taxonomy
//! - `models`: users and auth request/response bodies
//! - `validation`: form checks applied before anything is sent
//! - `config`: user configuration and directory layout

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod validation;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{AuthError, SessionEvent, SessionManager, SessionSnapshot, SessionState};
pub use config::Config;
pub use models::{LoginCredentials, RegisterRequest, User};
