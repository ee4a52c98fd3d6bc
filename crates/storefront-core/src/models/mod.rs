//! Wire models for the account API.
//!
//! - `User`: the profile returned by login, registration and `/auth/me`
//! - `LoginCredentials`, `RegisterRequest`: request bodies
//! - `AuthPayload`, `UserPayload`: `data` payloads of auth responses

pub mod user;

pub use user::{AuthPayload, LoginCredentials, LoginIdentifier, RegisterRequest, User, UserPayload};
