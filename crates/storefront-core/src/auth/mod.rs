//! Authentication module: the session manager and everything it owns.
//!
//! This module provides:
//! - `SessionManager`: login/logout, account operations, and the
//!   renew-and-retry wrapper for protected requests
//! - `PersistedSession`, `SessionSnapshot`: persisted and observable state
//! - `SessionStore`: persistence backends (file, OS keychain, memory)
//!
//! Stored pairs carry local expirations: access tokens one day, refresh
//! tokens seven days.

pub mod credentials;
pub mod error;
pub mod manager;
pub mod session;
pub mod store;

pub use credentials::KeyringSessionStore;
pub use error::AuthError;
pub use manager::SessionManager;
pub use session::{
    CredentialPair, ExpiryPolicy, PersistedSession, SessionEvent, SessionSnapshot, SessionState,
    StoredCredentials,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StorageBackend};
