use anyhow::{Context, Result};
use keyring::Entry;

use super::{PersistedSession, SessionStore};

const SERVICE_NAME: &str = "storefront";

/// Keychain account the session record is filed under
const SESSION_ACCOUNT: &str = "session";

/// Persists the session record in the OS keychain.
pub struct KeyringSessionStore {
    account: String,
}

impl KeyringSessionStore {
    pub fn new() -> Self {
        Self::for_account(SESSION_ACCOUNT)
    }

    /// Store under a different keychain account, e.g. one per API host
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for KeyringSessionStore {
    fn load(&self) -> Result<PersistedSession> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                serde_json::from_str(&secret).context("Failed to parse session from keychain")
            }
            Err(keyring::Error::NoEntry) => Ok(PersistedSession::default()),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        let secret = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store session in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}
