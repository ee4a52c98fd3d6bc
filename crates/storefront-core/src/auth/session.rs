use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::User;

/// Access token lifetime in hours.
/// Matches the server's default access token lifetime of one day.
pub const ACCESS_TOKEN_TTL_HOURS: i64 = 24;

/// Refresh token lifetime in days.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// Access/refresh token tuple issued by the account API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialPair { .. }")
    }
}

/// Local expiration policy stamped onto every stored pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::hours(ACCESS_TOKEN_TTL_HOURS),
            refresh_ttl: Duration::days(REFRESH_TOKEN_TTL_DAYS),
        }
    }
}

impl ExpiryPolicy {
    /// Stamp a freshly issued pair with its expirations. Lifetimes that
    /// run past the representable range saturate at the latest instant.
    pub fn issue(&self, pair: CredentialPair, now: DateTime<Utc>) -> StoredCredentials {
        let expires = |ttl: Duration| now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        StoredCredentials {
            pair,
            access_expires_at: expires(self.access_ttl),
            refresh_expires_at: expires(self.refresh_ttl),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub pair: CredentialPair,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl StoredCredentials {
    /// The pair is unusable once the refresh token has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }

    /// The access token should be renewed before it is sent
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_expires_at
    }

    pub fn access_token(&self) -> &str {
        &self.pair.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.pair.refresh_token
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.refresh_expires_at.signed_duration_since(Utc::now())
    }

    /// Get minutes remaining until a new login is required (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

/// The single persisted record: credential pair plus cached profile.
/// Always written whole, so both tokens land or vanish together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub credentials: Option<StoredCredentials>,
    #[serde(default)]
    pub user: Option<User>,
}

impl PersistedSession {
    pub fn is_empty(&self) -> bool {
        self.credentials.is_none() && self.user.is_none()
    }

    /// Usable credentials, ignoring a pair whose refresh token has expired
    pub fn live_credentials(&self) -> Option<&StoredCredentials> {
        self.credentials.as_ref().filter(|c| !c.is_expired())
    }

    /// Holds a usable pair and a cached profile
    pub fn is_authenticated(&self) -> bool {
        self.live_credentials().is_some() && self.user.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// Read-only view of the session handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<User>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated && self.user.is_some()
    }
}

/// Session transitions the presentation layer may react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    /// Renewal failed and all local credentials were dropped
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> CredentialPair {
        CredentialPair {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
        }
    }

    fn user() -> User {
        serde_json::from_str(r#"{"username":"ada","email":"ada@example.com"}"#).unwrap()
    }

    #[test]
    fn test_issue_applies_policy() {
        let now = Utc::now();
        let creds = ExpiryPolicy::default().issue(pair(), now);
        assert_eq!(creds.access_expires_at, now + Duration::hours(24));
        assert_eq!(creds.refresh_expires_at, now + Duration::days(7));
        assert!(!creds.is_expired_at(now));
        assert!(!creds.needs_refresh_at(now));
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        let creds = ExpiryPolicy::default().issue(pair(), now);

        assert!(creds.needs_refresh_at(now + Duration::hours(25)));
        assert!(!creds.is_expired_at(now + Duration::hours(25)));
        assert!(creds.is_expired_at(now + Duration::days(7)));
    }

    #[test]
    fn test_issue_saturates_oversized_lifetimes() {
        let policy = ExpiryPolicy {
            access_ttl: Duration::MAX,
            refresh_ttl: Duration::MAX,
        };
        let creds = policy.issue(pair(), Utc::now());
        assert_eq!(creds.refresh_expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!creds.is_expired());
        assert!(creds.minutes_until_expiry() > 0);
    }

    #[test]
    fn test_minutes_until_expiry() {
        let now = Utc::now();
        let creds = ExpiryPolicy::default().issue(pair(), now);
        let minutes = creds.minutes_until_expiry();
        assert!(minutes <= 7 * 24 * 60 && minutes >= 7 * 24 * 60 - 1);

        let lapsed = ExpiryPolicy {
            access_ttl: Duration::minutes(-2),
            refresh_ttl: Duration::minutes(-1),
        }
        .issue(pair(), now);
        assert_eq!(lapsed.minutes_until_expiry(), 0);
    }

    #[test]
    fn test_expired_pair_is_not_live() {
        let policy = ExpiryPolicy {
            access_ttl: Duration::minutes(-2),
            refresh_ttl: Duration::minutes(-1),
        };
        let session = PersistedSession {
            credentials: Some(policy.issue(pair(), Utc::now())),
            user: Some(user()),
        };
        assert!(session.live_credentials().is_none());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_authenticated_requires_both_parts() {
        let creds = ExpiryPolicy::default().issue(pair(), Utc::now());

        let tokens_only = PersistedSession {
            credentials: Some(creds.clone()),
            user: None,
        };
        assert!(!tokens_only.is_authenticated());

        let user_only = PersistedSession {
            credentials: None,
            user: Some(user()),
        };
        assert!(!user_only.is_authenticated());

        let both = PersistedSession {
            credentials: Some(creds),
            user: Some(user()),
        };
        assert!(both.is_authenticated());
        assert!(PersistedSession::default().is_empty());
    }

    #[test]
    fn test_credential_pair_wire_format_and_debug() {
        let json = serde_json::to_value(pair()).unwrap();
        assert_eq!(json["accessToken"], "access");
        assert_eq!(json["refreshToken"], "refresh");
        assert!(!format!("{:?}", pair()).contains("access"));
    }

    #[test]
    fn test_snapshot_is_authenticated() {
        let mut snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.state, SessionState::Uninitialized);
        assert!(!snapshot.is_authenticated());

        snapshot.state = SessionState::Authenticated;
        assert!(!snapshot.is_authenticated());

        snapshot.user = Some(user());
        assert!(snapshot.is_authenticated());
    }
}
