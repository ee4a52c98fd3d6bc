use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::auth::CredentialPair;

/// Account profile as returned by the API.
///
/// Fields the client does not model are kept in `extra` so the locally
/// cached copy round-trips everything the server sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Name to greet the user with
    pub fn display_name(&self) -> &str {
        if self.username.is_empty() {
            &self.email
        } else {
            &self.username
        }
    }
}

/// How the user identifies themselves at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(String),
    Username(String),
}

impl LoginIdentifier {
    pub fn as_str(&self) -> &str {
        match self {
            LoginIdentifier::Email(s) | LoginIdentifier::Username(s) => s,
        }
    }
}

/// Login request body. Serializes as `{"email": .., "password": ..}` or
/// `{"username": .., "password": ..}` depending on the identifier.
#[derive(Clone)]
pub struct LoginCredentials {
    pub identifier: LoginIdentifier,
    pub password: String,
}

impl LoginCredentials {
    pub fn with_email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: LoginIdentifier::Email(email.into()),
            password: password.into(),
        }
    }

    pub fn with_username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: LoginIdentifier::Username(username.into()),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Serialize for LoginCredentials {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(2))?;
        match &self.identifier {
            LoginIdentifier::Email(email) => map.serialize_entry("email", email)?,
            LoginIdentifier::Username(username) => map.serialize_entry("username", username)?,
        }
        map.serialize_entry("password", &self.password)?;
        map.end()
    }
}

/// Registration request body
#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `data` of a successful login
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthPayload {
    pub fn into_parts(self) -> (User, CredentialPair) {
        (
            self.user,
            CredentialPair {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
            },
        )
    }
}

/// `data` of `/auth/me` and `/auth/register`
#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_accepts_mongo_id_and_keeps_extra_fields() {
        let json = r#"{
            "_id": "65f1c0",
            "username": "ada",
            "email": "ada@example.com",
            "isEmailVerified": true,
            "role": "customer"
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id.as_deref(), Some("65f1c0"));
        assert!(user.is_email_verified);
        assert_eq!(user.extra["role"], "customer");

        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["id"], "65f1c0");
        assert_eq!(back["role"], "customer");
        assert_eq!(back["isEmailVerified"], true);
    }

    #[test]
    fn test_user_defaults() {
        let user: User =
            serde_json::from_str(r#"{"username":"bob","email":"bob@example.com"}"#).unwrap();
        assert!(user.id.is_none());
        assert!(!user.is_email_verified);
        assert_eq!(user.display_name(), "bob");
    }

    #[test]
    fn test_login_credentials_serialize_identifier_in_use() {
        let by_email = serde_json::to_value(LoginCredentials::with_email("a@b.co", "secret1")).unwrap();
        assert_eq!(by_email, serde_json::json!({"email": "a@b.co", "password": "secret1"}));

        let by_name = serde_json::to_value(LoginCredentials::with_username("ada", "secret1")).unwrap();
        assert_eq!(by_name, serde_json::json!({"username": "ada", "password": "secret1"}));
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let creds = LoginCredentials::with_email("a@b.co", "hunter22");
        assert!(!format!("{:?}", creds).contains("hunter22"));

        let reg = RegisterRequest {
            username: "ada".into(),
            email: "a@b.co".into(),
            password: "hunter22".into(),
        };
        assert!(!format!("{:?}", reg).contains("hunter22"));
    }
}
