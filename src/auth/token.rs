//! OAuth token model and the file-backed token store
//!
//! The on-disk layout matches the `token.json` written by earlier drivebox
//! releases (`access_token`, `token_type`, `refresh_token`, `expiry`), so
//! existing sessions keep working.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::error::AuthError;
use crate::fs_util::write_atomic;

/// OAuth access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiry (RFC3339)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_expiry"
    )]
    pub expiry: Option<DateTime<Utc>>,

    /// Remaining provider fields (scope, id_token, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Older token files store "no expiry" as the zero time `0001-01-01T00:00:00Z`
fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let expiry = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(expiry.filter(|t| t.timestamp() > 0))
}

impl Token {
    /// True once the expiry has passed; tokens without expiry never expire locally
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }

    /// Value for the `Authorization` header
    pub fn authorization_header(&self) -> String {
        let token_type = if self.token_type.is_empty() || self.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", token_type, self.access_token)
    }
}

/// Durable location of the current session's token
pub trait TokenStore: Send + Sync {
    /// Replace the stored token; readers see the old token or the new one, never a mix
    fn write(&self, token: &Token) -> Result<(), AuthError>;

    fn read(&self) -> Result<Token, AuthError>;

    /// Delete the stored token (sign-out)
    fn remove(&self) -> Result<(), AuthError>;
}

/// Token store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }
}

impl TokenStore for FileTokenStore {
    fn write(&self, token: &Token) -> Result<(), AuthError> {
        let json = serde_json::to_vec_pretty(token)
            .map_err(|e| AuthError::TokenPersistFailed(format!("failed to encode token: {}", e)))?;

        write_atomic(&self.path, &json).map_err(|e| {
            AuthError::TokenPersistFailed(format!("failed to write {}: {}", self.display_path(), e))
        })?;

        tracing::debug!("Token written to {}", self.display_path());
        Ok(())
    }

    fn read(&self) -> Result<Token, AuthError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(AuthError::NoToken {
                    path: self.display_path(),
                });
            }
            Err(e) => {
                return Err(AuthError::CorruptToken {
                    path: self.display_path(),
                    reason: e.to_string(),
                });
            }
        };

        serde_json::from_str(&content).map_err(|e| AuthError::CorruptToken {
            path: self.display_path(),
            reason: e.to_string(),
        })
    }

    fn remove(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(AuthError::NoToken {
                path: self.display_path(),
            }),
            Err(e) => Err(AuthError::TokenPersistFailed(format!(
                "failed to remove {}: {}",
                self.display_path(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::ErrorKind;
    use chrono::TimeZone;

    fn sample_token() -> Token {
        let mut extra = serde_json::Map::new();
        extra.insert("scope".to_string(), serde_json::json!("https://www.googleapis.com/auth/drive"));
        Token {
            access_token: "tok1".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("ref1".to_string()),
            expiry: Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()),
            extra,
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        let token = sample_token();

        store.write(&token).unwrap();
        assert_eq!(store.read().unwrap(), token);
    }

    #[test]
    fn test_write_overwrites_previous_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.write(&sample_token()).unwrap();

        let mut newer = sample_token();
        newer.access_token = "tok2".to_string();
        newer.refresh_token = None;
        store.write(&newer).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.access_token, "tok2");
        assert!(loaded.refresh_token.is_none());
    }

    #[test]
    fn test_read_missing_is_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        assert_eq!(store.read().unwrap_err().kind(), ErrorKind::NoToken);
    }

    #[test]
    fn test_read_garbage_is_corrupt_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "{\"access_tok").unwrap();
        let store = FileTokenStore::new(&path);
        assert_eq!(store.read().unwrap_err().kind(), ErrorKind::CorruptToken);
    }

    #[test]
    fn test_reads_legacy_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(
            &path,
            r#"{"access_token":"ya29.a0","token_type":"Bearer","refresh_token":"1//0g","expiry":"2024-05-01T10:20:30.123456+02:00"}"#,
        )
        .unwrap();

        let token = FileTokenStore::new(&path).read().unwrap();
        assert_eq!(token.access_token, "ya29.a0");
        assert_eq!(token.refresh_token.as_deref(), Some("1//0g"));
        assert_eq!(
            token.expiry.unwrap().to_rfc3339(),
            "2024-05-01T08:20:30.123456+00:00"
        );
        assert!(token.extra.is_empty());
    }

    #[test]
    fn test_zero_expiry_means_no_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(
            &path,
            r#"{"access_token":"ya29","token_type":"Bearer","expiry":"0001-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let token = FileTokenStore::new(&path).read().unwrap();
        assert_eq!(token.expiry, None);
        assert!(!token.is_expired());

        let token: Token =
            serde_json::from_str(r#"{"access_token":"ya29","expiry":null}"#).unwrap();
        assert_eq!(token.expiry, None);
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.write(&sample_token()).unwrap();

        store.remove().unwrap();
        assert!(!store.path().exists());
        assert_eq!(store.remove().unwrap_err().kind(), ErrorKind::NoToken);
    }

    #[test]
    fn test_expiry_checks() {
        let token = sample_token();
        let before = Utc.with_ymd_and_hms(2029, 12, 31, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2030, 2, 1, 0, 0, 0).unwrap();
        assert!(!token.is_expired_at(before));
        assert!(token.is_expired_at(after));

        let mut no_expiry = sample_token();
        no_expiry.expiry = None;
        assert!(!no_expiry.is_expired_at(after));
    }

    #[test]
    fn test_authorization_header_normalizes_bearer() {
        let mut token = sample_token();
        token.token_type = "bearer".to_string();
        assert_eq!(token.authorization_header(), "Bearer tok1");
    }
}
