use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::error::{ApiError, SessionError};
use crate::models::User;

/// Authenticated context handed to every command.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<User>,
}

/// Shape of the persisted `auth-storage` document.
#[derive(Deserialize)]
struct PersistedStore {
    state: PersistedState,
}

#[derive(Deserialize)]
struct PersistedState {
    token: Option<String>,
    user: Option<serde_json::Value>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Reads the session from disk. A missing file is an anonymous session.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let shown = path.display().to_string();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %shown, "no auth storage found, continuing anonymously");
                return Ok(Self::anonymous());
            }
            Err(source) => {
                return Err(SessionError::Read {
                    path: shown,
                    source,
                })
            }
        };

        let store: PersistedStore =
            serde_json::from_str(&raw).map_err(|source| SessionError::Malformed {
                path: shown.clone(),
                source,
            })?;

        // A profile the current model cannot parse is dropped; `refresh` fetches a fresh one.
        let user = store
            .state
            .user
            .and_then(|value| serde_json::from_value::<User>(value).ok());

        Ok(Self {
            token: store.state.token.filter(|token| !token.is_empty()),
            user,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.id.as_str())
    }

    /// Replaces the cached profile with the backend's current view of the user.
    pub async fn refresh(&mut self, client: &ApiClient) -> Result<&User, ApiError> {
        let profile = client.profile().await?;
        info!(user = %profile.id, "session profile refreshed");
        let user = self.user.insert(profile);
        Ok(&*user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_storage_is_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::load(&dir.path().join("auth-storage.json")).unwrap();
        assert!(!session.is_authenticated());
        assert!(session.user.is_none());
    }

    #[test]
    fn reads_token_and_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-storage.json");
        std::fs::write(
            &path,
            r#"{"state":{"token":"abc123","user":{"id":"t1","role":"teacher",
                "firstName":"Jules","email":"jules@example.com"}},"version":0}"#,
        )
        .unwrap();

        let session = Session::load(&path).unwrap();
        assert_eq!(session.token.as_deref(), Some("abc123"));
        assert_eq!(session.user_id(), Some("t1"));
    }

    #[test]
    fn malformed_storage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-storage.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Session::load(&path),
            Err(SessionError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn refresh_replaces_the_profile() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/user/profile")
                    .header("Authorization", "Bearer abc123");
                then.status(200).json_body(serde_json::json!({
                    "id": "s1",
                    "role": "student",
                    "firstName": "Kiara",
                    "lastName": "Patel",
                    "email": "kiara@example.com",
                    "streak": 12
                }));
            })
            .await;

        let mut session = Session {
            token: Some("abc123".into()),
            user: None,
        };
        let config = crate::config::AppConfig::default().with_api_url(server.base_url());
        let client = ApiClient::new(&config, &session).unwrap();

        let user = session.refresh(&client).await.unwrap();
        assert_eq!(user.streak, 12);
        mock.assert_async().await;
        assert_eq!(session.user_id(), Some("s1"));
    }
}
