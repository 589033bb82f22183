use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::directory::UserDirectory;
use crate::engine::EngineError;
use crate::model::{Role, User, UserId};
use crate::validate::normalize_email;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: Ulid,
    pub user_id: UserId,
    pub role: Role,
}

/// Turns credentials into a session and a session token back into a user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, EngineError>;
    async fn current_user(&self, token: Ulid) -> Result<User, EngineError>;
    async fn logout(&self, token: Ulid);
}

/// Per-user secrets held in memory; sessions live until logout or restart.
pub struct StaticIdentityProvider {
    users: Arc<dyn UserDirectory>,
    secrets: HashMap<UserId, String>,
    sessions: DashMap<Ulid, UserId>,
}

impl StaticIdentityProvider {
    pub fn new(users: Arc<dyn UserDirectory>, secrets: HashMap<UserId, String>) -> Self {
        Self {
            users,
            secrets,
            sessions: DashMap::new(),
        }
    }

    /// Every user in the directory shares one secret.
    pub fn with_shared_secret(users: Arc<dyn UserDirectory>, secret: &str) -> Self {
        let secrets = users
            .list_users()
            .into_iter()
            .map(|u| (u.id, secret.to_string()))
            .collect();
        Self::new(users, secrets)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, EngineError> {
        let rejected = || EngineError::forbidden("invalid email or secret");
        let email = normalize_email(&credentials.email).ok_or_else(rejected)?;
        let user = self.users.resolve_by_email(&email).ok_or_else(rejected)?;
        match self.secrets.get(&user.id) {
            Some(secret) if *secret == credentials.secret => {}
            _ => {
                tracing::debug!(user_id = user.id, "authentication rejected");
                return Err(rejected());
            }
        }
        let token = Ulid::new();
        self.sessions.insert(token, user.id);
        tracing::info!(user_id = user.id, "session opened");
        Ok(Session {
            token,
            user_id: user.id,
            role: user.role,
        })
    }

    async fn current_user(&self, token: Ulid) -> Result<User, EngineError> {
        let user_id = self
            .sessions
            .get(&token)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::forbidden("unknown or expired session"))?;
        self.users
            .get_user(user_id)
            .ok_or_else(|| EngineError::forbidden("session user no longer exists"))
    }

    async fn logout(&self, token: Ulid) {
        self.sessions.remove(&token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;

    fn provider() -> StaticIdentityProvider {
        StaticIdentityProvider::with_shared_secret(Arc::new(StaticDirectory::seeded()), "hunter2")
    }

    fn creds(email: &str, secret: &str) -> Credentials {
        Credentials {
            email: email.into(),
            secret: secret.into(),
        }
    }

    #[tokio::test]
    async fn authenticate_then_resolve_token() {
        let auth = provider();
        let session = auth
            .authenticate(&creds(" Alice@Example.com ", "hunter2"))
            .await
            .unwrap();
        assert_eq!(session.role, Role::Organiser);

        let user = auth.current_user(session.token).await.unwrap();
        assert_eq!(user.id, session.user_id);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(auth.active_sessions(), 1);
    }

    #[tokio::test]
    async fn bad_credentials_are_forbidden() {
        let auth = provider();
        for (email, secret) in [
            ("alice@example.com", "wrong"),
            ("nobody@example.com", "hunter2"),
            ("not an email", "hunter2"),
        ] {
            let err = auth.authenticate(&creds(email, secret)).await.unwrap_err();
            assert!(matches!(err, EngineError::Forbidden(_)), "{email}");
        }
        assert_eq!(auth.active_sessions(), 0);
    }

    #[tokio::test]
    async fn logout_invalidates_token() {
        let auth = provider();
        let session = auth.authenticate(&creds("ben@example.com", "hunter2")).await.unwrap();
        auth.logout(session.token).await;
        let err = auth.current_user(session.token).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        assert!(auth.current_user(Ulid::new()).await.is_err());
    }

    #[tokio::test]
    async fn per_user_secrets() {
        let directory: Arc<dyn UserDirectory> = Arc::new(StaticDirectory::seeded());
        let secrets = HashMap::from([(2, "ben-secret".to_string())]);
        let auth = StaticIdentityProvider::new(directory, secrets);

        assert!(auth.authenticate(&creds("ben@example.com", "ben-secret")).await.is_ok());
        // No secret configured for Chloe.
        assert!(auth.authenticate(&creds("chloe@example.com", "ben-secret")).await.is_err());
    }
}
