//! services/api/src/adapters/memory_identity.rs
//!
//! An in-process `IdentityProvider` for the `memory` backend and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sapt_core::domain::Identity;
use sapt_core::ports::{AuthGrant, IdentityProvider};
use sapt_core::AuthError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::identity::{hash_password, new_token, normalize_email, verify_password};

struct Account {
    uid: String,
    password_hash: String,
}

pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashMap<String, (Identity, DateTime<Utc>)>>,
    session_ttl: Duration,
}

impl MemoryIdentityProvider {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email);
        let password_hash = hash_password(password)?;
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&email) {
            return Err(AuthError::EmailInUse(email));
        }
        let uid = Uuid::new_v4().simple().to_string();
        accounts.insert(
            email.clone(),
            Account {
                uid: uid.clone(),
                password_hash,
            },
        );
        Ok(Identity { uid, email })
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email);
        let accounts = self.accounts.read().await;
        let account = accounts.get(&email).ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &account.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Identity {
            uid: account.uid.clone(),
            email,
        })
    }

    async fn open_session(&self, identity: &Identity) -> Result<AuthGrant, AuthError> {
        let token = new_token();
        let expires_at = Utc::now() + self.session_ttl;
        self.sessions
            .write()
            .await
            .insert(token.clone(), (identity.clone(), expires_at));
        Ok(AuthGrant {
            identity: identity.clone(),
            token,
            expires_at,
        })
    }

    async fn close_session(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(token) {
            Some((identity, expires_at)) if *expires_at > Utc::now() => Ok(Some(identity.clone())),
            Some(_) => {
                sessions.remove(token);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_resolve_until_closed_or_expired() {
        let provider = MemoryIdentityProvider::new(Duration::days(1));
        let identity = provider.create_account("Jane@example.com", "secret1").await.unwrap();
        assert_eq!(identity.email, "jane@example.com");

        let grant = provider.open_session(&identity).await.unwrap();
        assert_eq!(provider.resolve_session(&grant.token).await.unwrap(), Some(identity.clone()));
        provider.close_session(&grant.token).await.unwrap();
        assert_eq!(provider.resolve_session(&grant.token).await.unwrap(), None);

        let expired = MemoryIdentityProvider::new(Duration::seconds(-1));
        let grant = expired.open_session(&identity).await.unwrap();
        assert_eq!(expired.resolve_session(&grant.token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn credentials_are_checked() {
        let provider = MemoryIdentityProvider::new(Duration::days(1));
        provider.create_account("jane@example.com", "secret1").await.unwrap();

        assert!(matches!(
            provider.create_account("JANE@example.com", "other12").await,
            Err(AuthError::EmailInUse(_))
        ));
        assert_eq!(
            provider.verify_credentials("jane@example.com", "wrong12").await,
            Err(AuthError::InvalidCredentials)
        );
        assert!(provider.verify_credentials(" jane@example.com", "secret1").await.is_ok());
    }
}
