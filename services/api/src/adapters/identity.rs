//! services/api/src/adapters/identity.rs
//!
//! The PostgreSQL implementation of the `IdentityProvider` port: argon2
//! password hashes in `credentials` and opaque session tokens in
//! `auth_sessions`.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sapt_core::domain::Identity;
use sapt_core::ports::{AuthGrant, IdentityProvider};
use sapt_core::AuthError;
use sqlx::{FromRow, PgPool};
use tracing::error;
use uuid::Uuid;

//=========================================================================================
// Password and token helpers
//=========================================================================================

pub(crate) fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            AuthError::Provider("failed to hash password".to_string())
        })
}

pub(crate) fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        AuthError::Provider("stored password hash is unreadable".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn new_token() -> String {
    Uuid::new_v4().to_string()
}

fn provider_error(e: sqlx::Error) -> AuthError {
    error!("Identity store error: {:?}", e);
    AuthError::Provider(e.to_string())
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct PgIdentityProvider {
    pool: PgPool,
    session_ttl: Duration,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool, session_ttl: Duration) -> Self {
        Self { pool, session_ttl }
    }
}

#[derive(FromRow)]
struct CredentialRecord {
    uid: String,
    email: String,
    password_hash: String,
}

#[derive(FromRow)]
struct SessionRecord {
    uid: String,
    email: String,
    expires_at: DateTime<Utc>,
}

//=========================================================================================
// `IdentityProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email);
        let password_hash = hash_password(password)?;
        let uid = Uuid::new_v4().simple().to_string();

        let result = sqlx::query("INSERT INTO credentials (uid, email, password_hash) VALUES ($1, $2, $3)")
            .bind(&uid)
            .bind(&email)
            .bind(&password_hash)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(Identity { uid, email }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(AuthError::EmailInUse(email)),
            Err(e) => Err(provider_error(e)),
        }
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            "SELECT uid, email, password_hash FROM credentials WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(provider_error)?
        .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &record.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Identity {
            uid: record.uid,
            email: record.email,
        })
    }

    async fn open_session(&self, identity: &Identity) -> Result<AuthGrant, AuthError> {
        let token = new_token();
        let expires_at = Utc::now() + self.session_ttl;
        sqlx::query("INSERT INTO auth_sessions (id, uid, expires_at) VALUES ($1, $2, $3)")
            .bind(&token)
            .bind(&identity.uid)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(provider_error)?;

        Ok(AuthGrant {
            identity: identity.clone(),
            token,
            expires_at,
        })
    }

    async fn close_session(&self, token: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT s.uid, c.email, s.expires_at FROM auth_sessions s \
             JOIN credentials c ON c.uid = s.uid WHERE s.id = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(provider_error)?;

        match record {
            Some(record) if record.expires_at > Utc::now() => Ok(Some(Identity {
                uid: record.uid,
                email: record.email,
            })),
            Some(_) => {
                // Expired; clean it up while we are here.
                self.close_session(token).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
