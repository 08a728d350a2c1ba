//! crates/sapt_core/src/auth.rs
//!
//! Sign-up, sign-in and sign-out on top of the `IdentityProvider` port.
//!
//! `AuthService` is stateless and shared; `AuthClient` is the stateful,
//! single-user wrapper that publishes the identity-change feed a
//! `SessionContext` follows.

use futures::Stream;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::data_access::DataAccess;
use crate::domain::{Identity, Role};
use crate::error::{AuthError, ValidationError};
use crate::ports::{AuthGrant, Caller, IdentityProvider};
use crate::session::SessionContext;

pub const MIN_PASSWORD_LENGTH: usize = 6;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

pub fn validate_credentials(email: &str, password: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        return Err(ValidationError::MissingField("email"));
    }
    if !email_pattern().is_match(email) {
        return Err(ValidationError::InvalidValue {
            field: "email",
            reason: format!("'{}' is not an email address", email),
        });
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: "password",
            reason: format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct AuthService {
    identity: Arc<dyn IdentityProvider>,
    data: DataAccess,
}

impl AuthService {
    pub fn new(identity: Arc<dyn IdentityProvider>, data: DataAccess) -> Self {
        Self { identity, data }
    }

    /// Registers credentials, writes the profile with the chosen role and opens a session.
    pub async fn sign_up(&self, email: &str, password: &str, role: Role) -> Result<AuthGrant, AuthError> {
        validate_credentials(email, password)?;
        let identity = self.identity.create_account(email, password).await?;
        self.data
            .create_profile(&Caller::User(identity.uid.clone()), &identity, role)
            .await?;
        info!(uid = %identity.uid, role = %role, "account signed up");
        self.identity.open_session(&identity).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthGrant, AuthError> {
        let identity = self.identity.verify_credentials(email, password).await?;
        info!(uid = %identity.uid, "signed in");
        self.identity.open_session(&identity).await
    }

    pub async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.identity.close_session(token).await
    }

    /// Resolves a session token into a ready session context.
    pub async fn session_for_token(&self, token: &str) -> Result<SessionContext, AuthError> {
        let identity = self.identity.resolve_session(token).await?;
        Ok(SessionContext::resolve(identity, self.data.store().as_ref()).await)
    }
}

/// A single signed-in client: holds the current grant and publishes identity changes.
pub struct AuthClient {
    service: AuthService,
    grant: Mutex<Option<AuthGrant>>,
    changes: watch::Sender<Option<Identity>>,
}

impl AuthClient {
    pub fn new(service: AuthService) -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            service,
            grant: Mutex::new(None),
            changes,
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str, role: Role) -> Result<Identity, AuthError> {
        let grant = self.service.sign_up(email, password, role).await?;
        Ok(self.replace_grant(grant).await)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let grant = self.service.sign_in(email, password).await?;
        Ok(self.replace_grant(grant).await)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.grant.lock().await.take();
        if let Some(grant) = previous {
            self.service.sign_out(&grant.token).await?;
        }
        self.changes.send_replace(None);
        Ok(())
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.changes.borrow().clone()
    }

    /// The identity-change feed: the current value first, then every change.
    pub fn identity_changes(&self) -> impl Stream<Item = Option<Identity>> + Send + 'static {
        let mut rx = self.changes.subscribe();
        async_stream::stream! {
            let current = rx.borrow_and_update().clone();
            yield current;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        }
    }

    async fn replace_grant(&self, grant: AuthGrant) -> Identity {
        let identity = grant.identity.clone();
        *self.grant.lock().await = Some(grant);
        self.changes.send_replace(Some(identity.clone()));
        identity
    }
}
