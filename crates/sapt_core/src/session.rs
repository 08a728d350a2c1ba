//! crates/sapt_core/src/session.rs
//!
//! The session/role context: who is signed in and with which role.
//!
//! The context starts unresolved and moves back through that state on every
//! identity change while the profile is read. Role checks fail closed until a
//! role has been resolved.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::{Identity, Role, User};
use crate::error::AuthError;
use crate::ports::{Caller, Collection, DocumentStore};

/// The three observable states of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Still waiting for the identity feed or the profile read.
    Unresolved,
    Anonymous,
    /// Signed in. `role` is `None` when no readable profile exists.
    Authenticated { identity: Identity, role: Option<Role> },
}

/// An explicit session context. Clones observe the same state; only the
/// identity-change driver writes it.
#[derive(Clone)]
pub struct SessionContext {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unresolved);
        Self { state: Arc::new(state) }
    }

    /// Builds a context already resolved for one identity.
    pub async fn resolve(identity: Option<Identity>, store: &dyn DocumentStore) -> Self {
        let context = Self::new();
        context.apply(identity, store).await;
        context
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn loading(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Unresolved)
    }

    pub fn current_user(&self) -> Option<Identity> {
        match &*self.state.borrow() {
            SessionState::Authenticated { identity, .. } => Some(identity.clone()),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match &*self.state.borrow() {
            SessionState::Authenticated { role, .. } => *role,
            _ => None,
        }
    }

    /// The principal store calls should run as.
    pub fn caller(&self) -> Caller {
        self.current_user()
            .map_or(Caller::Anonymous, |identity| Caller::User(identity.uid))
    }

    /// Handles one identity change: sign-in (`Some`) or sign-out (`None`).
    pub async fn apply(&self, event: Option<Identity>, store: &dyn DocumentStore) {
        self.state.send_replace(SessionState::Unresolved);

        let next = match event {
            None => SessionState::Anonymous,
            Some(identity) => {
                let role = lookup_role(&identity, store).await;
                SessionState::Authenticated { identity, role }
            }
        };
        info!(state = ?next, "session resolved");
        self.state.send_replace(next);
    }

    /// Drives the context from an identity-change feed until the feed ends.
    pub fn track<S>(&self, feed: S, store: Arc<dyn DocumentStore>) -> JoinHandle<()>
    where
        S: Stream<Item = Option<Identity>> + Send + 'static,
    {
        let context = self.clone();
        tokio::spawn(async move {
            futures::pin_mut!(feed);
            while let Some(event) = feed.next().await {
                context.apply(event, store.as_ref()).await;
            }
        })
    }

    /// Waits until the context leaves the unresolved state.
    pub async fn resolved(&self) -> SessionState {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        rx.wait_for(|s| !matches!(s, SessionState::Unresolved))
            .await
            .map(|state| state.clone())
            .unwrap_or(SessionState::Unresolved)
    }

    /// Requires a signed-in user, whatever the role.
    pub fn require_signed_in(&self) -> Result<Identity, AuthError> {
        match &*self.state.borrow() {
            SessionState::Unresolved => Err(AuthError::SessionLoading),
            SessionState::Anonymous => Err(AuthError::NotSignedIn),
            SessionState::Authenticated { identity, .. } => Ok(identity.clone()),
        }
    }

    /// Requires one of `allowed` and returns the caller to act as.
    pub fn authorize(&self, allowed: &[Role]) -> Result<Caller, AuthError> {
        match &*self.state.borrow() {
            SessionState::Unresolved => Err(AuthError::SessionLoading),
            SessionState::Anonymous => Err(AuthError::NotSignedIn),
            SessionState::Authenticated { identity, role } => match role {
                Some(role) if allowed.contains(role) => Ok(Caller::User(identity.uid.clone())),
                _ => Err(AuthError::Forbidden),
            },
        }
    }
}

async fn lookup_role(identity: &Identity, store: &dyn DocumentStore) -> Option<Role> {
    let caller = Caller::User(identity.uid.clone());
    match store.get(&caller, Collection::Users, &identity.uid).await {
        Ok(Some(doc)) => match doc.decode::<User>(Collection::Users, "uid") {
            Ok(user) => Some(user.role),
            Err(e) => {
                warn!(uid = %identity.uid, error = %e, "profile could not be decoded");
                None
            }
        },
        Ok(None) => {
            warn!(uid = %identity.uid, "signed in without a profile document");
            None
        }
        Err(e) => {
            warn!(uid = %identity.uid, error = %e, "failed to read profile");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{seed_user, MemoryStore};

    fn alice() -> Identity {
        Identity {
            uid: "alice".into(),
            email: "alice@example.com".into(),
        }
    }

    #[tokio::test]
    async fn starts_loading_and_fails_closed() {
        let context = SessionContext::new();
        assert!(context.loading());
        assert_eq!(context.authorize(&Role::ALL), Err(AuthError::SessionLoading));
        assert_eq!(context.caller(), Caller::Anonymous);
    }

    #[tokio::test]
    async fn sign_in_resolves_role_and_sign_out_clears_it() {
        let store = MemoryStore::new();
        seed_user(&store, "alice", "alice@example.com", "alice", Role::Supervisor).await.unwrap();

        let context = SessionContext::new();
        context.apply(Some(alice()), &store).await;
        assert!(!context.loading());
        assert_eq!(context.role(), Some(Role::Supervisor));
        assert_eq!(context.authorize(&[Role::Admin, Role::Supervisor]), Ok(Caller::user("alice")));
        assert_eq!(context.authorize(&[Role::Admin]), Err(AuthError::Forbidden));

        context.apply(None, &store).await;
        assert_eq!(context.state(), SessionState::Anonymous);
        assert_eq!(context.role(), None);
        assert_eq!(context.authorize(&Role::ALL), Err(AuthError::NotSignedIn));
    }

    #[tokio::test]
    async fn missing_profile_has_no_role() {
        let store = MemoryStore::new();
        let context = SessionContext::resolve(Some(alice()), &store).await;
        assert_eq!(context.current_user(), Some(alice()));
        assert_eq!(context.role(), None);
        assert_eq!(context.authorize(&Role::ALL), Err(AuthError::Forbidden));
        assert!(context.require_signed_in().is_ok());
    }

    #[tokio::test]
    async fn track_follows_the_identity_feed() {
        let store = MemoryStore::new();
        seed_user(&store, "alice", "alice@example.com", "alice", Role::Student).await.unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(store);

        let context = SessionContext::new();
        let feed = futures::stream::iter(vec![Some(alice())]);
        context.track(feed, store).await.unwrap();

        let state = context.resolved().await;
        assert!(matches!(state, SessionState::Authenticated { role: Some(Role::Student), .. }));
    }
}
