use crate::{error::{Result, StoreError}, model::User};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// The current-user accessor shared by the stores. Signing in and out is driven by whatever authentication provider
/// the application uses; the session only publishes the outcome.
#[derive(Debug, Clone)]
pub struct AuthSession {
    user: Arc<watch::Sender<Option<User>>>,
}

impl AuthSession {
    pub fn new() -> Self {
        let (user, _) = watch::channel(None);
        Self { user: Arc::new(user) }
    }

    pub fn signed_in(user: User) -> Self {
        let session = Self::new();
        session.sign_in(user);
        session
    }

    pub fn sign_in(&self, user: User) {
        debug!(user = %user.id, "signed in");
        self.user.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if self.user.send_replace(None).is_some() {
            debug!("signed out");
        }
    }

    pub fn current(&self) -> Option<User> {
        self.user.borrow().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.user.borrow().as_ref().map(|u| u.id.clone())
    }

    /// The current user, or [`StoreError::Unauthenticated`].
    pub fn require(&self) -> Result<User> {
        self.current().ok_or(StoreError::Unauthenticated)
    }

    /// The current user if it is a seller.
    pub fn require_seller(&self) -> Result<User> {
        let user = self.require()?;
        if !user.is_seller() {
            return Err(StoreError::PermissionDenied(format!("'{}' is not a seller", user.id)));
        }
        Ok(user)
    }

    /// Publish a changed profile of the signed-in user. Returns false, and publishes nothing, if `user` is not the
    /// one signed in.
    pub fn update_current(&self, user: User) -> bool {
        let mut accepted = false;
        self.user.send_if_modified(|current| match current {
            Some(signed_in) if signed_in.id == user.id => {
                accepted = true;
                if *signed_in == user {
                    return false;
                }
                debug!(user = %user.id, "profile updated");
                *signed_in = user;
                true
            }
            _ => false,
        });
        accepted
    }

    /// Receive every sign-in and sign-out from now on.
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.user.subscribe()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
