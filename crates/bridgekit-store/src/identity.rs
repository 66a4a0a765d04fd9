//! Per-user identity bindings.
//!
//! The [`IdentityStore`] maps a local user id to the delivery identities the
//! bridge has resolved for that user. Each binding sits behind its own async
//! mutex: a caller holds it across the whole resolve sequence, so concurrent
//! first resolutions for one user are serialized while other users proceed
//! independently. Entries are never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use bridgekit_shared::types::{ActingHandle, UserId};

use crate::models::Ghost;

/// Where a binding is in the double-puppet / ghost decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// Nothing attempted yet.
    Unresolved,
    /// Double-puppet setup succeeded; the handle is cached.
    DoublePuppetActive,
    /// Double-puppet setup failed or was cleared; a ghost acts for the user.
    GhostFallback,
}

#[derive(Debug, Clone)]
pub struct IdentityBinding {
    pub user_id: UserId,
    pub state: ResolutionState,
    pub double_puppet: Option<ActingHandle>,
    pub ghost: Option<Ghost>,
    /// Number of double-puppet setup calls made for this binding.
    pub setup_attempts: u32,
    /// Number of ghosts constructed for this binding.
    pub ghosts_created: u32,
}

impl IdentityBinding {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            state: ResolutionState::Unresolved,
            double_puppet: None,
            ghost: None,
            setup_attempts: 0,
            ghosts_created: 0,
        }
    }

    /// The handle that should act for the user, double puppet first.
    pub fn preferred_double_puppet(&self) -> Option<&ActingHandle> {
        match self.state {
            ResolutionState::DoublePuppetActive => self.double_puppet.as_ref(),
            _ => None,
        }
    }
}

pub type SharedBinding = Arc<Mutex<IdentityBinding>>;

/// In-memory, process-lifetime cache of identity bindings.
#[derive(Clone, Default)]
pub struct IdentityStore {
    bindings: Arc<Mutex<HashMap<UserId, SharedBinding>>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: &UserId) -> Option<SharedBinding> {
        self.bindings.lock().await.get(user_id).cloned()
    }

    /// Return the binding for `user_id`, creating an empty one on first access.
    ///
    /// Every caller for the same key receives the same binding.
    pub async fn get_or_create(&self, user_id: &UserId) -> SharedBinding {
        let mut bindings = self.bindings.lock().await;
        bindings
            .entry(user_id.clone())
            .or_insert_with(|| {
                debug!(user = %user_id, "Creating identity binding");
                Arc::new(Mutex::new(IdentityBinding::new(user_id.clone())))
            })
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.bindings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bindings.lock().await.is_empty()
    }
}
