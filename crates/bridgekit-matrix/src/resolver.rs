//! Chooses which identity performs an action.
//!
//! For a local user the resolver prefers a double puppet and falls back to a
//! ghost named after the user. Setup is attempted once per user: the binding
//! lock is held from the first look at the state until the handle is cached,
//! so concurrent first resolutions share a single setup call and a single
//! ghost.

use std::sync::Arc;

use tracing::{debug, info, warn};

use bridgekit_shared::types::{ActingHandle, UserId};
use bridgekit_store::{Ghost, IdentityBinding, IdentityStore, LogicalUser, ResolutionState, Room};

use crate::error::BridgeError;
use crate::ghost::GhostRegistry;
use crate::transport::Transport;

pub struct IdentityResolver {
    store: IdentityStore,
    registry: Arc<GhostRegistry>,
    transport: Arc<dyn Transport>,
}

impl IdentityResolver {
    pub fn new(store: IdentityStore, registry: Arc<GhostRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            registry,
            transport,
        }
    }

    // -----------------------------------------------------------------------
    // User handles
    // -----------------------------------------------------------------------

    /// Handle that acts as `user`: the double puppet if one could be set up,
    /// otherwise the user's ghost. Never fails.
    pub async fn resolve_acting_handle(&self, user: &LogicalUser) -> ActingHandle {
        let shared = self.store.get_or_create(user.user_id()).await;
        let mut binding = shared.lock().await;

        if binding.state == ResolutionState::Unresolved {
            self.try_double_puppet(user, &mut *binding).await;
        }

        if let Some(handle) = binding.preferred_double_puppet() {
            return handle.clone();
        }

        let ghost = match binding.ghost.clone() {
            Some(ghost) => ghost,
            None => {
                let ghost = self.registry.new_ghost(
                    user.remote_id.clone(),
                    user.display_name.clone(),
                    user.user_id().localpart(),
                    Default::default(),
                );
                binding.ghosts_created += 1;
                binding.ghost = Some(ghost.clone());
                debug!(user = %user.user_id(), ghost = %ghost.user_id, "Using ghost for user");
                ghost
            }
        };
        self.registry.as_ghost(&ghost)
    }

    async fn try_double_puppet(&self, user: &LogicalUser, binding: &mut IdentityBinding) {
        binding.setup_attempts += 1;

        match self
            .transport
            .setup_double_puppet(user.user_id(), user.access_token.as_deref())
            .await
        {
            Ok((handle, _credential)) => {
                info!(user = %user.user_id(), "Double puppeting enabled");
                binding.double_puppet = Some(handle);
                binding.state = ResolutionState::DoublePuppetActive;
            }
            Err(source) => {
                let err = BridgeError::SetupDenied {
                    user: user.user_id().clone(),
                    source,
                };
                warn!(error = %err, "Falling back to ghost");
                binding.state = ResolutionState::GhostFallback;
            }
        }
    }

    /// Resolve like [`resolve_acting_handle`](Self::resolve_acting_handle)
    /// and record the outcome on `user`: an active double puppet and its
    /// credential are stored, a stale one is dropped.
    pub async fn resolve_and_record(&self, user: &mut LogicalUser) -> ActingHandle {
        let handle = self.resolve_acting_handle(user).await;

        if handle.is_double_puppet() {
            if user.double_puppet() != Some(&handle) {
                user.clear_double_puppet();
                if let Err(e) = user.set_double_puppet(handle.clone()) {
                    warn!(user = %handle.user_id, error = %e, "Could not record double puppet");
                }
            }
        } else if user.double_puppet().is_some() {
            debug!(user = %user.user_id(), "Dropping stale double puppet");
            user.clear_double_puppet();
        }
        handle
    }

    /// Forget the resolution for `user_id` so the next one tries
    /// double-puppet setup again. The ghost, if any, is kept.
    pub async fn reset(&self, user_id: &UserId) {
        let shared = self.store.get_or_create(user_id).await;
        let mut binding = shared.lock().await;
        binding.double_puppet = None;
        binding.state = ResolutionState::Unresolved;
        debug!(user = %user_id, "Identity binding reset");
    }

    pub async fn has_double_puppet(&self, user: &LogicalUser) -> bool {
        match self.store.get(user.user_id()).await {
            Some(binding) => binding.lock().await.preferred_double_puppet().is_some(),
            None => false,
        }
    }

    /// Whether a ghost has been constructed for `user`. Does not resolve.
    pub async fn has_user_ghost(&self, user: &LogicalUser) -> bool {
        self.user_ghost(user).await.is_some()
    }

    /// The user's own ghost, if one exists. Does not resolve.
    pub async fn user_ghost(&self, user: &LogicalUser) -> Option<Ghost> {
        let binding = self.store.get(user.user_id()).await?;
        let binding = binding.lock().await;
        binding.ghost.clone()
    }

    /// The cached double-puppet handle, if setup succeeded. Does not resolve.
    pub async fn double_puppet(&self, user_id: &UserId) -> Option<ActingHandle> {
        let binding = self.store.get(user_id).await?;
        let binding = binding.lock().await;
        binding.preferred_double_puppet().cloned()
    }

    /// Forget the double puppet. Later resolutions use the ghost and do not
    /// retry setup.
    pub async fn clear_double_puppet(&self, user_id: &UserId) {
        let shared = self.store.get_or_create(user_id).await;
        let mut binding = shared.lock().await;
        if binding.double_puppet.take().is_some() {
            info!(user = %user_id, "Double puppet cleared");
        }
        binding.state = ResolutionState::GhostFallback;
    }

    /// Copy of the binding for `user_id`.
    pub async fn binding(&self, user_id: &UserId) -> Option<IdentityBinding> {
        let binding = self.store.get(user_id).await?;
        let binding = binding.lock().await;
        Some(binding.clone())
    }

    // -----------------------------------------------------------------------
    // Room handles
    // -----------------------------------------------------------------------

    /// The room's only ghost, or the bot when there are none or several.
    pub fn resolve_room_actor(&self, room: &Room) -> ActingHandle {
        match room.ghosts.as_slice() {
            [ghost] => self.registry.as_ghost(ghost),
            _ => self.as_bot(),
        }
    }

    pub fn resolve_room_ghost(&self, room: &Room, sender: &UserId) -> Option<ActingHandle> {
        room.ghost(sender).map(|ghost| self.registry.as_ghost(ghost))
    }

    pub fn as_ghost(&self, ghost: &Ghost) -> ActingHandle {
        self.registry.as_ghost(ghost)
    }

    pub fn as_bot(&self) -> ActingHandle {
        ActingHandle::bot(self.transport.bot_user_id().clone())
    }
}
