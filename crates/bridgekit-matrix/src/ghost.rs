//! Ghost construction and profile management.
//!
//! Ghost ids are derived from the bridge's localpart prefix and the remote
//! username, so building the same ghost twice always yields the same id and
//! no registry state is needed for it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use bridgekit_shared::constants::AVATAR_MIME_TYPE;
use bridgekit_shared::types::{ActingHandle, ContentUri, UserId};
use bridgekit_store::Ghost;

use crate::error::{BridgeError, Result};
use crate::media::MediaFetcher;
use crate::transport::Transport;

pub struct GhostRegistry {
    transport: Arc<dyn Transport>,
    fetcher: Arc<dyn MediaFetcher>,
    prefix: String,
}

impl GhostRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn MediaFetcher>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            fetcher,
            prefix: prefix.into(),
        }
    }

    /// `@{prefix}_{username}:{domain}`
    pub fn ghost_user_id(&self, username: &str) -> UserId {
        UserId::new(
            &format!("{}_{}", self.prefix, username),
            self.transport.domain(),
        )
    }

    pub fn new_ghost(
        &self,
        remote_id: impl Into<String>,
        display_name: impl Into<String>,
        username: impl Into<String>,
        avatar_url: ContentUri,
    ) -> Ghost {
        let username = username.into();
        let user_id = self.ghost_user_id(&username);
        debug!(ghost = %user_id, username = %username, "Creating ghost");

        Ghost {
            user_id,
            remote_id: remote_id.into(),
            display_name: display_name.into(),
            username,
            avatar_url,
        }
    }

    /// Whether `user_id` is in the namespace this registry hands out.
    pub fn is_ghost(&self, user_id: &UserId) -> bool {
        user_id.domain() == self.transport.domain()
            && user_id
                .localpart()
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with('_'))
    }

    pub fn as_ghost(&self, ghost: &Ghost) -> ActingHandle {
        ActingHandle::ghost(ghost.user_id.clone())
    }

    /// Rename a ghost.
    ///
    /// The cached name is updated before the remote call and is kept even
    /// when the remote rename fails.
    pub async fn update_display_name(&self, ghost: &mut Ghost, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        ghost.display_name = name.clone();

        self.transport
            .set_display_name(&self.as_ghost(ghost), &name)
            .await
            .map_err(|source| {
                warn!(ghost = %ghost.user_id, error = %source, "Could not update ghost name");
                BridgeError::RenameFailed {
                    ghost: ghost.user_id.clone(),
                    source,
                }
            })
    }

    /// Download `url` and store it in the chat network's media repository.
    pub async fn fetch_and_upload(&self, url: &str) -> Result<ContentUri> {
        let data = self.fetcher.fetch(url).await?;
        let uri = self
            .transport
            .upload_media(data.to_vec(), AVATAR_MIME_TYPE)
            .await
            .map_err(BridgeError::UploadFailed)?;
        info!(uri = %uri, "Uploaded media");
        Ok(uri)
    }

    /// Replace a ghost's avatar with the image at `url`.
    pub async fn upload_avatar(&self, ghost: &mut Ghost, url: &str) -> Result<ContentUri> {
        let uri = self.fetch_and_upload(url).await?;

        self.transport
            .set_avatar_url(&self.as_ghost(ghost), &uri)
            .await
            .map_err(|source| BridgeError::TransportUnavailable {
                action: "set ghost avatar",
                source,
            })?;

        ghost.avatar_url = uri.clone();
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, InMemoryTransport};
    use async_trait::async_trait;
    use bytes::Bytes;

    pub(crate) struct StaticFetcher(pub Option<Vec<u8>>);

    #[async_trait]
    impl MediaFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes> {
            self.0
                .clone()
                .map(Bytes::from)
                .ok_or_else(|| BridgeError::DownloadFailed {
                    url: url.to_string(),
                    reason: "unreachable".into(),
                })
        }
    }

    fn registry(fetched: Option<Vec<u8>>) -> (Arc<InMemoryTransport>, GhostRegistry) {
        let transport = Arc::new(InMemoryTransport::new("bridgebot", "example.org"));
        let registry = GhostRegistry::new(
            transport.clone(),
            Arc::new(StaticFetcher(fetched)),
            "sh-mybridge",
        );
        (transport, registry)
    }

    #[test]
    fn handle_derivation_is_idempotent() {
        let (_, registry) = registry(None);
        let a = registry.new_ghost("r1", "Alice", "alice", ContentUri::default());
        let b = registry.new_ghost("r2", "Someone Else", "alice", ContentUri::default());
        assert_eq!(a.user_id, b.user_id);
        assert_eq!(a.user_id.as_str(), "@sh-mybridge_alice:example.org");
    }

    #[test]
    fn recognises_own_namespace() {
        let (_, registry) = registry(None);
        assert!(registry.is_ghost(&UserId::new("sh-mybridge_alice", "example.org")));
        assert!(!registry.is_ghost(&UserId::new("sh-mybridge_alice", "other.org")));
        assert!(!registry.is_ghost(&UserId::new("alice", "example.org")));
        assert!(!registry.is_ghost(&UserId::new("sh-mybridge_", "example.org")));
    }

    #[tokio::test]
    async fn rename_failure_keeps_local_name() {
        let (transport, registry) = registry(None);
        let mut ghost = registry.new_ghost("r1", "Alice", "alice", ContentUri::default());

        transport.fail(|f| f.display_name = true);
        let err = registry
            .update_display_name(&mut ghost, "Spooky")
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::RenameFailed { .. }));
        assert_eq!(ghost.display_name, "Spooky");
        assert_eq!(transport.profile(&ghost.user_id).display_name, None);
    }

    #[tokio::test]
    async fn rename_reaches_profile() {
        let (transport, registry) = registry(None);
        let mut ghost = registry.new_ghost("r1", "Alice", "alice", ContentUri::default());

        registry.update_display_name(&mut ghost, "Alice B").await.unwrap();
        assert_eq!(
            transport.profile(&ghost.user_id).display_name.as_deref(),
            Some("Alice B")
        );
    }

    #[tokio::test]
    async fn avatar_upload_sets_profile() {
        let (transport, registry) = registry(Some(vec![0x89, 0x50, 0x4e, 0x47]));
        let mut ghost = registry.new_ghost("r1", "Alice", "alice", ContentUri::default());

        let uri = registry
            .upload_avatar(&mut ghost, "https://cdn.example.net/a.png")
            .await
            .unwrap();

        assert_eq!(ghost.avatar_url, uri);
        assert_eq!(transport.media(&uri).unwrap().len(), 4);
        assert_eq!(transport.profile(&ghost.user_id).avatar_url, Some(uri));
    }

    #[tokio::test]
    async fn avatar_download_failure_aborts() {
        let (transport, registry) = registry(None);
        let mut ghost = registry.new_ghost("r1", "Alice", "alice", ContentUri::default());

        let err = registry
            .upload_avatar(&mut ghost, "https://cdn.example.net/a.png")
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::DownloadFailed { .. }));
        assert!(ghost.avatar_url.is_empty());
        assert_eq!(
            transport.count_calls(|c| matches!(c, Call::UploadMedia { .. })),
            0
        );
    }

    #[tokio::test]
    async fn avatar_upload_failure_aborts() {
        let (transport, registry) = registry(Some(vec![1, 2, 3]));
        let mut ghost = registry.new_ghost("r1", "Alice", "alice", ContentUri::default());
        transport.fail(|f| f.upload = true);

        let err = registry
            .upload_avatar(&mut ghost, "https://cdn.example.net/a.png")
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::UploadFailed(_)));
        assert!(transport.profile(&ghost.user_id).avatar_url.is_none());
    }

    #[tokio::test]
    async fn avatar_apply_failure_keeps_cached_avatar() {
        let (transport, registry) = registry(Some(vec![7, 7]));
        let mut ghost = registry.new_ghost("r1", "Alice", "alice", ContentUri::default());
        transport.fail(|f| f.avatar = true);

        let err = registry
            .upload_avatar(&mut ghost, "https://cdn.example.net/a.png")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BridgeError::TransportUnavailable { action: "set ghost avatar", .. }
        ));
        assert!(ghost.avatar_url.is_empty());
        assert_eq!(
            transport.count_calls(|c| matches!(c, Call::UploadMedia { .. })),
            1
        );
        assert!(transport.profile(&ghost.user_id).avatar_url.is_none());
    }
}
