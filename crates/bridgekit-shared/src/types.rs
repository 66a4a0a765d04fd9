use serde::{Deserialize, Serialize};

// Fully qualified chat-network user id, e.g. `@alice:example.org`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(localpart: &str, domain: &str) -> Self {
        Self(format!("@{localpart}:{domain}"))
    }

    pub fn localpart(&self) -> &str {
        let rest = self.0.strip_prefix('@').unwrap_or(&self.0);
        rest.split_once(':').map(|(l, _)| l).unwrap_or(rest)
    }

    pub fn domain(&self) -> &str {
        self.0.split_once(':').map(|(_, d)| d).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to an uploaded media item (`mxc://server/media-id`).
///
/// The empty URI means "no media" and is the default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct ContentUri(pub String);

impl ContentUri {
    pub fn new(server: &str, media_id: &str) -> Self {
        Self(format!("mxc://{server}/{media_id}"))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which kind of identity an [`ActingHandle`] stands for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// The bridge service account.
    Bot,
    /// A puppet representing a remote-network identity.
    Ghost,
    /// A local user acting as themselves through an exchanged credential.
    DoublePuppet,
}

/// The concrete identity used to perform a single action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActingHandle {
    pub user_id: UserId,
    pub kind: HandleKind,
    /// Credential issued by double-puppet setup. Never set for bot and ghost handles.
    #[serde(skip)]
    pub credential: Option<String>,
}

impl ActingHandle {
    pub fn bot(user_id: UserId) -> Self {
        Self {
            user_id,
            kind: HandleKind::Bot,
            credential: None,
        }
    }

    pub fn ghost(user_id: UserId) -> Self {
        Self {
            user_id,
            kind: HandleKind::Ghost,
            credential: None,
        }
    }

    pub fn double_puppet(user_id: UserId, credential: String) -> Self {
        Self {
            user_id,
            kind: HandleKind::DoublePuppet,
            credential: Some(credential),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.kind == HandleKind::Bot
    }

    pub fn is_double_puppet(&self) -> bool {
        self.kind == HandleKind::DoublePuppet
    }
}

/// Bridge permission tier of a local user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Block,
    Relay,
    #[default]
    User,
    Admin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_parts() {
        let id = UserId::new("sh-bridge_alice", "example.org");
        assert_eq!(id.as_str(), "@sh-bridge_alice:example.org");
        assert_eq!(id.localpart(), "sh-bridge_alice");
        assert_eq!(id.domain(), "example.org");
    }

    #[test]
    fn empty_content_uri() {
        assert!(ContentUri::default().is_empty());
        assert_eq!(
            ContentUri::new("example.org", "abc").as_str(),
            "mxc://example.org/abc"
        );
    }

    #[test]
    fn permission_ordering() {
        assert!(PermissionLevel::Admin > PermissionLevel::User);
        assert!(PermissionLevel::Relay < PermissionLevel::User);
    }
}
