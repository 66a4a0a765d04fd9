//! Domain model structs held by the bridge.
//!
//! Every struct derives `Serialize` and `Deserialize` so the whole in-memory
//! state can be written out as a single JSON snapshot.

use serde::{Deserialize, Serialize};

use bridgekit_shared::types::{ActingHandle, ContentUri, PermissionLevel, RoomId, UserId};
use bridgekit_shared::IdentityError;

// ---------------------------------------------------------------------------
// LogicalUser
// ---------------------------------------------------------------------------

/// A local chat-network account using the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalUser {
    /// Local chat-network id. Never changes once created.
    user_id: UserId,
    /// Id of the account on the remote network.
    pub remote_id: String,
    /// Name of the account on the remote network.
    pub remote_name: String,
    pub display_name: String,
    pub permission_level: PermissionLevel,
    /// Private room used for command conversation with the bridge bot.
    management_room: Option<RoomId>,
    /// Handle obtained through double-puppet setup.
    #[serde(skip)]
    double_puppet: Option<ActingHandle>,
    /// Credential used to act as this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl LogicalUser {
    pub fn new(user_id: UserId, remote_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            remote_id: remote_id.into(),
            remote_name: String::new(),
            display_name: display_name.into(),
            permission_level: PermissionLevel::default(),
            management_room: None,
            double_puppet: None,
            access_token: None,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn management_room(&self) -> Option<&RoomId> {
        self.management_room.as_ref()
    }

    /// Assign the management room. Re-assigning the same room is a no-op;
    /// a different room needs [`clear_management_room`](Self::clear_management_room) first.
    pub fn set_management_room(&mut self, room: RoomId) -> Result<(), IdentityError> {
        match &self.management_room {
            Some(current) if *current == room => Ok(()),
            Some(_) => Err(IdentityError::AlreadySet("management room")),
            None => {
                self.management_room = Some(room);
                Ok(())
            }
        }
    }

    pub fn clear_management_room(&mut self) {
        self.management_room = None;
    }

    pub fn double_puppet(&self) -> Option<&ActingHandle> {
        self.double_puppet.as_ref()
    }

    pub fn set_double_puppet(&mut self, handle: ActingHandle) -> Result<(), IdentityError> {
        if self.double_puppet.is_some() {
            return Err(IdentityError::AlreadySet("double puppet"));
        }
        self.access_token = handle.credential.clone();
        self.double_puppet = Some(handle);
        Ok(())
    }

    /// Drop the double puppet and its credential.
    pub fn clear_double_puppet(&mut self) {
        self.double_puppet = None;
        self.access_token = None;
    }

    /// Replace the stored credential for this user. The cached double puppet
    /// is invalidated since it was issued for the previous credential.
    pub fn switch_credential(&mut self, user_id: &UserId, token: String) -> Result<(), IdentityError> {
        if *user_id != self.user_id {
            return Err(IdentityError::Mismatch {
                expected: self.user_id.to_string(),
                got: user_id.to_string(),
            });
        }
        self.double_puppet = None;
        self.access_token = Some(token);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ghost
// ---------------------------------------------------------------------------

/// A remote-network identity puppeted inside the chat network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ghost {
    /// Synthesized local id, `@{prefix}_{username}:{domain}`.
    pub user_id: UserId,
    pub remote_id: String,
    pub display_name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "ContentUri::is_empty")]
    pub avatar_url: ContentUri,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A bridged room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    /// Assigned by the chat network once the room is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub remote_id: String,
    pub name: String,
    pub topic: String,
    pub encrypted: bool,
    /// Snapshot taken at construction: exactly one ghost participant.
    private_chat: bool,
    pub ghosts: Vec<Ghost>,
    /// Handle used for bot-level operations. Bound when the room is loaded.
    #[serde(skip)]
    pub bot: Option<ActingHandle>,
}

impl Room {
    pub fn new(name: impl Into<String>, topic: impl Into<String>, ghosts: Vec<Ghost>) -> Self {
        Self {
            room_id: None,
            remote_id: String::new(),
            name: name.into(),
            topic: topic.into(),
            encrypted: false,
            private_chat: ghosts.len() == 1,
            ghosts,
            bot: None,
        }
    }

    /// Placeholder for a room we only know by id.
    pub fn detached(room_id: RoomId) -> Self {
        Self {
            room_id: Some(room_id),
            ..Self::new("", "", Vec::new())
        }
    }

    pub fn is_private_chat(&self) -> bool {
        self.private_chat
    }

    /// Append a participant. The private-chat flag is left as it was.
    pub fn add_ghost(&mut self, ghost: Ghost) {
        if !self.ghosts.iter().any(|g| g.user_id == ghost.user_id) {
            self.ghosts.push(ghost);
        }
    }

    pub fn ghost_user_ids(&self) -> Vec<UserId> {
        self.ghosts.iter().map(|g| g.user_id.clone()).collect()
    }

    pub fn ghost(&self, user_id: &UserId) -> Option<&Ghost> {
        self.ghosts.iter().find(|g| g.user_id == *user_id)
    }

    pub fn is_created(&self) -> bool {
        self.room_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ghost(name: &str) -> Ghost {
        Ghost {
            user_id: UserId::new(&format!("sh-bridge_{name}"), "example.org"),
            remote_id: name.to_string(),
            display_name: name.to_string(),
            username: name.to_string(),
            avatar_url: ContentUri::default(),
        }
    }

    #[test]
    fn private_chat_is_a_construction_snapshot() {
        let mut room = Room::new("dm", "", vec![ghost("a")]);
        assert!(room.is_private_chat());

        room.add_ghost(ghost("b"));
        assert_eq!(room.ghosts.len(), 2);
        assert!(room.is_private_chat());

        let group = Room::new("group", "", vec![ghost("a"), ghost("b")]);
        assert!(!group.is_private_chat());
        assert!(!Room::new("empty", "", vec![]).is_private_chat());
    }

    #[test]
    fn add_ghost_ignores_duplicates() {
        let mut room = Room::new("dm", "", vec![ghost("a")]);
        room.add_ghost(ghost("a"));
        assert_eq!(room.ghosts.len(), 1);
    }

    #[test]
    fn management_room_set_once() {
        let mut user = LogicalUser::new(UserId::new("alice", "example.org"), "r1", "Alice");
        user.set_management_room(RoomId("!a:example.org".into())).unwrap();
        user.set_management_room(RoomId("!a:example.org".into())).unwrap();
        assert_eq!(
            user.set_management_room(RoomId("!b:example.org".into())),
            Err(IdentityError::AlreadySet("management room"))
        );

        user.clear_management_room();
        user.set_management_room(RoomId("!b:example.org".into())).unwrap();
        assert_eq!(user.management_room().unwrap().as_str(), "!b:example.org");
    }

    #[test]
    fn double_puppet_set_once_and_clear() {
        let id = UserId::new("alice", "example.org");
        let mut user = LogicalUser::new(id.clone(), "r1", "Alice");

        user.set_double_puppet(ActingHandle::double_puppet(id.clone(), "tok".into()))
            .unwrap();
        assert_eq!(user.access_token.as_deref(), Some("tok"));
        assert!(user
            .set_double_puppet(ActingHandle::double_puppet(id.clone(), "tok2".into()))
            .is_err());

        user.clear_double_puppet();
        assert!(user.double_puppet().is_none());
        assert!(user.access_token.is_none());
    }

    #[test]
    fn switch_credential_checks_user() {
        let id = UserId::new("alice", "example.org");
        let mut user = LogicalUser::new(id.clone(), "r1", "Alice");
        let other = UserId::new("bob", "example.org");

        assert!(user.switch_credential(&other, "x".into()).is_err());
        user.switch_credential(&id, "x".into()).unwrap();
        assert_eq!(user.access_token.as_deref(), Some("x"));
    }
}
