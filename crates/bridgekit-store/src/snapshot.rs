//! Keyed users/rooms state with an optional JSON snapshot on disk.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use bridgekit_shared::types::{RoomId, UserId};

use crate::error::Result;
use crate::models::{LogicalUser, Room};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemDb {
    pub users: HashMap<UserId, LogicalUser>,
    pub rooms: HashMap<RoomId, Room>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a snapshot written by [`store`](Self::store). A missing file
    /// yields an empty database.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(Self::new());
        }

        let data = fs::read(path).await?;
        let db: Self = serde_json::from_slice(&data)?;
        info!(
            path = %path.display(),
            users = db.users.len(),
            rooms = db.rooms.len(),
            "Loaded snapshot"
        );
        Ok(db)
    }

    pub async fn store(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, data).await?;
        debug!(path = %path.display(), "Stored snapshot");
        Ok(())
    }

    pub fn user(&self, user_id: &UserId) -> Option<&LogicalUser> {
        self.users.get(user_id)
    }

    pub fn put_user(&mut self, user: LogicalUser) {
        self.users.insert(user.user_id().clone(), user);
    }

    /// Return the user, inserting the one built by `make` when absent.
    pub fn user_or_insert_with(
        &mut self,
        user_id: &UserId,
        make: impl FnOnce() -> LogicalUser,
    ) -> &mut LogicalUser {
        self.users.entry(user_id.clone()).or_insert_with(make)
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Index a created room by its id. Rooms without an id are ignored.
    pub fn put_room(&mut self, room: Room) -> bool {
        match room.room_id.clone() {
            Some(id) => {
                self.rooms.insert(id, room);
                true
            }
            None => false,
        }
    }
}
