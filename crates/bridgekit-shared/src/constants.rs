/// Power level granted to the bridge bot in every bridged room
pub const BOT_POWER_LEVEL: i64 = 9001;

/// Power level granted to ghosts in a normal room
pub const GHOST_POWER_LEVEL: i64 = 100;

/// Power level granted to ghosts in a read-only room (above the send threshold)
pub const READ_ONLY_GHOST_POWER_LEVEL: i64 = 102;

/// Send threshold used to freeze a room for normal users
pub const READ_ONLY_SEND_THRESHOLD: i64 = 101;

/// Power level granted to the owner of a personal space
pub const SPACE_OWNER_POWER_LEVEL: i64 = 50;

/// Level required for anything anyone may do
pub const LEVEL_ANYONE: i64 = 0;

/// Level required for actions reserved to moderators
pub const LEVEL_DISABLED: i64 = 99;

/// Event types
pub const EVENT_MESSAGE: &str = "m.room.message";
pub const EVENT_REACTION: &str = "m.reaction";
pub const EVENT_REDACTION: &str = "m.room.redaction";
pub const STATE_ROOM_NAME: &str = "m.room.name";
pub const STATE_ROOM_AVATAR: &str = "m.room.avatar";
pub const STATE_POWER_LEVELS: &str = "m.room.power_levels";
pub const STATE_ENCRYPTION: &str = "m.room.encryption";
pub const STATE_SPACE_CHILD: &str = "m.space.child";

/// Group session algorithm announced when a room is encrypted
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.aes-sha2";

/// Room creation type marking a space
pub const ROOM_TYPE_SPACE: &str = "m.space";

/// MIME type used for uploaded avatars
pub const AVATAR_MIME_TYPE: &str = "image/png";
