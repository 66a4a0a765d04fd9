//! Bridge configuration loaded from environment variables.
//!
//! Every setting has a default so a dry run works with no configuration at
//! all. The config is built once at startup and shared read-only.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use bridgekit_matrix::{EncryptionSettings, Rotation};
use bridgekit_shared::types::ContentUri;

/// Where this binary came from. Filled from compile-time environment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub build_time: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("BRIDGEKIT_COMMIT").unwrap_or("unknown").to_string(),
            build_time: option_env!("BRIDGEKIT_BUILD_TIME")
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (commit {}, built {})",
            self.version, self.commit, self.build_time
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeConfig {
    /// Human-readable bridge name.
    /// Env: `BRIDGE_NAME`
    /// Default: `"MyBridge"`
    pub bridge_name: String,

    /// Localpart prefix for ghosts.
    /// Env: `BRIDGE_LOCALPART`
    /// Default: `"sh-mybridge"`
    pub localpart: String,

    /// Homeserver domain.
    /// Env: `HOMESERVER_DOMAIN`
    /// Default: `"localhost"`
    pub domain: String,

    /// Env: `BOT_LOCALPART`
    /// Default: `"mybridgebot"`
    pub bot_localpart: String,

    /// Content URI of the bot avatar, also used for personal spaces.
    /// Env: `BOT_AVATAR`
    pub bot_avatar: ContentUri,

    /// Commands outside the management room must start with this.
    /// Env: `COMMAND_PREFIX`
    /// Default: `"!bridge"`
    pub command_prefix: String,

    /// Env: `ENCRYPTION_ALLOW`, `ENCRYPTION_DEFAULT`,
    /// `ENCRYPTION_ROTATION_CUSTOM`, `ENCRYPTION_ROTATION_MS`,
    /// `ENCRYPTION_ROTATION_MESSAGES`
    pub encryption: EncryptionSettings,

    /// JSON snapshot of users and rooms.
    /// Env: `STATE_PATH`
    /// Default: `./db.json`
    pub state_path: PathBuf,

    /// Timeout for avatar downloads.
    /// Env: `MEDIA_TIMEOUT_SECS`
    /// Default: 30 seconds
    pub media_timeout: Duration,

    /// Delay before the demo ghost renames itself after `login`.
    /// Env: `DEMO_RENAME_DELAY_SECS`
    /// Default: 5 seconds
    pub demo_rename_delay: Duration,

    pub build: BuildInfo,
}

const DEFAULT_ROTATION_MS: u64 = 7 * 24 * 60 * 60 * 1000;
const DEFAULT_ROTATION_MESSAGES: u64 = 100;

impl BridgeConfig {
    pub fn new(build: BuildInfo) -> Self {
        Self {
            bridge_name: "MyBridge".to_string(),
            localpart: "sh-mybridge".to_string(),
            domain: "localhost".to_string(),
            bot_localpart: "mybridgebot".to_string(),
            bot_avatar: ContentUri::default(),
            command_prefix: "!bridge".to_string(),
            encryption: EncryptionSettings::default(),
            state_path: PathBuf::from("./db.json"),
            media_timeout: Duration::from_secs(30),
            demo_rename_delay: Duration::from_secs(5),
            build,
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env(build: BuildInfo) -> Self {
        Self::from_vars(build, |key| std::env::var(key).ok())
    }

    fn from_vars(build: BuildInfo, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(build);

        if let Some(name) = var("BRIDGE_NAME") {
            config.bridge_name = name;
        }
        if let Some(localpart) = var("BRIDGE_LOCALPART") {
            config.localpart = localpart;
        }
        if let Some(domain) = var("HOMESERVER_DOMAIN") {
            config.domain = domain;
        }
        if let Some(bot) = var("BOT_LOCALPART") {
            config.bot_localpart = bot;
        }
        if let Some(avatar) = var("BOT_AVATAR") {
            if avatar.starts_with("mxc://") {
                config.bot_avatar = ContentUri(avatar);
            } else {
                tracing::warn!(value = %avatar, "Invalid BOT_AVATAR, expected an mxc:// URI");
            }
        }
        if let Some(prefix) = var("COMMAND_PREFIX") {
            config.command_prefix = prefix;
        }
        if let Some(path) = var("STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }
        if let Some(secs) = var("MEDIA_TIMEOUT_SECS").and_then(|v| parse_u64("MEDIA_TIMEOUT_SECS", &v)) {
            config.media_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) =
            var("DEMO_RENAME_DELAY_SECS").and_then(|v| parse_u64("DEMO_RENAME_DELAY_SECS", &v))
        {
            config.demo_rename_delay = Duration::from_secs(secs);
        }

        // -- Encryption --

        if let Some(val) = var("ENCRYPTION_ALLOW") {
            config.encryption.allow = parse_flag(&val);
        }
        if let Some(val) = var("ENCRYPTION_DEFAULT") {
            config.encryption.default = parse_flag(&val);
        }
        if var("ENCRYPTION_ROTATION_CUSTOM").is_some_and(|v| parse_flag(&v)) {
            let period_ms = var("ENCRYPTION_ROTATION_MS")
                .and_then(|v| parse_u64("ENCRYPTION_ROTATION_MS", &v))
                .unwrap_or(DEFAULT_ROTATION_MS);
            let period_msgs = var("ENCRYPTION_ROTATION_MESSAGES")
                .and_then(|v| parse_u64("ENCRYPTION_ROTATION_MESSAGES", &v))
                .unwrap_or(DEFAULT_ROTATION_MESSAGES);
            config.encryption.rotation = Some(Rotation {
                period_ms,
                period_msgs,
            });
        }

        if config.encryption.default && !config.encryption.allow {
            tracing::warn!("ENCRYPTION_DEFAULT is set without ENCRYPTION_ALLOW");
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

fn parse_u64(key: &str, val: &str) -> Option<u64> {
    match val.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %val, "Invalid number, using default");
            None
        }
    }
}
