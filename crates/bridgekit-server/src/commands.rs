//! Bot commands typed by users.
//!
//! In the management room every message is a command. Elsewhere a message
//! must start with the configured prefix. Every command gets an explicit
//! reply: handler output as a notice, errors as a notice replying to the
//! command.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use bridgekit_shared::types::{EventId, PermissionLevel};
use bridgekit_shared::MessageContent;
use bridgekit_store::{LogicalUser, Room};

use crate::error::{Result, ServerError};
use crate::kit::BridgeKit;

const BUILTIN: [(&str, &str); 2] = [
    ("help", "Show this help"),
    ("version", "Show the bridge version"),
];

/// A parsed command invocation.
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub user: LogicalUser,
    pub room: Room,
    pub event_id: EventId,
    pub name: String,
    pub args: Vec<String>,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Run the command and return the reply text.
    async fn run(&self, kit: &BridgeKit, cmd: &CommandEvent) -> Result<String>;
}

pub struct CommandProcessor {
    prefix: String,
    handlers: RwLock<BTreeMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandProcessor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a handler. Built-in names cannot be taken; a second handler with
    /// the same name replaces the first.
    pub async fn register(&self, handler: Arc<dyn CommandHandler>) -> bool {
        let name = handler.name().to_lowercase();
        if BUILTIN.iter().any(|(builtin, _)| *builtin == name) {
            warn!(command = %name, "Refusing to replace built-in command");
            return false;
        }

        if self.handlers.write().await.insert(name.clone(), handler).is_some() {
            warn!(command = %name, "Command handler replaced");
        } else {
            debug!(command = %name, "Command registered");
        }
        true
    }

    /// Split `body` into a command name and arguments, or `None` when the
    /// message is not addressed to the bot.
    pub fn parse(&self, body: &str, in_management_room: bool) -> Option<(String, Vec<String>)> {
        let body = body.trim();
        let rest = match body.strip_prefix(self.prefix.as_str()) {
            Some(rest) if rest.is_empty() => return Some(("help".to_string(), Vec::new())),
            Some(rest) if rest.starts_with(char::is_whitespace) => rest,
            _ if in_management_room => body,
            _ => return None,
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next()?.to_lowercase();
        Some((name, parts.map(str::to_string).collect()))
    }

    /// Run `cmd` and send its reply into the command's room.
    pub async fn dispatch(&self, kit: &BridgeKit, cmd: CommandEvent) -> Result<EventId> {
        info!(user = %cmd.user.user_id(), room = %cmd.room.name, command = %cmd.name, "Running command");

        let reply = match self.execute(kit, &cmd).await {
            Ok(text) => {
                kit.delivery
                    .send_bot_message(&cmd.room, &MessageContent::notice(text))
                    .await
            }
            Err(e) => {
                warn!(command = %cmd.name, error = %e, "Command failed");
                kit.delivery.reply_error(&cmd.room, &cmd.event_id, &e).await
            }
        };
        Ok(reply?)
    }

    async fn execute(&self, kit: &BridgeKit, cmd: &CommandEvent) -> Result<String> {
        match cmd.name.as_str() {
            "help" => return Ok(self.help().await),
            "version" => return Ok(version(kit)),
            _ => {}
        }

        if cmd.user.permission_level < PermissionLevel::User {
            return Err(ServerError::NotPermitted);
        }

        let handler = self
            .handlers
            .read()
            .await
            .get(&cmd.name)
            .cloned()
            .ok_or_else(|| ServerError::UnknownCommand(cmd.name.clone()))?;
        handler.run(kit, cmd).await
    }

    async fn help(&self) -> String {
        let mut text = String::from("Available commands:\n");
        for (name, description) in BUILTIN {
            text.push_str(&format!("• {name} - {description}\n"));
        }
        for (name, handler) in self.handlers.read().await.iter() {
            text.push_str(&format!("• {name} - {}\n", handler.description()));
        }
        text.push_str(&format!(
            "Outside the management room, start commands with `{}`.",
            self.prefix
        ));
        text
    }
}

fn version(kit: &BridgeKit) -> String {
    let uptime = chrono::Utc::now() - kit.started_at;
    format!(
        "{} {} (up {}s)",
        kit.config.bridge_name,
        kit.config.build,
        uptime.num_seconds()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit::testing;
    use bridgekit_matrix::Transport;
    use bridgekit_shared::types::{ContentUri, UserId};
    use bridgekit_shared::Relation;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Repeat the arguments"
        }

        async fn run(&self, _kit: &BridgeKit, cmd: &CommandEvent) -> Result<String> {
            if cmd.args.is_empty() {
                return Err(ServerError::Usage("echo <text>".into()));
            }
            Ok(cmd.args.join(" "))
        }
    }

    async fn command(kit: &BridgeKit, body: &str) -> CommandEvent {
        let user = LogicalUser::new(UserId::new("alice", "example.org"), "r", "Alice");
        let mut room = kit.rooms.new_room("management", "", vec![]);
        kit.rooms
            .create_room(&mut room, &user, &ContentUri::default())
            .await
            .unwrap();
        let (name, args) = kit.commands.parse(body, true).unwrap();
        CommandEvent {
            user,
            room,
            event_id: EventId("$cmd".into()),
            name,
            args,
        }
    }

    #[test]
    fn parse_rules() {
        let commands = CommandProcessor::new("!bridge");

        assert_eq!(
            commands.parse("  Login now ", true),
            Some(("login".to_string(), vec!["now".to_string()]))
        );
        assert_eq!(commands.parse("login", false), None);
        assert_eq!(
            commands.parse("!bridge login", false),
            Some(("login".to_string(), vec![]))
        );
        assert_eq!(commands.parse("!bridge", false), Some(("help".to_string(), vec![])));
        assert_eq!(commands.parse("!bridgelogin", false), None);
        assert_eq!(commands.parse("   ", true), None);
    }

    #[tokio::test]
    async fn builtins_cannot_be_replaced() {
        struct FakeHelp;

        #[async_trait]
        impl CommandHandler for FakeHelp {
            fn name(&self) -> &'static str {
                "help"
            }
            fn description(&self) -> &'static str {
                ""
            }
            async fn run(&self, _: &BridgeKit, _: &CommandEvent) -> Result<String> {
                Ok(String::new())
            }
        }

        let commands = CommandProcessor::new("!bridge");
        assert!(!commands.register(Arc::new(FakeHelp)).await);
        assert!(commands.register(Arc::new(Echo)).await);
    }

    #[tokio::test]
    async fn handler_output_is_sent_as_notice() {
        let (transport, kit) = testing::kit();
        kit.commands.register(Arc::new(Echo)).await;

        let cmd = command(&kit, "echo hello there").await;
        let room_id = cmd.room.room_id.clone().unwrap();
        kit.commands.dispatch(&kit, cmd).await.unwrap();

        let last = transport.timeline(&room_id).pop().unwrap();
        assert_eq!(last.sender, *transport.bot_user_id());
        assert_eq!(last.content.body, "hello there");
    }

    #[tokio::test]
    async fn errors_reply_to_the_command() {
        let (transport, kit) = testing::kit();
        kit.commands.register(Arc::new(Echo)).await;

        let cmd = command(&kit, "echo").await;
        let room_id = cmd.room.room_id.clone().unwrap();
        kit.commands.dispatch(&kit, cmd).await.unwrap();

        let last = transport.timeline(&room_id).pop().unwrap();
        assert_eq!(last.content.body, "Usage: echo <text>");
        assert_eq!(last.content.relates_to, Some(Relation::Reply(EventId("$cmd".into()))));
    }

    #[tokio::test]
    async fn unknown_command_gets_a_reply() {
        let (transport, kit) = testing::kit();
        let cmd = command(&kit, "frobnicate").await;
        let room_id = cmd.room.room_id.clone().unwrap();
        kit.commands.dispatch(&kit, cmd).await.unwrap();

        let last = transport.timeline(&room_id).pop().unwrap();
        assert!(last.content.body.contains("Unknown command 'frobnicate'"));
    }

    #[tokio::test]
    async fn relay_users_only_get_builtins() {
        let (transport, kit) = testing::kit();
        kit.commands.register(Arc::new(Echo)).await;

        let mut cmd = command(&kit, "echo hi").await;
        cmd.user.permission_level = PermissionLevel::Relay;
        let room_id = cmd.room.room_id.clone().unwrap();
        kit.commands.dispatch(&kit, cmd.clone()).await.unwrap();
        assert!(transport
            .timeline(&room_id)
            .pop()
            .unwrap()
            .content
            .body
            .contains("not allowed"));

        cmd.name = "help".into();
        kit.commands.dispatch(&kit, cmd).await.unwrap();
        let help = transport.timeline(&room_id).pop().unwrap().content.body;
        assert!(help.contains("• echo - Repeat the arguments"));
        assert!(help.contains("• version"));
    }
}
