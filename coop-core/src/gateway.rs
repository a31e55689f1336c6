//! The engine's view of the chat platform.
//!
//! Inbound events arrive as [`InboundEvent`] values; everything the engine
//! wants done on the platform leaves as a [`GatewayAction`] through the
//! [`ActionSink`]. Actions carry plain ids and payloads — never live
//! platform objects — so the excluded platform layer (or a test harness)
//! can execute them from the channel alone. The one request/response
//! exchange, muted-role creation, embeds its reply channel in the action.

use tokio::sync::{mpsc, oneshot};

use crate::error::{CoopError, Result};
use crate::types::{ChannelId, GuildId, MessageId, RoleId, UserId};

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// An event delivered by the chat platform.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A message was posted.
    MessageCreated {
        /// Guild scope.
        guild: GuildId,
        /// Channel it was posted in.
        channel: ChannelId,
        /// The message id.
        message: MessageId,
        /// Who posted it.
        author: UserId,
        /// Whether the author is a bot account.
        author_is_bot: bool,
        /// Raw text content.
        content: String,
    },
    /// A message was edited.
    MessageEdited {
        /// Guild scope.
        guild: GuildId,
        /// Channel it lives in.
        channel: ChannelId,
        /// The message id.
        message: MessageId,
        /// Who edited it.
        author: UserId,
        /// Whether the author is a bot account.
        author_is_bot: bool,
        /// The new text content.
        content: String,
    },
    /// A member joined a guild.
    MemberJoined {
        /// Guild scope.
        guild: GuildId,
        /// Who joined.
        user: UserId,
        /// Their display name at join time.
        name: String,
    },
    /// A member left (or was removed from) a guild.
    MemberLeft {
        /// Guild scope.
        guild: GuildId,
        /// Who left.
        user: UserId,
    },
    /// A reaction was added to a message.
    ReactionAdded {
        /// Guild scope.
        guild: GuildId,
        /// Channel of the message.
        channel: ChannelId,
        /// The reacted-to message.
        message: MessageId,
        /// Who reacted.
        user: UserId,
        /// The reaction emoji.
        emoji: String,
    },
}

impl InboundEvent {
    /// Short event name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message-created",
            Self::MessageEdited { .. } => "message-edited",
            Self::MemberJoined { .. } => "member-joined",
            Self::MemberLeft { .. } => "member-left",
            Self::ReactionAdded { .. } => "reaction-added",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound actions
// ---------------------------------------------------------------------------

/// An action for the platform layer to execute.
#[derive(Debug)]
pub enum GatewayAction {
    /// Post a text message.
    SendMessage {
        /// Target channel.
        channel: ChannelId,
        /// Text to post.
        text: String,
    },
    /// Delete a message.
    DeleteMessage {
        /// Channel of the message.
        channel: ChannelId,
        /// The message to delete.
        message: MessageId,
    },
    /// Grant a role to a member.
    AddRole {
        /// Guild scope.
        guild: GuildId,
        /// The member.
        user: UserId,
        /// The role to grant.
        role: RoleId,
    },
    /// Revoke a role from a member.
    RemoveRole {
        /// Guild scope.
        guild: GuildId,
        /// The member.
        user: UserId,
        /// The role to revoke.
        role: RoleId,
    },
    /// Find or create the guild's muted role and reply with its id.
    EnsureMutedRole {
        /// Guild scope.
        guild: GuildId,
        /// Reply channel for the role id.
        reply: oneshot::Sender<RoleId>,
    },
    /// Ban a member from a guild.
    Ban {
        /// Guild scope.
        guild: GuildId,
        /// The member to ban.
        user: UserId,
        /// Why.
        reason: String,
        /// Days of their messages to prune.
        prune_days: u32,
    },
    /// Kick a member from a guild.
    Kick {
        /// Guild scope.
        guild: GuildId,
        /// The member to kick.
        user: UserId,
        /// Why.
        reason: String,
    },
}

/// Sender half of the outbound action channel.
#[derive(Debug, Clone)]
pub struct ActionSink {
    tx: mpsc::UnboundedSender<GatewayAction>,
}

impl ActionSink {
    /// Create the action channel: a sink for the engine and a receiver for
    /// the platform layer.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GatewayAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue an action.
    ///
    /// # Errors
    ///
    /// Returns [`CoopError::ChannelClosed`] if the platform layer went away.
    pub fn send(&self, action: GatewayAction) -> Result<()> {
        self.tx
            .send(action)
            .map_err(|_| CoopError::ChannelClosed { channel: "gateway" })
    }
}
