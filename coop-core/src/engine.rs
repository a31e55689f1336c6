//! Event dispatch: wires inbound platform events to the subsystems.
//!
//! Each event runs through its handler behind an error boundary — a failing
//! handler is logged with the event name and never takes down the dispatch
//! path or the other handlers. Handlers receive plain ids and payloads; any
//! state they need later is re-derived at fire time.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::gateway::{ActionSink, GatewayAction, InboundEvent};
use crate::leveling::{LevelEvent, LevelingEngine};
use crate::moderation::{CachedMessage, MessageCache, WordFilter};
use crate::pets::PetSystem;
use crate::punishment::PunishmentLedger;
use crate::sched::Scheduler;
use crate::security::BlacklistRegistry;
use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Pending confirmations
// ---------------------------------------------------------------------------

/// Interactive confirmations awaiting a reaction.
///
/// A pending entry binds a message to the one user whose reaction confirms
/// it and the action to run then. Entries time out on a fixed wall clock;
/// a timed-out confirmation is discarded along with its UI state.
pub struct Confirmations {
    pending: Arc<DashMap<MessageId, Pending>>,
    scheduler: Scheduler,
    timeout: Duration,
}

struct Pending {
    user: UserId,
    action: GatewayAction,
}

impl std::fmt::Debug for Confirmations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confirmations")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Confirmations {
    /// Create a confirmation table with the given timeout.
    #[must_use]
    pub fn new(scheduler: Scheduler, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            scheduler,
            timeout,
        }
    }

    /// Await a confirming reaction from `user` on `message`; run `action`
    /// when it arrives, discard it after the timeout.
    pub fn register(&self, message: MessageId, user: UserId, action: GatewayAction) {
        self.pending.insert(message, Pending { user, action });
        let pending = Arc::clone(&self.pending);
        self.scheduler.schedule_once(self.timeout, async move {
            if pending.remove(&message).is_some() {
                debug!(%message, "confirmation timed out");
            }
        });
    }

    /// Resolve a reaction. Returns the confirmed action if `user` is the
    /// one the entry was waiting on.
    #[must_use]
    pub fn resolve(&self, message: MessageId, user: UserId) -> Option<GatewayAction> {
        self.pending
            .remove_if(&message, |_, pending| pending.user == user)
            .map(|(_, pending)| pending.action)
    }

    /// Number of confirmations still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// EventEngine
// ---------------------------------------------------------------------------

/// Ties the subsystems to the inbound event feed.
pub struct EventEngine {
    bot_user: UserId,
    leveling: Arc<LevelingEngine>,
    punishments: Arc<PunishmentLedger>,
    words: Arc<WordFilter>,
    messages: Arc<MessageCache>,
    blacklists: Arc<BlacklistRegistry>,
    pets: Arc<PetSystem>,
    actions: ActionSink,
    confirmations: Confirmations,
    spawn_probability: f64,
}

impl std::fmt::Debug for EventEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEngine")
            .field("bot_user", &self.bot_user)
            .finish_non_exhaustive()
    }
}

impl EventEngine {
    /// Assemble the engine over shared subsystems.
    ///
    /// `bot_user` is the identity used as issuer for automatic punishments;
    /// `spawn_probability` is the per-message chance of a pet event.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        bot_user: UserId,
        leveling: Arc<LevelingEngine>,
        punishments: Arc<PunishmentLedger>,
        words: Arc<WordFilter>,
        messages: Arc<MessageCache>,
        blacklists: Arc<BlacklistRegistry>,
        pets: Arc<PetSystem>,
        actions: ActionSink,
        confirmations: Confirmations,
        spawn_probability: f64,
    ) -> Self {
        Self {
            bot_user,
            leveling,
            punishments,
            words,
            messages,
            blacklists,
            pets,
            actions,
            confirmations,
            spawn_probability,
        }
    }

    /// The pending-confirmation table, for command layers that need to
    /// register interactive actions.
    #[must_use]
    pub fn confirmations(&self) -> &Confirmations {
        &self.confirmations
    }

    /// Handle one inbound event.
    ///
    /// This is the error boundary: a failing handler is logged and the
    /// dispatch path carries on.
    pub async fn handle_event(&self, event: InboundEvent) {
        let name = event.name();
        if let Err(err) = self.dispatch(event).await {
            error!(event = name, error = %err, "event handler failed");
        }
    }

    async fn dispatch(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::MessageCreated {
                guild,
                channel,
                message,
                author,
                author_is_bot,
                content,
            } => {
                self.messages.register(
                    guild,
                    CachedMessage {
                        id: message,
                        author,
                        content: content.clone(),
                    },
                );
                if author_is_bot {
                    return Ok(());
                }

                if let Some(banned) = self.words.screen(guild, &content) {
                    info!(%guild, %author, word = %banned.word, "deleted message with banned word");
                    self.actions
                        .send(GatewayAction::DeleteMessage { channel, message })?;
                    return Ok(());
                }

                if let Some(event) = self
                    .leveling
                    .accept_message(author, content.chars().count(), true)
                {
                    let text = match event {
                        LevelEvent::LevelUp {
                            user,
                            level,
                            eggs_awarded,
                        } => format!(
                            "**Congratulations <@{user}>!** You reached level {level}! \
                             +{eggs_awarded} eggs"
                        ),
                        LevelEvent::DivisionChange {
                            user,
                            level,
                            division,
                            eggs_awarded,
                        } => format!(
                            "**<@{user}> advanced to the {}!** Level {level}, +{eggs_awarded} eggs",
                            division.display_name()
                        ),
                    };
                    self.actions
                        .send(GatewayAction::SendMessage { channel, text })?;
                }

                let roll: f64 = rand::thread_rng().gen_range(0.0..1.0);
                if roll < self.spawn_probability {
                    self.pets.spawn_event(guild, channel);
                }
                Ok(())
            }

            InboundEvent::MessageEdited {
                guild,
                channel,
                message,
                author,
                author_is_bot,
                content,
            } => {
                let original = self
                    .messages
                    .original_content(guild, message, Some(&content));
                debug!(%guild, %message, had_original = original.is_some(), "message edited");

                if author_is_bot {
                    return Ok(());
                }
                if let Some(banned) = self.words.screen(guild, &content) {
                    info!(%guild, %author, word = %banned.word, "deleted edit with banned word");
                    self.actions
                        .send(GatewayAction::DeleteMessage { channel, message })?;
                }
                Ok(())
            }

            InboundEvent::MemberJoined { guild, user, name } => {
                if self.blacklists.is_blacklisted(guild, user, &name) {
                    info!(%guild, %user, "blacklisted member joined; banning");
                    self.punishments
                        .ban(user, self.bot_user, guild, "You are blacklisted");
                }
                Ok(())
            }

            InboundEvent::MemberLeft { guild, user } => {
                debug!(%guild, %user, "member left");
                Ok(())
            }

            InboundEvent::ReactionAdded { message, user, .. } => {
                if let Some(action) = self.confirmations.resolve(message, user) {
                    self.actions.send(action)?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyLedger;
    use crate::moderation::BannedWord;
    use crate::profile::ProfileRegistry;
    use crate::types::{ChannelId, GuildId};
    use tokio::sync::mpsc;

    struct Harness {
        engine: EventEngine,
        profiles: Arc<ProfileRegistry>,
        rx: mpsc::UnboundedReceiver<GatewayAction>,
    }

    fn harness() -> Harness {
        let (actions, rx) = ActionSink::channel();
        let scheduler = Scheduler::new();
        let profiles = Arc::new(ProfileRegistry::new(64));
        let currency = Arc::new(CurrencyLedger::new());
        let leveling = Arc::new(LevelingEngine::new(
            Arc::clone(&profiles),
            Arc::clone(&currency),
        ));
        let punishments = Arc::new(PunishmentLedger::new(
            Arc::clone(&profiles),
            actions.clone(),
            scheduler,
            7,
        ));
        let pets = Arc::new(PetSystem::new(
            Arc::clone(&currency),
            actions.clone(),
            scheduler,
            256,
            256,
            Duration::from_secs(300),
            50,
        ));
        let engine = EventEngine::new(
            UserId(999),
            leveling,
            punishments,
            Arc::new(WordFilter::new()),
            Arc::new(MessageCache::new(1000, 500)),
            Arc::new(BlacklistRegistry::new()),
            pets,
            actions,
            Confirmations::new(scheduler, Duration::from_secs(30)),
            0.0, // no random pet spawns in tests
        );
        Harness {
            engine,
            profiles,
            rx,
        }
    }

    fn message(guild: u64, author: u64, content: &str) -> InboundEvent {
        InboundEvent::MessageCreated {
            guild: GuildId(guild),
            channel: ChannelId(1),
            message: MessageId(rand::thread_rng().gen_range(1..u64::MAX)),
            author: UserId(author),
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayAction>) -> Vec<GatewayAction> {
        let mut actions = Vec::new();
        while let Ok(action) = rx.try_recv() {
            actions.push(action);
        }
        actions
    }

    #[tokio::test]
    async fn messages_feed_the_leveling_engine() {
        let mut h = harness();
        let body = "x".repeat(450);
        h.engine.handle_event(message(1, 5, &body)).await;

        let profile = h.profiles.get(UserId(5)).expect("created");
        assert_eq!(profile.lock().level_unit, 450);
        assert_eq!(profile.lock().level, 1);

        let actions = drain(&mut h.rx);
        assert!(
            matches!(&actions[..], [GatewayAction::SendMessage { .. }]),
            "one level-up notification expected"
        );
    }

    #[tokio::test]
    async fn bot_messages_are_ignored_by_leveling() {
        let mut h = harness();
        h.engine
            .handle_event(InboundEvent::MessageCreated {
                guild: GuildId(1),
                channel: ChannelId(1),
                message: MessageId(1),
                author: UserId(5),
                author_is_bot: true,
                content: "x".repeat(450),
            })
            .await;

        assert!(h.profiles.get(UserId(5)).is_none());
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn banned_words_delete_and_suppress_progression() {
        let mut h = harness();
        let guild = GuildId(1);
        h.engine
            .words
            .add_word(guild, BannedWord::new("heresy", true));

        h.engine
            .handle_event(message(1, 5, "pure heresy and four hundred more chars"))
            .await;

        let actions = drain(&mut h.rx);
        assert!(matches!(&actions[..], [GatewayAction::DeleteMessage { .. }]));
        // The deleted message granted no progression.
        if let Some(profile) = h.profiles.get(UserId(5)) {
            assert_eq!(profile.lock().level_unit, 0);
        }
    }

    #[tokio::test]
    async fn edits_are_audited_and_screened() {
        let mut h = harness();
        let guild = GuildId(1);
        h.engine
            .words
            .add_word(guild, BannedWord::new("heresy", true));

        let original = message(1, 5, "innocent text");
        let InboundEvent::MessageCreated { message: id, .. } = &original else {
            unreachable!()
        };
        let id = *id;
        h.engine.handle_event(original).await;
        drain(&mut h.rx);

        h.engine
            .handle_event(InboundEvent::MessageEdited {
                guild,
                channel: ChannelId(1),
                message: id,
                author: UserId(5),
                author_is_bot: false,
                content: "now heresy".to_string(),
            })
            .await;

        let actions = drain(&mut h.rx);
        assert!(matches!(&actions[..], [GatewayAction::DeleteMessage { .. }]));
        // The cache now holds the edited content as the original.
        let cached = h
            .engine
            .messages
            .original_content(guild, id, None)
            .expect("cached");
        assert_eq!(cached, "now heresy");
    }

    #[tokio::test]
    async fn blacklisted_joiners_are_banned() {
        let mut h = harness();
        let guild = GuildId(1);
        h.engine
            .blacklists
            .with_manager(guild, |m| m.add_match("badman"));

        h.engine
            .handle_event(InboundEvent::MemberJoined {
                guild,
                user: UserId(6),
                name: "B4DM4N".to_string(),
            })
            .await;

        let actions = drain(&mut h.rx);
        assert!(matches!(&actions[..], [GatewayAction::Ban { .. }]));

        h.engine
            .handle_event(InboundEvent::MemberJoined {
                guild,
                user: UserId(7),
                name: "friendly".to_string(),
            })
            .await;
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmations_resolve_once_and_time_out() {
        let mut h = harness();
        let message_id = MessageId(50);
        let admin = UserId(10);

        h.engine.confirmations().register(
            message_id,
            admin,
            GatewayAction::Kick {
                guild: GuildId(1),
                user: UserId(6),
                reason: "confirmed".to_string(),
            },
        );

        // A reaction from someone else does not confirm.
        h.engine
            .handle_event(InboundEvent::ReactionAdded {
                guild: GuildId(1),
                channel: ChannelId(1),
                message: message_id,
                user: UserId(99),
                emoji: "👍".to_string(),
            })
            .await;
        assert!(drain(&mut h.rx).is_empty());

        // The awaited user's reaction fires the action exactly once.
        h.engine
            .handle_event(InboundEvent::ReactionAdded {
                guild: GuildId(1),
                channel: ChannelId(1),
                message: message_id,
                user: admin,
                emoji: "👍".to_string(),
            })
            .await;
        let actions = drain(&mut h.rx);
        assert!(matches!(&actions[..], [GatewayAction::Kick { .. }]));
        assert_eq!(h.engine.confirmations().pending_count(), 0);

        // A fresh entry left alone disappears on timeout.
        h.engine.confirmations().register(
            MessageId(51),
            admin,
            GatewayAction::DeleteMessage {
                channel: ChannelId(1),
                message: MessageId(51),
            },
        );
        // Let the spawned timeout task register before advancing paused time.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.engine.confirmations().pending_count(), 0);
        assert!(h.engine.confirmations().resolve(MessageId(51), admin).is_none());
    }
}
