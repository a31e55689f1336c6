//! System assembly: wire every subsystem from one [`CoopConfig`].
//!
//! [`assemble`] builds the shared registries, binds them to document
//! connectors under the configured data directory, starts the periodic
//! flush schedules, and hands back a [`CoopSystem`] with the event engine
//! and handles to everything an outer command layer needs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cache::{CacheBuilder, MemoryCache};
use crate::config::CoopConfig;
use crate::connector::StorageConnector;
use crate::currency::{CurrencyLedger, LedgerCodec};
use crate::engine::{Confirmations, EventEngine};
use crate::error::Result;
use crate::gateway::ActionSink;
use crate::leveling::LevelingEngine;
use crate::moderation::{MessageCache, WordFilter};
use crate::pets::{Inventory, InventoryCodec, PetSystem};
use crate::profile::{ProfileRegistry, RegistryCodec};
use crate::punishment::PunishmentLedger;
use crate::sched::{Scheduler, TaskHandle};
use crate::security::BlacklistRegistry;
use crate::store::IoExecutor;
use crate::types::{GuildId, RoleId, UserId};

/// A fully wired engine plus handles to its subsystems.
pub struct CoopSystem {
    /// The event dispatcher.
    pub engine: EventEngine,
    /// Shared profile registry.
    pub profiles: Arc<ProfileRegistry>,
    /// Shared currency ledger.
    pub currency: Arc<CurrencyLedger>,
    /// Leveling engine (also reachable through the event path).
    pub leveling: Arc<LevelingEngine>,
    /// Punishment ledger, for command layers issuing punishments.
    pub punishments: Arc<PunishmentLedger>,
    /// Per-guild banned-word lists.
    pub words: Arc<WordFilter>,
    /// Per-guild message audit cache.
    pub messages: Arc<MessageCache>,
    /// Per-guild blacklists.
    pub blacklists: Arc<BlacklistRegistry>,
    /// Pet events and inventories.
    pub pets: Arc<PetSystem>,

    profile_cache: MemoryCache<ProfileRegistry>,
    currency_cache: MemoryCache<CurrencyLedger>,
    profile_connector: StorageConnector<ProfileRegistry>,
    currency_connector: StorageConnector<CurrencyLedger>,
    inventory_connector: StorageConnector<Vec<Inventory>>,
    muted_roles_connector: StorageConnector<Vec<(GuildId, RoleId)>>,
    flush_tasks: Vec<TaskHandle>,
}

impl std::fmt::Debug for CoopSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoopSystem").finish_non_exhaustive()
    }
}

fn secs_to_ms(secs: u32) -> u64 {
    u64::from(secs) * 1000
}

/// Assemble a [`CoopSystem`] from configuration.
///
/// `bot_user` is the identity automatic punishments are issued under;
/// `actions` is the outbound half of the gateway; all storage lives under
/// `config.persistence.data_dir`, flushed through `io` on the configured
/// intervals. Must be called from within a tokio runtime.
#[must_use]
pub fn assemble(
    config: &CoopConfig,
    bot_user: UserId,
    actions: ActionSink,
    scheduler: Scheduler,
    io: IoExecutor,
) -> CoopSystem {
    let data_dir = PathBuf::from(&config.persistence.data_dir);

    let profiles = Arc::new(ProfileRegistry::new(config.profiles.capacity));
    let currency = Arc::new(CurrencyLedger::new());
    let leveling = Arc::new(LevelingEngine::new(
        Arc::clone(&profiles),
        Arc::clone(&currency),
    ));
    let punishments = Arc::new(PunishmentLedger::new(
        Arc::clone(&profiles),
        actions.clone(),
        scheduler,
        config.punishment.ban_prune_days,
    ));
    let words = Arc::new(WordFilter::new());
    let messages = Arc::new(MessageCache::new(
        config.moderation.message_cache_capacity,
        config.moderation.message_cache_trim,
    ));
    let blacklists = Arc::new(BlacklistRegistry::new());
    let pets = Arc::new(PetSystem::new(
        Arc::clone(&currency),
        actions.clone(),
        scheduler,
        config.pets.event_capacity,
        config.pets.inventory_capacity,
        Duration::from_secs(config.pets.despawn_secs),
        config.pets.steal_penalty_eggs,
    ));

    // Persistence wiring: the registries shared above are the same values
    // the caches flush.
    let profile_connector: StorageConnector<ProfileRegistry> = StorageConnector::new(
        io.clone(),
        data_dir.join("profiles.json"),
        "profiles",
        Arc::new(RegistryCodec::new(config.profiles.capacity)),
    );
    let profile_cache = CacheBuilder::new()
        .write_ms(secs_to_ms(config.persistence.profile_write_secs))
        .build_shared(Arc::clone(&profiles), profile_connector.clone(), &scheduler);

    let currency_connector: StorageConnector<CurrencyLedger> = StorageConnector::new(
        io.clone(),
        data_dir.join("currency.json"),
        "eggs",
        Arc::new(LedgerCodec),
    );
    let currency_cache = CacheBuilder::new()
        .write_ms(secs_to_ms(config.persistence.currency_write_secs))
        .build_shared(Arc::clone(&currency), currency_connector.clone(), &scheduler);

    let inventory_connector: StorageConnector<Vec<Inventory>> = StorageConnector::new(
        io.clone(),
        data_dir.join("inventories.json"),
        "inventories",
        Arc::new(InventoryCodec),
    );
    let muted_roles_connector: StorageConnector<Vec<(GuildId, RoleId)>> = StorageConnector::serde(
        io,
        data_dir.join("punishments.json"),
        "muted_roles",
    );

    // Inventories and muted roles are snapshots of live subsystems rather
    // than cache-owned values; flush them on their own schedules.
    let mut flush_tasks = Vec::new();
    {
        let pets = Arc::clone(&pets);
        let connector = inventory_connector.clone();
        flush_tasks.push(scheduler.schedule_fixed_rate(
            Duration::from_millis(secs_to_ms(config.persistence.inventory_write_secs)),
            move || {
                let pets = Arc::clone(&pets);
                let connector = connector.clone();
                async move {
                    let snapshot = pets.snapshot_inventories();
                    if let Err(error) = connector.write(Some(&snapshot)).wait().await {
                        warn!(%error, "scheduled inventory flush failed");
                    }
                }
            },
        ));
    }
    {
        let punishments = Arc::clone(&punishments);
        let connector = muted_roles_connector.clone();
        flush_tasks.push(scheduler.schedule_fixed_rate(
            Duration::from_millis(secs_to_ms(config.persistence.muted_roles_write_secs)),
            move || {
                let punishments = Arc::clone(&punishments);
                let connector = connector.clone();
                async move {
                    let snapshot = punishments.muted_roles();
                    if let Err(error) = connector.write(Some(&snapshot)).wait().await {
                        warn!(%error, "scheduled muted-role flush failed");
                    }
                }
            },
        ));
    }

    let engine = EventEngine::new(
        bot_user,
        Arc::clone(&leveling),
        Arc::clone(&punishments),
        Arc::clone(&words),
        Arc::clone(&messages),
        Arc::clone(&blacklists),
        Arc::clone(&pets),
        actions,
        Confirmations::new(
            scheduler,
            Duration::from_secs(config.punishment.confirmation_timeout_secs),
        ),
        config.pets.spawn_probability,
    );

    info!(
        data_dir = %data_dir.display(),
        profile_capacity = config.profiles.capacity,
        "coop system assembled"
    );

    CoopSystem {
        engine,
        profiles,
        currency,
        leveling,
        punishments,
        words,
        messages,
        blacklists,
        pets,
        profile_cache,
        currency_cache,
        profile_connector,
        currency_connector,
        inventory_connector,
        muted_roles_connector,
        flush_tasks,
    }
}

impl CoopSystem {
    /// Load persisted state into the live subsystems.
    ///
    /// Corrupt documents are skipped with a logged warning (the subsystem
    /// keeps its current state); absent documents are a quiet first boot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoopError::ChannelClosed`] if the I/O worker is
    /// gone.
    pub async fn restore(&self) -> Result<()> {
        match self.profile_connector.read().await {
            Ok(Some(loaded)) => self.profiles.adopt(loaded.snapshot()),
            Ok(None) => {}
            Err(error @ crate::CoopError::ChannelClosed { .. }) => return Err(error),
            Err(error) => warn!(%error, "persisted profiles unreadable; starting fresh"),
        }
        match self.currency_connector.read().await {
            Ok(Some(loaded)) => self.currency.preload(loaded.snapshot()),
            Ok(None) => {}
            Err(error @ crate::CoopError::ChannelClosed { .. }) => return Err(error),
            Err(error) => warn!(%error, "persisted currency unreadable; starting fresh"),
        }
        match self.inventory_connector.read().await {
            Ok(Some(loaded)) => self.pets.preload_inventories(loaded),
            Ok(None) => {}
            Err(error @ crate::CoopError::ChannelClosed { .. }) => return Err(error),
            Err(error) => warn!(%error, "persisted inventories unreadable; starting fresh"),
        }
        match self.muted_roles_connector.read().await {
            Ok(Some(loaded)) => self.punishments.preload_muted_roles(loaded),
            Ok(None) => {}
            Err(error @ crate::CoopError::ChannelClosed { .. }) => return Err(error),
            Err(error) => warn!(%error, "persisted muted roles unreadable; starting fresh"),
        }
        info!("persisted state restored");
        Ok(())
    }

    /// Flush every persisted subsystem immediately.
    ///
    /// # Errors
    ///
    /// Propagates the first connector failure.
    pub async fn flush(&self) -> Result<()> {
        self.profile_cache.get_synced(true, false).await?;
        self.currency_cache.get_synced(true, false).await?;
        self.inventory_connector
            .write(Some(&self.pets.snapshot_inventories()))
            .wait()
            .await?;
        self.muted_roles_connector
            .write(Some(&self.punishments.muted_roles()))
            .wait()
            .await?;
        Ok(())
    }

    /// Stop the periodic flush schedules and kill the caches.
    ///
    /// State still in memory is not flushed; call [`CoopSystem::flush`]
    /// first for a clean shutdown.
    pub fn shutdown(&self) {
        for task in &self.flush_tasks {
            task.cancel();
        }
        self.profile_cache.kill();
        self.currency_cache.kill();
        info!("coop system shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InboundEvent;
    use crate::types::{ChannelId, MessageId};

    fn test_config(dir: &std::path::Path) -> CoopConfig {
        let mut config = CoopConfig::default();
        config.persistence.data_dir = dir.to_string_lossy().into_owned();
        config.persistence.profile_write_secs = 60;
        config.persistence.currency_write_secs = 60;
        config.persistence.inventory_write_secs = 60;
        config.persistence.muted_roles_write_secs = 60;
        config.pets.spawn_probability = 0.0;
        config
    }

    fn chat(author: u64, content: &str) -> InboundEvent {
        InboundEvent::MessageCreated {
            guild: GuildId(1),
            channel: ChannelId(1),
            message: MessageId(author),
            author: UserId(author),
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn assembled_system_flushes_and_restores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let scheduler = Scheduler::new();
        let io = IoExecutor::spawn();

        let (actions, _rx) = ActionSink::channel();
        let system = assemble(&config, UserId(999), actions, scheduler, io.clone());

        system.engine.handle_event(chat(5, &"x".repeat(450))).await;
        assert_eq!(system.profiles.len(), 1);
        let eggs = system.currency.eggs(UserId(5));
        assert!(eggs > 0);
        system.pets.with_inventory(UserId(5), |inv| {
            inv.pets.push(crate::pets::Pet::Cat);
        });

        system.flush().await.expect("flush");
        system.shutdown();

        // A second system over the same data directory sees the state.
        let (actions, _rx2) = ActionSink::channel();
        let reborn = assemble(&config, UserId(999), actions, scheduler, io);
        assert_eq!(reborn.profiles.len(), 0);
        reborn.restore().await.expect("restore");

        assert_eq!(reborn.profiles.len(), 1);
        let profile = reborn.profiles.get(UserId(5)).expect("restored");
        assert_eq!(profile.lock().level_unit, 450);
        assert_eq!(reborn.currency.eggs(UserId(5)), eggs);
        assert_eq!(
            reborn.pets.inventory(UserId(5)).pets,
            vec![crate::pets::Pet::Cat]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_flushes_run_until_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let scheduler = Scheduler::new();
        let io = IoExecutor::spawn();

        let (actions, _rx) = ActionSink::channel();
        let system = assemble(&config, UserId(999), actions, scheduler, io);
        system.profiles.with_profile(UserId(3), |p| p.level_unit = 77);

        // Let the spawned schedules register before advancing paused time.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let persisted = system
            .profile_connector
            .read()
            .await
            .expect("read")
            .expect("present");
        assert_eq!(
            persisted.get(UserId(3)).expect("present").lock().level_unit,
            77
        );

        // After shutdown, later mutations never reach storage.
        system.profiles.with_profile(UserId(3), |p| p.level_unit = 1000);
        system.shutdown();
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(60)).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let persisted = system
            .profile_connector
            .read()
            .await
            .expect("read")
            .expect("present");
        assert_eq!(
            persisted.get(UserId(3)).expect("present").lock().level_unit,
            77
        );
    }
}
