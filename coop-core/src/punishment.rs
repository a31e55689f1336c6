//! Punishment records and the punishment lifecycle.
//!
//! Every disciplinary action appends an immutable record to the subject's
//! profile; only a record's `ongoing` flag ever changes afterwards. Warn,
//! ban, and kick are one-shot: they are born with `ongoing = false`. A mute
//! is born ongoing with an end timestamp and a scheduled expiry; the expiry,
//! a manual lift, and an out-of-band role removal all converge on the same
//! idempotent transition so that no path can unmute twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, info, warn};

use crate::error::{CoopError, Result};
use crate::gateway::{ActionSink, GatewayAction};
use crate::profile::ProfileRegistry;
use crate::sched::{Scheduler, TaskHandle};
use crate::types::{GuildId, PunishmentId, RoleId, UserId};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The possible punishments for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunishmentKind {
    /// A recorded warning that further action may be taken.
    Warn,
    /// Disallows the user from speaking until an end timestamp.
    Mute,
    /// Removes the user from the guild and bars re-entry.
    Ban,
    /// Removes the user from the guild.
    Kick,
}

/// Record of one issued punishment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentProfile {
    /// Record identity.
    pub id: PunishmentId,
    /// The punished user.
    pub user: UserId,
    /// Who issued it.
    pub issuer: UserId,
    /// The guild it applies to.
    pub guild: GuildId,
    /// What was issued.
    pub kind: PunishmentKind,
    /// Why.
    pub reason: String,
    /// When it was issued.
    pub issued_at: DateTime<Utc>,
    /// When a mute ends; `None` for every other kind.
    pub end: Option<DateTime<Utc>>,
    /// Whether the punishment is still in effect.
    pub ongoing: bool,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Issues punishments, tracks their records, and drives mute expiry.
pub struct PunishmentLedger {
    profiles: Arc<ProfileRegistry>,
    actions: ActionSink,
    scheduler: Scheduler,
    prune_days: u32,
    muted_roles: Arc<DashMap<GuildId, RoleId>>,
    role_flights: DashMap<GuildId, Arc<AsyncMutex<()>>>,
    expiries: Arc<DashMap<(UserId, GuildId), TaskHandle>>,
}

impl std::fmt::Debug for PunishmentLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PunishmentLedger")
            .field("muted_roles", &self.muted_roles.len())
            .field("pending_expiries", &self.expiries.len())
            .finish_non_exhaustive()
    }
}

impl PunishmentLedger {
    /// Build the ledger over a shared profile store.
    ///
    /// `prune_days` is forwarded on ban actions as the message-prune window.
    #[must_use]
    pub fn new(
        profiles: Arc<ProfileRegistry>,
        actions: ActionSink,
        scheduler: Scheduler,
        prune_days: u32,
    ) -> Self {
        Self {
            profiles,
            actions,
            scheduler,
            prune_days,
            muted_roles: Arc::new(DashMap::new()),
            role_flights: DashMap::new(),
            expiries: Arc::new(DashMap::new()),
        }
    }

    fn record(
        &self,
        user: UserId,
        issuer: UserId,
        guild: GuildId,
        kind: PunishmentKind,
        reason: &str,
        end: Option<DateTime<Utc>>,
        ongoing: bool,
    ) -> PunishmentProfile {
        let profile = PunishmentProfile {
            id: PunishmentId::new(),
            user,
            issuer,
            guild,
            kind,
            reason: reason.to_string(),
            issued_at: Utc::now(),
            end,
            ongoing,
        };
        self.profiles
            .with_profile(user, |p| p.punishments.push(profile.clone()));
        profile
    }

    /// Issue a warning. One-shot: recorded with `ongoing = false`.
    ///
    /// Returns the record and the user's total warning count in the guild.
    pub fn warn(
        &self,
        user: UserId,
        issuer: UserId,
        guild: GuildId,
        reason: &str,
    ) -> (PunishmentProfile, usize) {
        let record = self.record(user, issuer, guild, PunishmentKind::Warn, reason, None, false);
        let count = self.profiles.with_profile(user, |p| {
            p.punishments_matching(PunishmentKind::Warn, guild).count()
        });
        info!(%user, %guild, warnings = count, "warning issued");
        (record, count)
    }

    /// Mute `user` in `guild` until `end`.
    ///
    /// Ensures the guild's muted role exists (created at most once even
    /// under concurrent first mutes), grants it, and schedules the expiry.
    /// Re-muting replaces any pending expiry for the pair.
    ///
    /// # Errors
    ///
    /// Returns [`CoopError::ChannelClosed`] if the gateway went away before
    /// the muted role could be resolved.
    pub async fn mute(
        &self,
        user: UserId,
        issuer: UserId,
        guild: GuildId,
        reason: &str,
        end: DateTime<Utc>,
    ) -> Result<PunishmentProfile> {
        let record = self.record(
            user,
            issuer,
            guild,
            PunishmentKind::Mute,
            reason,
            Some(end),
            true,
        );

        let role = self.ensure_muted_role(guild).await?;
        self.actions
            .send(GatewayAction::AddRole { guild, user, role })?;

        let delay = (end - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let profiles = Arc::clone(&self.profiles);
        let actions = self.actions.clone();
        let muted_roles = Arc::clone(&self.muted_roles);
        let expiries = Arc::clone(&self.expiries);
        let handle = self.scheduler.schedule_once(delay, async move {
            expiries.remove(&(user, guild));
            // The mute may have been lifted manually in the meantime; the
            // flip reports whether this task still had work to do.
            if flip_ongoing_mutes(&profiles, user, guild) {
                if let Some(role) = muted_roles.get(&guild) {
                    if let Err(error) = actions.send(GatewayAction::RemoveRole {
                        guild,
                        user,
                        role: *role,
                    }) {
                        warn!(%user, %guild, %error, "gateway unavailable for unmute");
                    }
                }
                info!(%user, %guild, "mute expired");
            }
        });
        if let Some(previous) = self.expiries.insert((user, guild), handle) {
            previous.cancel();
        }

        info!(%user, %guild, %end, "mute issued");
        Ok(record)
    }

    /// Lift every ongoing mute for `user` in `guild`.
    ///
    /// Idempotent: returns whether anything was actually lifted. The
    /// pending expiry is cancelled either way, and the muted role is only
    /// revoked when a lift happened (the expiry task uses the same guard,
    /// so a race between the two cannot double-unmute).
    pub fn unmute(&self, user: UserId, guild: GuildId) -> bool {
        if let Some((_, pending)) = self.expiries.remove(&(user, guild)) {
            pending.cancel();
        }
        let lifted = flip_ongoing_mutes(&self.profiles, user, guild);
        if lifted {
            if let Some(role) = self.muted_roles.get(&guild) {
                if let Err(error) = self.actions.send(GatewayAction::RemoveRole {
                    guild,
                    user,
                    role: *role,
                }) {
                    warn!(%user, %guild, %error, "gateway unavailable for unmute");
                }
            }
            info!(%user, %guild, "mute lifted");
        }
        lifted
    }

    /// React to a role being removed out-of-band.
    ///
    /// If it was the guild's muted role, the user's ongoing mutes end and
    /// the pending expiry is cancelled — without issuing another
    /// role-removal action.
    pub fn on_role_removed(&self, user: UserId, guild: GuildId, role: RoleId) {
        let is_muted_role = self
            .muted_roles
            .get(&guild)
            .is_some_and(|known| *known == role);
        if !is_muted_role {
            return;
        }
        if let Some((_, pending)) = self.expiries.remove(&(user, guild)) {
            pending.cancel();
        }
        if flip_ongoing_mutes(&self.profiles, user, guild) {
            debug!(%user, %guild, "mute ended by out-of-band role removal");
        }
    }

    /// Whether any mute for `(user, guild)` is still in effect.
    #[must_use]
    pub fn is_muted(&self, user: UserId, guild: GuildId) -> bool {
        let Some(entry) = self.profiles.get(user) else {
            return false;
        };
        let profile = entry.lock();
        profile
            .punishments_matching(PunishmentKind::Mute, guild)
            .any(|p| p.ongoing)
    }

    /// Ban `user` from `guild`. One-shot record plus a gateway ban action.
    pub fn ban(
        &self,
        user: UserId,
        issuer: UserId,
        guild: GuildId,
        reason: &str,
    ) -> PunishmentProfile {
        let record = self.record(user, issuer, guild, PunishmentKind::Ban, reason, None, false);
        if let Err(error) = self.actions.send(GatewayAction::Ban {
            guild,
            user,
            reason: reason.to_string(),
            prune_days: self.prune_days,
        }) {
            warn!(%user, %guild, %error, "gateway unavailable for ban");
        }
        info!(%user, %guild, reason, "ban issued");
        record
    }

    /// Kick `user` from `guild`. One-shot record plus a gateway kick action.
    pub fn kick(
        &self,
        user: UserId,
        issuer: UserId,
        guild: GuildId,
        reason: &str,
    ) -> PunishmentProfile {
        let record = self.record(user, issuer, guild, PunishmentKind::Kick, reason, None, false);
        if let Err(error) = self.actions.send(GatewayAction::Kick {
            guild,
            user,
            reason: reason.to_string(),
        }) {
            warn!(%user, %guild, %error, "gateway unavailable for kick");
        }
        info!(%user, %guild, reason, "kick issued");
        record
    }

    /// The subject's full punishment history in `guild`, in issue order.
    #[must_use]
    pub fn history(&self, user: UserId, guild: GuildId) -> Vec<PunishmentProfile> {
        match self.profiles.get(user) {
            Some(entry) => entry.lock().punishments_in(guild).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// The guild's muted role, resolving it through the gateway on first
    /// use.
    ///
    /// Creation is single-flight per guild: concurrent first mutes wait on
    /// one in-flight request instead of each creating a role.
    ///
    /// # Errors
    ///
    /// Returns [`CoopError::ChannelClosed`] if the gateway dropped the
    /// request or its reply.
    pub async fn ensure_muted_role(&self, guild: GuildId) -> Result<RoleId> {
        if let Some(role) = self.muted_roles.get(&guild) {
            return Ok(*role);
        }
        let flight = self
            .role_flights
            .entry(guild)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // A concurrent mute may have resolved the role while we waited.
        if let Some(role) = self.muted_roles.get(&guild) {
            return Ok(*role);
        }

        let (reply, rx) = oneshot::channel();
        self.actions
            .send(GatewayAction::EnsureMutedRole { guild, reply })?;
        let role = rx
            .await
            .map_err(|_| CoopError::ChannelClosed { channel: "gateway" })?;
        self.muted_roles.insert(guild, role);
        debug!(%guild, %role, "muted role registered");
        Ok(role)
    }

    /// Snapshot of the known muted roles, for persistence.
    #[must_use]
    pub fn muted_roles(&self) -> Vec<(GuildId, RoleId)> {
        self.muted_roles
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Seed the muted-role registry from persisted state.
    pub fn preload_muted_roles(&self, roles: impl IntoIterator<Item = (GuildId, RoleId)>) {
        for (guild, role) in roles {
            self.muted_roles.insert(guild, role);
        }
    }
}

/// Flip every ongoing mute record for `(user, guild)` to not-ongoing.
/// Returns whether anything flipped — the idempotence guard shared by
/// expiry, manual lift, and out-of-band removal.
fn flip_ongoing_mutes(profiles: &ProfileRegistry, user: UserId, guild: GuildId) -> bool {
    let Some(entry) = profiles.get(user) else {
        return false;
    };
    let mut profile = entry.lock();
    let mut changed = false;
    for record in &mut profile.punishments {
        if record.kind == PunishmentKind::Mute && record.guild == guild && record.ongoing {
            record.ongoing = false;
            changed = true;
        }
    }
    changed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct Fixture {
        ledger: Arc<PunishmentLedger>,
        rx: mpsc::UnboundedReceiver<GatewayAction>,
    }

    fn fixture() -> Fixture {
        let (actions, rx) = ActionSink::channel();
        let profiles = Arc::new(ProfileRegistry::new(64));
        let ledger = Arc::new(PunishmentLedger::new(
            profiles,
            actions,
            Scheduler::new(),
            7,
        ));
        Fixture { ledger, rx }
    }

    /// Answer `EnsureMutedRole` requests with sequential role ids and count
    /// the requests.
    fn spawn_role_service(
        mut rx: mpsc::UnboundedReceiver<GatewayAction>,
        tx_rest: mpsc::UnboundedSender<GatewayAction>,
    ) -> Arc<std::sync::atomic::AtomicU32> {
        use std::sync::atomic::{AtomicU32, Ordering};
        let created = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&created);
        tokio::spawn(async move {
            let mut next_role = 9000u64;
            while let Some(action) = rx.recv().await {
                match action {
                    GatewayAction::EnsureMutedRole { reply, .. } => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        next_role += 1;
                        let _ = reply.send(RoleId(next_role));
                    }
                    other => {
                        let _ = tx_rest.send(other);
                    }
                }
            }
        });
        created
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayAction>) -> Vec<GatewayAction> {
        let mut actions = Vec::new();
        while let Ok(action) = rx.try_recv() {
            actions.push(action);
        }
        actions
    }

    #[tokio::test]
    async fn warn_is_one_shot_and_counts_per_guild() {
        let fx = fixture();
        let guild = GuildId(10);

        let (record, count) = fx.ledger.warn(UserId(1), UserId(2), guild, "spam");
        assert!(!record.ongoing);
        assert_eq!(record.kind, PunishmentKind::Warn);
        assert_eq!(count, 1);

        let (_, count) = fx.ledger.warn(UserId(1), UserId(2), guild, "more spam");
        assert_eq!(count, 2);
        // A warn in another guild does not bump this guild's count.
        let (_, other) = fx.ledger.warn(UserId(1), UserId(2), GuildId(11), "elsewhere");
        assert_eq!(other, 1);
    }

    #[tokio::test]
    async fn ban_and_kick_record_their_own_kinds() {
        let mut fx = fixture();
        let guild = GuildId(10);

        let ban = fx.ledger.ban(UserId(1), UserId(2), guild, "blacklisted");
        assert_eq!(ban.kind, PunishmentKind::Ban);
        assert!(!ban.ongoing);

        let kick = fx.ledger.kick(UserId(1), UserId(2), guild, "rules");
        assert_eq!(kick.kind, PunishmentKind::Kick);
        assert!(!kick.ongoing);

        let actions = drain(&mut fx.rx);
        assert!(matches!(
            actions[0],
            GatewayAction::Ban { prune_days: 7, .. }
        ));
        assert!(matches!(actions[1], GatewayAction::Kick { .. }));

        let history = fx.ledger.history(UserId(1), guild);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn mute_expires_exactly_once() {
        let fx = fixture();
        let (tx_rest, mut rest) = mpsc::unbounded_channel();
        spawn_role_service(fx.rx, tx_rest);
        let ledger = fx.ledger;
        let (user, guild) = (UserId(1), GuildId(10));

        let end = Utc::now() + chrono::Duration::milliseconds(60_000);
        let record = ledger
            .mute(user, UserId(2), guild, "flooding", end)
            .await
            .expect("mute");
        assert!(record.ongoing);
        assert!(ledger.is_muted(user, guild));

        // Let the spawned expiry task register before advancing paused time.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(61_000)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!ledger.is_muted(user, guild));
        let actions = drain(&mut rest);
        let removals = actions
            .iter()
            .filter(|a| matches!(a, GatewayAction::RemoveRole { .. }))
            .count();
        assert_eq!(removals, 1, "expiry must unmute exactly once");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_lift_suppresses_the_expiry() {
        let fx = fixture();
        let (tx_rest, mut rest) = mpsc::unbounded_channel();
        spawn_role_service(fx.rx, tx_rest);
        let ledger = fx.ledger;
        let (user, guild) = (UserId(1), GuildId(10));

        let end = Utc::now() + chrono::Duration::milliseconds(60_000);
        ledger
            .mute(user, UserId(2), guild, "flooding", end)
            .await
            .expect("mute");

        assert!(ledger.unmute(user, guild));
        assert!(!ledger.is_muted(user, guild));
        // Second lift is a no-op.
        assert!(!ledger.unmute(user, guild));

        tokio::time::advance(Duration::from_millis(120_000)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let actions = drain(&mut rest);
        let removals = actions
            .iter()
            .filter(|a| matches!(a, GatewayAction::RemoveRole { .. }))
            .count();
        assert_eq!(removals, 1, "the cancelled expiry must not unmute again");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_mutes_create_one_role() {
        let fx = fixture();
        let (tx_rest, _rest) = mpsc::unbounded_channel();
        let created = spawn_role_service(fx.rx, tx_rest);
        let ledger = fx.ledger;
        let guild = GuildId(10);

        let end = Utc::now() + chrono::Duration::milliseconds(60_000);
        let a = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger.mute(UserId(1), UserId(9), guild, "a", end).await
            })
        };
        let b = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger.mute(UserId(2), UserId(9), guild, "b", end).await
            })
        };
        a.await.expect("join").expect("mute a");
        b.await.expect("join").expect("mute b");

        assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(ledger.muted_roles().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_band_role_removal_ends_the_mute() {
        let fx = fixture();
        let (tx_rest, mut rest) = mpsc::unbounded_channel();
        spawn_role_service(fx.rx, tx_rest);
        let ledger = fx.ledger;
        let (user, guild) = (UserId(1), GuildId(10));

        let end = Utc::now() + chrono::Duration::milliseconds(60_000);
        ledger
            .mute(user, UserId(2), guild, "flooding", end)
            .await
            .expect("mute");
        let role = ledger.muted_roles()[0].1;

        ledger.on_role_removed(user, guild, role);
        assert!(!ledger.is_muted(user, guild));

        tokio::time::advance(Duration::from_millis(120_000)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let actions = drain(&mut rest);
        assert!(
            actions
                .iter()
                .all(|a| !matches!(a, GatewayAction::RemoveRole { .. })),
            "no removal action may follow an out-of-band removal"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_mute_reuses_the_cached_role() {
        let fx = fixture();
        let (tx_rest, _rest) = mpsc::unbounded_channel();
        let created = spawn_role_service(fx.rx, tx_rest);
        let ledger = fx.ledger;
        let guild = GuildId(10);

        let end = Utc::now() + chrono::Duration::milliseconds(60_000);
        ledger
            .mute(UserId(1), UserId(9), guild, "first", end)
            .await
            .expect("mute");
        ledger
            .mute(UserId(2), UserId(9), guild, "second", end)
            .await
            .expect("mute");

        assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn record_round_trips_through_serde() {
        let record = PunishmentProfile {
            id: PunishmentId::new(),
            user: UserId(1),
            issuer: UserId(2),
            guild: GuildId(3),
            kind: PunishmentKind::Mute,
            reason: "flooding".to_string(),
            issued_at: Utc::now(),
            end: Some(Utc::now() + chrono::Duration::minutes(10)),
            ongoing: true,
        };
        let node = serde_json::to_value(&record).expect("encode");
        let back: PunishmentProfile = serde_json::from_value(node).expect("decode");
        assert_eq!(back, record);
    }
}
