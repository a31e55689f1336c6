//! User profiles and the bounded profile registry.
//!
//! A profile carries a user's progression state and their append-only
//! punishment history. Profiles are created lazily on the first observed
//! message or punishment action and live until the bounding registry evicts
//! them; the registry hands out per-profile locks so that concurrent
//! read-modify-write cycles (two messages from the same user landing at
//! once) serialize instead of losing updates.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::connector::Codec;
use crate::error::Result;
use crate::fifo::FifoMap;
use crate::leveling::Division;
use crate::punishment::{PunishmentKind, PunishmentProfile};
use crate::store::Node;
use crate::types::{GuildId, UserId};

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// Progression state and punishment history for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The user this profile belongs to.
    pub user: UserId,
    /// Current level, derived from `level_unit`.
    pub level: u32,
    /// Cumulative progression score.
    pub level_unit: u64,
    /// Current division, derived from `level`.
    pub division: Division,
    /// Append-only history of issued punishments.
    #[serde(default)]
    pub punishments: Vec<PunishmentProfile>,
}

impl UserProfile {
    /// A fresh profile at the bottom of the ladder.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            level: 0,
            level_unit: 0,
            division: Division::Dirt,
            punishments: Vec::new(),
        }
    }

    /// Punishments of one kind, in issue order.
    pub fn punishments_of(&self, kind: PunishmentKind) -> impl Iterator<Item = &PunishmentProfile> {
        self.punishments.iter().filter(move |p| p.kind == kind)
    }

    /// Punishments issued in one guild, in issue order.
    pub fn punishments_in(&self, guild: GuildId) -> impl Iterator<Item = &PunishmentProfile> {
        self.punishments.iter().filter(move |p| p.guild == guild)
    }

    /// Punishments of one kind issued in one guild, in issue order.
    pub fn punishments_matching(
        &self,
        kind: PunishmentKind,
        guild: GuildId,
    ) -> impl Iterator<Item = &PunishmentProfile> {
        self.punishments
            .iter()
            .filter(move |p| p.kind == kind && p.guild == guild)
    }
}

// ---------------------------------------------------------------------------
// ProfileRegistry
// ---------------------------------------------------------------------------

/// Bounded keyed store of user profiles with create-on-miss semantics.
///
/// Each entry is wrapped in its own mutex; callers lock the entry for the
/// whole read-modify-write so concurrent updates to one user serialize.
pub struct ProfileRegistry {
    inner: RwLock<FifoMap<UserId, Arc<Mutex<UserProfile>>>>,
}

impl std::fmt::Debug for ProfileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ProfileRegistry {
    /// Create an empty registry retaining at most `capacity` profiles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(FifoMap::new(capacity)),
        }
    }

    /// Rebuild a registry from previously snapshotted profiles.
    ///
    /// Profiles beyond `capacity` evict oldest-first, matching the bounded
    /// cache they were snapshotted from.
    #[must_use]
    pub fn restore(capacity: usize, profiles: Vec<UserProfile>) -> Self {
        let registry = Self::new(capacity);
        {
            let mut inner = registry.inner.write();
            for profile in profiles {
                inner.insert(profile.user, Arc::new(Mutex::new(profile)));
            }
        }
        registry
    }

    /// The profile entry for `user`, created on miss.
    #[must_use]
    pub fn get_or_create(&self, user: UserId) -> Arc<Mutex<UserProfile>> {
        if let Some(entry) = self.inner.read().get(&user) {
            return Arc::clone(entry);
        }
        let mut inner = self.inner.write();
        Arc::clone(inner.get_or_insert_with(user, || Arc::new(Mutex::new(UserProfile::new(user)))))
    }

    /// The profile entry for `user`, if currently resident.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<Arc<Mutex<UserProfile>>> {
        self.inner.read().get(&user).map(Arc::clone)
    }

    /// Run `f` against the (created-on-miss) profile of `user`, holding its
    /// lock for the duration.
    pub fn with_profile<R>(&self, user: UserId, f: impl FnOnce(&mut UserProfile) -> R) -> R {
        let entry = self.get_or_create(user);
        let mut profile = entry.lock();
        f(&mut profile)
    }

    /// Replace every resident profile with a restored snapshot, keeping
    /// the registry's capacity.
    ///
    /// Entry handles obtained before the swap keep pointing at the old
    /// profiles; callers restore before handing the registry out.
    pub fn adopt(&self, profiles: Vec<UserProfile>) {
        let mut inner = self.inner.write();
        let mut fresh = FifoMap::new(inner.capacity());
        for profile in profiles {
            fresh.insert(profile.user, Arc::new(Mutex::new(profile)));
        }
        *inner = fresh;
    }

    /// Number of resident profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no profiles are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Clone every resident profile, oldest-resident first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserProfile> {
        self.inner
            .read()
            .values()
            .map(|entry| entry.lock().clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Persists a [`ProfileRegistry`] as a flat list of profiles.
pub struct RegistryCodec {
    capacity: usize,
}

impl RegistryCodec {
    /// Codec restoring registries with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Codec<ProfileRegistry> for RegistryCodec {
    fn serialize(&self, value: &ProfileRegistry) -> Node {
        serde_json::to_value(value.snapshot()).unwrap_or(Node::Null)
    }

    fn deserialize(&self, node: &Node) -> Result<ProfileRegistry> {
        let profiles: Vec<UserProfile> = serde_json::from_value(node.clone())
            .map_err(|e| crate::CoopError::Deserialization(e.to_string()))?;
        Ok(ProfileRegistry::restore(self.capacity, profiles))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
