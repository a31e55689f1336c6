//! The pet mini-game: spawn events, inventories, capture and steal rolls.
//!
//! At most one pet event is active per guild; an unclaimed pet despawns on
//! a timer. Inventories live in a bounded keyed cache with create-on-miss.
//! Capture and steal are bounded random outcomes; the probability constants
//! are game tuning, not contracts.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::connector::Codec;
use crate::currency::CurrencyLedger;
use crate::error::Result;
use crate::fifo::{FifoList, FifoMap};
use crate::gateway::{ActionSink, GatewayAction};
use crate::sched::Scheduler;
use crate::store::Node;
use crate::types::{ChannelId, GuildId, UserId};

// ---------------------------------------------------------------------------
// Pets
// ---------------------------------------------------------------------------

/// Every capturable pet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pet {
    /// Common.
    Dog,
    /// Common.
    Cat,
    /// Uncommon.
    Hamster,
    /// Rare.
    Parrot,
    /// Very rare.
    Dragon,
}

impl Pet {
    /// All pets, most common first.
    pub const ALL: [Pet; 5] = [Pet::Dog, Pet::Cat, Pet::Hamster, Pet::Parrot, Pet::Dragon];

    /// Pet decoded when a persisted name is unrecognized.
    pub const FALLBACK: Pet = Pet::Dog;

    /// User-facing name.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Dog => "Dog",
            Self::Cat => "Cat",
            Self::Hamster => "Hamster",
            Self::Parrot => "Parrot",
            Self::Dragon => "Dragon",
        }
    }

    /// Probability (0–1) that a capture roll lands on this pet.
    #[must_use]
    pub fn rarity(self) -> f64 {
        match self {
            Self::Dog => 0.40,
            Self::Cat => 0.25,
            Self::Hamster => 0.15,
            Self::Parrot => 0.08,
            Self::Dragon => 0.02,
        }
    }

    /// Look a pet up by name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Pet> {
        Self::ALL
            .into_iter()
            .find(|pet| pet.display_name().eq_ignore_ascii_case(name))
    }
}

/// A user's pets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// The inventory owner.
    pub owner: UserId,
    /// Captured pets, oldest first.
    pub pets: Vec<Pet>,
}

impl Inventory {
    /// An empty inventory for `owner`.
    #[must_use]
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            pets: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A pet was captured and the event ended.
    Captured(Pet),
    /// The pet escaped the attempt; the event stays active.
    Escaped,
    /// No event is active in the guild.
    NoEvent,
}

/// Result of a steal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealOutcome {
    /// A pet moved from the victim to the thief.
    Stolen(Pet),
    /// The thief was caught and paid the penalty.
    Caught {
        /// Eggs taken from the thief.
        penalty: u64,
    },
    /// Nothing happened.
    Nothing,
}

// ---------------------------------------------------------------------------
// PetSystem
// ---------------------------------------------------------------------------

/// Pet events and inventories for every guild.
pub struct PetSystem {
    active_events: Arc<Mutex<FifoList<GuildId>>>,
    inventories: Mutex<FifoMap<UserId, Inventory>>,
    currency: Arc<CurrencyLedger>,
    actions: ActionSink,
    scheduler: Scheduler,
    despawn: Duration,
    steal_penalty: u64,
}

impl std::fmt::Debug for PetSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PetSystem")
            .field("active_events", &self.active_events.lock().len())
            .finish_non_exhaustive()
    }
}

impl PetSystem {
    /// Build the pet system.
    ///
    /// `event_capacity` caps simultaneously active event guilds;
    /// `inventory_capacity` caps resident inventories; `despawn` is how long
    /// an unclaimed pet lingers; `steal_penalty` is the egg fine for a
    /// caught steal.
    #[must_use]
    pub fn new(
        currency: Arc<CurrencyLedger>,
        actions: ActionSink,
        scheduler: Scheduler,
        event_capacity: usize,
        inventory_capacity: usize,
        despawn: Duration,
        steal_penalty: u64,
    ) -> Self {
        Self {
            active_events: Arc::new(Mutex::new(FifoList::new(event_capacity))),
            inventories: Mutex::new(FifoMap::new(inventory_capacity)),
            currency,
            actions,
            scheduler,
            despawn,
            steal_penalty,
        }
    }

    /// Start a pet event in `guild`, announced in `channel`.
    ///
    /// Refused while the guild already has an active event. The pet
    /// despawns after the configured duration if nobody captures it.
    pub fn spawn_event(&self, guild: GuildId, channel: ChannelId) -> bool {
        {
            let mut active = self.active_events.lock();
            if active.contains(&guild) {
                return false;
            }
            active.push(guild);
        }

        let announcement = "**A wild pet has appeared!** Capture it before it wanders off!";
        if let Err(error) = self.actions.send(GatewayAction::SendMessage {
            channel,
            text: announcement.to_string(),
        }) {
            warn!(%guild, %error, "gateway unavailable for pet announcement");
        }

        let active = Arc::clone(&self.active_events);
        self.scheduler.schedule_once(self.despawn, async move {
            // A capture may have ended the event already; removal is
            // idempotent.
            if active.lock().remove_item(&guild) {
                debug!(%guild, "pet despawned");
            }
        });
        debug!(%guild, "pet event started");
        true
    }

    /// Whether `guild` currently has an active pet event.
    #[must_use]
    pub fn has_active_event(&self, guild: GuildId) -> bool {
        self.active_events.lock().contains(&guild)
    }

    /// Attempt to capture the active pet in `guild`.
    pub fn capture(&self, user: UserId, guild: GuildId) -> CaptureOutcome {
        self.capture_with(user, guild, &mut rand::thread_rng())
    }

    /// [`PetSystem::capture`] with a caller-supplied RNG.
    pub fn capture_with<R: Rng>(&self, user: UserId, guild: GuildId, rng: &mut R) -> CaptureOutcome {
        if !self.has_active_event(guild) {
            return CaptureOutcome::NoEvent;
        }
        match roll_capture(rng) {
            Some(pet) => {
                self.active_events.lock().remove_item(&guild);
                self.with_inventory(user, |inv| inv.pets.push(pet));
                debug!(%user, %guild, pet = pet.display_name(), "pet captured");
                CaptureOutcome::Captured(pet)
            }
            None => CaptureOutcome::Escaped,
        }
    }

    /// Attempt to steal a pet from `victim`.
    ///
    /// One bounded roll decides the outcome: a successful steal moves a
    /// random pet across, a caught thief pays the egg penalty, and the rest
    /// of the outcome space is a quiet miss.
    pub fn steal(&self, thief: UserId, victim: UserId) -> StealOutcome {
        self.steal_with(thief, victim, &mut rand::thread_rng())
    }

    /// [`PetSystem::steal`] with a caller-supplied RNG.
    pub fn steal_with<R: Rng>(&self, thief: UserId, victim: UserId, rng: &mut R) -> StealOutcome {
        let roll = rng.gen_range(0..100u32);
        if roll < 35 {
            let stolen = {
                let mut inventories = self.inventories.lock();
                let victim_inv =
                    inventories.get_or_insert_with(victim, || Inventory::new(victim));
                if victim_inv.pets.is_empty() {
                    None
                } else {
                    let index = rng.gen_range(0..victim_inv.pets.len());
                    Some(victim_inv.pets.remove(index))
                }
            };
            match stolen {
                Some(pet) => {
                    self.with_inventory(thief, |inv| inv.pets.push(pet));
                    debug!(%thief, %victim, pet = pet.display_name(), "pet stolen");
                    StealOutcome::Stolen(pet)
                }
                None => StealOutcome::Nothing,
            }
        } else if roll < 60 {
            self.currency.remove_eggs(thief, self.steal_penalty);
            debug!(%thief, penalty = self.steal_penalty, "thief caught");
            StealOutcome::Caught {
                penalty: self.steal_penalty,
            }
        } else {
            StealOutcome::Nothing
        }
    }

    /// Run `f` against the (created-on-miss) inventory of `user`.
    pub fn with_inventory<R>(&self, user: UserId, f: impl FnOnce(&mut Inventory) -> R) -> R {
        let mut inventories = self.inventories.lock();
        f(inventories.get_or_insert_with(user, || Inventory::new(user)))
    }

    /// Clone the (created-on-miss) inventory of `user`.
    #[must_use]
    pub fn inventory(&self, user: UserId) -> Inventory {
        self.with_inventory(user, |inv| inv.clone())
    }

    /// Clone every resident inventory, oldest-resident first.
    #[must_use]
    pub fn snapshot_inventories(&self) -> Vec<Inventory> {
        self.inventories.lock().values().cloned().collect()
    }

    /// Seed inventories from persisted state.
    pub fn preload_inventories(&self, inventories: impl IntoIterator<Item = Inventory>) {
        let mut resident = self.inventories.lock();
        for inventory in inventories {
            resident.insert(inventory.owner, inventory);
        }
    }
}

/// One capture roll against the rarity table. `None` means the pet escaped.
fn roll_capture<R: Rng>(rng: &mut R) -> Option<Pet> {
    let roll: f64 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    for pet in Pet::ALL {
        cumulative += pet.rarity();
        if roll < cumulative {
            return Some(pet);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Inventory codec
// ---------------------------------------------------------------------------

/// Persists inventories as a map of stringified owner ids to pet-name
/// lists.
#[derive(Debug, Default)]
pub struct InventoryCodec;

impl Codec<Vec<Inventory>> for InventoryCodec {
    fn serialize(&self, value: &Vec<Inventory>) -> Node {
        let mut root = Map::new();
        for inventory in value {
            let pets: Vec<Value> = inventory
                .pets
                .iter()
                .map(|pet| Value::String(pet.display_name().to_string()))
                .collect();
            root.insert(inventory.owner.0.to_string(), Value::Array(pets));
        }
        Value::Object(root)
    }

    fn deserialize(&self, node: &Node) -> Result<Vec<Inventory>> {
        let Some(map) = node.as_object() else {
            return Err(crate::CoopError::Deserialization(
                "inventories node is not a map".to_string(),
            ));
        };
        let mut inventories = Vec::new();
        for (key, pets_node) in map {
            let Ok(owner) = key.parse::<u64>() else {
                warn!(%key, "skipping inventory with unparseable owner id");
                continue;
            };
            let mut inventory = Inventory::new(UserId(owner));
            if let Some(pets) = pets_node.as_array() {
                for pet_node in pets {
                    let name = pet_node.as_str().unwrap_or_default();
                    let pet = Pet::from_name(name).unwrap_or_else(|| {
                        // Known limitation: renamed or removed pets come
                        // back as the fallback rather than failing the load.
                        warn!(name, "unknown pet name; using fallback");
                        Pet::FALLBACK
                    });
                    inventory.pets.push(pet);
                }
            }
            inventories.push(inventory);
        }
        Ok(inventories)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
