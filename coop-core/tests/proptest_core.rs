//! Property-based tests for the coop core invariants.
//!
//! Uses `proptest` to verify the numeric and container invariants under
//! random inputs: division totality, leveling monotonicity, bounded-window
//! retention, and codec round-trips.

use proptest::prelude::*;

use coop_core::connector::{Codec, SerdeCodec};
use coop_core::fifo::{FifoList, FifoMap};
use coop_core::leveling::{Division, predict_division, predict_level};
use coop_core::pets::{Inventory, InventoryCodec, Pet};
use coop_core::punishment::{PunishmentKind, PunishmentProfile};
use coop_core::types::{GuildId, PunishmentId, UserId};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_kind() -> impl Strategy<Value = PunishmentKind> {
    prop_oneof![
        Just(PunishmentKind::Warn),
        Just(PunishmentKind::Mute),
        Just(PunishmentKind::Ban),
        Just(PunishmentKind::Kick),
    ]
}

fn arb_punishment() -> impl Strategy<Value = PunishmentProfile> {
    (
        any::<u64>(),
        any::<u64>(),
        any::<u64>(),
        arb_kind(),
        ".{0,60}",
        proptest::option::of(0i64..10_000_000),
        any::<bool>(),
    )
        .prop_map(|(user, issuer, guild, kind, reason, end_offset, ongoing)| {
            let issued_at = chrono::Utc::now();
            PunishmentProfile {
                id: PunishmentId::new(),
                user: UserId(user),
                issuer: UserId(issuer),
                guild: GuildId(guild),
                kind,
                reason,
                issued_at,
                end: end_offset.map(|ms| issued_at + chrono::Duration::milliseconds(ms)),
                ongoing,
            }
        })
}

fn arb_pet() -> impl Strategy<Value = Pet> {
    prop_oneof![
        Just(Pet::Dog),
        Just(Pet::Cat),
        Just(Pet::Hamster),
        Just(Pet::Parrot),
        Just(Pet::Dragon),
    ]
}

// ---------------------------------------------------------------------------
// Property: every level belongs to exactly one division
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn predict_division_is_total_and_in_range(level in any::<u32>()) {
        let division = predict_division(level);
        prop_assert!(level >= division.min_level());
        prop_assert!(level <= division.max_level());

        let matching = Division::ALL
            .iter()
            .filter(|d| level >= d.min_level() && level <= d.max_level())
            .count();
        prop_assert_eq!(matching, 1);
    }
}

// ---------------------------------------------------------------------------
// Property: predict_level is monotonic non-decreasing
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn predict_level_is_monotonic(a in 0u64..100_000_000_000, b in 0u64..100_000_000_000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(predict_level(lo) <= predict_level(hi));
    }

    #[test]
    fn predicted_level_lands_in_its_own_division(unit in 0u64..100_000_000_000) {
        let level = predict_level(unit);
        let division = predict_division(level);
        prop_assert!(level >= division.min_level());
        prop_assert!(level <= division.max_level());
    }
}

// ---------------------------------------------------------------------------
// Property: bounded containers retain exactly the newest window
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn fifo_list_retains_the_newest_window(
        capacity in 1usize..32,
        items in proptest::collection::vec(any::<u32>(), 0..200),
    ) {
        let mut list = FifoList::new(capacity);
        for &item in &items {
            list.push(item);
            prop_assert!(list.len() <= capacity);
        }

        let expected: Vec<u32> = items
            .iter()
            .copied()
            .skip(items.len().saturating_sub(capacity))
            .collect();
        let retained: Vec<u32> = list.iter().copied().collect();
        prop_assert_eq!(retained, expected);
    }

    #[test]
    fn fifo_map_retains_the_newest_keys(
        capacity in 1usize..16,
        keys in proptest::collection::vec(0u32..64, 0..200),
    ) {
        let mut map = FifoMap::new(capacity);
        let mut order: Vec<u32> = Vec::new();
        for &key in &keys {
            map.insert(key, key);
            prop_assert!(map.len() <= capacity);

            // Track the reference insertion order: updates keep their rank.
            if !order.contains(&key) {
                order.push(key);
            }
            if order.len() > capacity {
                order.remove(0);
            }
        }

        let retained: Vec<u32> = map.keys().copied().collect();
        prop_assert_eq!(retained, order);
    }
}

// ---------------------------------------------------------------------------
// Property: codec round-trips are field-wise identities
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn punishment_round_trips(profile in arb_punishment()) {
        let codec: SerdeCodec<PunishmentProfile> = SerdeCodec::new();
        let node = codec.serialize(&profile);
        let back = codec.deserialize(&node).expect("decode");
        prop_assert_eq!(back, profile);
    }

    #[test]
    fn inventory_round_trips(
        owner in any::<u64>(),
        pets in proptest::collection::vec(arb_pet(), 0..16),
    ) {
        let inventory = Inventory { owner: UserId(owner), pets };
        let codec = InventoryCodec;
        let node = codec.serialize(&vec![inventory.clone()]);
        let back = codec.deserialize(&node).expect("decode");
        prop_assert_eq!(back, vec![inventory]);
    }
}
