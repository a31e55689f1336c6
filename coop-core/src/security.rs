//! Guild blacklisting: screening joining members against banned ids and
//! banned names.
//!
//! Name matching folds the candidate first — lowercasing, dropping
//! zero-width characters, and mapping common homoglyphs/confusables onto
//! their ASCII skeleton — so `В4DМ4N` and `badman` land on the same string
//! before comparison.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{GuildId, UserId};

// ---------------------------------------------------------------------------
// Name folding
// ---------------------------------------------------------------------------

/// Confusable characters folded onto their ASCII skeleton. Covers the
/// digit/symbol substitutions and Cyrillic/Greek lookalikes that show up in
/// evasion attempts; not a full Unicode confusables table.
const CONFUSABLES: &[(char, char)] = &[
    ('0', 'o'),
    ('1', 'l'),
    ('3', 'e'),
    ('4', 'a'),
    ('5', 's'),
    ('7', 't'),
    ('8', 'b'),
    ('9', 'g'),
    ('@', 'a'),
    ('$', 's'),
    ('!', 'i'),
    ('|', 'l'),
    ('+', 't'),
    ('а', 'a'),
    ('в', 'b'),
    ('е', 'e'),
    ('к', 'k'),
    ('м', 'm'),
    ('н', 'h'),
    ('о', 'o'),
    ('р', 'p'),
    ('с', 'c'),
    ('т', 't'),
    ('х', 'x'),
    ('у', 'y'),
    ('α', 'a'),
    ('β', 'b'),
    ('ε', 'e'),
    ('ι', 'i'),
    ('ο', 'o'),
    ('ρ', 'p'),
    ('τ', 't'),
    ('υ', 'u'),
];

/// Zero-width characters stripped before comparison.
const ZERO_WIDTH: &[char] = &['\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', '\u{feff}'];

/// Fold a name for comparison: lowercase, drop zero-width characters, and
/// map confusables onto their skeleton.
#[must_use]
pub fn fold_name(name: &str) -> String {
    name.chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .flat_map(char::to_lowercase)
        .map(|c| {
            CONFUSABLES
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |(_, to)| *to)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Per-guild manager
// ---------------------------------------------------------------------------

/// Blacklisted users and names for one guild.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildBlacklistingManager {
    /// User ids banned outright.
    users: HashSet<UserId>,
    /// Folded names a candidate's whole name must equal to match.
    match_names: HashSet<String>,
    /// Folded fragments a candidate's name must contain to match. Entries
    /// are longer than 4 characters to keep false positives down.
    contains_names: HashSet<String>,
}

impl GuildBlacklistingManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blacklist a user id.
    pub fn blacklist_user(&mut self, user: UserId) {
        self.users.insert(user);
    }

    /// Remove a user id from the blacklist. Returns whether it was listed.
    pub fn pardon_user(&mut self, user: UserId) -> bool {
        self.users.remove(&user)
    }

    /// Blacklist an exact name (compared folded).
    pub fn add_match(&mut self, name: &str) {
        self.match_names.insert(fold_name(name));
    }

    /// Blacklist a name fragment (compared folded). Rejects fragments of 4
    /// folded characters or fewer; returns whether the fragment was added.
    pub fn add_contains(&mut self, fragment: &str) -> bool {
        let folded = fold_name(fragment);
        if folded.chars().count() <= 4 {
            debug!(fragment, "contains-fragment too short; ignored");
            return false;
        }
        self.contains_names.insert(folded);
        true
    }

    /// Whether a user is blacklisted by id, by exact name, or by a
    /// contained fragment.
    #[must_use]
    pub fn is_blacklisted(&self, user: UserId, name: &str) -> bool {
        if self.users.contains(&user) {
            return true;
        }
        let folded = fold_name(name);
        if self.match_names.contains(&folded) {
            return true;
        }
        self.contains_names
            .iter()
            .any(|fragment| folded.contains(fragment))
    }

    /// Whether the manager has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.match_names.is_empty() && self.contains_names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Per-guild blacklisting managers, created on first use.
#[derive(Debug, Default)]
pub struct BlacklistRegistry {
    managers: DashMap<GuildId, GuildBlacklistingManager>,
}

impl BlacklistRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the guild's manager, creating it on miss.
    pub fn with_manager<R>(
        &self,
        guild: GuildId,
        f: impl FnOnce(&mut GuildBlacklistingManager) -> R,
    ) -> R {
        let mut entry = self.managers.entry(guild).or_default();
        f(&mut entry)
    }

    /// Screen a member against the guild's blacklist. A guild with no
    /// manager blacklists nobody.
    #[must_use]
    pub fn is_blacklisted(&self, guild: GuildId, user: UserId, name: &str) -> bool {
        self.managers
            .get(&guild)
            .is_some_and(|manager| manager.is_blacklisted(user, name))
    }

    /// Clone the guild's manager, if one exists.
    #[must_use]
    pub fn snapshot(&self, guild: GuildId) -> Option<GuildBlacklistingManager> {
        self.managers.get(&guild).map(|m| m.clone())
    }

    /// Replace the guild's manager from persisted state.
    pub fn preload(&self, guild: GuildId, manager: GuildBlacklistingManager) {
        self.managers.insert(guild, manager);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folding_maps_confusables_onto_one_skeleton() {
        assert_eq!(fold_name("B4DM4N"), "badman");
        assert_eq!(fold_name("b\u{200b}adman"), "badman");
        assert_eq!(fold_name("вadмan"), "badman");
        assert_eq!(fold_name("plain"), "plain");
    }

    #[test]
    fn blacklists_by_exact_user_id() {
        let mut manager = GuildBlacklistingManager::new();
        manager.blacklist_user(UserId(42));

        assert!(manager.is_blacklisted(UserId(42), "whoever"));
        assert!(!manager.is_blacklisted(UserId(43), "whoever"));
        assert!(manager.pardon_user(UserId(42)));
        assert!(!manager.is_blacklisted(UserId(42), "whoever"));
    }

    #[test]
    fn blacklists_by_exact_name_case_insensitively() {
        let mut manager = GuildBlacklistingManager::new();
        manager.add_match("BadMan");

        assert!(manager.is_blacklisted(UserId(1), "badman"));
        assert!(manager.is_blacklisted(UserId(1), "BADMAN"));
        assert!(!manager.is_blacklisted(UserId(1), "badman2"));
    }

    #[test]
    fn blacklists_by_fragment_and_homoglyphs() {
        let mut manager = GuildBlacklistingManager::new();
        assert!(manager.add_contains("raider"));

        assert!(manager.is_blacklisted(UserId(1), "xX_raider_Xx"));
        assert!(manager.is_blacklisted(UserId(1), "xX_ra!der_Xx"));
        assert!(!manager.is_blacklisted(UserId(1), "gardener"));
    }

    #[test]
    fn short_fragments_are_rejected() {
        let mut manager = GuildBlacklistingManager::new();
        assert!(!manager.add_contains("bad"));
        assert!(!manager.is_blacklisted(UserId(1), "badman"));
    }

    #[test]
    fn registry_scopes_managers_per_guild() {
        let registry = BlacklistRegistry::new();
        registry.with_manager(GuildId(1), |m| m.add_match("badman"));

        assert!(registry.is_blacklisted(GuildId(1), UserId(1), "badman"));
        assert!(!registry.is_blacklisted(GuildId(2), UserId(1), "badman"));
    }

    #[test]
    fn manager_round_trips_through_serde() {
        let mut manager = GuildBlacklistingManager::new();
        manager.blacklist_user(UserId(7));
        manager.add_match("badman");
        manager.add_contains("raider");

        let node = serde_json::to_value(&manager).expect("encode");
        let back: GuildBlacklistingManager = serde_json::from_value(node).expect("decode");
        assert!(back.is_blacklisted(UserId(7), "anyone"));
        assert!(back.is_blacklisted(UserId(1), "B4DM4N"));
    }
}
