//! The egg currency ledger.
//!
//! Balances are non-negative; removal saturates at zero. Lookup creates a
//! zero balance on miss so every observed user has a row.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::connector::Codec;
use crate::error::Result;
use crate::store::Node;
use crate::types::UserId;

/// Per-user egg balances.
#[derive(Debug, Default)]
pub struct CurrencyLedger {
    eggs: DashMap<UserId, u64>,
}

/// One persisted balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// The balance owner.
    pub user: UserId,
    /// The owner's eggs.
    pub eggs: u64,
}

impl CurrencyLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user's balance outright. Returns the set amount.
    pub fn set_eggs(&self, user: UserId, amount: u64) -> u64 {
        self.eggs.insert(user, amount);
        amount
    }

    /// Add to a user's balance. Returns the new total.
    pub fn add_eggs(&self, user: UserId, amount: u64) -> u64 {
        let mut entry = self.eggs.entry(user).or_insert(0);
        *entry = entry.saturating_add(amount);
        *entry
    }

    /// Remove from a user's balance, saturating at zero. Returns the new
    /// total.
    pub fn remove_eggs(&self, user: UserId, amount: u64) -> u64 {
        let mut entry = self.eggs.entry(user).or_insert(0);
        *entry = entry.saturating_sub(amount);
        *entry
    }

    /// A user's balance, created at zero on miss.
    #[must_use]
    pub fn eggs(&self, user: UserId) -> u64 {
        *self.eggs.entry(user).or_insert(0)
    }

    /// Every user holding exactly `eggs`.
    #[must_use]
    pub fn users_with(&self, eggs: u64) -> Vec<UserId> {
        self.eggs
            .iter()
            .filter(|entry| *entry.value() == eggs)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Users ranked by balance, highest first.
    #[must_use]
    pub fn leaderboard(&self) -> Vec<Balance> {
        self.leaderboard_filtered(|_| true)
    }

    /// [`CurrencyLedger::leaderboard`] restricted to users matching
    /// `include` (e.g. membership in one guild).
    pub fn leaderboard_filtered(&self, include: impl Fn(UserId) -> bool) -> Vec<Balance> {
        let mut board: Vec<Balance> = self
            .eggs
            .iter()
            .filter(|entry| include(*entry.key()))
            .map(|entry| Balance {
                user: *entry.key(),
                eggs: *entry.value(),
            })
            .collect();
        board.sort_by(|a, b| b.eggs.cmp(&a.eggs));
        board
    }

    /// Clone every balance row.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Balance> {
        self.eggs
            .iter()
            .map(|entry| Balance {
                user: *entry.key(),
                eggs: *entry.value(),
            })
            .collect()
    }

    /// Replace all balances from a snapshot.
    pub fn preload(&self, balances: impl IntoIterator<Item = Balance>) {
        self.eggs.clear();
        for balance in balances {
            self.eggs.insert(balance.user, balance.eggs);
        }
    }
}

/// Persists a [`CurrencyLedger`] as a flat list of balances.
#[derive(Debug, Default)]
pub struct LedgerCodec;

impl Codec<CurrencyLedger> for LedgerCodec {
    fn serialize(&self, value: &CurrencyLedger) -> Node {
        serde_json::to_value(value.snapshot()).unwrap_or(Node::Null)
    }

    fn deserialize(&self, node: &Node) -> Result<CurrencyLedger> {
        let balances: Vec<Balance> = serde_json::from_value(node.clone())
            .map_err(|e| crate::CoopError::Deserialization(e.to_string()))?;
        let ledger = CurrencyLedger::new();
        ledger.preload(balances);
        Ok(ledger)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_creates_a_zero_balance() {
        let ledger = CurrencyLedger::new();
        assert_eq!(ledger.eggs(UserId(1)), 0);
        assert_eq!(ledger.snapshot().len(), 1);
    }

    #[test]
    fn add_and_remove_saturate_at_zero() {
        let ledger = CurrencyLedger::new();
        let user = UserId(1);

        assert_eq!(ledger.add_eggs(user, 30), 30);
        assert_eq!(ledger.remove_eggs(user, 50), 0);
        assert_eq!(ledger.eggs(user), 0);
    }

    #[test]
    fn users_with_finds_equal_balances() {
        let ledger = CurrencyLedger::new();
        ledger.set_eggs(UserId(1), 10);
        ledger.set_eggs(UserId(2), 10);
        ledger.set_eggs(UserId(3), 99);

        let mut users = ledger.users_with(10);
        users.sort();
        assert_eq!(users, vec![UserId(1), UserId(2)]);
    }

    #[test]
    fn leaderboard_sorts_descending() {
        let ledger = CurrencyLedger::new();
        ledger.set_eggs(UserId(1), 5);
        ledger.set_eggs(UserId(2), 500);
        ledger.set_eggs(UserId(3), 50);

        let board = ledger.leaderboard();
        let amounts: Vec<u64> = board.iter().map(|b| b.eggs).collect();
        assert_eq!(amounts, vec![500, 50, 5]);

        let filtered = ledger.leaderboard_filtered(|u| u != UserId(2));
        assert_eq!(filtered[0].eggs, 50);
    }

    #[test]
    fn codec_round_trips() {
        let ledger = CurrencyLedger::new();
        ledger.set_eggs(UserId(7), 77);

        let codec = LedgerCodec;
        let node = codec.serialize(&ledger);
        let restored = codec.deserialize(&node).expect("decode");
        assert_eq!(restored.eggs(UserId(7)), 77);
    }
}
