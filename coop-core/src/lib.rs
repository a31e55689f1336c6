//! # Coop Core Library
//!
//! Platform-agnostic moderation and progression engine for chat guilds.
//!
//! The engine reacts to message and membership events, tracks per-user
//! leveling and currency, enforces word-based moderation, and issues
//! time-bounded punishments. Its heart is the caching/persistence layer:
//!
//! - **Bounded containers** — [`fifo::FifoList`] / [`fifo::FifoMap`] cap
//!   every resident cache with first-in-first-out eviction.
//! - **Document storage** — [`store::DocumentStore`] holds one dot-path
//!   addressed document per file; every connector's I/O drains through the
//!   single [`store::IoExecutor`] worker.
//! - **Memory caches** — [`cache::MemoryCache`] owns a value, periodically
//!   persists it, periodically refreshes it (last-read-wins), and dies on
//!   kill or lifespan expiry.
//! - **Leveling** — [`leveling::predict_level`] maps cumulative progression
//!   onto the eight-tier division ladder; message acceptance serializes
//!   per user so no update is lost.
//! - **Punishments** — [`punishment::PunishmentLedger`] records
//!   warn/mute/ban/kick and drives scheduled mute expiry through idempotent
//!   transitions.
//!
//! The chat platform itself stays outside: events come in as
//! [`gateway::InboundEvent`], effects leave as [`gateway::GatewayAction`]
//! over a channel, and every timer runs on the shared [`sched::Scheduler`].

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod connector;
pub mod currency;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod gateway;
pub mod leveling;
pub mod moderation;
pub mod pets;
pub mod profile;
pub mod punishment;
pub mod sched;
pub mod security;
pub mod store;
pub mod types;

pub use bootstrap::{CoopSystem, assemble};
pub use cache::MemoryCache;
pub use config::CoopConfig;
pub use error::{CoopError, Result};
pub use types::*;
