//! Word-based content moderation and the per-guild message audit cache.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{GuildId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Banned words
// ---------------------------------------------------------------------------

/// A word banned from chat in some guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedWord {
    /// The banned word.
    pub word: String,
    /// Exact mode compares text as written; non-exact mode strips all
    /// whitespace from both sides first, catching spaced-out spellings.
    pub exact: bool,
}

impl BannedWord {
    /// Create a banned word.
    pub fn new(word: impl Into<String>, exact: bool) -> Self {
        Self {
            word: word.into(),
            exact,
        }
    }

    /// Whether `text` contains this word. Case-insensitive.
    #[must_use]
    pub fn check(&self, text: &str) -> bool {
        if self.exact {
            text.to_lowercase().contains(&self.word.to_lowercase())
        } else {
            let needle: String = self
                .word
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            let haystack: String = text
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            haystack.contains(&needle)
        }
    }
}

/// Per-guild banned-word lists.
#[derive(Debug, Default)]
pub struct WordFilter {
    words: DashMap<GuildId, Vec<BannedWord>>,
}

impl WordFilter {
    /// Create an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban a word in a guild.
    pub fn add_word(&self, guild: GuildId, word: BannedWord) {
        self.words.entry(guild).or_default().push(word);
    }

    /// Unban a word in a guild. Returns whether it was banned.
    pub fn remove_word(&self, guild: GuildId, word: &str) -> bool {
        match self.words.get_mut(&guild) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|w| w.word != word);
                before != list.len()
            }
            None => false,
        }
    }

    /// The guild's banned words.
    #[must_use]
    pub fn words(&self, guild: GuildId) -> Vec<BannedWord> {
        self.words
            .get(&guild)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// The first banned word contained in `text`, if any.
    #[must_use]
    pub fn screen(&self, guild: GuildId, text: &str) -> Option<BannedWord> {
        let list = self.words.get(&guild)?;
        list.iter().find(|w| w.check(text)).cloned()
    }

    /// Replace a guild's word list from persisted state.
    pub fn preload(&self, guild: GuildId, words: Vec<BannedWord>) {
        self.words.insert(guild, words);
    }
}

// ---------------------------------------------------------------------------
// Message audit cache
// ---------------------------------------------------------------------------

/// A cached message, kept for edit auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMessage {
    /// The message id.
    pub id: MessageId,
    /// Who posted it.
    pub author: UserId,
    /// Its text content as last seen.
    pub content: String,
}

/// Per-guild message history with deterministic compaction.
///
/// Each guild's history grows to `capacity`; once full it is compacted to
/// the most recent `trim_to` messages before the new one is appended, so
/// `len <= capacity` always holds and a compaction always retains exactly
/// the newest window.
#[derive(Debug)]
pub struct MessageCache {
    capacity: usize,
    trim_to: usize,
    histories: DashMap<GuildId, VecDeque<CachedMessage>>,
}

impl MessageCache {
    /// Create a cache with the given cap and post-compaction size.
    ///
    /// `trim_to` is clamped below `capacity`.
    #[must_use]
    pub fn new(capacity: usize, trim_to: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            trim_to: trim_to.min(capacity.saturating_sub(1)),
            histories: DashMap::new(),
        }
    }

    /// Record a message in its guild's history.
    pub fn register(&self, guild: GuildId, message: CachedMessage) {
        let mut history = self.histories.entry(guild).or_default();
        if history.len() >= self.capacity {
            let dropped = history.len() - self.trim_to;
            history.drain(..dropped);
            debug!(%guild, dropped, retained = self.trim_to, "message history compacted");
        }
        history.push_back(message);
    }

    /// The cached content of a message, for edit auditing.
    ///
    /// When `replacement` is given, the cached content is swapped in place
    /// so the next edit sees this one as the original.
    #[must_use]
    pub fn original_content(
        &self,
        guild: GuildId,
        message: MessageId,
        replacement: Option<&str>,
    ) -> Option<String> {
        let mut history = self.histories.get_mut(&guild)?;
        let entry = history.iter_mut().find(|m| m.id == message)?;
        let original = entry.content.clone();
        if let Some(new_content) = replacement {
            entry.content = new_content.to_string();
        }
        Some(original)
    }

    /// Number of cached messages for a guild.
    #[must_use]
    pub fn len(&self, guild: GuildId) -> usize {
        self.histories.get(&guild).map_or(0, |h| h.len())
    }

    /// Whether the guild has no cached messages.
    #[must_use]
    pub fn is_empty(&self, guild: GuildId) -> bool {
        self.len(guild) == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u64, content: &str) -> CachedMessage {
        CachedMessage {
            id: MessageId(id),
            author: UserId(1),
            content: content.to_string(),
        }
    }

    #[test]
    fn exact_word_matches_case_insensitively() {
        let word = BannedWord::new("Forbidden", true);
        assert!(word.check("this is FORBIDDEN content"));
        assert!(!word.check("this is fine"));
        // Exact mode does not see through spacing.
        assert!(!word.check("f o r b i d d e n"));
    }

    #[test]
    fn loose_word_sees_through_whitespace() {
        let word = BannedWord::new("forbidden", false);
        assert!(word.check("f o r b i d d e n"));
        assert!(word.check("FORBIDDEN"));
        assert!(!word.check("for bid"));
    }

    #[test]
    fn filter_screens_per_guild() {
        let filter = WordFilter::new();
        let guild = GuildId(1);
        filter.add_word(guild, BannedWord::new("egg heresy", false));

        let hit = filter.screen(guild, "spreading eggheresy again").expect("match");
        assert_eq!(hit.word, "egg heresy");
        assert!(filter.screen(GuildId(2), "spreading eggheresy again").is_none());

        assert!(filter.remove_word(guild, "egg heresy"));
        assert!(filter.screen(guild, "spreading eggheresy again").is_none());
    }

    #[test]
    fn cache_compacts_to_most_recent_window() {
        let cache = MessageCache::new(10, 5);
        let guild = GuildId(1);
        for i in 0..10 {
            cache.register(guild, msg(i, &format!("m{i}")));
        }
        assert_eq!(cache.len(guild), 10);

        // The 11th message triggers compaction to the newest 5, then lands.
        cache.register(guild, msg(10, "m10"));
        assert_eq!(cache.len(guild), 6);
        assert!(cache.original_content(guild, MessageId(4), None).is_none());
        assert_eq!(
            cache.original_content(guild, MessageId(5), None).as_deref(),
            Some("m5")
        );
        assert_eq!(
            cache.original_content(guild, MessageId(10), None).as_deref(),
            Some("m10")
        );
    }

    #[test]
    fn cache_never_exceeds_capacity() {
        let cache = MessageCache::new(10, 5);
        let guild = GuildId(1);
        for i in 0..200 {
            cache.register(guild, msg(i, "x"));
            assert!(cache.len(guild) <= 10);
        }
    }

    #[test]
    fn original_content_audits_edits() {
        let cache = MessageCache::new(10, 5);
        let guild = GuildId(1);
        cache.register(guild, msg(1, "first draft"));

        let before = cache.original_content(guild, MessageId(1), Some("second draft"));
        assert_eq!(before.as_deref(), Some("first draft"));

        let after = cache.original_content(guild, MessageId(1), None);
        assert_eq!(after.as_deref(), Some("second draft"));

        assert!(cache.original_content(guild, MessageId(99), None).is_none());
    }
}
