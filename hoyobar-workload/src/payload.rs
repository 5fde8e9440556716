//! Synthetic field values for generated requests.
//!
//! The generator asks a [`PayloadSource`] for every user-visible string it
//! puts on the wire. [`SyntheticPayloads`] is the default source: usernames
//! are derived from the index so they are unique by construction, everything
//! else is drawn from a seeded RNG so runs are reproducible.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use hoyobar_core::Limits;

/// Password accepted by the server's two-character-class rule.
pub const DEFAULT_PASSWORD: &str = "p@ssw0rd";

/// Verification code the server accepts for registration.
pub const DEFAULT_VCODE: &str = "0000";

/// Username prefix; the index follows, zero-padded to seven digits.
pub const USERNAME_PREFIX: &str = "187";

const WORDS: &[&str] = &[
    "amber", "anchor", "autumn", "bamboo", "beacon", "breeze", "canyon", "cedar", "cinder",
    "comet", "coral", "dawn", "delta", "drift", "ember", "fable", "fern", "fjord", "flint",
    "frost", "gale", "garnet", "glade", "harbor", "hazel", "indigo", "iris", "jade", "juniper",
    "kelp", "lagoon", "lantern", "lumen", "maple", "meadow", "mist", "nebula", "nova", "oak",
    "onyx", "orbit", "pebble", "pine", "prism", "quartz", "quill", "raven", "reef", "ripple",
    "sage", "shale", "spruce", "summit", "thistle", "tide", "umber", "vale", "willow", "zephyr",
];

/// Supplies field values for generated descriptors.
///
/// Implementations may be random but must be deterministic for a given
/// construction so a run can be replayed.
pub trait PayloadSource {
    /// Username for the `index`-th registration. Must be unique per index.
    fn username(&mut self, index: u64) -> String;

    /// Nickname for the `index`-th registration.
    fn nickname(&mut self, index: u64) -> String;

    /// Password for the `index`-th registration.
    fn password(&mut self, index: u64) -> String;

    /// Post title.
    fn title(&mut self) -> String;

    /// Post or reply body.
    fn content(&mut self) -> String;
}

/// Seeded word-salad payloads.
#[derive(Debug, Clone)]
pub struct SyntheticPayloads {
    rng: ChaCha8Rng,
    limits: Limits,
}

impl SyntheticPayloads {
    /// Creates a source seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_limits(seed, Limits::default())
    }

    /// Creates a source that respects the given field limits.
    #[must_use]
    pub fn with_limits(seed: u64, limits: Limits) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            limits,
        }
    }

    fn sentence(&mut self, min_words: usize, max_words: usize) -> String {
        let count = self.rng.gen_range(min_words..=max_words);
        let words: Vec<&str> = (0..count)
            .filter_map(|_| WORDS.choose(&mut self.rng).copied())
            .collect();
        words.join(" ")
    }
}

impl PayloadSource for SyntheticPayloads {
    fn username(&mut self, index: u64) -> String {
        format!("{USERNAME_PREFIX}{index:07}")
    }

    fn nickname(&mut self, index: u64) -> String {
        let word = WORDS.choose(&mut self.rng).copied().unwrap_or("user");
        let nickname = format!("{word}_{index}");
        let max = self.limits.max_nickname_chars as usize;
        let min = self.limits.min_nickname_chars as usize;
        let mut nickname = truncate_chars(&nickname, max);
        while nickname.chars().count() < min {
            nickname.push('_');
        }
        nickname
    }

    fn password(&mut self, _index: u64) -> String {
        DEFAULT_PASSWORD.to_string()
    }

    fn title(&mut self) -> String {
        let title = self.sentence(2, 8);
        truncate_chars(&title, self.limits.max_title_chars as usize)
    }

    fn content(&mut self) -> String {
        let content = self.sentence(8, 60);
        truncate_chars(&content, self.limits.max_post_content_chars as usize)
    }
}

/// Truncates `text` to at most `max_chars` characters.
///
/// Counts characters, not bytes, so multi-byte text is never split inside a
/// code point.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
