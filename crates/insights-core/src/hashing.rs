//! Canonical conversation rendering and content hashing.
//!
//! The same canonical form feeds both the cache key (C5) and the LLM
//! prompt body (C8), so a cache hit always corresponds to byte-identical
//! model input.

use crate::model::Tweet;
use sha2::{Digest, Sha256};

/// Bumped whenever the prompt template or canonical rendering changes, so
/// existing cache entries implicitly miss instead of serving stale
/// analysis for a differently-prompted model.
pub const PROMPT_VERSION: &str = "v1";

/// Renders a thread's tweets (already ordered by `load_thread`) into the
/// canonical `"{author_id}\t{text}\n"` form used for both hashing and the
/// LLM prompt body. `author_id` is lowercased so two submissions that
/// differ only in the casing of an author handle still hash identically.
pub fn canonical_render(tweets: &[Tweet]) -> String {
    let mut out = String::new();
    for tweet in tweets {
        out.push_str(&tweet.author_id.to_ascii_lowercase());
        out.push('\t');
        out.push_str(&tweet.text);
        out.push('\n');
    }
    out
}

/// Computes the content-addressed `thread_hash` for a conversation: the
/// SHA-256 digest of `PROMPT_VERSION` concatenated with the canonical
/// rendering, hex-encoded.
pub fn thread_hash(tweets: &[Tweet]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(PROMPT_VERSION.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_render(tweets).as_bytes());
    hex::encode(hasher.finalize())
}
