//! Word lists driving context extraction
//!
//! Bump `version` whenever the defaults change so cached records can be told apart.

use serde::{Deserialize, Serialize};

pub const VOCABULARY_VERSION: u32 = 1;

const DEFAULT_EVENTS: &[&str] = &[
    "flood",
    "earthquake",
    "fire",
    "wildfire",
    "protest",
    "war",
    "explosion",
    "hurricane",
    "cyclone",
    "tsunami",
    "storm",
    "landslide",
    "drought",
    "attack",
    "bombing",
    "riot",
    "crash",
    "pandemic",
    "election",
];

/// Capitalized words that are not place names
const DEFAULT_STOPLIST: &[&str] = &[
    // sentence starters
    "the", "this", "that", "these", "those", "a", "an", "and", "but", "or", "in", "on", "at",
    "after", "before", "during", "when", "where", "what", "who", "why", "how", "here", "there",
    "today", "yesterday", "tonight", "now", "just", "more", "some", "many", "all", "not",
    // pronouns
    "he", "she", "it", "we", "they", "you", "his", "her", "its", "our", "their", "your", "my",
    // media words
    "image", "images", "photo", "photos", "picture", "video", "footage", "people", "breaking",
    "watch", "news", "live", "update", "report", "viral", "shocking", "reuters", "getty",
    "associated", "press", "stock", "alamy", "shutterstock",
    // weekdays
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub version: u32,
    /// Event keywords, matched case-insensitively at a word start
    pub events: Vec<String>,
    /// Words never treated as locations (case-insensitive)
    pub stoplist: Vec<String>,
    /// Inclusive range of plausible years
    pub min_year: u16,
    pub max_year: u16,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            version: VOCABULARY_VERSION,
            events: DEFAULT_EVENTS.iter().map(|s| s.to_string()).collect(),
            stoplist: DEFAULT_STOPLIST.iter().map(|s| s.to_string()).collect(),
            min_year: 1900,
            max_year: 2099,
        }
    }
}
