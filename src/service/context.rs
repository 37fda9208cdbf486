//! Heuristic extraction of dates, locations and events from free text

use std::collections::HashSet;

use regex::Regex;

use crate::model::{Context, Vocabulary, YearMonth};

const MONTHS: &[(&str, u8)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sept", 9),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

/// Suffixes accepted after an event keyword
const INFLECTIONS: &[&str] = &["s", "es", "ed", "ing", "ings"];

fn month_number(name: &str) -> Option<u8> {
    let name = name.to_lowercase();
    MONTHS.iter().find(|(m, _)| *m == name).map(|(_, n)| *n)
}

/// Extracts a `Context` from text using a fixed vocabulary
///
/// Extraction is a pure function of the text and the vocabulary it was built with.
pub struct ContextExtractor {
    version: u32,
    min_year: u16,
    max_year: u16,
    stoplist: HashSet<String>,
    /// Canonical keyword and its pattern over the keyword plus inflection suffixes
    events: Vec<(String, Regex)>,
    year_pattern: Regex,
    month_pattern: Regex,
    location_pattern: Regex,
}

impl ContextExtractor {
    pub fn new(vocabulary: &Vocabulary) -> Self {
        let events = vocabulary
            .events
            .iter()
            .map(|kw| kw.trim().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .filter_map(|kw| {
                let pattern = Regex::new(&format!(
                    r"(?i)\b{}(?:{})?\b",
                    regex::escape(&kw),
                    INFLECTIONS.join("|")
                ));
                pattern.ok().map(|re| (kw, re))
            })
            .collect();

        let month_names = MONTHS.iter().map(|(m, _)| *m).collect::<Vec<_>>().join("|");

        Self {
            version: vocabulary.version,
            min_year: vocabulary.min_year,
            max_year: vocabulary.max_year,
            stoplist: vocabulary.stoplist.iter().map(|s| s.to_lowercase()).collect(),
            events,
            year_pattern: Regex::new(r"\b(\d{4})\b").unwrap(),
            month_pattern: Regex::new(&format!(
                r"(?i)\b({})\.?(?:\s+\d{{1,2}}(?:st|nd|rd|th)?,?)?\s+(\d{{4}})\b",
                month_names
            ))
            .unwrap(),
            location_pattern: Regex::new(r"\b\p{Lu}\p{Ll}{2,}(?:[ \t]+\p{Lu}\p{Ll}+)*\b").unwrap(),
        }
    }

    /// Version of the vocabulary this extractor was built from
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn extract(&self, text: &str) -> Context {
        let mut context = Context::default();

        self.extract_dates(text, &mut context);
        self.extract_locations(text, &mut context);

        for (keyword, pattern) in &self.events {
            if pattern.is_match(text) {
                context.events.insert(keyword.clone());
            }
        }

        context
    }

    fn plausible_year(&self, digits: &str) -> Option<u16> {
        digits
            .parse::<u16>()
            .ok()
            .filter(|y| (self.min_year..=self.max_year).contains(y))
    }

    fn extract_dates(&self, text: &str, context: &mut Context) {
        for caps in self.year_pattern.captures_iter(text) {
            if let Some(year) = self.plausible_year(&caps[1]) {
                context.dates.insert(year);
            }
        }

        for caps in self.month_pattern.captures_iter(text) {
            if let Some(month) = month_number(&caps[1])
                && let Some(year) = self.plausible_year(&caps[2])
            {
                context.dates.insert(year);
                context.months.insert(YearMonth { year, month });
            }
        }
    }

    /// Whole word is an event keyword or one of its inflections
    fn is_event_word(&self, word: &str) -> bool {
        self.events.iter().any(|(_, pattern)| {
            pattern
                .find(word)
                .is_some_and(|m| m.start() == 0 && m.end() == word.len())
        })
    }

    fn breaks_location(&self, word: &str) -> bool {
        let lower = word.to_lowercase();
        self.stoplist.contains(&lower) || month_number(&lower).is_some() || self.is_event_word(word)
    }

    fn extract_locations(&self, text: &str, context: &mut Context) {
        for m in self.location_pattern.find_iter(text) {
            let sentence_start = is_sentence_start(&text[..m.start()]);

            // Split the capitalized sequence at words that cannot be part of a place name
            let mut runs: Vec<Vec<&str>> = vec![vec![]];
            for word in m.as_str().split_whitespace() {
                if self.breaks_location(word) {
                    runs.push(vec![]);
                } else if let Some(run) = runs.last_mut() {
                    run.push(word);
                }
            }

            let first_word = m.as_str().split_whitespace().next();
            for run in runs.into_iter().filter(|r| !r.is_empty()) {
                // A lone word opening a sentence may be capitalized only for that reason
                let opens_sentence = sentence_start && first_word == Some(run[0]);
                if opens_sentence && run.len() == 1 && !capitalized_mid_sentence(text, run[0]) {
                    continue;
                }

                let location = run.join(" ");
                if !context.has_location(&location) {
                    context.locations.insert(location);
                }
            }
        }
    }
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self::new(&Vocabulary::default())
    }
}

fn is_sentence_start(prefix: &str) -> bool {
    let trimmed = prefix.trim_end();
    trimmed.is_empty()
        || trimmed.ends_with(['.', '!', '?', '"'])
        || prefix[trimmed.len()..].contains('\n')
}

/// Whether `word` occurs with this exact casing somewhere other than a sentence start
fn capitalized_mid_sentence(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(start, _)| {
        let end = start + word.len();
        let bounded = text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric())
            && text[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());
        bounded && !is_sentence_start(&text[..start])
    })
}
