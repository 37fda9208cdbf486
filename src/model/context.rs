use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub struct YearMonth {
    pub year: u16,
    pub month: u8,
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Dates, locations and events mentioned in a piece of text
///
/// `months` refines `dates`: every year in `months` is also in `dates`.
/// Locations are stored in their capitalized form and compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Context {
    pub dates: BTreeSet<u16>,
    pub months: BTreeSet<YearMonth>,
    pub locations: BTreeSet<String>,
    pub events: BTreeSet<String>,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() && self.locations.is_empty() && self.events.is_empty()
    }

    pub fn merge(&mut self, other: &Context) {
        self.dates.extend(other.dates.iter().copied());
        self.months.extend(other.months.iter().copied());
        for location in &other.locations {
            if !self.has_location(location) {
                self.locations.insert(location.clone());
            }
        }
        self.events.extend(other.events.iter().cloned());
    }

    /// Union of many contexts
    pub fn union<I>(contexts: I) -> Context
    where
        I: IntoIterator<Item = Context>,
    {
        contexts.into_iter().fold(Context::default(), |mut acc, ctx| {
            acc.merge(&ctx);
            acc
        })
    }

    pub fn has_location(&self, location: &str) -> bool {
        let needle = location.to_lowercase();
        self.locations.iter().any(|l| l.to_lowercase() == needle)
    }

    pub fn earliest_year(&self) -> Option<u16> {
        self.dates.first().copied()
    }

    pub fn shared_dates(&self, other: &Context) -> Vec<u16> {
        self.dates.intersection(&other.dates).copied().collect()
    }

    pub fn shared_locations(&self, other: &Context) -> Vec<String> {
        self.locations
            .iter()
            .filter(|l| other.has_location(l))
            .cloned()
            .collect()
    }

    pub fn shared_events(&self, other: &Context) -> Vec<String> {
        self.events.intersection(&other.events).cloned().collect()
    }
}
