//! Verdict synthesis: claimed context versus discovered context
//!
//! Rules are evaluated in a fixed order and the first match wins. Contradictions
//! are checked before confirmations.

use std::fmt::Display;

use crate::model::{Context, Synthesis, Verdict};

/// Tokens listed in an explanation before the rest is summarized
const MAX_LISTED: usize = 5;

/// Compare a claim against discovered evidence
///
/// Pure: the same inputs always produce the same synthesis.
pub fn synthesize(claimed: &Context, discovered: &Context, evidence_count: usize) -> Synthesis {
    if evidence_count == 0 {
        return Synthesis::new(
            Verdict::Unverified,
            "No evidence about this image was found",
        );
    }

    if discovered.is_empty() {
        return Synthesis::new(
            Verdict::Unverified,
            format!(
                "{} evidence snippet(s) found, but none mention a date, location or event",
                evidence_count
            ),
        );
    }

    if let (Some(claimed_year), Some(discovered_year)) =
        (claimed.earliest_year(), discovered.earliest_year())
        && claimed.shared_dates(discovered).is_empty()
        && discovered_year < claimed_year
    {
        return Synthesis::new(
            Verdict::Recycled,
            format!(
                "Image predates the claim: claimed {} {} vs. discovered {} {}",
                noun("year", claimed.dates.len()),
                list(&claimed.dates),
                noun("year", discovered.dates.len()),
                list(&discovered.dates),
            ),
        );
    }

    if !claimed.locations.is_empty()
        && !discovered.locations.is_empty()
        && claimed.shared_locations(discovered).is_empty()
    {
        return Synthesis::new(
            Verdict::FalseLocation,
            format!(
                "Location mismatch: claimed {} {} vs. discovered {} {}",
                noun("location", claimed.locations.len()),
                list(&claimed.locations),
                noun("location", discovered.locations.len()),
                list(&discovered.locations),
            ),
        );
    }

    if !claimed.events.is_empty()
        && !discovered.events.is_empty()
        && claimed.shared_events(discovered).is_empty()
    {
        return Synthesis::new(
            Verdict::Misleading,
            format!(
                "Event mismatch: claimed {} {} vs. discovered {} {}",
                noun("event", claimed.events.len()),
                list(&claimed.events),
                noun("event", discovered.events.len()),
                list(&discovered.events),
            ),
        );
    }

    let dates = claimed.shared_dates(discovered);
    let locations = claimed.shared_locations(discovered);
    let events = claimed.shared_events(discovered);

    if !dates.is_empty() || !locations.is_empty() || !events.is_empty() {
        let mut matched = Vec::new();
        if !dates.is_empty() {
            matched.push(format!("{} {}", noun("year", dates.len()), list(&dates)));
        }
        if !locations.is_empty() {
            matched.push(format!("{} {}", noun("location", locations.len()), list(&locations)));
        }
        if !events.is_empty() {
            matched.push(format!("{} {}", noun("event", events.len()), list(&events)));
        }
        return Synthesis::new(
            Verdict::True,
            format!("Evidence agrees with the claim on {}", matched.join("; ")),
        );
    }

    if claimed.is_empty() {
        return Synthesis::new(
            Verdict::Unverified,
            "The claim mentions no date, location or event to check against the evidence",
        );
    }

    Synthesis::new(
        Verdict::Unverified,
        "Evidence neither confirms nor contradicts the claim",
    )
}

fn noun(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

fn list<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    let items: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    if items.len() <= MAX_LISTED {
        return items.join(", ");
    }
    format!(
        "{} and {} more",
        items[..MAX_LISTED].join(", "),
        items.len() - MAX_LISTED
    )
}
