//! Concurrent evidence gathering across all configured sources

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::{Instant, timeout, timeout_at};

use crate::model::{EvidenceQuery, EvidenceSnippet};
use crate::source::{EvidenceSource, SourceError, normalize_result};

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_RESULTS_PER_SOURCE: usize = 10;

/// Snippets from every source that answered, plus the names of those that did not
#[derive(Debug, Clone, Default)]
pub struct GatherOutcome {
    pub snippets: Vec<EvidenceSnippet>,
    pub unavailable: Vec<String>,
    pub sources_queried: usize,
}

impl GatherOutcome {
    /// True when sources were configured and none of them answered
    pub fn all_failed(&self) -> bool {
        self.sources_queried > 0 && self.unavailable.len() == self.sources_queried
    }
}

pub struct EvidenceGatherer {
    sources: Vec<Arc<dyn EvidenceSource>>,
    source_timeout: Duration,
    gather_timeout: Duration,
    max_results_per_source: usize,
}

impl EvidenceGatherer {
    pub fn new(sources: Vec<Arc<dyn EvidenceSource>>) -> Self {
        Self {
            sources,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
            max_results_per_source: DEFAULT_MAX_RESULTS_PER_SOURCE,
        }
    }

    pub fn with_timeouts(mut self, source_timeout: Duration, gather_timeout: Duration) -> Self {
        self.source_timeout = source_timeout;
        self.gather_timeout = gather_timeout;
        self
    }

    pub fn with_max_results(mut self, max_results_per_source: usize) -> Self {
        self.max_results_per_source = max_results_per_source;
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Query every source concurrently and collect normalized snippets
    ///
    /// Sources still running at the gathering deadline are dropped and reported
    /// as unavailable. Snippets are ordered by source position, then by rank.
    pub async fn gather(&self, query: &EvidenceQuery) -> GatherOutcome {
        if self.sources.is_empty() {
            tracing::debug!("No evidence sources configured");
            return GatherOutcome::default();
        }

        let started = Instant::now();
        let deadline = started + self.gather_timeout;

        let mut pending: FuturesUnordered<_> = self
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let source_timeout = self.source_timeout;
                async move {
                    let result = match timeout(source_timeout, source.query(query)).await {
                        Ok(result) => result,
                        Err(_) => Err(SourceError::Timeout(source_timeout)),
                    };
                    (index, result)
                }
            })
            .collect();

        let mut answers: Vec<Option<Result<_, SourceError>>> =
            (0..self.sources.len()).map(|_| None).collect();

        loop {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some((index, result))) => answers[index] = Some(result),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        outstanding = pending.len(),
                        "Evidence gathering deadline reached"
                    );
                    break;
                }
            }
        }
        // Cancel anything still running
        drop(pending);

        let mut outcome = GatherOutcome {
            sources_queried: self.sources.len(),
            ..Default::default()
        };

        for (source, answer) in self.sources.iter().zip(answers) {
            let name = source.name();
            let kind = source.source_type();
            match answer.unwrap_or(Err(SourceError::Abandoned)) {
                Ok(results) => {
                    let before = outcome.snippets.len();
                    outcome.snippets.extend(
                        results
                            .into_iter()
                            .filter_map(|raw| normalize_result(name, kind, raw))
                            .take(self.max_results_per_source),
                    );
                    tracing::debug!(
                        source = name,
                        kind = ?kind,
                        snippets = outcome.snippets.len() - before,
                        "Evidence source answered"
                    );
                }
                Err(e) => {
                    tracing::warn!(source = name, error = %e, "Evidence source unavailable");
                    outcome.unavailable.push(name.to_string());
                }
            }
        }

        tracing::info!(
            snippets = outcome.snippets.len(),
            unavailable = outcome.unavailable.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Evidence gathered"
        );

        outcome
    }
}
