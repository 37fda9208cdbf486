pub mod config;
pub mod context;
pub mod evidence;
pub mod fingerprint;
pub mod job;
pub mod verification;
pub mod vocabulary;

pub use config::{Config, PipelineConfig, ProviderKeys};
pub use context::{Context, YearMonth};
pub use evidence::{EvidenceQuery, EvidenceSnippet, RawResult, SourceType};
pub use fingerprint::{ContentDigest, Fingerprint, PerceptualHash};
pub use job::{CacheOutcome, Job, JobId, JobStatus};
pub use verification::{RecycledSource, Synthesis, Verdict, VerificationRecord};
pub use vocabulary::Vocabulary;
