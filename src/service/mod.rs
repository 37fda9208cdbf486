pub mod cache;
pub mod context;
pub mod evidence;
pub mod fingerprint;
pub mod jobs;
pub mod store;
pub mod verdict;
pub mod verification;

pub use cache::{CacheStats, ResultCache};
pub use context::ContextExtractor;
pub use evidence::EvidenceGatherer;
pub use jobs::JobRegistry;
pub use store::{RecordStore, RedisRecordStore};
pub use verification::{VerificationError, VerificationService};
