pub mod completion;
pub mod id;
pub mod record;
pub mod status;

pub use completion::{CompletionSignal, JobCompletion, JobOutcome};
pub use id::{ExecutionId, JobId};
pub use record::{JobExecutionRecord, JobRecord, JobResult, JobSummary};
pub use status::{JobStatus, ProcessingGuarantee, TerminationAction, TerminationMode};
