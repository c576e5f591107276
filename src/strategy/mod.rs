mod blocking;
pub mod cancel;
pub mod detector;
pub mod execution;
pub mod policy;
mod transaction;

pub use cancel::CancellationToken;
pub use detector::{
    DefaultTransientErrorDetector, FaultKind, TRANSIENT_SERVER_ERRORS, TransientErrorDetector,
};
pub use execution::{ExecutionResult, ExecutionStrategy};
pub use policy::RetryPolicy;
