use crate::core::DbError;
use std::collections::HashSet;

/// How the execution strategy should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The command never took effect; rerun the operation.
    TransientExecution,
    /// The commit may or may not have taken effect; verify before rerunning.
    TransientCommit,
    /// Retrying cannot help; surface the error unchanged.
    Permanent,
}

impl FaultKind {
    pub fn is_transient(&self) -> bool {
        !matches!(self, FaultKind::Permanent)
    }
}

/// Boundary with the transport/driver layer.
pub trait TransientErrorDetector: Send + Sync {
    fn classify(&self, error: &DbError) -> FaultKind;
}

/// Server error numbers that are worth retrying.
pub const TRANSIENT_SERVER_ERRORS: &[i32] = &[
    // Timeout expired
    -2,
    // Transport-level errors while sending or receiving
    20, 64, 233, 10053, 10054, 10060,
    // Deadlock victim
    1205,
    // Cannot open database requested by the login
    4060,
    // Resource limits reached
    10928, 10929,
    // Service busy / database unavailable / failover in progress
    40197, 40501, 40613, 49918, 49919, 49920,
];

/// Classifies transport faults as transient and everything else as
/// permanent. Extra server error numbers can be registered as transient.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransientErrorDetector {
    additional_error_codes: HashSet<i32>,
}

impl DefaultTransientErrorDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_additional_error_codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            additional_error_codes: codes.into_iter().collect(),
        }
    }

    fn is_transient_code(&self, code: i32) -> bool {
        TRANSIENT_SERVER_ERRORS.contains(&code) || self.additional_error_codes.contains(&code)
    }
}

impl TransientErrorDetector for DefaultTransientErrorDetector {
    fn classify(&self, error: &DbError) -> FaultKind {
        match error {
            DbError::ConnectionFailure(_) | DbError::Timeout(_) => FaultKind::TransientExecution,
            DbError::CommitOutcomeUnknown(_) => FaultKind::TransientCommit,
            DbError::Server { code, .. } if self.is_transient_code(*code) => {
                FaultKind::TransientExecution
            }
            _ => FaultKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_faults_are_transient() {
        let detector = DefaultTransientErrorDetector::new();
        assert_eq!(
            detector.classify(&DbError::ConnectionFailure("reset".into())),
            FaultKind::TransientExecution
        );
        assert_eq!(
            detector.classify(&DbError::Timeout("30s".into())),
            FaultKind::TransientExecution
        );
        assert_eq!(
            detector.classify(&DbError::CommitOutcomeUnknown("lost ack".into())),
            FaultKind::TransientCommit
        );
    }

    #[test]
    fn test_data_errors_are_permanent() {
        let detector = DefaultTransientErrorDetector::new();
        for err in [
            DbError::ConstraintViolation("duplicate key".into()),
            DbError::TableNotFound("blogs".into()),
            DbError::Cancelled,
            DbError::RetryLimitExceeded {
                attempts: 1,
                source: Box::new(DbError::Timeout("x".into())),
            },
        ] {
            assert_eq!(detector.classify(&err), FaultKind::Permanent, "{}", err);
        }
    }

    #[test]
    fn test_server_error_codes() {
        let deadlock = DbError::Server {
            code: 1205,
            message: "deadlock".into(),
        };
        let custom = DbError::Server {
            code: 50001,
            message: "custom".into(),
        };

        let detector = DefaultTransientErrorDetector::new();
        assert!(detector.classify(&deadlock).is_transient());
        assert!(!detector.classify(&custom).is_transient());

        let detector = DefaultTransientErrorDetector::with_additional_error_codes([50001]);
        assert_eq!(detector.classify(&custom), FaultKind::TransientExecution);
    }
}
