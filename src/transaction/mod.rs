// ============================================================================
// Transaction Module
// ============================================================================
//
// Buffered transactions: writes are recorded as Changes while the
// transaction is active and applied to storage all-or-nothing on commit.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};
