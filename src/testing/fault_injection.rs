use crate::connection::config::DatabaseConfig;
use crate::core::Result;
use crate::facade::{ConnectionInterceptor, Database, InjectedFault};
use crate::strategy::{ExecutionStrategy, RetryPolicy};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Backoff coefficient of [`TestDatabase::strategy_with_max_delay`]
pub const TEST_DELAY_COEFFICIENT: Duration = Duration::from_millis(10);

/// Interceptor replaying queued faults.
///
/// Each queue entry is consumed by one call: `Some(true)` fails the call
/// before it takes effect, `Some(false)` lets it take effect and then fails
/// it (a false failure), `None` lets it through. Once a queue is empty every
/// call passes.
#[derive(Debug, Default)]
pub struct FaultInjector {
    open_failures: Mutex<VecDeque<bool>>,
    execution_failures: Mutex<VecDeque<Option<bool>>>,
    commit_failures: Mutex<VecDeque<Option<bool>>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_failures(self, failures: impl IntoIterator<Item = Option<bool>>) -> Self {
        self.set_execution_failures(failures);
        self
    }

    pub fn with_commit_failures(self, failures: impl IntoIterator<Item = Option<bool>>) -> Self {
        self.set_commit_failures(failures);
        self
    }

    /// Queue opens that fail (`true`) or succeed (`false`)
    pub fn with_open_failures(self, failures: impl IntoIterator<Item = bool>) -> Self {
        *self.open_failures.lock() = failures.into_iter().collect();
        self
    }

    /// Replace the queued execution faults
    pub fn set_execution_failures(&self, failures: impl IntoIterator<Item = Option<bool>>) {
        *self.execution_failures.lock() = failures.into_iter().collect();
    }

    /// Replace the queued commit faults
    pub fn set_commit_failures(&self, failures: impl IntoIterator<Item = Option<bool>>) {
        *self.commit_failures.lock() = failures.into_iter().collect();
    }

    pub fn pending_execution_failures(&self) -> usize {
        self.execution_failures.lock().len()
    }

    pub fn pending_commit_failures(&self) -> usize {
        self.commit_failures.lock().len()
    }

    pub fn clear(&self) {
        self.open_failures.lock().clear();
        self.execution_failures.lock().clear();
        self.commit_failures.lock().clear();
    }
}

fn next_fault(queue: &Mutex<VecDeque<Option<bool>>>) -> InjectedFault {
    InjectedFault::from_flag(queue.lock().pop_front().flatten())
}

impl ConnectionInterceptor for FaultInjector {
    fn on_open(&self) -> InjectedFault {
        match self.open_failures.lock().pop_front() {
            Some(true) => {
                debug!("injecting open failure");
                InjectedFault::Before
            }
            _ => InjectedFault::None,
        }
    }

    fn on_execute(&self, command: &str) -> InjectedFault {
        let fault = next_fault(&self.execution_failures);
        if fault.is_fault() {
            debug!(command, ?fault, "injecting execution failure");
        }
        fault
    }

    fn on_commit(&self) -> InjectedFault {
        let fault = next_fault(&self.commit_failures);
        if fault.is_fault() {
            debug!(?fault, "injecting commit failure");
        }
        fault
    }
}

/// Database wired to a [`FaultInjector`].
///
/// Each test builds its own instance; nothing is shared between tests.
#[derive(Debug, Clone)]
pub struct TestDatabase {
    db: Database,
    injector: Arc<FaultInjector>,
}

impl TestDatabase {
    /// Create a database from `config` with `injector` installed.
    pub fn setup(config: DatabaseConfig, injector: Arc<FaultInjector>) -> Result<Self> {
        let db = Database::with_interceptor(config, injector.clone())?;
        Ok(Self { db, injector })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn injector(&self) -> &FaultInjector {
        &self.injector
    }

    /// Retrying strategy with a 10 ms backoff coefficient; `max_delay` is
    /// the per-retry delay ceiling and therefore the retry budget.
    pub fn strategy_with_max_delay(max_delay: Duration) -> ExecutionStrategy {
        ExecutionStrategy::retrying(
            RetryPolicy::new(usize::MAX, max_delay)
                .with_delay_coefficient(TEST_DELAY_COEFFICIENT),
        )
    }
}
