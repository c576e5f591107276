use super::interceptor::{ConnectionInterceptor, InjectedFault};
use crate::connection::Connection;
use crate::connection::config::{DatabaseConfig, RetrySettings};
use crate::core::{DbError, Result, Row};
use crate::storage::InMemoryStorage;
use crate::strategy::ExecutionStrategy;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Handle to an in-memory database.
///
/// Cloning is cheap; all clones share the same tables, counters and
/// interceptor. Work happens on [`Connection`]s obtained from [`open`].
///
/// [`open`]: Database::open
#[derive(Clone)]
pub struct Database {
    inner: Arc<Shared>,
}

struct Shared {
    name: String,
    storage: RwLock<InMemoryStorage>,
    counters: Counters,
    interceptor: Option<Arc<dyn ConnectionInterceptor>>,
    retry: RetrySettings,
    next_connection_id: AtomicU64,
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    executions: AtomicUsize,
    commits: AtomicUsize,
}

/// Snapshot of the database counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseStats {
    /// Connections opened, including opens that failed
    pub open_count: usize,
    /// Commands issued, including ones failed by an injected fault
    pub execution_count: usize,
    /// Commit attempts, including ones failed by an injected fault
    pub commit_count: usize,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Connections opened: {}", self.open_count)?;
        writeln!(f, "  Commands executed:  {}", self.execution_count)?;
        write!(f, "  Commits:            {}", self.commit_count)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Create a database from `config`, creating every declared table.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`new`](Self::new), with every connection routed through
    /// `interceptor`.
    pub fn with_interceptor(
        config: DatabaseConfig,
        interceptor: Arc<dyn ConnectionInterceptor>,
    ) -> Result<Self> {
        Self::build(config, Some(interceptor))
    }

    fn build(
        config: DatabaseConfig,
        interceptor: Option<Arc<dyn ConnectionInterceptor>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut storage = InMemoryStorage::new();
        for schema in &config.tables {
            storage.create_table(schema.clone())?;
        }

        info!(
            database = %config.database,
            tables = config.tables.len(),
            intercepted = interceptor.is_some(),
            "database created"
        );

        Ok(Self {
            inner: Arc::new(Shared {
                name: config.database,
                storage: RwLock::new(storage),
                counters: Counters::default(),
                interceptor,
                retry: config.retry,
                next_connection_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Open a fresh connection
    pub async fn open(&self) -> Result<Connection> {
        self.inner.counters.opens.fetch_add(1, Ordering::SeqCst);
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);

        if self.intercept(|i| i.on_open()).is_fault() {
            debug!(connection = id, "open failed");
            return Err(DbError::ConnectionFailure(format!(
                "Could not open connection {} to '{}'",
                id, self.inner.name
            )));
        }

        debug!(connection = id, "connection opened");
        Ok(Connection::new(id, self.clone()))
    }

    /// Execution strategy configured for this database
    pub fn execution_strategy(&self) -> ExecutionStrategy {
        self.inner.retry.strategy()
    }

    pub fn stats(&self) -> DatabaseStats {
        let counters = &self.inner.counters;
        DatabaseStats {
            open_count: counters.opens.load(Ordering::SeqCst),
            execution_count: counters.executions.load(Ordering::SeqCst),
            commit_count: counters.commits.load(Ordering::SeqCst),
        }
    }

    pub fn reset_stats(&self) {
        let counters = &self.inner.counters;
        counters.opens.store(0, Ordering::SeqCst);
        counters.executions.store(0, Ordering::SeqCst);
        counters.commits.store(0, Ordering::SeqCst);
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.inner.storage.read().await.table_names()
    }

    /// Committed rows of `table`, read outside of any connection.
    ///
    /// Does not touch the counters or the interceptor.
    pub async fn committed_rows(&self, table: &str) -> Result<Vec<Row>> {
        self.inner.storage.read().await.scan(table)
    }

    /// Committed row count of `table`, read outside of any connection.
    pub async fn committed_count(&self, table: &str) -> Result<usize> {
        self.inner.storage.read().await.count(table)
    }

    pub(crate) fn storage(&self) -> &RwLock<InMemoryStorage> {
        &self.inner.storage
    }

    pub(crate) fn record_execution(&self, command: &str) -> InjectedFault {
        self.inner.counters.executions.fetch_add(1, Ordering::SeqCst);
        self.intercept(|i| i.on_execute(command))
    }

    pub(crate) fn record_commit(&self) -> InjectedFault {
        self.inner.counters.commits.fetch_add(1, Ordering::SeqCst);
        self.intercept(|i| i.on_commit())
    }

    fn intercept(
        &self,
        hook: impl FnOnce(&dyn ConnectionInterceptor) -> InjectedFault,
    ) -> InjectedFault {
        match &self.inner.interceptor {
            Some(interceptor) => hook(interceptor.as_ref()),
            None => InjectedFault::None,
        }
    }
}
