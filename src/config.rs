use crate::error::TableHubError;
use std::time::Duration;

/// Runtime configuration for a table engine and its notification hubs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Parameter ceiling for one import batch. The batch row count is
    /// `import_max_params / (columns + 1)`.
    pub import_max_params: usize,
    /// Hard per-statement bind parameter limit of the storage layer.
    pub max_bind_params: usize,
    /// Upper bound on waiting for a per-table lock. Zero waits forever.
    pub table_lock_timeout_ms: u64,
    /// Deadline applied to every storage statement. Zero disables it.
    pub statement_timeout_ms: u64,
    /// Capacity of the hub's broadcast intent queue.
    pub hub_queue_capacity: usize,
    /// Capacity of each subscriber's outbound queue.
    pub subscriber_queue_capacity: usize,
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            import_max_params: 60_000,
            max_bind_params: 65_535,
            table_lock_timeout_ms: 30_000,
            statement_timeout_ms: 10_000,
            hub_queue_capacity: 1_024,
            subscriber_queue_capacity: 256,
            max_page_size: 1_000,
        }
    }
}

impl EngineConfig {
    /// Short deadlines and small queues so stalls and drops surface quickly.
    pub fn development() -> Self {
        Self {
            table_lock_timeout_ms: 2_000,
            statement_timeout_ms: 2_000,
            hub_queue_capacity: 64,
            subscriber_queue_capacity: 16,
            ..Self::default()
        }
    }

    pub fn with_import_max_params(mut self, import_max_params: usize) -> Self {
        self.import_max_params = import_max_params;
        self
    }

    pub fn with_table_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.table_lock_timeout_ms = timeout_ms;
        self
    }

    pub fn with_hub_queue_capacity(mut self, capacity: usize) -> Self {
        self.hub_queue_capacity = capacity;
        self
    }

    pub fn with_subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    pub fn table_lock_timeout(&self) -> Option<Duration> {
        (self.table_lock_timeout_ms > 0).then(|| Duration::from_millis(self.table_lock_timeout_ms))
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0).then(|| Duration::from_millis(self.statement_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), TableHubError> {
        if self.import_max_params == 0 {
            return Err(invalid("import_max_params must be > 0"));
        }
        if self.import_max_params > self.max_bind_params {
            return Err(invalid(format!(
                "import_max_params ({}) exceeds max_bind_params ({})",
                self.import_max_params, self.max_bind_params
            )));
        }
        if self.hub_queue_capacity == 0 {
            return Err(invalid("hub_queue_capacity must be > 0"));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(invalid("subscriber_queue_capacity must be > 0"));
        }
        if self.max_page_size == 0 {
            return Err(invalid("max_page_size must be > 0"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> TableHubError {
    TableHubError::InvalidConfig {
        message: message.into(),
    }
}
