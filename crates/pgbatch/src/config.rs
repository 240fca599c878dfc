//! Logging and diagnostics settings for a [`BatchInterface`](crate::BatchInterface).

use tracing::Level;

/// Configuration for how batch statements are logged and reported.
///
/// Every executed batch emits one `tracing` event on target `pgbatch.sql`.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Tracing event level for executed statements.
    pub log_level: Level,
    /// Truncate logged SQL (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
    /// Attach the rendered SQL to execution errors.
    pub sql_in_errors: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            log_level: Level::DEBUG,
            max_sql_length: Some(200),
            sql_in_errors: true,
        }
    }
}

impl BatchConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tracing event level.
    pub fn log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    /// Set maximum SQL length to log.
    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation in logs.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    /// Whether execution errors carry the rendered SQL.
    pub fn sql_in_errors(mut self, enabled: bool) -> Self {
        self.sql_in_errors = enabled;
        self
    }

    pub(crate) fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
