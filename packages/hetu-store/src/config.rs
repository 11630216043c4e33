//! Store configuration.

use std::path::PathBuf;

/// Configuration for the component store itself. Networking and system
/// executor configuration live in their own crates' config types; this one
/// only covers storage-layer knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Initial capacity hint (rows) used when pre-sizing new tables.
    pub initial_table_capacity: usize,
    /// Data directory for persistence.
    pub data_dir: PathBuf,
    /// How many flush ticks between persistence passes.
    pub persistence_interval_ticks: u32,
    /// Maximum retry attempts for transient I/O errors.
    pub persistence_max_retries: u32,
    /// Delay between retry attempts in milliseconds.
    pub persistence_retry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_table_capacity: 1024,
            data_dir: PathBuf::from("./data"),
            persistence_interval_ticks: 10,
            persistence_max_retries: 3,
            persistence_retry_delay_ms: 100,
        }
    }
}
