/// Backend journal mode. Values map 1:1 to the engine's `journal_mode`
/// pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Write-ahead journal (recommended); readers proceed during writes.
    #[default]
    Wal,
    /// Rollback journal (legacy).
    Delete,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }
}

/// Backend sync mode. Values map 1:1 to the engine's `synchronous`
/// pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Synchronous {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl Synchronous {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Normal => "normal",
        }
    }
}

/// Runtime configuration for a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a session waits on a locked backend before reporting
    /// contention, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Upper bound on reader sessions; the writer session is not counted.
    pub max_readers: usize,
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            max_readers: 10,
            journal_mode: JournalMode::default(),
            synchronous: Synchronous::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{JournalMode, StoreConfig, Synchronous};

    #[test]
    fn pragma_values_are_stable() {
        assert_eq!(JournalMode::Wal.pragma_value(), "wal");
        assert_eq!(JournalMode::Delete.pragma_value(), "delete");
        assert_eq!(Synchronous::Full.pragma_value(), "full");
        assert_eq!(Synchronous::Normal.pragma_value(), "normal");
    }

    #[test]
    fn defaults_bound_the_reader_pool() {
        let config = StoreConfig::default();
        assert!(config.max_readers > 0);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }
}
