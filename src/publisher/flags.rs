use std::sync::atomic::{AtomicBool, Ordering};

/// Well-known keys in the platform key-value store. These two booleans are
/// the only state that survives process death.
pub const KEY_MANUAL_STOP: &str = "manual_stop";
pub const KEY_WAS_STREAMING: &str = "was_streaming";

/// The two persistent flags, backed by platform key-value storage supplied
/// by the embedding layer
pub trait FlagStore: Send + Sync {
    fn set_manual_stop(&self, value: bool);
    fn manual_stop(&self) -> bool;
    fn set_was_streaming(&self, value: bool);
    fn was_streaming(&self) -> bool;
}

/// In-process flag store for tests and hosts without persistent storage
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    manual_stop: AtomicBool,
    was_streaming: AtomicBool,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        MemoryFlagStore::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn set_manual_stop(&self, value: bool) {
        self.manual_stop.store(value, Ordering::SeqCst);
    }

    fn manual_stop(&self) -> bool {
        self.manual_stop.load(Ordering::SeqCst)
    }

    fn set_was_streaming(&self, value: bool) {
        self.was_streaming.store(value, Ordering::SeqCst);
    }

    fn was_streaming(&self) -> bool {
        self.was_streaming.load(Ordering::SeqCst)
    }
}

/// Whether a crash-recovery path should restart the stream after process
/// death: only when a stream was live and the user never stopped it
pub fn should_auto_restart(flags: &dyn FlagStore) -> bool {
    flags.was_streaming() && !flags.manual_stop()
}
