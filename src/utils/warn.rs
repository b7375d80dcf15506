use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use xxhash_rust::xxh3::xxh3_64;

/// Rate limiter for non-fatal diagnostics.
///
/// Each distinct message is logged once; repeats are dropped after hashing
/// the text, so a stale binding call issued every frame does not flood the log.
#[derive(Default)]
pub struct WarnOnce {
    seen: Mutex<FxHashSet<u64>>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `message` at warn level unless it was already reported.
    /// Returns `true` when the message was emitted.
    pub fn warn(&self, message: &str) -> bool {
        let key = xxh3_64(message.as_bytes());
        if !self.seen.lock().insert(key) {
            return false;
        }
        log::warn!("{message}");
        true
    }

    pub fn reported(&self) -> usize {
        self.seen.lock().len()
    }
}
