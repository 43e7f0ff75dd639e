//! Time source.
//!
//! Code crash if there is a physical inconsistency (unrecoverable state).

/// Port for getting the current time.
pub trait Clock: Send + Sync {
    /// Get the current Unix timestamp in seconds.
    fn now(&self) -> u64;
}

/// System clock using the OS time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_secs()
    }
}

/// Clock moved by hand, shared between the engine and a test.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
    timestamp: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp: std::sync::atomic::AtomicU64::new(timestamp),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.timestamp
            .fetch_add(seconds, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.timestamp.load(std::sync::atomic::Ordering::SeqCst)
    }
}
