//! Stall watchdog for blocking frame operations
//!
//! Each monitored operation stores its start time in an atomic; a monitor thread scans
//! them periodically and warns once per operation that has been blocked too long.

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Default time an operation may block before it is reported
pub const STALL_THRESHOLD: Duration = Duration::from_secs(5);

/// Timestamp in milliseconds since UNIX_EPOCH
#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

struct OperationState {
    /// Start of the current operation (ms since epoch), 0 if idle
    last_op_start: AtomicU64,
    has_warned: AtomicBool,
    stalls: AtomicU64,
    owner: String,
    operation: String,
}

/// Handle to one monitored operation
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<OperationState>,
}

impl WatchdogHandle {
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.last_op_start.store(now_millis(), Ordering::Relaxed);
        self.state.has_warned.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed) {
            info!(
                "UNBLOCKED: [{}] {}",
                self.state.owner, self.state.operation
            );
        }
        self.state.last_op_start.store(0, Ordering::Relaxed);
    }

    /// Number of times this operation was reported as stalled
    pub fn stalls(&self) -> u64 {
        self.state.stalls.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct Watchdog {
    operations: Arc<Mutex<Vec<Weak<OperationState>>>>,
    threshold: Duration,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::with_threshold(STALL_THRESHOLD)
    }

    pub fn with_threshold(threshold: Duration) -> Self {
        Self {
            operations: Arc::new(Mutex::new(Vec::new())),
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn register(&self, owner: &str, operation: &str) -> WatchdogHandle {
        let state = Arc::new(OperationState {
            last_op_start: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            stalls: AtomicU64::new(0),
            owner: owner.to_string(),
            operation: operation.to_string(),
        });

        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&state));

        WatchdogHandle { state }
    }

    /// Warn about operations blocked longer than the threshold
    pub fn check_for_blocked(&self) {
        let now = now_millis();
        let threshold_ms = self.threshold.as_millis() as u64;

        let mut operations = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        operations.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };

            let start = state.last_op_start.load(Ordering::Relaxed);
            if start > 0 {
                let duration_ms = now.saturating_sub(start);
                if duration_ms > threshold_ms && !state.has_warned.swap(true, Ordering::Relaxed) {
                    state.stalls.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "BLOCKED: [{}] {} for {:.1}s",
                        state.owner,
                        state.operation,
                        duration_ms as f64 / 1000.0
                    );
                }
            }
            true
        });
    }

    /// Start the monitor thread. It runs until the returned guard is stopped or dropped.
    pub fn start_monitoring_thread(&self) -> std::io::Result<WatchdogThread> {
        let watchdog = self.clone();
        let interval = (self.threshold / 5).clamp(Duration::from_millis(10), Duration::from_secs(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("thermapp-watchdog".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => watchdog.check_for_blocked(),
                        _ => break,
                    }
                }
            })?;

        Ok(WatchdogThread {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// Running monitor thread
pub struct WatchdogThread {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WatchdogThread {
    pub fn stop(&mut self) {
        // Dropping the sender wakes the monitor
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchdogThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// RAII guard marking an operation as in progress
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_stall_once() {
        let watchdog = Watchdog::with_threshold(Duration::from_millis(20));
        let handle = watchdog.register("test", "read_frame");

        {
            let _guard = OperationGuard::new(&handle);
            thread::sleep(Duration::from_millis(40));
            watchdog.check_for_blocked();
            watchdog.check_for_blocked();
        }
        assert_eq!(handle.stalls(), 1);

        // Idle operations are never reported
        thread::sleep(Duration::from_millis(40));
        watchdog.check_for_blocked();
        assert_eq!(handle.stalls(), 1);
    }

    #[test]
    fn test_dropped_handles_are_forgotten() {
        let watchdog = Watchdog::new();
        drop(watchdog.register("test", "op"));
        watchdog.check_for_blocked();
        assert!(watchdog.operations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_monitor_thread_stops_promptly() {
        let watchdog = Watchdog::with_threshold(Duration::from_secs(5));
        let mut monitor = watchdog.start_monitoring_thread().unwrap();
        let start = std::time::Instant::now();
        monitor.stop();
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
