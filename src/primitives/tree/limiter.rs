use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Throttles checkpoint I/O.
///
/// The tree reports every chunk it writes; implementations may block the checkpointing
/// thread to keep the write rate below a budget.
pub trait IoLimiter: Send + Sync {
    /// Called after `bytes` more bytes were written by a checkpoint.
    fn maybe_limit(&self, bytes: u64);
}

/// Limiter that never blocks.
#[derive(Default, Debug, Clone, Copy)]
pub struct Unlimited;

impl IoLimiter for Unlimited {
    fn maybe_limit(&self, _bytes: u64) {}
}

/// Limiter capping throughput at a fixed number of bytes per second.
pub struct RateLimiter {
    bytes_per_sec: u64,
    window: Mutex<Window>,
}

struct Window {
    started: Instant,
    bytes: u64,
}

impl RateLimiter {
    /// Creates a limiter allowing `bytes_per_sec` bytes per second. Zero disables limiting.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            window: Mutex::new(Window {
                started: Instant::now(),
                bytes: 0,
            }),
        }
    }
}

impl IoLimiter for RateLimiter {
    fn maybe_limit(&self, bytes: u64) {
        if self.bytes_per_sec == 0 {
            return;
        }
        let pause = {
            let mut window = self.window.lock();
            window.bytes = window.bytes.saturating_add(bytes);
            let allowed = Duration::from_secs_f64(window.bytes as f64 / self.bytes_per_sec as f64);
            let elapsed = window.started.elapsed();
            if elapsed >= Duration::from_secs(1) && allowed <= elapsed {
                window.started = Instant::now();
                window.bytes = 0;
            }
            allowed.checked_sub(elapsed)
        };
        if let Some(pause) = pause {
            std::thread::sleep(pause);
        }
    }
}
