use tokio::time::Instant;

/// Monotonic audio time in seconds, shared by the scheduler and the render side.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds elapsed since the clock was created.
///
/// Built on `tokio::time::Instant` so paused-time tests drive it exactly.
#[derive(Debug, Clone, Copy)]
pub struct InstantClock {
    origin: Instant,
}

impl InstantClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for InstantClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
