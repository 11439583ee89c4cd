use tracing::debug;

use super::state::PlaybackStateMachine;

/// Where a decoded buffer ended up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Playback is not accepting audio.
    Dropped,
    /// Queued at `start_at`. `established` is set when this buffer opened a
    /// fresh timeline, which is when the promotion timer must be armed.
    Scheduled { start_at: f64, established: bool },
    /// The timeline ran dry; the buffer was discarded and playback is
    /// re-buffering.
    Underrun,
}

/// Keeps a gapless timeline of buffers ahead of the audio clock.
#[derive(Debug)]
pub struct ChunkScheduler {
    /// `0.0` means no timeline is established.
    next_start_time: f64,
    buffer_time: f64,
    underruns: u64,
}

impl ChunkScheduler {
    pub fn new(buffer_time: f64) -> Self {
        Self {
            next_start_time: 0.0,
            buffer_time,
            underruns: 0,
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn reset(&mut self) {
        self.next_start_time = 0.0;
    }

    pub fn place(
        &mut self,
        duration: f64,
        now: f64,
        machine: &mut PlaybackStateMachine,
    ) -> Placement {
        if !machine.state().accepts_audio() {
            return Placement::Dropped;
        }

        let mut established = false;
        if self.next_start_time == 0.0 {
            self.next_start_time = now + self.buffer_time;
            established = true;
        } else if self.next_start_time < now {
            debug!(
                "Underrun: timeline ended {:.3}s ago, re-buffering",
                now - self.next_start_time
            );
            self.next_start_time = 0.0;
            self.underruns += 1;
            machine.rebuffer();
            return Placement::Underrun;
        }

        let start_at = self.next_start_time;
        self.next_start_time += duration;
        Placement::Scheduled {
            start_at,
            established,
        }
    }
}
