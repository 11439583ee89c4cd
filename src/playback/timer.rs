use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A single-slot deferred action.
///
/// Arming spawns a sleep that posts a message back to the owner when it
/// elapses. Re-arming or cancelling invalidates the previous timer, and a
/// message carrying a stale id is rejected by [`TimerSlot::fire`].
#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    next_id: u64,
    armed: Option<(u64, CancellationToken)>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: 0,
            armed: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn arm<T, F>(&mut self, delay: Duration, tx: &flume::Sender<T>, make: F) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T,
    {
        self.cancel();
        self.next_id += 1;
        let id = self.next_id;
        let token = CancellationToken::new();
        let msg = make(id);

        let child = token.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(msg);
                }
            }
        });

        trace!("Armed {} timer #{} for {:?}", self.name, id, delay);
        self.armed = Some((id, token));
        id
    }

    /// Disarm. Returns whether a timer was pending.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((id, token)) => {
                token.cancel();
                trace!("Cancelled {} timer #{}", self.name, id);
                true
            }
            None => false,
        }
    }

    /// Accept a fire message. Only the currently armed id is honoured.
    pub fn fire(&mut self, id: u64) -> bool {
        match &self.armed {
            Some((current, _)) if *current == id => {
                self.armed = None;
                true
            }
            _ => {
                trace!("Ignoring stale {} timer #{}", self.name, id);
                false
            }
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
