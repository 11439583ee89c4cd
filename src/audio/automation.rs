//! Time-based parameter automation.
//!
//! Each `AudioParam` owns a single ramp slot. Any new ramp or snap first
//! cancels whatever has not been reached yet, so a node never carries two
//! overlapping automation curves.

/// A linear change from `from` to `to` beginning at `start_time` (seconds on
/// the audio clock).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub from: f32,
    pub to: f32,
    pub start_time: f64,
    pub duration: f64,
}

impl Ramp {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn value_at(&self, time: f64) -> f32 {
        if self.duration <= 0.0 || time >= self.end_time() {
            return self.to;
        }
        if time <= self.start_time {
            return self.from;
        }
        let t = ((time - self.start_time) / self.duration) as f32;
        self.from + (self.to - self.from) * t
    }
}

/// An automatable scalar (gain or shelf dB) on a render-graph node.
#[derive(Debug, Clone)]
pub struct AudioParam {
    name: &'static str,
    /// Value before the ramp starts, or the held value when no ramp exists.
    value: f32,
    ramp: Option<Ramp>,
    min: f32,
    max: f32,
}

impl AudioParam {
    pub fn new(name: &'static str, value: f32, min: f32, max: f32) -> Self {
        Self {
            name,
            value: value.clamp(min, max),
            ramp: None,
            min,
            max,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value_at(&self, time: f64) -> f32 {
        match &self.ramp {
            Some(ramp) if time >= ramp.start_time => ramp.value_at(time),
            _ => self.value,
        }
    }

    /// Where the parameter ends up once automation completes.
    pub fn target(&self) -> f32 {
        self.ramp.map_or(self.value, |r| r.to)
    }

    /// The ramp still in flight at `now`, if any.
    pub fn pending_ramp(&self, now: f64) -> Option<Ramp> {
        self.ramp.filter(|r| r.end_time() > now)
    }

    /// Cancel pending automation and hold `value` from now on.
    pub fn set_value(&mut self, value: f32) -> Option<Ramp> {
        let cancelled = self.ramp.take();
        self.value = value.clamp(self.min, self.max);
        cancelled
    }

    /// Cancel pending automation and ramp linearly from the value at `now` to
    /// `target` over `duration` seconds. Returns the ramp that was cut short.
    pub fn ramp_to(&mut self, target: f32, now: f64, duration: f64) -> Option<Ramp> {
        let from = self.value_at(now);
        let cancelled = self.ramp.take().filter(|r| r.end_time() > now);
        let target = target.clamp(self.min, self.max);

        if duration <= 0.0 {
            self.value = target;
            return cancelled;
        }

        self.value = from;
        self.ramp = Some(Ramp {
            from,
            to: target,
            start_time: now,
            duration,
        });
        cancelled
    }

    /// Snap to `from` at `now`, then ramp to `to`.
    pub fn ramp_between(&mut self, from: f32, to: f32, now: f64, duration: f64) -> Option<Ramp> {
        let cancelled = self.set_value(from).filter(|r| r.end_time() > now);
        self.ramp_to(to, now, duration);
        cancelled
    }
}
