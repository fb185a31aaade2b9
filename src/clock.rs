use std::time::Instant;

/// A monotonic clock shared by the control and render domains.
///
/// All cross-domain messages carry absolute timestamps in seconds since the
/// engine started, so both sides must measure time from the same origin.
/// Reading the clock is a plain `clock_gettime` and is safe from the
/// real-time callback.
#[derive(Copy, Clone)]
pub struct EngineClock {
    origin: Instant,
}

impl EngineClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since the engine started.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let clock = EngineClock::start();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a >= 0.0);
    }
}
