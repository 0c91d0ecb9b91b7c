use chrono::{DateTime, TimeZone, Utc};

/// Source of the current time for migration ids and ledger timestamps.
///
/// Injected rather than read from the global clock so that id generation is
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Build a fixed clock from date and time components.
    ///
    /// Panics on out-of-range components; this is test scaffolding.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Self(
            Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
                .single()
                .expect("valid date and time components"),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_returns_pinned_instant() {
        let clock = FixedClock::at(2024, 3, 15, 9, 30, 0);
        assert_eq!(
            clock.now().format("%Y%m%d%H%M%S").to_string(),
            "20240315093000"
        );
        // stays pinned between calls
        assert_eq!(clock.now(), clock.now());
    }
}
