use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900-01-01) and the POSIX epoch (1970-01-01).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const FRACTION_SCALE: f64 = 4_294_967_296.0; // 2^32

/// OSC 64-bit fixed point timestamp: seconds since 1900 plus a 1/2^32 fraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeTag {
    seconds: u32,
    fraction: u32,
}

impl TimeTag {
    /// The special tag meaning "dispatch as soon as received".
    pub const IMMEDIATELY: TimeTag = TimeTag {
        seconds: 0,
        fraction: 1,
    };

    pub const fn new(seconds: u32, fraction: u32) -> Self {
        TimeTag { seconds, fraction }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn fraction(&self) -> u32 {
        self.fraction
    }

    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATELY
    }

    /// Builds a tag from seconds since the NTP epoch. Values outside the
    /// representable range saturate.
    pub fn from_secs_f64(secs: f64) -> Self {
        let secs = secs.max(0.0);
        let whole = secs.floor();
        let fraction = ((secs - whole) * FRACTION_SCALE) as u32;
        TimeTag {
            seconds: whole.min(u32::MAX as f64) as u32,
            fraction,
        }
    }

    /// Seconds since the NTP epoch.
    pub fn to_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / FRACTION_SCALE
    }

    /// Times before 1970 clamp to the POSIX epoch. Times past the end of NTP
    /// era 0 (2036-02-07) saturate to the last representable tag, so they
    /// stay in the future instead of wrapping around to 1900.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let Ok(seconds) = u32::try_from(since_unix.as_secs() + NTP_UNIX_OFFSET) else {
            return TimeTag::new(u32::MAX, u32::MAX);
        };
        let fraction = (since_unix.subsec_nanos() as f64 / 1e9 * FRACTION_SCALE) as u32;
        TimeTag { seconds, fraction }
    }

    /// Wall clock time for this tag. Tags before 1970 clamp to the POSIX epoch.
    pub fn to_system_time(&self) -> SystemTime {
        let secs = (self.seconds as u64).saturating_sub(NTP_UNIX_OFFSET);
        let nanos = if (self.seconds as u64) < NTP_UNIX_OFFSET {
            0
        } else {
            (self.fraction as f64 / FRACTION_SCALE * 1e9) as u32
        };
        UNIX_EPOCH + Duration::new(secs, nanos)
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// This tag shifted `delay` into the future.
    pub fn after(&self, delay: Duration) -> Self {
        Self::from_secs_f64(self.to_secs_f64() + delay.as_secs_f64())
    }
}

impl Default for TimeTag {
    fn default() -> Self {
        TimeTag::IMMEDIATELY
    }
}

impl From<SystemTime> for TimeTag {
    fn from(time: SystemTime) -> Self {
        TimeTag::from_system_time(time)
    }
}

impl From<(u32, u32)> for TimeTag {
    fn from((seconds, fraction): (u32, u32)) -> Self {
        TimeTag::new(seconds, fraction)
    }
}

impl From<TimeTag> for (u32, u32) {
    fn from(tag: TimeTag) -> Self {
        (tag.seconds, tag.fraction)
    }
}

impl fmt::Display for TimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_immediate() {
            write!(f, "immediately")
        } else {
            write!(f, "{:.6}", self.to_secs_f64())
        }
    }
}
