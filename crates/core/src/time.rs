use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A last-modified instant reported for a database file, in milliseconds
/// since the Unix epoch.
///
/// Used as an optimistic-concurrency token: two values are only considered
/// the same version when they are exactly equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModifiedAt(i64);

impl ModifiedAt {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn from_system_time(time: SystemTime) -> Result<Self, CoreError> {
        let ms = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_millis()),
            Err(e) => i64::try_from(e.duration().as_millis()).map(|ms| -ms),
        };
        ms.map(Self)
            .map_err(|_| CoreError::InvalidData("modification time out of range".into()))
    }

    pub fn to_system_time(&self) -> SystemTime {
        let magnitude = Duration::from_millis(self.0.unsigned_abs());
        if self.0 >= 0 {
            UNIX_EPOCH + magnitude
        } else {
            UNIX_EPOCH - magnitude
        }
    }
}

impl fmt::Debug for ModifiedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModifiedAt({})", self.0)
    }
}

impl fmt::Display for ModifiedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_conversion_keeps_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let m = ModifiedAt::from_system_time(t).unwrap();
        assert_eq!(m.as_millis(), 1_700_000_000_123);
        assert_eq!(m.to_system_time(), t);
    }

    #[test]
    fn sub_millisecond_differences_collapse() {
        let base = UNIX_EPOCH + Duration::from_millis(42);
        let a = ModifiedAt::from_system_time(base).unwrap();
        let b = ModifiedAt::from_system_time(base + Duration::from_micros(300)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn before_epoch_is_negative() {
        let t = UNIX_EPOCH - Duration::from_millis(5);
        let m = ModifiedAt::from_system_time(t).unwrap();
        assert_eq!(m.as_millis(), -5);
        assert_eq!(m.to_system_time(), t);
    }
}
