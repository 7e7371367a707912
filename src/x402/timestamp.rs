//! Seconds-since-epoch timestamps carried inside payment claims

use std::fmt::{self, Display, Formatter};
use std::ops::Add;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        Ok(UnixTimestamp(now.as_secs()))
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }

    /// Seconds from `self` to `later`, zero if `later` is earlier
    pub fn seconds_until(&self, later: UnixTimestamp) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = UnixTimestamp;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0.saturating_add(rhs))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_saturates() {
        assert_eq!(UnixTimestamp(u64::MAX) + 5, UnixTimestamp(u64::MAX));
        assert_eq!(UnixTimestamp(10) + 5, UnixTimestamp(15));
    }

    #[test]
    fn test_serializes_as_number() {
        assert_eq!(serde_json::to_string(&UnixTimestamp(42)).unwrap(), "42");
        assert_eq!(UnixTimestamp(10).seconds_until(UnixTimestamp(4)), 0);
    }
}
