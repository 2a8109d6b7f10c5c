use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime};

/// A Unix timestamp in milliseconds, used for session lifecycle bookkeeping.
///
/// Session records carry `created_at`, `updated_at`, and `expires_at` stamps, and the
/// cross-tab wire format orders messages by a millisecond timestamp. Milliseconds match
/// the resolution the synchronization protocol needs to discriminate between updates
/// produced by different tabs in quick succession.
///
/// Serialized as a plain integer in JSON; `1699999999000` stays `1699999999000`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixMillis(u64);

impl Serialize for UnixMillis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for UnixMillis {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(UnixMillis(ms))
    }
}

impl Display for UnixMillis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixMillis {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixMillis(self.0 + rhs)
    }
}

impl Add<Duration> for UnixMillis {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        UnixMillis(self.0 + rhs.as_millis() as u64)
    }
}

impl Sub<UnixMillis> for UnixMillis {
    type Output = u64;

    fn sub(self, rhs: UnixMillis) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl UnixMillis {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_millis() as u64;
        Self(now)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub_millis(self, ms: u64) -> UnixMillis {
        UnixMillis(self.0.saturating_sub(ms))
    }

    /// The later of the two stamps. Used to keep `updated_at` monotonically non-decreasing
    /// when reconciling updates that arrive out of order.
    pub fn max(self, other: UnixMillis) -> UnixMillis {
        if self.0 >= other.0 { self } else { other }
    }
}
