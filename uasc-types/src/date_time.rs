//! The OPC UA `DateTime`: a signed 64-bit count of 100 nanosecond ticks since
//! 1601-01-01 00:00:00 UTC.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use chrono::{TimeZone, Timelike, Utc};

use crate::encoding::{
    read_i64, write_i64, BinaryDecodable, BinaryEncodable, DecodingOptions, EncodingResult, Error,
};

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;

/// Offset in seconds between the windows epoch (1601-01-01) and the unix
/// epoch (1970-01-01).
const EPOCH_DELTA_SECONDS: i64 = 11_644_473_600;

/// Maximum tick count, corresponding to 9999-12-31 23:59:59 UTC. Values at or
/// beyond this decode and display as "end of time".
const MAX_TICKS: i64 = 2_650_467_743_990_000_000;

/// An OPC UA date/time value. Internally a tick count so round trips through
/// the wire format are lossless; conversions to and from calendar time clamp
/// to the representable window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DateTime {
    ticks: i64,
}

impl DateTime {
    /// The zero date time, encoded as 0 ticks. OPC UA treats this as "no
    /// value supplied".
    pub fn null() -> DateTime {
        DateTime { ticks: 0 }
    }

    /// The current wall-clock time.
    pub fn now() -> DateTime {
        Self::from(Utc::now())
    }

    /// Construct from a raw tick count.
    pub fn from_ticks(ticks: i64) -> DateTime {
        DateTime {
            ticks: ticks.clamp(0, MAX_TICKS),
        }
    }

    /// The raw tick count.
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// `true` when this is the null date time.
    pub fn is_null(&self) -> bool {
        self.ticks == 0
    }

    /// Construct from seconds since the unix epoch. Out of range values clamp
    /// to the representable window.
    pub fn from_unix_seconds(secs: i64) -> DateTime {
        let windows_secs = secs.saturating_add(EPOCH_DELTA_SECONDS);
        DateTime::from_ticks(windows_secs.saturating_mul(TICKS_PER_SECOND))
    }

    /// Seconds since the unix epoch. Negative for dates before 1970.
    pub fn as_unix_seconds(&self) -> i64 {
        self.ticks / TICKS_PER_SECOND - EPOCH_DELTA_SECONDS
    }

    /// Convert to a chrono UTC timestamp.
    pub fn as_chrono(&self) -> chrono::DateTime<Utc> {
        let secs = self.ticks / TICKS_PER_SECOND - EPOCH_DELTA_SECONDS;
        let nanos = (self.ticks % TICKS_PER_SECOND) * NANOS_PER_TICK;
        Utc.timestamp_opt(secs, nanos as u32).unwrap()
    }

    /// Elapsed duration from `other` to `self`.
    pub fn signed_duration_since(&self, other: &DateTime) -> chrono::Duration {
        chrono::Duration::microseconds((self.ticks - other.ticks) / 10)
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        // Truncate to tick precision, clamping out of range values
        let secs = value.timestamp().saturating_add(EPOCH_DELTA_SECONDS);
        let Some(ticks) = secs.checked_mul(TICKS_PER_SECOND) else {
            return DateTime::from_ticks(if secs < 0 { 0 } else { MAX_TICKS });
        };
        let subsecond = (value.nanosecond() as i64).min(999_999_999) / NANOS_PER_TICK;
        DateTime::from_ticks(ticks.saturating_add(subsecond))
    }
}

impl From<DateTime> for chrono::DateTime<Utc> {
    fn from(value: DateTime) -> Self {
        value.as_chrono()
    }
}

impl std::ops::Add<chrono::Duration> for DateTime {
    type Output = DateTime;

    fn add(self, rhs: chrono::Duration) -> Self::Output {
        DateTime::from_ticks(
            self.ticks
                .saturating_add(rhs.num_microseconds().unwrap_or(i64::MAX / 10) * 10),
        )
    }
}

impl std::ops::Sub<DateTime> for DateTime {
    type Output = chrono::Duration;

    fn sub(self, rhs: DateTime) -> Self::Output {
        self.signed_duration_since(&rhs)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_chrono().to_rfc3339())
    }
}

impl FromStr for DateTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|d| Self::from(d.with_timezone(&Utc)))
            .map_err(|e| Error::decoding(format!("Cannot parse date time {s}: {e}")))
    }
}

impl BinaryEncodable for DateTime {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_i64(stream, self.ticks)
    }
}

impl BinaryDecodable for DateTime {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let ticks = read_i64(stream)?;
        let mut date_time = DateTime::from_ticks(ticks);
        // A client that ignores clock skew applies the configured offset so
        // timestamps compare correctly against local time
        if decoding_options.client_offset != chrono::Duration::zero() {
            date_time = date_time + decoding_options.client_offset;
        }
        Ok(date_time)
    }
}

#[cfg(test)]
mod tests {
    use super::{DateTime, EPOCH_DELTA_SECONDS, MAX_TICKS, TICKS_PER_SECOND};

    #[test]
    fn null_is_zero() {
        assert_eq!(DateTime::null().ticks(), 0);
        assert!(DateTime::null().is_null());
    }

    #[test]
    fn unix_round_trip() {
        let dt = DateTime::from_unix_seconds(1_000_000_000);
        assert_eq!(dt.as_unix_seconds(), 1_000_000_000);
        assert_eq!(
            dt.ticks(),
            (1_000_000_000 + EPOCH_DELTA_SECONDS) * TICKS_PER_SECOND
        );
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(DateTime::from_ticks(-5).ticks(), 0);
        assert_eq!(DateTime::from_ticks(i64::MAX).ticks(), MAX_TICKS);
        assert_eq!(DateTime::from_unix_seconds(i64::MIN).ticks(), 0);
    }

    #[test]
    fn ordering_follows_time() {
        let early = DateTime::from_unix_seconds(100);
        let late = DateTime::from_unix_seconds(200);
        assert!(early < late);
        assert_eq!((late - early).num_seconds(), 100);
    }
}
