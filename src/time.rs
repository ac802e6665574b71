//! Clock units used within a transport stream, and conversions between them.
//!
//! Three timebases are in play:
//!
//!  * the 27MHz _system clock_ in which PCR values are expressed (see [`ClockRef`](../packet/struct.ClockRef.html)),
//!  * the 90kHz clock of PTS and DTS values (see [`Timestamp`](struct.Timestamp.html)),
//!  * nanoseconds, used for arrival times and for the stream time reported to callers.

use std::time::Duration;

/// Number of 27MHz PCR ticks in one second.
pub const PCR_SECOND: u64 = 27_000_000;
/// Number of 27MHz PCR ticks in one millisecond.
pub const PCR_MSECOND: u64 = 27_000;
/// The largest value a PCR can hold before wrapping back around to zero (33-bit base, times 300,
/// minus one).
pub const PCR_MAX_VALUE: u64 = (1 << 33) * 300 - 1;
/// `PCR_MAX_VALUE` expressed in nanoseconds; roughly 26.5 hours.
pub const PCR_MAX_NANOS: u64 = PCR_MAX_VALUE * 1_000_000 / PCR_MSECOND;

pub(crate) const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Computes `val * num / denom` without intermediate overflow.
///
/// A zero `denom`, or a result that does not fit in 64 bits, produces `u64::MAX`.
pub fn scale(val: u64, num: u64, denom: u64) -> u64 {
    if denom == 0 {
        return u64::MAX;
    }
    let res = u128::from(val) * u128::from(num) / u128::from(denom);
    u64::try_from(res).unwrap_or(u64::MAX)
}

/// Converts a count of 27MHz ticks into nanoseconds (rounding down).
#[inline]
pub fn pcr_to_nanos(pcr: u64) -> u64 {
    scale(pcr, 1000, 27)
}

/// Converts nanoseconds into a count of 27MHz ticks (rounding down).
#[inline]
pub fn nanos_to_pcr(nanos: u64) -> u64 {
    scale(nanos, 27, 1000)
}

#[inline]
pub(crate) fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[inline]
pub(crate) fn absdiff(a: u64, b: u64) -> u64 {
    if a < b {
        b - a
    } else {
        a - b
    }
}

/// Detail about the formatting problem which prevented a [`Timestamp`](struct.Timestamp.html)
/// value being parsed.
#[derive(PartialEq, Eq, Debug)]
pub enum TimestampError {
    /// One of the three 'marker bits' separating the parts of the timestamp was not set.
    MarkerBitNotSet {
        /// Which marker bit, numbered from the start of the 5-byte field
        bit_number: u8,
    },
}

/// A 33-bit value on the 90kHz clock, as carried in the `DTS_next_AU` field of a seamless splice.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Timestamp {
    val: u64,
}
impl Timestamp {
    /// The largest representable timestamp value before the timestamp wraps back around to zero.
    pub const MAX: Timestamp = Timestamp { val: (1 << 33) - 1 };

    fn check_marker_bit(buf: &[u8], bit_number: u8) -> Result<(), TimestampError> {
        let bit_mask = 1 << (7 - bit_number % 8);
        if buf[usize::from(bit_number / 8)] & bit_mask != 0 {
            Ok(())
        } else {
            Err(TimestampError::MarkerBitNotSet { bit_number })
        }
    }

    /// Reads the timestamp from the 5 bytes at the start of `buf`.  The 4 bits preceding the
    /// value are not examined, since their meaning depends on the field.
    ///
    /// Panics if fewer than 5 bytes given
    pub fn from_bytes(buf: &[u8]) -> Result<Timestamp, TimestampError> {
        for bit_number in [7, 23, 39] {
            Timestamp::check_marker_bit(buf, bit_number)?;
        }
        let val = (u64::from(buf[0] & 0b0000_1110) << 29)
            | u64::from(buf[1]) << 22
            | (u64::from(buf[2] & 0b1111_1110) << 14)
            | u64::from(buf[3]) << 7
            | u64::from(buf[4]) >> 1;
        Ok(Timestamp { val })
    }

    /// Panics if the given val is greater than 2^33-1
    pub fn from_u64(val: u64) -> Timestamp {
        assert!(val <= Self::MAX.val);
        Timestamp { val }
    }

    /// The 33-bit value
    pub fn value(self) -> u64 {
        self.val
    }
}
