//! A [`Packet`](./struct.Packet.html) struct and associated infrastructure to read an MPEG
//! Transport Stream packet, per _ISO/IEC 13818-1, Section 2.4.3.2_.
//!
//! Parsing is split in two.  [`Packet::parse()`](struct.Packet.html#method.parse) performs the
//! checks that decide whether a packet is usable at all (transport errors, scrambling, adaptation
//! field length), and the remaining header fields are decoded lazily by accessor methods.

use crate::time::{self, Timestamp, TimestampError};
use bitflags::bitflags;
use log::{debug, warn};
use std::convert::TryFrom;
use std::fmt;

/// the different values indicating whether a `Packet`'s `adaptation_field()` and `payload()`
/// methods will return `Some` or `None`.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum AdaptationControl {
    /// The `adaptation_control` field holds `0b00`, which is not defined by the standard.
    Reserved,
    /// indicates that this packet contains a payload, but not an adaptation field
    PayloadOnly,
    /// indicates that this packet contains an adaptation field, but not a payload
    AdaptationFieldOnly,
    /// indicates that this packet contains both an adaptation field and a payload
    AdaptationFieldAndPayload,
}

impl AdaptationControl {
    #[inline(always)]
    fn from_bits(val: u8) -> AdaptationControl {
        match val & 0b11 {
            0 => AdaptationControl::Reserved,
            1 => AdaptationControl::PayloadOnly,
            2 => AdaptationControl::AdaptationFieldOnly,
            _ => AdaptationControl::AdaptationFieldAndPayload,
        }
    }

    /// True if this AdaptationControl variant indicates that the packet will have a payload
    #[inline(always)]
    pub fn has_payload(self) -> bool {
        matches!(
            self,
            AdaptationControl::PayloadOnly | AdaptationControl::AdaptationFieldAndPayload
        )
    }

    /// True if this AdaptationControl variant indicates that the packet will have an adaptation
    /// field
    #[inline(always)]
    pub fn has_adaptation_field(self) -> bool {
        matches!(
            self,
            AdaptationControl::AdaptationFieldOnly | AdaptationControl::AdaptationFieldAndPayload
        )
    }
}

/// Indicates content scrambling in use, if any.
///
/// Scrambled packets are rejected by [`Packet::parse()`](struct.Packet.html#method.parse), since
/// no descrambling is performed at this layer.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum TransportScramblingControl {
    /// The stream is not scrambled.
    NotScrambled,
    /// The stream is scrambled using a scheme not defined in _ISO/IEC 13818-1_.
    Undefined(u8),
}

impl TransportScramblingControl {
    fn from_bits(val: u8) -> TransportScramblingControl {
        match val & 0b11 {
            0 => TransportScramblingControl::NotScrambled,
            v => TransportScramblingControl::Undefined(v),
        }
    }
}

/// A _Clock Reference_ is used to represent the values of PCR and OPCR fields within the
/// transport stream data.
///
/// A _Clock Reference_ includes a 33-bit, 90kHz `base` component, together with another 9-bit,
/// high-resolution `extension` component.
///
/// Together these can be viewed as a 27MHz tick count (e.g. `let ticks = u64::from(pcr)`) which
/// wraps back to zero after `time::PCR_MAX_VALUE`, approximately every 26.5 hours.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ClockRef {
    base: u64,
    extension: u16,
}

impl From<ClockRef> for u64 {
    /// An out-of-range extension (300 to 511) is taken modulo 300.
    fn from(pcr: ClockRef) -> u64 {
        pcr.base * 300 + u64::from(pcr.extension % 300)
    }
}

impl fmt::Debug for ClockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "PCR{{{:09x}:{:03x}}}", self.base, self.extension)
    }
}
impl ClockRef {
    /// The number of bytes occupied by an encoded clock reference.
    pub const SIZE: usize = 6;

    /// Decode the 48-bit encoding: 33 bits of base, 6 reserved bits, 9 bits of extension.
    ///
    /// Panics if `data` is shorter than 6 bytes
    pub fn from_slice(data: &[u8]) -> ClockRef {
        let hi = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let lo = u16::from_be_bytes([data[4], data[5]]);
        ClockRef {
            base: u64::from(hi) << 1 | u64::from(lo >> 15),
            extension: lo & 0x1ff,
        }
    }
    /// Panics if the `base` is greater than 2^33-1 or the `extension` is greater than 2^9-1
    pub fn from_parts(base: u64, extension: u16) -> ClockRef {
        assert!(base < (1 << 33));
        assert!(extension < (1 << 9));
        ClockRef { base, extension }
    }

    /// Split a 27MHz tick count into base and extension.  Values beyond `time::PCR_MAX_VALUE`
    /// wrap around.
    pub fn from_ticks(ticks: u64) -> ClockRef {
        let ticks = ticks % (time::PCR_MAX_VALUE + 1);
        ClockRef {
            base: ticks / 300,
            extension: (ticks % 300) as u16,
        }
    }

    /// Encode into the 6-byte wire representation, with the reserved bits set to `1`.
    ///
    /// Panics if `out` is shorter than 6 bytes
    pub fn write_to(&self, out: &mut [u8]) {
        let hi = (self.base >> 1) as u32;
        let lo = ((self.base & 1) as u16) << 15 | 0b0111_1110 << 8 | self.extension;
        out[..4].copy_from_slice(&hi.to_be_bytes());
        out[4..6].copy_from_slice(&lo.to_be_bytes());
    }

    /// get the 33-bit, 90kHz 'base' component of the timestamp
    pub fn base(&self) -> u64 {
        self.base
    }

    /// get the 9-bit 'extension' component of the timestamp, measured in 300ths of the 90kHz base
    /// clockrate (i.e. 27MHz)
    pub fn extension(&self) -> u16 {
        self.extension
    }
}

/// Some error encountered while parsing adaptation field syntax
#[derive(Debug, PartialEq, Eq)]
pub enum AdaptationFieldError {
    /// The an optional field's value was requested, but the field is not actually present
    FieldNotPresent,
    /// The flags claim a field is present, but the adaptation field is too short to hold it.
    NotEnoughData,
    /// The `seamless_splice()` function found a syntax error is the adaptation field data holding
    /// the _seamless_splice_ field.
    SpliceTimestampError(TimestampError),
}

bitflags! {
    /// The flags byte at the start of a non-empty adaptation field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AdaptationFieldFlags: u8 {
        /// _discontinuity_indicator_
        const DISCONTINUITY = 0x80;
        /// _random_access_indicator_
        const RANDOM_ACCESS = 0x40;
        /// _elementary_stream_priority_indicator_
        const ES_PRIORITY = 0x20;
        /// _PCR_flag_
        const PCR = 0x10;
        /// _OPCR_flag_
        const OPCR = 0x08;
        /// _splicing_point_flag_
        const SPLICING_POINT = 0x04;
        /// _transport_private_data_flag_
        const TRANSPORT_PRIVATE_DATA = 0x02;
        /// _adaptation_field_extension_flag_
        const EXTENSION = 0x01;
    }
}

/// A collection of fields that may optionally appear within the header of a transport stream
/// `Packet`.
///
/// An adaptation field of length zero (a single stuffing byte) is represented with an empty
/// buffer; all its flags read as unset.
///
/// As returned by [`Packet::adaptation_field()`](struct.Packet.html#method.adaptation_field)
pub struct AdaptationField<'buf> {
    buf: &'buf [u8],
}

impl<'buf> AdaptationField<'buf> {
    /// Wrap the adaptation field bytes following the `adaptation_field_length` byte.
    pub fn new(buf: &'buf [u8]) -> AdaptationField<'buf> {
        AdaptationField { buf }
    }

    /// The flags byte; empty for a zero-length adaptation field
    pub fn flags(&self) -> AdaptationFieldFlags {
        self.buf
            .first()
            .map(|b| AdaptationFieldFlags::from_bits_retain(*b))
            .unwrap_or(AdaptationFieldFlags::empty())
    }

    /// true if this adaptation field consists only of the length byte
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Get the value of the _discontinuity_indicator_ field, set by some 'upstream' processor on
    /// discovering that there was a break in the data.
    pub fn discontinuity_indicator(&self) -> bool {
        self.flags().contains(AdaptationFieldFlags::DISCONTINUITY)
    }
    /// Get the value of the _random_access_indicator_ field.
    pub fn random_access_indicator(&self) -> bool {
        self.flags().contains(AdaptationFieldFlags::RANDOM_ACCESS)
    }
    /// Get the value of the _elementary_stream_priority_indicator_ field.
    pub fn elementary_stream_priority_indicator(&self) -> u8 {
        u8::from(self.flags().contains(AdaptationFieldFlags::ES_PRIORITY))
    }

    fn slice(&self, from: usize, to: usize) -> Result<&'buf [u8], AdaptationFieldError> {
        self.buf
            .get(from..to)
            .ok_or(AdaptationFieldError::NotEnoughData)
    }

    // Each optional field sits after the flags byte and all optional fields whose flags
    // precede it.
    fn offset_of(&self, field: AdaptationFieldFlags) -> Result<usize, AdaptationFieldError> {
        let flags = self.flags();
        let mut off = 1;
        if field == AdaptationFieldFlags::PCR {
            return Ok(off);
        }
        if flags.contains(AdaptationFieldFlags::PCR) {
            off += ClockRef::SIZE;
        }
        if field == AdaptationFieldFlags::OPCR {
            return Ok(off);
        }
        if flags.contains(AdaptationFieldFlags::OPCR) {
            off += ClockRef::SIZE;
        }
        if field == AdaptationFieldFlags::SPLICING_POINT {
            return Ok(off);
        }
        if flags.contains(AdaptationFieldFlags::SPLICING_POINT) {
            off += 1;
        }
        if field == AdaptationFieldFlags::TRANSPORT_PRIVATE_DATA {
            return Ok(off);
        }
        if flags.contains(AdaptationFieldFlags::TRANSPORT_PRIVATE_DATA) {
            off += 1 + usize::from(self.slice(off, off + 1)?[0]);
        }
        Ok(off)
    }

    fn field(&self, field: AdaptationFieldFlags) -> Result<usize, AdaptationFieldError> {
        if self.flags().contains(field) {
            self.offset_of(field)
        } else {
            Err(AdaptationFieldError::FieldNotPresent)
        }
    }

    /// Get the _Program Clock Reference_ field,
    /// or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn pcr(&self) -> Result<ClockRef, AdaptationFieldError> {
        let off = self.field(AdaptationFieldFlags::PCR)?;
        Ok(ClockRef::from_slice(self.slice(off, off + ClockRef::SIZE)?))
    }
    /// Returns the 'Original Program Clock Reference' value,
    /// or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn opcr(&self) -> Result<ClockRef, AdaptationFieldError> {
        let off = self.field(AdaptationFieldFlags::OPCR)?;
        Ok(ClockRef::from_slice(self.slice(off, off + ClockRef::SIZE)?))
    }
    /// Get the value of the _splice_countdown_ field,
    /// or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn splice_countdown(&self) -> Result<i8, AdaptationFieldError> {
        let off = self.field(AdaptationFieldFlags::SPLICING_POINT)?;
        Ok(self.slice(off, off + 1)?[0] as i8)
    }
    /// Borrow a slice of the underlying buffer containing private data,
    /// or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn transport_private_data(&self) -> Result<&'buf [u8], AdaptationFieldError> {
        let off = self.field(AdaptationFieldFlags::TRANSPORT_PRIVATE_DATA)?;
        let len = usize::from(self.slice(off, off + 1)?[0]);
        self.slice(off + 1, off + 1 + len)
    }
    /// Returns extended adaptation fields, or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn adaptation_field_extension(
        &self,
    ) -> Result<AdaptationFieldExtension<'buf>, AdaptationFieldError> {
        let off = self.field(AdaptationFieldFlags::EXTENSION)?;
        let len = usize::from(self.slice(off, off + 1)?[0]);
        AdaptationFieldExtension::new(self.slice(off + 1, off + 1 + len)?)
    }
}

impl<'buf> fmt::Debug for AdaptationField<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("AdaptationField");
        d.field("flags", &self.flags());
        d.field("pcr", &self.pcr());
        d.field("opcr", &self.opcr());
        d.field("splice_countdown", &self.splice_countdown());
        d.field("transport_private_data", &self.transport_private_data());
        d.field(
            "adaptation_field_extension",
            &self.adaptation_field_extension(),
        );
        d.finish()
    }
}

/// Optional extensions within an [`AdaptationField`](struct.AdaptationField.html).
pub struct AdaptationFieldExtension<'buf> {
    buf: &'buf [u8],
}
impl<'buf> AdaptationFieldExtension<'buf> {
    /// Wrap the extension bytes following the `adaptation_field_extension_length` byte.
    pub fn new(buf: &'buf [u8]) -> Result<AdaptationFieldExtension<'buf>, AdaptationFieldError> {
        if buf.is_empty() {
            Err(AdaptationFieldError::NotEnoughData)
        } else {
            Ok(AdaptationFieldExtension { buf })
        }
    }

    fn slice(&self, from: usize, to: usize) -> Result<&'buf [u8], AdaptationFieldError> {
        self.buf
            .get(from..to)
            .ok_or(AdaptationFieldError::NotEnoughData)
    }

    fn ltw_flag(&self) -> bool {
        self.buf[0] & 0b1000_0000 != 0
    }
    fn piecewise_rate_flag(&self) -> bool {
        self.buf[0] & 0b0100_0000 != 0
    }
    fn seamless_splice_flag(&self) -> bool {
        self.buf[0] & 0b0010_0000 != 0
    }
    fn piecewise_rate_offset(&self) -> usize {
        if self.ltw_flag() {
            3
        } else {
            1
        }
    }
    fn seamless_splice_offset(&self) -> usize {
        self.piecewise_rate_offset() + if self.piecewise_rate_flag() { 3 } else { 0 }
    }

    /// Returns the 'Legal time window offset', or `None` if the _ltw_valid_flag_ is clear.
    pub fn ltw_offset(&self) -> Result<Option<u16>, AdaptationFieldError> {
        if !self.ltw_flag() {
            return Err(AdaptationFieldError::FieldNotPresent);
        }
        let dat = self.slice(1, 3)?;
        let val = u16::from_be_bytes([dat[0], dat[1]]);
        Ok(if val & 0x8000 != 0 {
            Some(val & 0x7fff)
        } else {
            None
        })
    }
    /// Get the value of the 22-bit _piecewise_rate_ field,
    /// or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn piecewise_rate(&self) -> Result<u32, AdaptationFieldError> {
        if !self.piecewise_rate_flag() {
            return Err(AdaptationFieldError::FieldNotPresent);
        }
        let off = self.piecewise_rate_offset();
        let dat = self.slice(off, off + 3)?;
        Ok(u32::from_be_bytes([0, dat[0] & 0b0011_1111, dat[1], dat[2]]))
    }
    /// Get the value of the _seamless_splice_ field,
    /// or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn seamless_splice(&self) -> Result<SeamlessSplice, AdaptationFieldError> {
        if !self.seamless_splice_flag() {
            return Err(AdaptationFieldError::FieldNotPresent);
        }
        let off = self.seamless_splice_offset();
        let dat = self.slice(off, off + 5)?;
        Ok(SeamlessSplice {
            splice_type: dat[0] >> 4,
            dts_next_au: Timestamp::from_bytes(dat)
                .map_err(AdaptationFieldError::SpliceTimestampError)?,
        })
    }
}

impl<'buf> fmt::Debug for AdaptationFieldExtension<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptationFieldExtension")
            .field("ltw_offset", &self.ltw_offset())
            .field("piecewise_rate", &self.piecewise_rate())
            .field("seamless_splice", &self.seamless_splice())
            .finish()
    }
}

/// Value of the _seamless_splice_ field, as returned by
/// [`AdaptationFieldExtension::seamless_splice()`](struct.AdaptationFieldExtension.html#method.seamless_splice)
#[derive(Debug, PartialEq, Eq)]
pub struct SeamlessSplice {
    /// see _ISO/IEC 13818-1 : 2000_, Table 2-7 through Table 2-16
    pub splice_type: u8,
    /// The DTS of the access unit after the splice-point.
    pub dts_next_au: Timestamp,
}

/// A counter value used within a transport stream to detect discontinuities in a sequence of
/// packets.  The continuity counter should increase by one for each packet with a given PID for
/// which `adaptation_control` indicates that a payload should be present.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ContinuityCounter {
    val: u8,
}

impl From<u8> for ContinuityCounter {
    #[inline]
    fn from(count: u8) -> ContinuityCounter {
        ContinuityCounter::new(count)
    }
}

impl ContinuityCounter {
    /// Panics if the given value is greater than 15.
    #[inline]
    pub fn new(count: u8) -> ContinuityCounter {
        assert!(count < 0b10000);
        ContinuityCounter { val: count }
    }

    /// Returns this counter's value, which will be between 0 and 15 inclusive.
    #[inline]
    pub fn count(self) -> u8 {
        self.val
    }

    /// true iff this counter value is the one expected after `other`.  The counter wraps around
    /// after 15:
    ///
    /// ```rust
    /// # use mpeg2ts_packetizer::packet::ContinuityCounter;
    /// let a = ContinuityCounter::new(0);
    /// let b = ContinuityCounter::new(15);
    /// assert!(a.follows(b));
    /// ```
    #[inline]
    pub fn follows(self, other: ContinuityCounter) -> bool {
        (other.val + 1) & 0b1111 == self.val
    }
}

/// A Packet Identifier value, between `0x0000` and `0x1fff`.
///
/// PID values identify a particular sub-stream within the overall Transport Stream.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u16);
impl Pid {
    /// The largest possible PID value, `0x1fff`.
    pub const MAX_VALUE: u16 = 0x1fff;

    /// The total number of distinct PID values, `0x2000` (equal to `MAX_VALUE` + 1)
    pub const PID_COUNT: usize = (Self::MAX_VALUE + 1) as usize;

    /// The PID of null packets.  Also used to key the pseudo clock of streams that carry no PCR
    /// at all.
    pub const NULL: Pid = Pid::new(0x1fff);

    /// Panics if the given value is greater than `Pid::MAX_VALUE`.
    pub const fn new(pid: u16) -> Pid {
        assert!(pid <= 0x1fff);
        Pid(pid)
    }
}
impl TryFrom<u16> for Pid {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value <= Pid::MAX_VALUE {
            Ok(Pid(value))
        } else {
            Err(())
        }
    }
}
impl From<Pid> for u16 {
    #[inline]
    fn from(pid: Pid) -> Self {
        pid.0
    }
}
impl From<Pid> for usize {
    #[inline]
    fn from(pid: Pid) -> Self {
        pid.0 as usize
    }
}
impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Pid({:04x})", self.0)
    }
}

/// Reasons for which [`Packet::parse()`](struct.Packet.html#method.parse) rejects a packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketError {
    /// The first byte was not `Packet::SYNC_BYTE`
    SyncByte(u8),
    /// The _transport_error_indicator_ was set by some upstream processor
    TransportErrorIndicator,
    /// The packet payload is scrambled
    Scrambled(TransportScramblingControl),
    /// The _adaptation_field_length_ cannot fit in the packet given its `adaptation_control`
    AdaptationFieldLength {
        /// the packet's adaptation control value
        control: AdaptationControl,
        /// the stated adaptation field length
        length: u8,
    },
}

/// A transport stream `Packet` is a wrapper around a byte slice which allows the bytes to be
/// interpreted as a packet structure per _ISO/IEC 13818-1, Section 2.4.3.3_.
pub struct Packet<'buf> {
    buf: &'buf [u8],
    af_len: Option<usize>,
    has_payload: bool,
}

const FIXED_HEADER_SIZE: usize = 4;
// when AF present, a 1-byte 'length' field precedes the content,
const ADAPTATION_FIELD_OFFSET: usize = FIXED_HEADER_SIZE + 1;
const MAX_ADAPTATION_FIELD_LEN: usize = Packet::SIZE - ADAPTATION_FIELD_OFFSET;

impl<'buf> Packet<'buf> {
    /// The value `0x47`, which must appear in the first byte of every transport stream packet.
    pub const SYNC_BYTE: u8 = 0x47;

    /// The fixed 188 byte size of a transport stream packet.
    pub const SIZE: usize = 188;

    /// returns `true` if the given value is a valid synchronisation byte, the value
    /// `Packet::SYNC_BYTE` (0x47), which must appear at the start of every transport stream
    /// packet.
    #[inline(always)]
    pub fn is_sync_byte(b: u8) -> bool {
        b == Self::SYNC_BYTE
    }

    /// Validate the packet header and adaptation field length.
    ///
    /// Adaptation field lengths the standard forbids but that still fit in the packet are
    /// tolerated with a warning:
    ///
    ///  - adaptation-field-only packets whose length is below 183 (the remaining bytes are
    ///    ignored)
    ///  - packets claiming a payload whose adaptation field is 183 bytes, and so leaves no room
    ///    for one (treated as having no payload)
    ///
    /// Panics if the buffer size is not exactly `Packet::SIZE` (188) bytes.
    pub fn parse(buf: &'buf [u8]) -> Result<Packet<'buf>, PacketError> {
        assert_eq!(buf.len(), Self::SIZE);
        if !Self::is_sync_byte(buf[0]) {
            return Err(PacketError::SyncByte(buf[0]));
        }
        if buf[1] & 0b1000_0000 != 0 {
            return Err(PacketError::TransportErrorIndicator);
        }
        let scrambling = TransportScramblingControl::from_bits(buf[3] >> 6);
        if scrambling != TransportScramblingControl::NotScrambled {
            return Err(PacketError::Scrambled(scrambling));
        }
        let control = AdaptationControl::from_bits(buf[3] >> 4);
        let mut has_payload = control.has_payload();
        let af_len = if control.has_adaptation_field() {
            let length = buf[4];
            let len = usize::from(length);
            if len > MAX_ADAPTATION_FIELD_LEN {
                return Err(PacketError::AdaptationFieldLength { control, length });
            }
            if control == AdaptationControl::AdaptationFieldOnly {
                if len != MAX_ADAPTATION_FIELD_LEN && len != 0 {
                    warn!(
                        "PID {:#06x} adaptation field only, but length {} != {}",
                        Self::read_pid(buf),
                        len,
                        MAX_ADAPTATION_FIELD_LEN
                    );
                }
            } else if len == MAX_ADAPTATION_FIELD_LEN {
                debug!(
                    "PID {:#06x} adaptation field fills packet, ignoring payload flag",
                    Self::read_pid(buf)
                );
                has_payload = false;
            }
            Some(len)
        } else {
            None
        };
        Ok(Packet {
            buf,
            af_len,
            has_payload,
        })
    }

    fn read_pid(buf: &[u8]) -> u16 {
        u16::from(buf[1] & 0b0001_1111) << 8 | u16::from(buf[2])
    }

    /// *May* have been set if some previous processing of this TS data detected at least
    /// 1 uncorrectable bit error in this TS packet.  Always `false` for a successfully parsed
    /// packet.
    #[inline]
    pub fn transport_error_indicator(&self) -> bool {
        self.buf[1] & 0b1000_0000 != 0
    }

    /// a structure larger than a single packet payload needs to be split across multiple packets,
    /// `payload_unit_start()` indicates if this packet payload contains the start of the
    /// structure.  If `false`, this packets payload is a continuation of a structure which began
    /// in an earlier packet within the transport stream.
    #[inline]
    pub fn payload_unit_start_indicator(&self) -> bool {
        self.buf[1] & 0b0100_0000 != 0
    }

    /// When `1`, this TS packet has higher priority than other packets of the the same PID.
    pub fn transport_priority(&self) -> bool {
        self.buf[1] & 0b0010_0000 != 0
    }

    /// The sub-stream to which a particular packet belongs is indicated by this Packet Identifier
    /// value.
    #[inline]
    pub fn pid(&self) -> Pid {
        Pid(Self::read_pid(self.buf))
    }

    /// Value of the _transport_scrambling_control_ field.
    pub fn transport_scrambling_control(&self) -> TransportScramblingControl {
        TransportScramblingControl::from_bits(self.buf[3] >> 6)
    }

    /// The returned enum value indicates if `adaptation_field()`, `payload()` or both will return
    /// something.
    #[inline]
    pub fn adaptation_control(&self) -> AdaptationControl {
        AdaptationControl::from_bits(self.buf[3] >> 4)
    }

    /// Each packet with a given `pid()` value within a transport stream should have a continuity
    /// counter value which increases by 1 from the last counter value seen.
    #[inline]
    pub fn continuity_counter(&self) -> ContinuityCounter {
        ContinuityCounter::new(self.buf[3] & 0b0000_1111)
    }

    /// An `AdaptationField` contains additional packet headers that may be present in the packet.
    pub fn adaptation_field(&self) -> Option<AdaptationField<'buf>> {
        self.af_len.map(|len| {
            AdaptationField::new(&self.buf[ADAPTATION_FIELD_OFFSET..ADAPTATION_FIELD_OFFSET + len])
        })
    }

    /// Shortcut for the PCR value of this packet's adaptation field, if present and well formed.
    pub fn pcr(&self) -> Option<ClockRef> {
        self.adaptation_field().and_then(|af| af.pcr().ok())
    }

    /// The data contained within the packet, not including the packet headers.
    /// `None` is returned if no payload is present, and a returned payload is never empty.
    #[inline(always)]
    pub fn payload(&self) -> Option<&'buf [u8]> {
        if !self.has_payload {
            return None;
        }
        let offset = match self.af_len {
            Some(len) => ADAPTATION_FIELD_OFFSET + len,
            None => FIXED_HEADER_SIZE,
        };
        if offset < self.buf.len() {
            Some(&self.buf[offset..])
        } else {
            None
        }
    }

    /// borrow a reference to the underlying buffer of this packet
    pub fn buffer(&self) -> &'buf [u8] {
        self.buf
    }
}

impl<'buf> fmt::Debug for Packet<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("pid", &self.pid())
            .field("continuity_counter", &self.continuity_counter().count())
            .field(
                "payload_unit_start_indicator",
                &self.payload_unit_start_indicator(),
            )
            .field("adaptation_field", &self.adaptation_field())
            .finish()
    }
}
