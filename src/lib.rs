//! Packetizer for MPEG2 Transport Stream data, per the _ISO/IEC 13818-1_ standard.
//!
//! Takes a byte stream pushed in chunks of any size, and
//!
//!  * finds the packet boundaries, whether packets are 188 bytes, or 192 (M2TS), 204 or 208 bytes
//!    with extra timing / FEC data,
//!  * reassembles the PSI/SI sections carried in the packets of selected PIDs,
//!  * recovers the sender's clock from PCR values, relating PCRs to local arrival times (clock
//!    skew estimation) and to byte offsets within the stream (for seeking).
//!
//! # Design principals
//!
//!  * *Non-blocking*.  The caller pushes data and then processes what has been buffered; no call
//!    waits for more input.
//!  * *Transport Neutral*.  The APIs accept `&[u8]`, and the caller handles providing the data
//!    from wherever.
//!  * *Nothing fatal*.  Broken input is logged (via the `log` crate) and skipped; the only
//!    signal to the caller is that a section or a time is not (yet) available.
//!
//! The entry point is [`packetizer::Packetizer`](packetizer/struct.Packetizer.html).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, future_incompatible)]
#![warn(missing_docs)]

pub mod offset;
pub mod packet;
pub mod packetizer;
pub mod pid_table;
pub mod psi;
pub mod skew;
pub mod sync;
pub mod time;
pub mod timeline;
