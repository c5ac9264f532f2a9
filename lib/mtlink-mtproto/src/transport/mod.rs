// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Implementation of the several [MTProto transports]. This layer is
//! responsible for taking serialized messages from the MTP and packing them
//! in a format that can be sent over a byte stream, and for finding where
//! each packet ends when reading them back.
//!
//! [MTProto transports]: https://core.telegram.org/mtproto#mtproto-transport
mod abridged;
mod full;
mod intermediate;
mod obfuscated;
mod passthrough;

pub use abridged::Abridged;
use bytes::BytesMut;
pub use full::Full;
pub use intermediate::Intermediate;
pub use obfuscated::Obfuscated;
pub use passthrough::Passthrough;
use std::fmt;
use std::ops::Range;

/// The error type reported by the different transports when something is wrong.
///
/// Certain transports will only produce certain variants of this error.
///
/// Unless the variant is `MissingBytes`, the connection should not continue.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Not enough bytes are provided.
    MissingBytes,

    /// The length is either too short or too long to represent a valid packet.
    BadLen { got: i32 },

    /// The sequence number received does not match the expected value.
    BadSeq { expected: u32, got: u32 },

    /// The checksum of the packet does not match its expected value.
    BadCrc { expected: u32, got: u32 },

    /// A negative length was received, indicating a [transport-level error].
    /// The absolute value of this length behaves like an [HTTP status code]:
    ///
    /// * 404, if the authorization key used was not found, meaning that the
    ///   server is not aware of the key used by the client, so it cannot be
    ///   used to securely communicate with it.
    ///
    /// * 429, if too many transport connections are established to the same
    ///   IP address in a too-short lapse of time.
    ///
    /// [transport-level error]: https://core.telegram.org/mtproto/mtproto-transports#transport-errors
    /// [HTTP status code]: https://developer.mozilla.org/en-US/docs/Web/HTTP/Status
    BadStatus { status: u32 },

    /// The payload cannot be framed by this transport, either because its
    /// length is not a multiple of 4 where lengths are counted in words,
    /// or because the peer would mistake it for a transport status.
    BadPayload { len: usize },
}

/// Where the payload of a successfully unpacked packet is, and where the next one starts.
#[derive(Clone, Debug, PartialEq)]
pub struct UnpackedOffset {
    pub data_range: Range<usize>,
    pub next_offset: usize,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: ")?;
        match self {
            Error::MissingBytes => write!(f, "need more bytes"),
            Error::BadLen { got } => write!(f, "bad len (got {got})"),
            Error::BadSeq { expected, got } => {
                write!(f, "bad seq (expected {expected}, got {got})")
            }
            Error::BadCrc { expected, got } => {
                write!(f, "bad crc (expected {expected}, got {got})")
            }
            Error::BadStatus { status } => {
                write!(f, "bad status (negative length -{status})")
            }
            Error::BadPayload { len } => write!(f, "bad payload ({len} bytes)"),
        }
    }
}

/// The trait used by the transports to frame and unframe packets.
///
/// Implementations must be deterministic: the only state they keep is what
/// the framing itself needs (counters, cipher positions).
pub trait Transport {
    /// Resets the state as if a new instance was just created, and writes
    /// whatever must precede the first packet of a new connection.
    fn init(&mut self, output: &mut BytesMut);

    /// Checks whether `input` can be packed, without touching any state.
    fn check_payload(&self, input: &[u8]) -> Result<(), Error> {
        let _ = input;
        Ok(())
    }

    /// Packs the input buffer into `output`.
    ///
    /// Fails with [`Error::BadPayload`] if [`Transport::check_payload`]
    /// rejects `input`, in which case nothing is written and no state changes.
    fn pack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(), Error>;

    /// Unpacks the first packet found in the buffer.
    ///
    /// Returns [`Error::MissingBytes`] when more bytes need to be pulled
    /// before the packet is complete. Subsequent calls should be made with
    /// the same buffer, with the bytes up to a previous
    /// [`UnpackedOffset::next_offset`] removed.
    ///
    /// The buffer is mutable so that transports can decode it in-place.
    fn unpack(&mut self, buffer: &mut [u8]) -> Result<UnpackedOffset, Error>;
}

/// The trait used by the obfuscated transport to get the transport tags.
pub trait Tagged {
    /// The tag announcing this transport, as placed inside an obfuscated header.
    fn tag(&self) -> [u8; 4];
}

/// Payload rules shared by the transports that count lengths in words and
/// report errors as a lone negative word.
fn check_words(input: &[u8]) -> Result<(), Error> {
    if input.len() % 4 != 0 || (input.len() == 4 && read_i32_le(input) < 0) {
        return Err(Error::BadPayload { len: input.len() });
    }
    Ok(())
}

/// Reads a little-endian `i32` from the start of `buffer`.
///
/// The caller must have checked that at least four bytes are available.
fn read_i32_le(buffer: &[u8]) -> i32 {
    i32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]])
}
