// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport, UnpackedOffset};
use bytes::{BufMut, BytesMut};

/// A transport that performs no framing at all.
///
/// * Overhead: none.
///
/// Every chunk of bytes available is considered a complete packet, so this
/// is only useful when the underlying socket already preserves message
/// boundaries (or when the peer does not care about them).
pub struct Passthrough;

#[allow(clippy::new_without_default)]
impl Passthrough {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for Passthrough {
    fn init(&mut self, _output: &mut BytesMut) {}

    fn check_payload(&self, input: &[u8]) -> Result<(), Error> {
        // Nothing would reach the peer.
        if input.is_empty() {
            return Err(Error::BadPayload { len: 0 });
        }
        Ok(())
    }

    fn pack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(), Error> {
        self.check_payload(input)?;
        output.put_slice(input);
        Ok(())
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<UnpackedOffset, Error> {
        if buffer.is_empty() {
            return Err(Error::MissingBytes);
        }

        Ok(UnpackedOffset {
            data_range: 0..buffer.len(),
            next_offset: buffer.len(),
        })
    }
}
