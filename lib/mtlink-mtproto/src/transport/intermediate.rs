// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport, UnpackedOffset, check_words, read_i32_le};
use bytes::{BufMut, BytesMut};

/// A light MTProto transport protocol available that guarantees data padded
/// to 4 bytes. This is an implementation of the [intermediate transport].
///
/// * Overhead: small.
/// * Minimum envelope length: 4 bytes.
/// * Maximum envelope length: 4 bytes.
///
/// It serializes the input payload as follows:
///
/// ```text
/// +----+----...----+
/// | len|  payload  |
/// +----+----...----+
///  ^^^^ 4 bytes
/// ```
///
/// [intermediate transport]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
pub struct Intermediate;

#[allow(clippy::new_without_default)]
impl Intermediate {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for Intermediate {
    fn init(&mut self, output: &mut BytesMut) {
        output.put_slice(&self.tag());
    }

    fn check_payload(&self, input: &[u8]) -> Result<(), Error> {
        check_words(input)
    }

    fn pack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(), Error> {
        self.check_payload(input)?;

        output.reserve(4 + input.len());
        output.put_i32_le(input.len() as i32);
        output.put_slice(input);
        Ok(())
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<UnpackedOffset, Error> {
        if buffer.len() < 4 {
            return Err(Error::MissingBytes);
        }

        let len = read_i32_le(buffer);
        if len < 0 {
            return Err(Error::BadLen { got: len });
        }
        if buffer.len() < 4 + len as usize {
            return Err(Error::MissingBytes);
        }

        if len == 4 {
            let data = read_i32_le(&buffer[4..]);
            if data < 0 {
                return Err(Error::BadStatus {
                    status: data.unsigned_abs(),
                });
            }
        }

        let len = len as usize;
        Ok(UnpackedOffset {
            data_range: 4..4 + len,
            next_offset: 4 + len,
        })
    }
}

impl Tagged for Intermediate {
    fn tag(&self) -> [u8; 4] {
        [0xee; 4]
    }
}
