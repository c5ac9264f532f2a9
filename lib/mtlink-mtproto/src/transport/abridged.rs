// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport, UnpackedOffset, check_words, read_i32_le};
use bytes::{BufMut, BytesMut};

/// The lightest MTProto transport protocol available. This is an
/// implementation of the [abridged transport].
///
/// * Overhead: very small.
/// * Minimum envelope length: 1 byte.
/// * Maximum envelope length: 4 bytes.
///
/// It serializes the input payload as follows, if the length is small enough:
///
/// ```text
/// +-+----...----+
/// |L|  payload  |
/// +-+----...----+
///  ^ 1 byte
/// ```
///
/// Otherwise:
///
/// ```text
/// +----+----...----+
/// | len|  payload  |
/// +----+----...----+
///  ^^^^ 4 bytes
/// ```
///
/// [abridged transport]: https://core.telegram.org/mtproto/mtproto-transports#abridged
pub struct Abridged;

#[allow(clippy::new_without_default)]
impl Abridged {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for Abridged {
    fn init(&mut self, output: &mut BytesMut) {
        output.put_u8(0xef);
    }

    fn check_payload(&self, input: &[u8]) -> Result<(), Error> {
        check_words(input)
    }

    fn pack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(), Error> {
        self.check_payload(input)?;

        let len = input.len() / 4;
        output.reserve(4 + input.len());
        if len < 127 {
            output.put_u8(len as u8);
        } else {
            output.put_u32_le(0x7f | ((len as u32) << 8));
        }
        output.put_slice(input);
        Ok(())
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<UnpackedOffset, Error> {
        if buffer.is_empty() {
            return Err(Error::MissingBytes);
        }

        let header_len;
        let len = buffer[0];
        let len = if len < 127 {
            header_len = 1;
            len as usize
        } else {
            if buffer.len() < 4 {
                return Err(Error::MissingBytes);
            }

            header_len = 4;
            ((read_i32_le(buffer) as u32) >> 8) as usize
        };

        let len = len * 4;
        if buffer.len() < header_len + len {
            return Err(Error::MissingBytes);
        }

        if len == 4 {
            let data = read_i32_le(&buffer[header_len..]);
            if data < 0 {
                return Err(Error::BadStatus {
                    status: data.unsigned_abs(),
                });
            }
        }

        Ok(UnpackedOffset {
            data_range: header_len..header_len + len,
            next_offset: header_len + len,
        })
    }
}

impl Tagged for Abridged {
    fn tag(&self) -> [u8; 4] {
        [0xef; 4]
    }
}
