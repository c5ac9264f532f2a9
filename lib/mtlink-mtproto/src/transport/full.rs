// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport, UnpackedOffset, read_i32_le};
use bytes::{BufMut, BytesMut};
use crc32fast::Hasher;

/// The basic MTProto transport protocol. This is an implementation of the
/// [full transport].
///
/// * Overhead: medium
/// * Minimum envelope length: 12 bytes.
/// * Maximum envelope length: 12 bytes.
///
/// It serializes the input payload as follows:
///
/// ```text
/// +----+----+----...----+----+
/// | len| seq|  payload  | crc|
/// +----+----+----...----+----+
///  ^^^^ 4 bytes
/// ```
///
/// [full transport]: https://core.telegram.org/mtproto/mtproto-transports#full
pub struct Full {
    send_seq: u32,
    recv_seq: u32,
}

#[allow(clippy::new_without_default)]
impl Full {
    pub fn new() -> Self {
        Self {
            send_seq: 0,
            recv_seq: 0,
        }
    }
}

impl Transport for Full {
    fn init(&mut self, _output: &mut BytesMut) {
        self.send_seq = 0;
        self.recv_seq = 0;
    }

    fn check_payload(&self, input: &[u8]) -> Result<(), Error> {
        if input.len() % 4 != 0 {
            return Err(Error::BadPayload { len: input.len() });
        }
        Ok(())
    }

    fn pack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(), Error> {
        self.check_payload(input)?;

        // payload len + length itself (4 bytes) + send counter (4 bytes) + crc32 (4 bytes)
        let len = input.len() + 4 + 4 + 4;
        output.reserve(len);

        let buf_start = output.len();
        output.put_u32_le(len as _);
        output.put_u32_le(self.send_seq);
        output.put_slice(input);
        let crc = {
            let mut hasher = Hasher::new();
            hasher.update(&output[buf_start..]);
            hasher.finalize()
        };
        output.put_u32_le(crc);

        self.send_seq += 1;
        Ok(())
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<UnpackedOffset, Error> {
        // Need 4 bytes for the initial length
        if buffer.len() < 4 {
            return Err(Error::MissingBytes);
        }

        let len = read_i32_le(buffer);
        if len < 12 {
            return Err(Error::BadLen { got: len });
        }
        let len = len as usize;
        if buffer.len() < len {
            return Err(Error::MissingBytes);
        }

        let seq = read_i32_le(&buffer[4..]) as u32;
        if seq != self.recv_seq {
            return Err(Error::BadSeq {
                expected: self.recv_seq,
                got: seq,
            });
        }

        let crc = read_i32_le(&buffer[len - 4..]) as u32;
        let valid_crc = {
            let mut hasher = Hasher::new();
            hasher.update(&buffer[..len - 4]);
            hasher.finalize()
        };
        if crc != valid_crc {
            return Err(Error::BadCrc {
                expected: valid_crc,
                got: crc,
            });
        }

        self.recv_seq += 1;
        Ok(UnpackedOffset {
            data_range: 8..len - 4,
            next_offset: len,
        })
    }
}
