// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport, UnpackedOffset};
use bytes::{BufMut, BytesMut};
use log::debug;
use mtlink_crypto::{HEADER_LEN, ObfuscatedCipher, generate_header};

/// An obfuscation protocol made to avoid ISP blocks.
///
/// It is simply a wrapper around another transport, which encrypts the data
/// using AES-256-CTR with a randomly generated key that is then sent at the
/// beginning of the connection.
///
/// Obfuscated transport can only be used with "tagged" transports, which
/// provide a way to get the obfuscated tag that is used in the encryption.
/// See the linked documentation for more information.
///
/// [Transport Obfuscation](https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation)
pub struct Obfuscated<T: Transport + Tagged> {
    inner: T,
    head: Option<[u8; HEADER_LEN]>,
    decrypt_tail: usize,
    cipher: ObfuscatedCipher,
}

impl<T: Transport + Tagged> Obfuscated<T> {
    pub fn new(inner: T) -> Self {
        let (head, cipher) = generate_header(inner.tag());

        Self {
            inner,
            head: Some(head),
            decrypt_tail: 0,
            cipher,
        }
    }
}

impl<T: Transport + Tagged> Transport for Obfuscated<T> {
    fn init(&mut self, output: &mut BytesMut) {
        // The inner transport announces itself through the header tag,
        // so its own leading bytes are never written.
        self.inner.init(&mut BytesMut::new());

        let head = match self.head.take() {
            Some(head) => head,
            None => {
                debug!("regenerating keys for obfuscated transport");
                let (head, cipher) = generate_header(self.inner.tag());
                self.cipher = cipher;
                head
            }
        };

        self.decrypt_tail = 0;
        output.put_slice(&head);
    }

    fn check_payload(&self, input: &[u8]) -> Result<(), Error> {
        self.inner.check_payload(input)
    }

    fn pack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(), Error> {
        let start = output.len();
        self.inner.pack(input, output)?;
        self.cipher.encrypt(&mut output[start..]);
        Ok(())
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<UnpackedOffset, Error> {
        if buffer.len() < self.decrypt_tail {
            panic!("buffer is smaller than what was decrypted");
        }

        self.cipher.decrypt(&mut buffer[self.decrypt_tail..]);
        self.decrypt_tail = buffer.len();

        let offset = self.inner.unpack(buffer)?;
        self.decrypt_tail -= offset.next_offset;
        Ok(offset)
    }
}
