// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#[allow(deprecated)] // see https://github.com/RustCrypto/block-ciphers/issues/509
use aes::cipher::{KeyIvInit, StreamCipher, generic_array::GenericArray};

/// Length of the random header sent before any obfuscated data.
pub const HEADER_LEN: usize = 64;

/// Offset within the header where the inner transport tag is placed.
const TAG_OFFSET: usize = 56;

/// First words a header must never start with, or the connection could be
/// mistaken for a different protocol by the server (or anything in between).
const FORBIDDEN_FIRST_INTS: [[u8; 4]; 7] = [
    [b'H', b'E', b'A', b'D'], // HTTP HEAD
    [b'P', b'O', b'S', b'T'], // HTTP POST
    [b'G', b'E', b'T', b' '], // HTTP GET
    [b'O', b'P', b'T', b'I'], // HTTP OPTIONS
    [0x16, 0x03, 0x01, 0x02], // TLS handshake
    [0xdd, 0xdd, 0xdd, 0xdd], // Padded Intermediate
    [0xee, 0xee, 0xee, 0xee], // Intermediate
];

/// The AES-256-CTR cipher pair used to obfuscate a transport.
///
/// One keystream is used for outgoing bytes and an independent one for
/// incoming bytes, so both directions can be processed in any order.
pub struct ObfuscatedCipher {
    rx: ctr::Ctr128BE<aes::Aes256>,
    tx: ctr::Ctr128BE<aes::Aes256>,
}

impl ObfuscatedCipher {
    /// Derive the cipher pair from a 64-byte header.
    ///
    /// The sending key and IV are taken from the header as-is, while the
    /// receiving ones come from the header reversed. A peer deriving its
    /// cipher from the reversed header can therefore talk to this one.
    pub fn new(init: &[u8; HEADER_LEN]) -> Self {
        let init_rev = init.iter().copied().rev().collect::<Vec<_>>();
        #[allow(deprecated)] // see https://github.com/RustCrypto/block-ciphers/issues/509
        Self {
            rx: ctr::Ctr128BE::<aes::Aes256>::new(
                GenericArray::from_slice(&init_rev[8..40]),
                GenericArray::from_slice(&init_rev[40..56]),
            ),
            tx: ctr::Ctr128BE::<aes::Aes256>::new(
                GenericArray::from_slice(&init[8..40]),
                GenericArray::from_slice(&init[40..56]),
            ),
        }
    }

    /// Apply the outgoing keystream in-place.
    pub fn encrypt(&mut self, buffer: &mut [u8]) {
        self.tx.apply_keystream(buffer);
    }

    /// Apply the incoming keystream in-place.
    pub fn decrypt(&mut self, buffer: &mut [u8]) {
        self.rx.apply_keystream(buffer);
    }
}

/// Generate a fresh random header carrying the inner transport `tag`,
/// along with the cipher derived from it.
///
/// The returned header is ready to be written to the socket: its last
/// eight bytes are already encrypted, as the server expects.
///
/// # Panics
///
/// Panics if the operating system cannot provide random bytes.
pub fn generate_header(tag: [u8; 4]) -> ([u8; HEADER_LEN], ObfuscatedCipher) {
    let mut init = [0; HEADER_LEN];

    while init[4..8] == [0; 4] // Full
        || init[0] == 0xef // Abridged
        || FORBIDDEN_FIRST_INTS.iter().any(|start| start == &init[..4])
    {
        getrandom::fill(&mut init).expect("failed to generate obfuscation header");
    }

    init[TAG_OFFSET..TAG_OFFSET + 4].copy_from_slice(&tag);

    let mut cipher = ObfuscatedCipher::new(&init);

    let mut encrypted_init = init;
    cipher.encrypt(&mut encrypted_init);
    init[TAG_OFFSET..].copy_from_slice(&encrypted_init[TAG_OFFSET..]);

    (init, cipher)
}
