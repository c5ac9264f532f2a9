// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![deny(unsafe_code)]

//! Cryptographic helpers needed by the transport layer.
//!
//! Only the [transport obfuscation] cipher lives here. The MTProto payload
//! encryption itself is handled elsewhere and is not part of this crate.
//!
//! [transport obfuscation]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation
pub mod obfuscated;

pub use obfuscated::{HEADER_LEN, ObfuscatedCipher, generate_header};
