// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![deny(unsafe_code)]

//! This library implements the I/O-free parts of the [Mobile Transport Protocol]
//! needed to move requests over a socket.
//!
//! The [`mtp`] module frames individual messages and containers with the help
//! of a [`mtp::Sequencer`], and the [`transport`] module turns those buffers
//! into packets that can be written to (and read back from) a byte stream.
//!
//! [Mobile Transport Protocol]: https://core.telegram.org/mtproto
pub mod mtp;
pub mod transport;

/// A Message Identifier.
///
/// When requests are serialized, a new message identifier is attached to them.
/// As server responses get processed, some of them will refer back to it,
/// which is how responses can be matched with the request they answer.
#[derive(Copy, Clone, Debug, Hash, PartialEq, PartialOrd, Eq, Ord)]
pub struct MsgId(pub i64);
