// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Message-level framing of the [Mobile Transport Protocol].
//!
//! Every outgoing body is written as a message carrying an identifier and a
//! sequence number. Who hands those out is up to a [`Sequencer`], so several
//! connections can either share one or each use their own.
//!
//! [Mobile Transport Protocol]: https://core.telegram.org/mtproto/description
use crate::MsgId;
use bytes::{BufMut, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// `msg_id` (8 bytes), `seq_no` (4 bytes) and `bytes` (4 bytes) preceding every body.
pub const MESSAGE_HEADER_LEN: usize = 8 + 4 + 4;

/// Constructor identifier (4 bytes) and inner vector length (4 bytes) of a container.
pub const CONTAINER_HEADER_LEN: usize = 4 + 4;

/// Constructor identifier (4 bytes) and `msg_id` (8 bytes) of `invokeAfterMsg`.
pub const INVOKE_AFTER_HEADER_LEN: usize = 4 + 8;

/// Maximum size in bytes of a single packet, container included.
/// Telegram will close the connection if the payload is bigger.
pub const MAXIMUM_SIZE: usize = 1_044_456;

/// Maximum amount of messages that can be sent inside a single container,
/// inclusive. Beyond this limit Telegram responds with bad message `64`.
///
/// The limit is not exact and may in some cases be higher, but it also
/// depends on things we cannot know, so stay on the conservative side.
pub const MAXIMUM_LENGTH: usize = 100;

/// ```tl
/// msg_container#73f1f8dc messages:vector<message> = MessageContainer;
/// ```
pub const MSG_CONTAINER_ID: u32 = 0x73f1f8dc;

/// ```tl
/// invokeAfterMsg#cb9f372d {X:Type} msg_id:long query:!X = X;
/// ```
pub const INVOKE_AFTER_MSG_ID: u32 = 0xcb9f372d;

/// The collaborator that assigns identifiers and sequence numbers, and knows
/// how a single message is laid out in the buffer.
///
/// Implementations own all session-wide counters. Nothing in this library
/// keeps them in globals.
pub trait Sequencer {
    /// Generates a new message identifier, strictly greater than any previous one.
    fn next_msg_id(&mut self) -> MsgId;

    /// Generates the next sequence number, depending on whether the message
    /// is content-related (and so requires acknowledgement) or not.
    fn next_seq_no(&mut self, content_related: bool) -> i32;

    /// How many bytes [`Sequencer::write_entry`] adds around a body.
    fn entry_overhead(&self, after: Option<MsgId>) -> usize;

    /// Writes `body` as a message into `buffer` and returns the identifier it was given.
    ///
    /// If `after` is present, the message must only be processed by the
    /// server once the message with that identifier has been.
    fn write_entry(
        &mut self,
        buffer: &mut BytesMut,
        body: &[u8],
        content_related: bool,
        after: Option<MsgId>,
    ) -> MsgId;
}

/// The default [`Sequencer`], generating time-based message identifiers.
pub struct MsgSequencer {
    /// The time offset from the server's time, in seconds.
    time_offset: i32,

    /// The current message sequence number.
    sequence: i32,

    /// The ID of the last message.
    last_msg_id: i64,
}

#[allow(clippy::new_without_default)]
impl MsgSequencer {
    pub fn new() -> Self {
        Self::with_time_offset(0)
    }

    /// Creates a sequencer that already knows how far off the local clock is.
    pub fn with_time_offset(time_offset: i32) -> Self {
        Self {
            time_offset,
            sequence: 0,
            last_msg_id: 0,
        }
    }

    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    /// Correct our time offset based on a known valid message ID.
    pub fn correct_time_offset(&mut self, msg_id: MsgId) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch")
            .as_secs() as i32;

        let correct = (msg_id.0 >> 32) as i32;
        self.time_offset = correct - now;
    }

    /// Forget the sequence, as if a new session was started.
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.last_msg_id = 0;
    }
}

impl Sequencer for MsgSequencer {
    fn next_msg_id(&mut self) -> MsgId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");

        let seconds = (now.as_secs() as i32 + self.time_offset) as u64;
        let nanoseconds = now.subsec_nanos() as u64;
        let mut new_msg_id = ((seconds << 32) | (nanoseconds << 2)) as i64;

        if self.last_msg_id >= new_msg_id {
            new_msg_id = self.last_msg_id + 4;
        }

        self.last_msg_id = new_msg_id;
        MsgId(new_msg_id)
    }

    fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            self.sequence += 2;
            self.sequence - 1
        } else {
            self.sequence
        }
    }

    fn entry_overhead(&self, after: Option<MsgId>) -> usize {
        MESSAGE_HEADER_LEN + after.map_or(0, |_| INVOKE_AFTER_HEADER_LEN)
    }

    fn write_entry(
        &mut self,
        buffer: &mut BytesMut,
        body: &[u8],
        content_related: bool,
        after: Option<MsgId>,
    ) -> MsgId {
        let msg_id = self.next_msg_id();
        let seq_no = self.next_seq_no(content_related);
        let len = body.len() + after.map_or(0, |_| INVOKE_AFTER_HEADER_LEN);

        buffer.reserve(MESSAGE_HEADER_LEN + len);
        buffer.put_i64_le(msg_id.0);
        buffer.put_i32_le(seq_no);
        buffer.put_i32_le(len as i32);
        if let Some(after) = after {
            buffer.put_u32_le(INVOKE_AFTER_MSG_ID);
            buffer.put_i64_le(after.0);
        }
        buffer.put_slice(body);

        msg_id
    }
}

/// Writes the constructor and length of a container holding `count` messages.
pub fn write_container_header(buffer: &mut [u8], count: usize) {
    buffer[..4].copy_from_slice(&MSG_CONTAINER_ID.to_le_bytes());
    buffer[4..CONTAINER_HEADER_LEN].copy_from_slice(&(count as i32).to_le_bytes());
}
