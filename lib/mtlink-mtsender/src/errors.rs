// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::task::Cancelled;
use mtlink_mtproto::transport;
use std::fmt;
use std::io;

/// The error type produced while moving bytes through the socket.
///
/// Any of these errors tears the connection down.
#[derive(Debug)]
pub enum NetError {
    /// Reading from the socket failed.
    Read(io::Error),

    /// Writing to the socket failed.
    Write(io::Error),

    /// The bytes involved did not form a valid transport packet.
    Transport(transport::Error),
}

impl std::error::Error for NetError {}

fn clone_io(e: &io::Error) -> io::Error {
    e.raw_os_error()
        .map(io::Error::from_raw_os_error)
        .unwrap_or_else(|| io::Error::new(e.kind(), e.to_string()))
}

impl Clone for NetError {
    fn clone(&self) -> Self {
        match self {
            Self::Read(e) => Self::Read(clone_io(e)),
            Self::Write(e) => Self::Write(clone_io(e)),
            Self::Transport(e) => Self::Transport(e.clone()),
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "read error, IO failed: {err}"),
            Self::Write(err) => write!(f, "write error, IO failed: {err}"),
            Self::Transport(err) => write!(f, "net error, transport-level: {err}"),
        }
    }
}

impl From<transport::Error> for NetError {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}

/// This error occurs when a request could not be delivered, or its
/// result will never arrive.
#[derive(Clone, Debug)]
pub enum InvocationError {
    /// The operation was cancelled by whoever was waiting on it.
    Cancelled,

    /// The connection was not established, or dropped while waiting.
    NotConnected,

    /// The request alone exceeds the maximum packet size and can never be sent.
    PayloadTooLarge { len: usize, max: usize },

    /// The transport cannot frame the payload, so it was never enqueued.
    InvalidPayload(transport::Error),

    /// The connection failed while the request was in flight.
    Net(NetError),

    /// The request was dropped, and the results won't arrive.
    Dropped,
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "request error: cancelled"),
            Self::NotConnected => write!(f, "request error: not connected"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "request error: payload too large ({len} > {max} bytes)")
            }
            Self::InvalidPayload(err) => write!(f, "request error: invalid payload: {err}"),
            Self::Net(err) => write!(f, "request error: {err}"),
            Self::Dropped => write!(f, "request error: dropped"),
        }
    }
}

impl From<Cancelled> for InvocationError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<NetError> for InvocationError {
    fn from(error: NetError) -> Self {
        Self::Net(error)
    }
}

impl InvocationError {
    /// Whether the error only means someone stopped waiting, rather than a failure.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
