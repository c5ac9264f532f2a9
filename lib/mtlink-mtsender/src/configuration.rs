// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtlink_mtproto::mtp;

/// The maximum data that we're willing to receive at once.
///
/// By having a fixed-size buffer, we can avoid unnecessary allocations
/// and trivially prevent allocating more than this limit if we ever
/// received invalid data.
///
/// Servers close the connection with roughly a megabyte of data, so to
/// account for the transports' own overhead, we add a few extra
/// kilobytes to the maximum data size.
pub(crate) const MAXIMUM_DATA: usize = (1024 * 1024) + (8 * 1024);

/// Connection parameters used whenever a new connection is initialized.
#[derive(Clone, Debug)]
pub struct ConnectionParams {
    /// Maximum size, in bytes, of a single batch handed to the transport.
    pub max_size: usize,
    /// Maximum amount of requests folded into a single container.
    pub max_entries: usize,
    /// Size of the buffer inbound packets are accumulated in. No packet
    /// larger than this can be received.
    pub read_buffer_size: usize,
    #[doc(hidden)]
    pub __non_exhaustive: (),
}

/// Hard limits a [`crate::RequestBatcher`] respects when producing batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_size: usize,
    pub max_entries: usize,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            max_size: mtp::MAXIMUM_SIZE,
            max_entries: mtp::MAXIMUM_LENGTH,
            read_buffer_size: MAXIMUM_DATA,
            __non_exhaustive: (),
        }
    }
}

impl ConnectionParams {
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_size: self.max_size,
            max_entries: self.max_entries,
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        ConnectionParams::default().batch_limits()
    }
}
