// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![deny(unsafe_code)]

//! Connection management on top of [`mtlink_mtproto`].
//!
//! A [`Connection`] owns the socket and runs the send and receive loops,
//! a [`RequestBatcher`] folds queued requests into containers that fit the
//! configured limits, and the [`task`] module provides the cancellable
//! futures every potentially long operation is expressed with.
mod batcher;
mod configuration;
mod connection;
mod errors;
mod framed;
pub mod net;
mod queue;
pub mod task;

pub use batcher::{Batch, Outcome, PendingRequest, RequestBatcher, RequestId};
pub use configuration::{BatchLimits, ConnectionParams};
pub use connection::{Connection, ConnectionState};
pub use errors::{InvocationError, NetError};
pub use framed::{FramedReader, FramedWriter};
pub use queue::AsyncQueue;
pub use task::{CancelHandle, CancellableTask, Cancelled};
