// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
mod tcp;

use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

pub use tcp::TcpConnector;

#[derive(Debug, Clone)]
pub enum ServerAddr {
    Tcp { address: std::net::SocketAddr },
}

/// Opens the byte streams a [`crate::Connection`] runs over.
///
/// Each call to `connect` must produce a brand new stream.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, io::Error>> + Send;
}
