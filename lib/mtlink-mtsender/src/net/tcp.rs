// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use log::info;
use std::future::Future;
use std::io;
use tokio::net::TcpStream;

use super::{Connector, ServerAddr};

/// Connects to a [`ServerAddr`] over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: ServerAddr,
}

impl TcpConnector {
    pub fn new(addr: ServerAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = Result<TcpStream, io::Error>> + Send {
        let addr = self.addr.clone();
        async move {
            info!("connecting to {addr:?}...");
            match addr {
                ServerAddr::Tcp { address } => {
                    let stream = TcpStream::connect(address).await?;
                    stream.set_nodelay(true)?;
                    Ok(stream)
                }
            }
        }
    }
}
