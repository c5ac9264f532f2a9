// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::errors::NetError;
use bytes::BytesMut;
use log::trace;
use mtlink_mtproto::transport::{self, Transport};
use std::io;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Pulls bytes from a reader until the transport finds a complete packet.
pub struct FramedReader<R> {
    reader: R,
    buffer: Vec<u8>,
    tail: usize,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// `capacity` bounds the largest packet that can ever be read.
    pub fn new(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: vec![0; capacity],
            tail: 0,
        }
    }

    /// Read and decode the next packet, returning its payload.
    ///
    /// Bytes past the end of the packet are kept for the next call.
    pub async fn read_frame<T: Transport>(
        &mut self,
        transport: &Mutex<T>,
    ) -> Result<Vec<u8>, NetError> {
        loop {
            if self.tail != 0 {
                let unpacked = transport
                    .lock()
                    .unwrap()
                    .unpack(&mut self.buffer[..self.tail]);

                match unpacked {
                    Ok(offset) => {
                        let payload = self.buffer[offset.data_range].to_vec();
                        self.buffer.copy_within(offset.next_offset..self.tail, 0);
                        self.tail -= offset.next_offset;
                        trace!("unpacked packet with {} bytes of payload", payload.len());
                        return Ok(payload);
                    }
                    Err(transport::Error::MissingBytes) => {}
                    Err(err) => return Err(err.into()),
                }
            }

            if self.tail == self.buffer.len() {
                return Err(NetError::Transport(transport::Error::BadLen {
                    got: self.tail as i32,
                }));
            }

            let n = self
                .reader
                .read(&mut self.buffer[self.tail..])
                .await
                .map_err(NetError::Read)?;
            if n == 0 {
                return Err(NetError::Read(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "read 0 bytes",
                )));
            }
            trace!("read {} bytes from the network", n);
            self.tail += n;
        }
    }
}

/// Encodes payloads with a transport and writes them out.
pub struct FramedWriter<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: BytesMut::new(),
        }
    }

    /// Reset the transport and write whatever must precede the first packet.
    pub async fn write_init<T: Transport>(&mut self, transport: &Mutex<T>) -> io::Result<()> {
        self.buffer.clear();
        transport.lock().unwrap().init(&mut self.buffer);
        self.write_buffer().await
    }

    /// Encode `payload` and write it out.
    ///
    /// A payload the transport refuses is reported before anything is written.
    pub async fn write_frame<T: Transport>(
        &mut self,
        transport: &Mutex<T>,
        payload: &[u8],
    ) -> Result<(), NetError> {
        self.buffer.clear();
        transport.lock().unwrap().pack(payload, &mut self.buffer)?;
        self.write_buffer().await.map_err(NetError::Write)
    }

    async fn write_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.buffer).await?;
        self.writer.flush().await?;
        trace!("written {} bytes to the network", self.buffer.len());
        Ok(())
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
