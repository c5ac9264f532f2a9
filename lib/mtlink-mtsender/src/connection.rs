// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::batcher::RequestBatcher;
use crate::configuration::ConnectionParams;
use crate::errors::{InvocationError, NetError};
use crate::framed::{FramedReader, FramedWriter};
use crate::net::Connector;
use crate::queue::AsyncQueue;
use crate::task::{CancelHandle, CancellableTask};
use log::{debug, info, trace, warn};
use mtlink_mtproto::mtp::Sequencer;
use mtlink_mtproto::transport::Transport;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// The lifecycle of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

type Rejector = Box<dyn Fn(InvocationError) -> usize + Send + Sync>;

struct Loops<S> {
    send: (CancelHandle, JoinHandle<FramedWriter<WriteHalf<S>>>),
    receive: (CancelHandle, JoinHandle<()>),
}

struct Status<S> {
    state: ConnectionState,
    loops: Option<Loops<S>>,
}

/// Everything the send and receive loops share with the connection.
struct Shared<T, S> {
    transport: Mutex<T>,
    status: Mutex<Status<S>>,
    outbound: AsyncQueue<Vec<u8>>,
    // `None` tells blocked receivers that the connection is gone.
    inbound: AsyncQueue<Option<Vec<u8>>>,
    rejector: Mutex<Option<Rejector>>,
}

/// Owns a socket, and moves payloads through it with a [`Transport`].
///
/// Once connected, two independent loops run in the background: one
/// writes the payloads given to [`Connection::send`], and the other reads
/// the packets handed out by [`Connection::receive`]. Any failure in either
/// of them disconnects, rejecting every request of the attached batcher.
pub struct Connection<T, C: Connector> {
    connector: C,
    params: ConnectionParams,
    shared: Arc<Shared<T, C::Stream>>,
}

impl<T, C> Connection<T, C>
where
    T: Transport + Send + 'static,
    C: Connector,
{
    pub fn new(transport: T, connector: C) -> Self {
        Self::with_params(transport, connector, ConnectionParams::default())
    }

    pub fn with_params(transport: T, connector: C, params: ConnectionParams) -> Self {
        Self {
            connector,
            params,
            shared: Arc::new(Shared::new(transport)),
        }
    }

    /// Reject everything tracked by `batcher` whenever this connection is torn down.
    pub fn with_batcher<S>(self, batcher: Arc<RequestBatcher<S>>) -> Self
    where
        S: Sequencer + Send + 'static,
    {
        *self.shared.rejector.lock().unwrap() =
            Some(Box::new(move |error| batcher.reject_all(error)));
        self
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Open the socket, initialize the transport, and start both loops.
    ///
    /// Fails if the connection is not [`ConnectionState::Disconnected`].
    pub async fn connect(&self) -> Result<(), io::Error> {
        {
            let mut status = self.shared.status.lock().unwrap();
            if status.state != ConnectionState::Disconnected {
                return Err(io::Error::other(format!(
                    "cannot connect while {:?}",
                    status.state
                )));
            }
            status.state = ConnectionState::Connecting;
        }

        info!("connecting...");
        let (reader, writer) = match self.open().await {
            Ok(halves) => halves,
            Err(err) => {
                warn!("failed to connect: {err}");
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        // Stale items belong to the previous connection.
        self.shared.outbound.clear();
        self.shared.inbound.clear();

        {
            let mut status = self.shared.status.lock().unwrap();
            let send_handle = CancelHandle::new();
            let receive_handle = CancelHandle::new();
            status.loops = Some(Loops {
                send: (
                    send_handle.clone(),
                    tokio::spawn(send_loop(Arc::clone(&self.shared), writer, send_handle)),
                ),
                receive: (
                    receive_handle.clone(),
                    tokio::spawn(receive_loop(
                        Arc::clone(&self.shared),
                        reader,
                        receive_handle,
                    )),
                ),
            });
            status.state = ConnectionState::Connected;
        }
        info!("connected");
        Ok(())
    }

    async fn open(
        &self,
    ) -> Result<
        (
            FramedReader<ReadHalf<C::Stream>>,
            FramedWriter<WriteHalf<C::Stream>>,
        ),
        io::Error,
    > {
        let stream = self.connector.connect().await?;
        let (reader, writer) = tokio::io::split(stream);
        let mut writer = FramedWriter::new(writer);
        writer.write_init(&self.shared.transport).await?;
        Ok((
            FramedReader::new(reader, self.params.read_buffer_size),
            writer,
        ))
    }

    /// Stop both loops and close the socket.
    ///
    /// Requests still tracked by the attached batcher are rejected with
    /// [`InvocationError::NotConnected`]. Does nothing unless connected.
    pub async fn disconnect(&self) {
        Arc::clone(&self.shared)
            .shutdown(InvocationError::NotConnected)
            .await;
    }

    /// Enqueue `payload` to be sent. Returns as soon as it is enqueued.
    ///
    /// Payloads the transport cannot frame are refused with
    /// [`InvocationError::InvalidPayload`] and never reach the send loop.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), InvocationError> {
        if self.state() != ConnectionState::Connected {
            return Err(InvocationError::NotConnected);
        }
        let checked = self.shared.transport.lock().unwrap().check_payload(&payload);
        if let Err(err) = checked {
            debug!("refusing to send {} bytes: {err}", payload.len());
            return Err(InvocationError::InvalidPayload(err));
        }
        trace!("enqueueing {} bytes to send", payload.len());
        self.shared.outbound.push(payload);
        Ok(())
    }

    /// Wait for the next inbound payload.
    ///
    /// Fails with [`InvocationError::NotConnected`] if the connection drops
    /// while waiting. Payloads that arrived before that are still delivered.
    pub fn receive(&self) -> CancellableTask<Vec<u8>, InvocationError> {
        if self.state() != ConnectionState::Connected && self.shared.inbound.is_empty() {
            return CancellableTask::ready(Err(InvocationError::NotConnected));
        }

        let shared = Arc::clone(&self.shared);
        CancellableTask::pseudo_wrap(async move {
            match shared.inbound.pop().await {
                Some(payload) => Ok(payload),
                None => {
                    // Leave the marker in place for any other receiver.
                    shared.inbound.push(None);
                    Err(InvocationError::NotConnected)
                }
            }
        })
    }
}

impl<T, S> Shared<T, S> {
    fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
            status: Mutex::new(Status {
                state: ConnectionState::Disconnected,
                loops: None,
            }),
            outbound: AsyncQueue::new(),
            inbound: AsyncQueue::new(),
            rejector: Mutex::new(None),
        }
    }
}

impl<T, S> Shared<T, S>
where
    T: Transport + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn state(&self) -> ConnectionState {
        self.status.lock().unwrap().state
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.lock().unwrap().state = state;
    }

    /// Tear the connection down from within one of the loops.
    fn fail(self: &Arc<Self>, error: NetError) {
        warn!("connection failed: {error}");
        tokio::spawn(Arc::clone(self).shutdown(InvocationError::Net(error)));
    }

    async fn shutdown(self: Arc<Self>, error: InvocationError) {
        let loops = {
            let mut status = self.status.lock().unwrap();
            if status.state != ConnectionState::Connected {
                return;
            }
            status.state = ConnectionState::Disconnecting;
            status.loops.take()
        };
        info!("disconnecting...");

        if let Some(Loops { send, receive }) = loops {
            send.0.cancel();
            receive.0.cancel();

            let writer = match send.1.await {
                Ok(writer) => Some(writer),
                Err(err) => {
                    warn!("send loop ended abnormally: {err}");
                    None
                }
            };
            if let Err(err) = receive.1.await {
                warn!("receive loop ended abnormally: {err}");
            }
            if let Some(mut writer) = writer {
                if let Err(err) = writer.shutdown().await {
                    warn!("failed to close the socket: {err}");
                }
            }
        }

        self.inbound.push(None);
        let rejected = self
            .rejector
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |reject| reject(error));
        if rejected != 0 {
            debug!("rejected {rejected} request(s) on disconnect");
        }

        self.set_state(ConnectionState::Disconnected);
        info!("disconnected");
    }
}

/// Drain the outbound queue into the socket until cancelled or failed.
///
/// The writer is always handed back, so that the socket can be closed.
async fn send_loop<T, S>(
    shared: Arc<Shared<T, S>>,
    mut writer: FramedWriter<WriteHalf<S>>,
    handle: CancelHandle,
) -> FramedWriter<WriteHalf<S>>
where
    T: Transport + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Only settles once the loop is cancelled.
    let mut stopped =
        CancellableTask::<(), InvocationError>::pseudo_wrap(std::future::pending());
    handle.link(stopped.cancel_handle());

    loop {
        let pop = CancellableTask::<_, InvocationError>::pseudo_wrap({
            let shared = Arc::clone(&shared);
            async move { Ok(shared.outbound.pop().await) }
        });
        handle.link(pop.cancel_handle());
        let Ok(payload) = pop.await else {
            debug!("send loop cancelled");
            return writer;
        };

        tokio::select! {
            result = writer.write_frame(&shared.transport, &payload) => {
                if let Err(err) = result {
                    shared.fail(err);
                    return writer;
                }
            }
            _ = &mut stopped => {
                debug!("send loop cancelled while writing");
                return writer;
            }
        }
    }
}

/// Deliver inbound packets to the inbound queue until cancelled or failed.
async fn receive_loop<T, S>(
    shared: Arc<Shared<T, S>>,
    mut reader: FramedReader<ReadHalf<S>>,
    handle: CancelHandle,
) where
    T: Transport + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let read = CancellableTask::<_, InvocationError>::pseudo_wrap({
            let shared = Arc::clone(&shared);
            async move {
                let result = reader.read_frame(&shared.transport).await;
                Ok((reader, result))
            }
        });
        handle.link(read.cancel_handle());
        match read.await {
            Ok((r, Ok(payload))) => {
                reader = r;
                trace!("received packet with {} bytes", payload.len());
                shared.inbound.push(Some(payload));
            }
            Ok((_, Err(err))) => {
                shared.inbound.push(None);
                shared.fail(err);
                return;
            }
            Err(_) => {
                debug!("receive loop cancelled");
                return;
            }
        }
    }
}
