// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::configuration::BatchLimits;
use crate::errors::InvocationError;
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use mtlink_mtproto::MsgId;
use mtlink_mtproto::mtp::{CONTAINER_HEADER_LEN, Sequencer, write_container_header};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Notify, oneshot};

/// The final result of a request: the response body, or why there is none.
pub type Outcome = Result<Vec<u8>, InvocationError>;

type OutcomeSlot = Arc<Mutex<Option<oneshot::Sender<Outcome>>>>;

/// Settle the outcome stored in `slot`, unless it was already settled.
fn settle(slot: &Mutex<Option<oneshot::Sender<Outcome>>>, outcome: Outcome) -> bool {
    match slot.lock().unwrap().take() {
        Some(tx) => {
            drop(tx.send(outcome));
            true
        }
        None => false,
    }
}

/// Identifies a request appended to a [`RequestBatcher`], so that later
/// requests can depend on it.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct RequestId(u64);

/// A request awaiting transport and response.
pub struct PendingRequest {
    body: Vec<u8>,
    depends_on: Option<RequestId>,
    msg_id: Option<MsgId>,
    container_msg_id: Option<MsgId>,
    outcome: OutcomeSlot,
}

impl PendingRequest {
    /// Create a request for `body`, along with the receiver of its outcome.
    pub fn new(body: Vec<u8>) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            body,
            depends_on: None,
            msg_id: None,
            container_msg_id: None,
            outcome: Arc::new(Mutex::new(Some(tx))),
        };
        (request, rx)
    }

    /// Require the server to process the request identified by `id` before this one.
    ///
    /// Only the sequencing is affected, the request keeps its place in the queue.
    pub fn after(mut self, id: RequestId) -> Self {
        self.depends_on = Some(id);
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn depends_on(&self) -> Option<RequestId> {
        self.depends_on
    }

    /// The message identifier assigned when the request was packed, if it was.
    pub fn msg_id(&self) -> Option<MsgId> {
        self.msg_id
    }

    /// The message identifier of the container the request was folded into, if any.
    pub fn container_msg_id(&self) -> Option<MsgId> {
        self.container_msg_id
    }

    /// Settle the outcome of this request.
    ///
    /// Returns `false` if the outcome had already been settled, in which
    /// case nothing happens.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        settle(&self.outcome, outcome)
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.lock().unwrap().is_none()
    }
}

/// A group of requests packed together, ready to be handed to the transport.
pub struct Batch {
    entries: Vec<PendingRequest>,
    encoded: Vec<u8>,
    msg_id: MsgId,
}

impl Batch {
    /// The requests in this batch, in the order they were appended.
    pub fn entries(&self) -> &[PendingRequest] {
        &self.entries
    }

    /// The bytes to send, wrapped in a container if there is more than one entry.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Identifier of the outermost message: the container's, or the only entry's.
    pub fn msg_id(&self) -> MsgId {
        self.msg_id
    }

    pub fn is_container(&self) -> bool {
        self.entries.len() > 1
    }

    pub fn into_parts(self) -> (Vec<PendingRequest>, Vec<u8>) {
        (self.entries, self.encoded)
    }
}

/// A request that was packed but not yet settled.
struct Packed {
    msg_id: MsgId,
    outcome: Weak<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl Packed {
    fn is_live(&self) -> bool {
        self.outcome
            .upgrade()
            .is_some_and(|slot| slot.lock().unwrap().is_some())
    }
}

struct BatcherState<S> {
    sequencer: S,
    queue: VecDeque<(RequestId, PendingRequest)>,
    packed: HashMap<RequestId, Packed>,
    next_id: u64,
}

/// Turns a FIFO queue of [`PendingRequest`] into [`Batch`]es respecting
/// the configured [`BatchLimits`].
pub struct RequestBatcher<S: Sequencer> {
    state: Mutex<BatcherState<S>>,
    notify: Notify,
    limits: BatchLimits,
}

impl<S: Sequencer> RequestBatcher<S> {
    pub fn new(sequencer: S, limits: BatchLimits) -> Self {
        Self {
            state: Mutex::new(BatcherState {
                sequencer,
                queue: VecDeque::new(),
                packed: HashMap::new(),
                next_id: 0,
            }),
            notify: Notify::new(),
            limits,
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Push a request to the tail of the queue, waking up a pending [`RequestBatcher::next`].
    pub fn append(&self, request: PendingRequest) -> RequestId {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = RequestId(state.next_id);
            state.next_id += 1;
            state.queue.push_back((id, request));
            id
        };
        self.notify.notify_one();
        id
    }

    /// Push every request to the tail of the queue, in order.
    pub fn extend<I: IntoIterator<Item = PendingRequest>>(&self, requests: I) -> Vec<RequestId> {
        let ids = {
            let mut state = self.state.lock().unwrap();
            requests
                .into_iter()
                .map(|request| {
                    let id = RequestId(state.next_id);
                    state.next_id += 1;
                    state.queue.push_back((id, request));
                    id
                })
                .collect::<Vec<_>>()
        };
        if !ids.is_empty() {
            self.notify.notify_one();
        }
        ids
    }

    /// How many requests are queued and not yet packed.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }

    /// Run `f` with exclusive access to the sequencer, for example to
    /// correct its time offset.
    pub fn with_sequencer<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock().unwrap().sequencer)
    }

    /// Wait until at least one request is queued, then pack a batch.
    ///
    /// Returns `None` if every candidate had to be rejected, rather than
    /// waiting again.
    pub async fn next(&self) -> Option<Batch> {
        loop {
            let notified = self.notify.notified();
            if !self.is_empty() {
                break;
            }
            notified.await;
        }
        self.try_next()
    }

    /// Pack as many queued requests as the limits allow, without waiting.
    ///
    /// Requests are taken strictly in queue order. The first request that
    /// does not fit ends the batch and stays at the front of the queue,
    /// even if a later one would have fit. A request that would not fit
    /// even on its own is rejected with [`InvocationError::PayloadTooLarge`].
    pub fn try_next(&self) -> Option<Batch> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.packed.retain(|_, packed| packed.is_live());

        let max_size = self.limits.max_size;
        let container_overhead = state.sequencer.entry_overhead(None) + CONTAINER_HEADER_LEN;

        let mut entries = Vec::new();
        let mut buffer = BytesMut::new();
        let mut size = 0;
        while entries.len() < self.limits.max_entries {
            let Some((id, mut request)) = state.queue.pop_front() else {
                break;
            };

            let after = request
                .depends_on
                .and_then(|dep| state.packed.get(&dep).map(|packed| packed.msg_id));
            if request.depends_on.is_some() && after.is_none() {
                debug!("dependency of request {id:?} already settled; sending it unordered");
            }

            let entry_size = request.body.len() + state.sequencer.entry_overhead(after);
            let projected = match entries.len() {
                0 => entry_size,
                1 => size + container_overhead + entry_size,
                _ => size + entry_size,
            };

            if projected > max_size {
                if entries.is_empty() {
                    warn!(
                        "rejecting request {id:?} of {} bytes: larger than {max_size} bytes",
                        request.body.len()
                    );
                    request.resolve(Err(InvocationError::PayloadTooLarge {
                        len: request.body.len(),
                        max: max_size,
                    }));
                    continue;
                }
                state.queue.push_front((id, request));
                break;
            }

            let msg_id = state
                .sequencer
                .write_entry(&mut buffer, &request.body, true, after);
            request.msg_id = Some(msg_id);
            state.packed.insert(
                id,
                Packed {
                    msg_id,
                    outcome: Arc::downgrade(&request.outcome),
                },
            );
            size = projected;
            entries.push(request);
        }

        let (encoded, msg_id) = match entries.len() {
            0 => return None,
            1 => {
                let msg_id = entries[0].msg_id?;
                (buffer, msg_id)
            }
            n => {
                let mut body = BytesMut::with_capacity(CONTAINER_HEADER_LEN + buffer.len());
                body.put_bytes(0, CONTAINER_HEADER_LEN);
                write_container_header(&mut body, n);
                body.put_slice(&buffer);

                let mut encoded = BytesMut::with_capacity(size);
                let msg_id = state
                    .sequencer
                    .write_entry(&mut encoded, &body, false, None);
                for entry in entries.iter_mut() {
                    entry.container_msg_id = Some(msg_id);
                }
                (encoded, msg_id)
            }
        };
        debug_assert_eq!(encoded.len(), size);
        debug!(
            "packed {} request(s) into {} bytes with {:?}",
            entries.len(),
            encoded.len(),
            msg_id
        );

        Some(Batch {
            entries,
            encoded: encoded.to_vec(),
            msg_id,
        })
    }

    /// Fail every request this batcher still holds or tracks, returning how many were rejected.
    ///
    /// This covers both the queued requests and those already packed into
    /// a batch whose outcome is still unsettled.
    pub fn reject_all(&self, error: InvocationError) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut rejected = 0;

        for (_, request) in state.queue.drain(..) {
            if request.resolve(Err(error.clone())) {
                rejected += 1;
            }
        }
        for (_, packed) in state.packed.drain() {
            if let Some(slot) = packed.outcome.upgrade() {
                if settle(&slot, Err(error.clone())) {
                    rejected += 1;
                }
            }
        }

        if rejected != 0 {
            warn!("marked {rejected} request(s) as failed: {error}");
        }
        rejected
    }
}
