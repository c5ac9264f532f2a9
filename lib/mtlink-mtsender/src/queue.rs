// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// An unbounded FIFO queue whose `pop` waits until an item is available.
///
/// Every push wakes at most one waiting pop.
pub struct AsyncQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.notify.notify_one();
    }

    /// Remove the item at the front of the queue, waiting for one if empty.
    ///
    /// Dropping the returned future before it completes leaves the queue untouched.
    pub async fn pop(&self) -> T {
        loop {
            // Must be created before checking, or a push in between would be missed.
            let notified = self.notify.notified();
            let item = self.items.lock().unwrap().pop_front();
            if let Some(item) = item {
                return item;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Drop every queued item, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock().unwrap();
        let len = items.len();
        items.clear();
        len
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
