//! Request Dispatcher
//!
//! Caps the number of requests in flight. A bounded channel pre-filled with
//! one token per slot acts as a counting semaphore: the decode loop takes a
//! token before spawning a worker and the worker hands it back when it
//! drops its [`Slot`]. Workers run on crossbeam scoped threads, so leaving
//! the scope joins every accepted request.

use crossbeam::channel::{bounded, Receiver, Sender};

/// Bounded pool of worker slots
pub struct Dispatcher {
    capacity: usize,
    release: Sender<()>,
    acquire: Receiver<()>,
}

impl Dispatcher {
    /// Create a dispatcher allowing `capacity` concurrent workers (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (release, acquire) = bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel has room for every token and we hold
            // the receiver.
            let _ = release.send(());
        }
        Self {
            capacity,
            release,
            acquire,
        }
    }

    /// Block until a slot is free and claim it
    pub fn acquire(&self) -> Slot {
        // We hold a sender, so the channel never disconnects and recv only
        // returns once a token is available.
        let _ = self.acquire.recv();
        Slot {
            release: self.release.clone(),
        }
    }

    /// Claim a slot without blocking, if one is free
    #[cfg(test)]
    pub(crate) fn try_acquire(&self) -> Option<Slot> {
        self.acquire.try_recv().ok().map(|()| Slot {
            release: self.release.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently claimed
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.capacity - self.acquire.len()
    }
}

/// A claimed worker slot, released on drop
pub struct Slot {
    release: Sender<()>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let _ = self.release.send(());
    }
}
