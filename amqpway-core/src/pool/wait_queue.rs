use crate::pool::Session;
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WaiterId(u64);

/// Single-slot delivery point. Dropping the sender without a value tells the
/// waiter to retry.
type Slot = oneshot::Sender<Session>;

/// FIFO of callers blocked on a free session, ordered by [`WaiterId`].
///
/// Every slot receives at most one delivery and leaves the queue the moment it
/// is fulfilled, woken, cancelled or drained.
#[derive(Debug, Default)]
pub struct WaitQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    slots: VecDeque<(WaiterId, Slot)>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new waiter at the tail.
    pub fn put(&self) -> (WaiterId, oneshot::Receiver<Session>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = lock(&self.inner);
        let id = WaiterId(inner.next_id);
        inner.next_id += 1;
        inner.slots.push_back((id, tx));
        (id, rx)
    }

    /// Put a woken waiter that found no capacity back in line, ahead of
    /// everyone who registered after it.
    pub fn requeue(&self, id: WaiterId) -> oneshot::Receiver<Session> {
        let (tx, rx) = oneshot::channel();
        let mut inner = lock(&self.inner);
        let pos = inner.slots.partition_point(|(other, _)| *other < id);
        inner.slots.insert(pos, (id, tx));
        rx
    }

    /// Hand `session` to the longest-waiting caller.
    ///
    /// Waiters that went away are skipped. When nobody is left the session is
    /// handed back.
    pub fn notify_one(&self, session: Session) -> Result<(), Session> {
        let mut inner = lock(&self.inner);
        let mut session = session;

        while let Some((_, slot)) = inner.slots.pop_front() {
            match slot.send(session) {
                Ok(()) => return Ok(()),
                Err(returned) => session = returned,
            }
        }

        Err(session)
    }

    /// Tell the longest-waiting live caller to retry without giving it a session.
    pub fn wake_one(&self) -> bool {
        let mut inner = lock(&self.inner);

        while let Some((_, slot)) = inner.slots.pop_front() {
            if !slot.is_closed() {
                return true;
            }
        }

        false
    }

    /// Close every slot without a value.
    pub fn notify_all(&self) {
        lock(&self.inner).slots.clear();
    }

    /// Remove a waiter that gave up. False when it was already popped, in
    /// which case its receiver holds whatever was delivered.
    pub fn cancel(&self, id: WaiterId) -> bool {
        let mut inner = lock(&self.inner);
        match inner.slots.iter().position(|(slot_id, _)| *slot_id == id) {
            Some(pos) => {
                inner.slots.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
