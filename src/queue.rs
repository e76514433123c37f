//! Bounded thread-safe FIFO shared between the reactor and its workers.
//!
//! Two roles, one type: the per-worker task queue (blocking pop,
//! non-blocking bounded push) and the response queue, which additionally
//! carries an eventfd handle so a push from a worker thread wakes the
//! reactor parked in `epoll_wait`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex};

use crate::syscalls::{self, RawFd};

struct Inner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

pub struct SharedQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    capacity: usize,
    event_fd: AtomicI32,
}

impl<T> SharedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                stopped: false,
            }),
            cond: Condvar::new(),
            capacity,
            event_fd: AtomicI32::new(-1),
        }
    }

    /// Attach the reactor's wakeup descriptor. Subsequent pushes (and the
    /// final stop) write to it.
    pub fn set_event_fd(&self, fd: RawFd) {
        self.event_fd.store(fd, Ordering::Release);
    }

    /// Non-blocking bounded push. On overflow the item comes back to the
    /// caller so it can be answered with a back-pressure response.
    pub fn push(&self, item: T) -> Result<(), T> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.items.len() >= self.capacity {
                return Err(item);
            }
            inner.items.push_back(item);
        }
        self.cond.notify_one();
        self.signal();
        Ok(())
    }

    /// Block until an item is available. Returns `None` once the queue has
    /// been stopped and drained.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.stopped {
                return None;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Move every queued item into `target` without blocking.
    pub fn drain_to(&self, target: &mut Vec<T>) {
        let mut inner = self.inner.lock().unwrap();
        target.extend(inner.items.drain(..));
    }

    /// Wake all waiters; future pops return `None` once drained. Also
    /// signals the event descriptor so a parked reactor notices shutdown.
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.stopped = true;
        }
        self.cond.notify_all();
        self.signal();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn signal(&self) {
        let fd = self.event_fd.load(Ordering::Acquire);
        if fd >= 0 {
            syscalls::eventfd_notify(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = SharedQueue::new(8);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.wait_and_pop(), Some(1));
        assert_eq!(q.wait_and_pop(), Some(2));
        assert_eq!(q.wait_and_pop(), Some(3));
    }

    #[test]
    fn push_fails_at_capacity_and_recovers_after_pop() {
        let q = SharedQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.push(3), Err(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.wait_and_pop(), Some(1));
        assert!(q.push(3).is_ok());
    }

    #[test]
    fn stop_wakes_blocked_consumer() {
        let q = Arc::new(SharedQueue::<u32>::new(4));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.wait_and_pop());
        thread::sleep(Duration::from_millis(50));
        q.stop();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn stopped_queue_drains_remaining_items() {
        let q = SharedQueue::new(4);
        q.push("a").unwrap();
        q.stop();
        assert_eq!(q.wait_and_pop(), Some("a"));
        assert_eq!(q.wait_and_pop(), None);
    }

    #[test]
    fn push_signals_event_fd() {
        let ev = crate::syscalls::EventFd::new().unwrap();
        let epoll = crate::syscalls::Epoll::new().unwrap();
        epoll.add(ev.raw(), crate::syscalls::READABLE).unwrap();

        let q = SharedQueue::new(4);
        q.set_event_fd(ev.raw());
        q.push(7u8).unwrap();

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; 4];
        assert_eq!(epoll.wait(&mut events, 1000).unwrap(), 1);
    }
}
