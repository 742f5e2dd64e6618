use parking_lot::Mutex;

use crate::error::SendError;

/// Fixed-capacity MPSC ring. One slot stays sacrificial so full/empty are
/// distinguishable by index comparison alone; a mailbox built with
/// capacity N stores N-1 messages.
pub struct Mailbox<T> {
    inner: Mutex<Ring<T>>,
}

struct Ring<T> {
    slots: Box<[Option<T>]>,
    front: usize,
    back: usize,
}

impl<T> Mailbox<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let n = capacity.max(2);
        let mut slots = Vec::with_capacity(n);
        slots.resize_with(n, || None);
        Self {
            inner: Mutex::new(Ring {
                slots: slots.into_boxed_slice(),
                front: 0,
                back: 0,
            }),
        }
    }

    /// Enqueues a message. When full, the message comes back inside the
    /// error instead of being dropped.
    pub fn push(&self, value: T) -> Result<(), SendError<T>> {
        let mut ring = self.inner.lock();
        let n = ring.slots.len();
        let next = (ring.back + 1) % n;
        if next == ring.front {
            return Err(SendError::full(Some(value)));
        }
        let back = ring.back;
        ring.slots[back] = Some(value);
        ring.back = next;
        Ok(())
    }

    pub fn pop(&self) -> Option<T> {
        let mut ring = self.inner.lock();
        if ring.front == ring.back {
            return None;
        }
        let front = ring.front;
        let value = ring.slots[front].take();
        ring.front = (front + 1) % ring.slots.len();
        value
    }

    /// Drains up to `max` messages into `out` under a single lock.
    /// Returns the number moved.
    pub fn pop_batch(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut ring = self.inner.lock();
        let n = ring.slots.len();
        let mut moved = 0;
        while moved < max && ring.front != ring.back {
            let front = ring.front;
            if let Some(value) = ring.slots[front].take() {
                out.push(value);
                moved += 1;
            }
            ring.front = (front + 1) % n;
        }
        moved
    }

    pub fn len(&self) -> usize {
        let ring = self.inner.lock();
        let n = ring.slots.len();
        (ring.back + n - ring.front) % n
    }

    pub fn is_empty(&self) -> bool {
        let ring = self.inner.lock();
        ring.front == ring.back
    }

    pub fn is_full(&self) -> bool {
        let ring = self.inner.lock();
        (ring.back + 1) % ring.slots.len() == ring.front
    }

    /// Usable capacity, one less than the allocated ring.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mb = Mailbox::with_capacity(8);
        for i in 0..5 {
            mb.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(mb.pop(), Some(i));
        }
        assert_eq!(mb.pop(), None);
    }

    #[test]
    fn holds_capacity_minus_one() {
        let mb = Mailbox::with_capacity(4);
        assert_eq!(mb.capacity(), 3);
        for i in 0..3 {
            mb.push(i).unwrap();
        }
        assert!(mb.is_full());
        let err = mb.push(99).unwrap_err();
        assert_eq!(err.value, Some(99));
        mb.pop();
        assert!(mb.push(99).is_ok());
    }

    #[test]
    fn batch_pop_respects_max() {
        let mb = Mailbox::with_capacity(32);
        for i in 0..20 {
            mb.push(i).unwrap();
        }
        let mut out = Vec::new();
        assert_eq!(mb.pop_batch(&mut out, 16), 16);
        assert_eq!(out, (0..16).collect::<Vec<_>>());
        assert_eq!(mb.pop_batch(&mut out, 16), 4);
        assert_eq!(mb.len(), 0);
    }

    #[test]
    fn wraps_around() {
        let mb = Mailbox::with_capacity(4);
        for round in 0..10 {
            mb.push(round * 2).unwrap();
            mb.push(round * 2 + 1).unwrap();
            assert_eq!(mb.pop(), Some(round * 2));
            assert_eq!(mb.pop(), Some(round * 2 + 1));
        }
        assert!(mb.is_empty());
    }
}
