/// Indexed binary min-heap. Entries keep a stable index for O(log n)
/// removal and reprioritization from outside the heap order.
pub struct IndexedHeap<T: PartialOrd> {
    data: Vec<Option<T>>,
    heap: Vec<usize>,
    pos: Vec<Option<usize>>,
    free: Vec<usize>,
}

impl<T: PartialOrd> IndexedHeap<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            heap: Vec::new(),
            pos: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx < self.data.len() && self.data[idx].is_some()
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.data.get(idx).and_then(|slot| slot.as_ref())
    }

    /// Inserts a value and returns its stable index.
    pub fn push(&mut self, value: T) -> usize {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.data[idx] = Some(value);
                self.pos[idx] = Some(self.heap.len());
                idx
            }
            None => {
                self.data.push(Some(value));
                self.pos.push(Some(self.heap.len()));
                self.data.len() - 1
            }
        };
        self.heap.push(idx);
        self.sift_up(self.heap.len() - 1);
        idx
    }

    /// Smallest value with its stable index, without removing.
    pub fn peek(&self) -> Option<(usize, &T)> {
        let idx = *self.heap.first()?;
        Some((idx, self.data[idx].as_ref()?))
    }

    pub fn pop(&mut self) -> Option<(usize, T)> {
        let idx = *self.heap.first()?;
        self.remove(idx).map(|value| (idx, value))
    }

    /// Removes an arbitrary entry by stable index.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        let hole = self.pos.get(idx).copied().flatten()?;
        let value = self.data[idx].take()?;
        self.pos[idx] = None;
        self.free.push(idx);

        let last = self.heap.len() - 1;
        self.heap.swap_remove(hole);
        if hole != last {
            let moved = self.heap[hole];
            self.pos[moved] = Some(hole);
            self.sift_up(hole);
            self.sift_down(hole);
        }
        Some(value)
    }

    /// Restores heap order after the value at `idx` changed in place.
    pub fn reprioritize(&mut self, idx: usize) -> bool {
        let Some(hole) = self.pos.get(idx).copied().flatten() else {
            return false;
        };
        self.sift_up(hole);
        if let Some(hole) = self.pos[idx] {
            self.sift_down(hole);
        }
        true
    }

    fn less(&self, a: usize, b: usize) -> bool {
        match (&self.data[self.heap[a]], &self.data[self.heap[b]]) {
            (Some(x), Some(y)) => x < y,
            _ => false,
        }
    }

    fn sift_up(&mut self, mut at: usize) {
        while at > 0 {
            let parent = (at - 1) / 2;
            if !self.less(at, parent) {
                break;
            }
            self.swap_heap(at, parent);
            at = parent;
        }
    }

    fn sift_down(&mut self, mut at: usize) {
        let n = self.heap.len();
        loop {
            let left = at * 2 + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, at) {
                break;
            }
            self.swap_heap(at, child);
            at = child;
        }
    }

    fn swap_heap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos[self.heap[a]] = Some(a);
        self.pos[self.heap[b]] = Some(b);
    }
}

impl<T: PartialOrd> Default for IndexedHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type TimerId = usize;

/// A pending timer: absolute expiry plus the tag and scalar handed back
/// to the actor when it fires.
#[derive(Debug, Copy, Clone)]
pub struct TimerEntry {
    pub expire_us: u64,
    pub kind: u32,
    pub ctx: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expire_us == other.expire_us
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.expire_us.partial_cmp(&other.expire_us)
    }
}

/// Per-actor timer set. Single-threaded, owned by the actor's host loop.
#[derive(Default)]
pub struct TimerHeap {
    heap: IndexedHeap<TimerEntry>,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn add_us(&mut self, expire_us: u64, kind: u32, ctx: u64) -> TimerId {
        self.heap.push(TimerEntry {
            expire_us,
            kind,
            ctx,
        })
    }

    pub fn del(&mut self, id: TimerId) -> bool {
        self.heap.remove(id).is_some()
    }

    /// Moves an existing timer to a new absolute expiry.
    pub fn change_us(&mut self, id: TimerId, expire_us: u64) -> bool {
        if !self.heap.contains(id) {
            return false;
        }
        if let Some(slot) = self.heap.data.get_mut(id).and_then(|s| s.as_mut()) {
            slot.expire_us = expire_us;
        }
        self.heap.reprioritize(id)
    }

    pub fn is_valid(&self, id: TimerId) -> bool {
        self.heap.contains(id)
    }

    pub fn next_expiry(&self) -> Option<u64> {
        self.heap.peek().map(|(_, e)| e.expire_us)
    }

    /// Pops the earliest timer if it is due at `now_us`.
    pub fn pop_due(&mut self, now_us: u64) -> Option<(TimerId, TimerEntry)> {
        let (_, entry) = self.heap.peek()?;
        if entry.expire_us > now_us {
            return None;
        }
        self.heap.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small deterministic generator, enough to shuffle priorities.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }
    }

    #[test]
    fn pops_in_expiry_order() {
        let mut heap = TimerHeap::new();
        let mut rng = Lcg(42);
        for _ in 0..200 {
            let t = rng.next() % 10_000;
            heap.add_us(t, 0, t);
        }
        let mut last = 0;
        while let Some((_, entry)) = heap.pop_due(u64::MAX) {
            assert!(entry.expire_us >= last);
            last = entry.expire_us;
        }
        assert!(heap.is_empty());
    }

    #[test]
    fn remove_keeps_min_property() {
        let mut heap = TimerHeap::new();
        let mut rng = Lcg(7);
        let mut ids = Vec::new();
        for _ in 0..128 {
            let t = rng.next() % 1_000;
            ids.push(heap.add_us(t, 0, 0));
        }
        // Drop every third timer, then verify order of the rest.
        for (i, id) in ids.iter().enumerate() {
            if i % 3 == 0 {
                assert!(heap.del(*id));
                assert!(!heap.is_valid(*id));
            }
        }
        let mut last = 0;
        while let Some((_, entry)) = heap.pop_due(u64::MAX) {
            assert!(entry.expire_us >= last);
            last = entry.expire_us;
        }
    }

    #[test]
    fn change_moves_timer_both_directions() {
        let mut heap = TimerHeap::new();
        let a = heap.add_us(100, 1, 0);
        let b = heap.add_us(200, 2, 0);
        let c = heap.add_us(300, 3, 0);

        assert!(heap.change_us(c, 50));
        assert!(heap.change_us(a, 400));
        assert_eq!(heap.pop_due(u64::MAX).map(|(id, _)| id), Some(c));
        assert_eq!(heap.pop_due(u64::MAX).map(|(id, _)| id), Some(b));
        assert_eq!(heap.pop_due(u64::MAX).map(|(id, _)| id), Some(a));
    }

    #[test]
    fn pop_due_respects_now() {
        let mut heap = TimerHeap::new();
        heap.add_us(100, 1, 0);
        heap.add_us(200, 2, 0);
        assert!(heap.pop_due(50).is_none());
        assert_eq!(heap.pop_due(150).map(|(_, e)| e.kind), Some(1));
        assert!(heap.pop_due(150).is_none());
        assert_eq!(heap.pop_due(250).map(|(_, e)| e.kind), Some(2));
    }

    #[test]
    fn ids_are_recycled_safely() {
        let mut heap = TimerHeap::new();
        let a = heap.add_us(10, 1, 0);
        heap.del(a);
        let b = heap.add_us(20, 2, 0);
        // Slot reuse is fine as long as the stale handle resolves to the
        // live entry only after re-insertion.
        assert_eq!(a, b);
        assert!(heap.is_valid(b));
        assert_eq!(heap.pop_due(u64::MAX).map(|(_, e)| e.kind), Some(2));
    }
}
