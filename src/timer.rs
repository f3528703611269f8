use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Key of a timer node; the reactor uses the connection id
pub type TimerId = u64;

/// Callback run when a timer expires or is cancelled
pub type TimeoutCallback = Box<dyn FnOnce() + Send + 'static>;

struct TimerNode {
    id: TimerId,
    deadline: Instant,
    callback: TimeoutCallback,
}

/// Binary min-heap of deadlines with an `id -> slot` side index, giving
/// O(log n) reschedule and cancellation by id.
pub struct TimerHeap {
    heap: Vec<TimerNode>,
    slots: HashMap<TimerId, usize>,
}

impl fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHeap")
            .field("len", &self.heap.len())
            .field("next_deadline", &self.heap.first().map(|node| node.deadline))
            .finish()
    }
}

impl TimerHeap {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Deadline currently scheduled for `id`
    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.slots.get(&id).map(|&slot| self.heap[slot].deadline)
    }

    /// Schedule `callback` to run `delay` from now.
    ///
    /// Scheduling an id that is already present replaces its deadline and
    /// callback; there is never more than one node per id.
    pub fn schedule<F>(&mut self, id: TimerId, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(id, Instant::now() + delay, callback);
    }

    pub fn schedule_at<F>(&mut self, id: TimerId, deadline: Instant, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.slots.get(&id).copied() {
            Some(slot) => {
                let node = &mut self.heap[slot];
                node.deadline = deadline;
                node.callback = Box::new(callback);
                self.reposition(slot);
            }
            None => {
                let slot = self.heap.len();
                self.slots.insert(id, slot);
                self.heap.push(TimerNode {
                    id,
                    deadline,
                    callback: Box::new(callback),
                });
                self.sift_up(slot);
            }
        }
    }

    /// Move an existing deadline to `delay` from now, keeping its callback.
    /// Returns false if `id` has no timer.
    pub fn adjust(&mut self, id: TimerId, delay: Duration) -> bool {
        match self.slots.get(&id).copied() {
            Some(slot) => {
                self.heap[slot].deadline = Instant::now() + delay;
                self.reposition(slot);
                true
            }
            None => false,
        }
    }

    /// Run and remove every timer whose deadline is at or before `now`.
    /// Returns how many fired.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(root) = self.heap.first() {
            if root.deadline > now {
                break;
            }
            let node = self.remove_slot(0);
            (node.callback)();
            fired += 1;
        }
        fired
    }

    /// Remove the timer for `id` and run its callback, exactly as an expiry
    /// would. Returns false if there was no timer.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.slots.get(&id).copied() {
            Some(slot) => {
                let node = self.remove_slot(slot);
                (node.callback)();
                true
            }
            None => false,
        }
    }

    /// Remove the timer for `id` without running its callback
    pub fn remove(&mut self, id: TimerId) -> bool {
        match self.slots.get(&id).copied() {
            Some(slot) => {
                self.remove_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Fire everything due at `now`, then report how long until the next
    /// deadline. `None` means no timer is pending.
    pub fn next_wait(&mut self, now: Instant) -> Option<Duration> {
        self.fire_due(now);
        self.heap
            .first()
            .map(|node| node.deadline.saturating_duration_since(now))
    }

    /// Drop every timer without running callbacks
    pub fn clear(&mut self) {
        self.heap.clear();
        self.slots.clear();
    }

    fn remove_slot(&mut self, slot: usize) -> TimerNode {
        let node = self.heap.swap_remove(slot);
        self.slots.remove(&node.id);

        if slot < self.heap.len() {
            self.slots.insert(self.heap[slot].id, slot);
            self.reposition(slot);
        }

        node
    }

    fn reposition(&mut self, slot: usize) {
        if !self.sift_down(slot) {
            self.sift_up(slot);
        }
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.heap[parent].deadline <= self.heap[slot].deadline {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
    }

    /// Returns whether the node moved
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.heap.len();
        let mut slot = start;

        loop {
            let left = slot * 2 + 1;
            if left >= len {
                break;
            }

            let right = left + 1;
            let child = if right < len && self.heap[right].deadline < self.heap[left].deadline {
                right
            } else {
                left
            };

            if self.heap[slot].deadline <= self.heap[child].deadline {
                break;
            }

            self.swap(slot, child);
            slot = child;
        }

        slot > start
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots.insert(self.heap[a].id, a);
        self.slots.insert(self.heap[b].id, b);
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}
