//! Double-buffering for per-frame data
//!
//! Ping-pong pairs for history images and statistics. One slot is the read
//! side (last completed frame), the other is the write target for the frame in
//! flight. `split` hands out both at once as `(&T, &mut T)` so a pass can read
//! history while writing the new frame, and the borrow checker rules out a
//! pass reading and writing the same slot.

/// Ping-pong pair with explicit swap
#[derive(Debug, Clone)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    /// Index of the slot currently used as write target
    write: usize,
    swap_count: u64,
}

impl<T> DoubleBuffer<T> {
    pub fn new(current: T, previous: T) -> Self {
        Self {
            slots: [current, previous],
            write: 0,
            swap_count: 0,
        }
    }

    /// Build both slots from the same constructor
    pub fn from_fn(mut make: impl FnMut() -> T) -> Self {
        let a = make();
        let b = make();
        Self::new(a, b)
    }

    /// The last completed slot (bind for reading)
    pub fn read(&self) -> &T {
        &self.slots[1 - self.write]
    }

    /// The slot being produced this frame
    pub fn write_target(&mut self) -> &mut T {
        &mut self.slots[self.write]
    }

    /// Shared view of the write target, e.g. to publish an in-progress frame
    pub fn current(&self) -> &T {
        &self.slots[self.write]
    }

    /// Borrow read and write slots simultaneously.
    pub fn split(&mut self) -> (&T, &mut T) {
        let (first, second) = self.slots.split_at_mut(1);
        if self.write == 0 {
            (&second[0], &mut first[0])
        } else {
            (&first[0], &mut second[0])
        }
    }

    /// Exchange roles; no data is touched.
    pub fn swap(&mut self) {
        self.write = 1 - self.write;
        self.swap_count += 1;
    }

    pub fn swap_count(&self) -> u64 {
        self.swap_count
    }

    /// Apply `f` to both slots (clears, resizes)
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        for slot in self.slots.iter_mut() {
            f(slot);
        }
    }
}
