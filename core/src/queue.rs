//! ByteQueue - ordered FIFO with byte accounting.
//!
//! The queue owns its entries and a running total of their byte lengths. The
//! length of an entry is measured on the way in and again on the way out; a
//! function that reports different lengths for the same entry would drive the
//! total negative, which is treated as a programming error.

use crate::config::{ByteLengthFn, MapFn};
use std::collections::VecDeque;
use std::fmt;

pub struct ByteQueue<T> {
    entries: VecDeque<T>,
    buffered: usize,
    high_water_mark: usize,
    byte_length: ByteLengthFn<T>,
    map: Option<MapFn<T>>,
}

impl<T> fmt::Debug for ByteQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteQueue")
            .field("len", &self.entries.len())
            .field("buffered", &self.buffered)
            .field("high_water_mark", &self.high_water_mark)
            .finish()
    }
}

impl<T> ByteQueue<T> {
    pub fn new(high_water_mark: usize, byte_length: ByteLengthFn<T>, map: Option<MapFn<T>>) -> Self {
        Self {
            entries: VecDeque::new(),
            buffered: 0,
            high_water_mark,
            byte_length,
            map,
        }
    }

    /// Appends an entry. Returns `false` once the queue is at or above the
    /// high-water mark.
    pub fn push(&mut self, data: T) -> bool {
        let data = self.apply_map(data);
        self.buffered += (self.byte_length)(&data);
        self.entries.push_back(data);
        self.buffered < self.high_water_mark
    }

    /// Puts an entry back at the head of the queue.
    pub fn push_front(&mut self, data: T) -> bool {
        let data = self.apply_map(data);
        self.buffered += (self.byte_length)(&data);
        self.entries.push_front(data);
        self.buffered < self.high_water_mark
    }

    pub fn shift(&mut self) -> Option<T> {
        let data = self.entries.pop_front()?;
        self.release(&data);
        Some(data)
    }

    /// Takes every queued entry at once, oldest first.
    pub fn take_all(&mut self) -> Vec<T> {
        let batch: Vec<T> = self.entries.drain(..).collect();
        for data in &batch {
            self.release(data);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Used by the end-of-stream push so that no further reads are requested.
    pub fn set_high_water_mark(&mut self, hwm: usize) {
        self.high_water_mark = hwm;
    }

    pub fn is_saturated(&self) -> bool {
        self.buffered >= self.high_water_mark
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.buffered = 0;
    }

    fn apply_map(&mut self, data: T) -> T {
        match self.map.as_mut() {
            Some(map) => map(data),
            None => data,
        }
    }

    fn release(&mut self, data: &T) {
        let len = (self.byte_length)(data);
        self.buffered = match self.buffered.checked_sub(len) {
            Some(buffered) => buffered,
            None => panic!(
                "byte length function is not deterministic: releasing {len} bytes with {} buffered",
                self.buffered
            ),
        };
    }
}
