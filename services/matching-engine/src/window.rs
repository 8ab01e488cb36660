//! Sliding dedup window over order ids
//!
//! Tracks which ids in `(min, max]` have been seen using a bitmap of `cap`
//! bits addressed by `id % cap`. An id above `max` slides the window up so
//! that it becomes the new `max`; ids at or below `min` are expired.

use serde::{Deserialize, Serialize};
use types::errors::WindowError;

/// Default number of ids tracked by a window.
pub const DEFAULT_WINDOW_CAPACITY: u64 = 10_000;

/// Fixed-size bitset backed by bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitmap(Vec<u8>);

impl Bitmap {
    pub fn with_bits(bits: u64) -> Self {
        Self(vec![0; bits.div_ceil(8) as usize])
    }

    pub fn get(&self, index: u64) -> bool {
        self.0
            .get((index / 8) as usize)
            .map(|byte| byte & (1 << (index % 8)) != 0)
            .unwrap_or(false)
    }

    pub fn set(&mut self, index: u64) {
        let slot = (index / 8) as usize;
        if slot >= self.0.len() {
            self.0.resize(slot + 1, 0);
        }
        self.0[slot] |= 1 << (index % 8);
    }

    pub fn clear(&mut self, index: u64) {
        if let Some(byte) = self.0.get_mut((index / 8) as usize) {
            *byte &= !(1 << (index % 8));
        }
    }

    pub fn clear_all(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }

    pub fn count_ones(&self) -> u32 {
        self.0.iter().map(|b| b.count_ones()).sum()
    }
}

/// Order id dedup window covering `(min, max]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub min: u64,
    pub max: u64,
    pub cap: u64,
    pub bitmap: Bitmap,
}

impl Window {
    /// Window over `(min, max]`; capacity is `max - min` (at least 1).
    pub fn new(min: u64, max: u64) -> Self {
        let cap = max.saturating_sub(min).max(1);
        Self {
            min,
            max: min + cap,
            cap,
            bitmap: Bitmap::with_bits(cap),
        }
    }

    /// Fresh window `(0, cap]`.
    pub fn with_capacity(cap: u64) -> Self {
        Self::new(0, cap)
    }

    /// Zero capacity means the window was never initialised.
    pub fn is_initialized(&self) -> bool {
        self.cap > 0
    }

    /// Record `value`, rejecting expired and already-seen ids.
    pub fn put(&mut self, value: u64) -> Result<(), WindowError> {
        if value <= self.min {
            return Err(WindowError::Expired {
                value,
                min: self.min,
                max: self.max,
            });
        }

        if value <= self.max {
            let index = value % self.cap;
            if self.bitmap.get(index) {
                return Err(WindowError::Duplicate(value));
            }
            self.bitmap.set(index);
            return Ok(());
        }

        self.slide(value - self.max);
        self.bitmap.set(value % self.cap);
        Ok(())
    }

    /// Advance by `delta`, clearing the bits of ids that fall out.
    fn slide(&mut self, delta: u64) {
        if delta >= self.cap {
            self.bitmap.clear_all();
        } else {
            // (min + i) and (max + i) share a bit, so vacating frees the slot.
            for vacated in self.min + 1..=self.min + delta {
                self.bitmap.clear(vacated % self.cap);
            }
        }
        self.min += delta;
        self.max += delta;
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WINDOW_CAPACITY)
    }
}
