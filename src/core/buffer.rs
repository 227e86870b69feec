use std::sync::atomic::{AtomicI16, Ordering};

use crate::error::{NetError, NetResult};
use crate::fixed::{Pulse, Value};

/// Getter/setter pair backed by one contiguous allocation of atomic cells.
///
/// The getter half is the stable read view for the current cycle; the
/// setter half accumulates fanin for the next one. `swap` exchanges the
/// halves and zeroes the new setter.
#[derive(Debug)]
pub struct DoubleBuffer {
    cells: Box<[AtomicI16]>,
    half: usize,
    front: usize,
}

impl DoubleBuffer {
    /// Allocate two zeroed halves of `half` cells each.
    pub fn new(half: usize) -> NetResult<Self> {
        let total = half
            .checked_mul(2)
            .ok_or(NetError::StorageExhausted { bytes: usize::MAX })?;
        let mut cells: Vec<AtomicI16> = Vec::new();
        cells
            .try_reserve_exact(total)
            .map_err(|_| NetError::StorageExhausted {
                bytes: total.saturating_mul(std::mem::size_of::<AtomicI16>()),
            })?;
        cells.resize_with(total, || AtomicI16::new(0));
        Ok(Self {
            cells: cells.into_boxed_slice(),
            half,
            front: 0,
        })
    }

    /// Cells per half.
    #[inline]
    pub fn len(&self) -> usize {
        self.half
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.half == 0
    }

    pub fn byte_size(&self) -> usize {
        self.cells.len() * std::mem::size_of::<AtomicI16>()
    }

    #[inline]
    pub fn getter(&self) -> &[AtomicI16] {
        let start = self.front * self.half;
        &self.cells[start..start + self.half]
    }

    #[inline]
    pub fn setter(&self) -> &[AtomicI16] {
        let start = (1 - self.front) * self.half;
        &self.cells[start..start + self.half]
    }

    /// Read a stable value from the getter half.
    #[inline]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.getter().get(index).map(|c| c.load(Ordering::Relaxed))
    }

    /// Atomically add `pulse` into the setter half.
    ///
    /// The pulse is truncated to 16 bits and the add wraps on overflow.
    #[inline]
    pub fn accumulate(&self, index: usize, pulse: Pulse) -> Option<()> {
        let cell = self.setter().get(index)?;
        cell.fetch_add(pulse as Value, Ordering::Relaxed);
        Some(())
    }

    /// Exchange getter and setter, then zero the new setter.
    pub fn swap(&mut self) {
        self.front = 1 - self.front;
        let start = (1 - self.front) * self.half;
        for cell in &mut self.cells[start..start + self.half] {
            *cell.get_mut() = 0;
        }
    }

    /// Overwrite a getter cell. Only reachable with exclusive access.
    pub fn set_getter(&mut self, index: usize, value: Value) -> Option<()> {
        let start = self.front * self.half;
        let cell = self.cells[start..start + self.half].get_mut(index)?;
        *cell.get_mut() = value;
        Some(())
    }
}

/// Borrowed read view over a contiguous run of values.
#[derive(Debug, Clone, Copy)]
pub struct ValueView<'a> {
    cells: &'a [AtomicI16],
}

impl<'a> ValueView<'a> {
    pub fn new(cells: &'a [AtomicI16]) -> Self {
        Self { cells }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.cells.get(index).map(|c| c.load(Ordering::Relaxed))
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + 'a {
        self.cells.iter().map(|c| c.load(Ordering::Relaxed))
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_exchanges_halves_and_zeroes_setter() {
        let mut buf = DoubleBuffer::new(4).unwrap();
        for i in 0..4 {
            buf.accumulate(i, (i as Pulse + 1) * 10).unwrap();
        }
        let old_setter = buf.setter().as_ptr();
        let old_getter = buf.getter().as_ptr();

        buf.swap();
        assert_eq!(buf.getter().as_ptr(), old_setter);
        assert_eq!(buf.setter().as_ptr(), old_getter);
        assert_eq!(ValueView::new(buf.getter()).to_vec(), vec![10, 20, 30, 40]);
        assert!(ValueView::new(buf.setter()).iter().all(|v| v == 0));

        // A second swap must clear the values just read.
        buf.swap();
        assert!(ValueView::new(buf.setter()).iter().all(|v| v == 0));
    }

    #[test]
    fn accumulate_wraps_and_bounds_checks() {
        let mut buf = DoubleBuffer::new(1).unwrap();
        buf.accumulate(0, Value::MAX as Pulse).unwrap();
        buf.accumulate(0, 1).unwrap();
        assert!(buf.accumulate(1, 1).is_none());
        buf.swap();
        assert_eq!(buf.get(0), Some(Value::MIN));
        assert_eq!(buf.get(1), None);
    }

    #[test]
    fn empty_buffer() {
        let buf = DoubleBuffer::new(0).unwrap();
        assert!(buf.is_empty());
        assert!(ValueView::new(buf.getter()).is_empty());
    }
}
