//! Fixed set of in-flight job slots per chip.
//!
//! Slot ids 1..=4 travel in the high nibble of job and result frames. A
//! dispatch cursor walks the slots in order; the occupant of the cursor
//! slot is released before the slot is reused, so each slot holds at most
//! one outstanding job.

use thiserror::Error;

pub const SLOTS_PER_CHIP: usize = 4;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Every slot holds a live job. The chip's queue is stuck or overrun.
    #[error("all {0} job slots are occupied")]
    Exhausted(usize),
}

#[derive(Debug)]
pub struct SlotTable<T> {
    slots: [Option<T>; SLOTS_PER_CHIP],
    cursor: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            cursor: 0,
        }
    }

    /// Slot id the next dispatch targets.
    #[cfg(test)]
    pub fn cursor_slot(&self) -> u8 {
        (self.cursor + 1) as u8
    }

    /// Take the previous occupant of the cursor slot, if any.
    pub fn release_cursor(&mut self) -> Option<T> {
        self.slots[self.cursor].take()
    }

    /// Put back an occupant taken by [`release_cursor`](Self::release_cursor)
    /// when its replacement could not be sent. The cursor does not move.
    pub fn restore_cursor(&mut self, item: T) -> Result<(), T> {
        if self.slots[self.cursor].is_some() {
            return Err(item);
        }
        self.slots[self.cursor] = Some(item);
        Ok(())
    }

    /// Find a free slot, scanning from the cursor.
    pub fn allocate(&self) -> Result<u8, SlotError> {
        (0..SLOTS_PER_CHIP)
            .map(|offset| (self.cursor + offset) % SLOTS_PER_CHIP)
            .find(|&index| self.slots[index].is_none())
            .map(|index| (index + 1) as u8)
            .ok_or(SlotError::Exhausted(SLOTS_PER_CHIP))
    }

    /// Place `item` in `slot` and move the cursor past it.
    ///
    /// Returns the item back if the slot id is invalid or occupied.
    pub fn install(&mut self, slot: u8, item: T) -> Result<(), T> {
        let Some(index) = Self::index(slot) else {
            return Err(item);
        };
        if self.slots[index].is_some() {
            return Err(item);
        }
        self.slots[index] = Some(item);
        self.cursor = (index + 1) % SLOTS_PER_CHIP;
        Ok(())
    }

    pub fn get(&self, slot: u8) -> Option<&T> {
        Self::index(slot).and_then(|index| self.slots[index].as_ref())
    }

    pub fn is_valid_slot(slot: u8) -> bool {
        Self::index(slot).is_some()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Empty every slot and rewind the cursor.
    pub fn drain(&mut self) -> Vec<T> {
        self.cursor = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    fn index(slot: u8) -> Option<usize> {
        let slot = usize::from(slot);
        (1..=SLOTS_PER_CHIP).contains(&slot).then(|| slot - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_cycle_cursor_through_all_slots() {
        let mut table = SlotTable::new();
        let mut seen = Vec::new();
        for n in 0..6 {
            let _ = table.release_cursor();
            let slot = table.allocate().unwrap();
            table.install(slot, n).unwrap();
            seen.push(slot);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 1, 2]);
    }

    #[test]
    fn should_release_previous_occupant_of_cursor_slot() {
        let mut table = SlotTable::new();
        for n in 0..4 {
            let slot = table.allocate().unwrap();
            table.install(slot, n).unwrap();
        }
        assert_eq!(table.cursor_slot(), 1);
        assert_eq!(table.release_cursor(), Some(0));
        assert_eq!(table.release_cursor(), None);
        assert_eq!(table.occupied(), 3);
    }

    #[test]
    fn should_restore_occupant_without_moving_cursor() {
        let mut table = SlotTable::new();
        table.install(1, "old").unwrap();
        table.install(2, "newer").unwrap();
        table.install(3, "c").unwrap();
        table.install(4, "d").unwrap();

        let previous = table.release_cursor().unwrap();
        table.restore_cursor(previous).unwrap();

        assert_eq!(table.cursor_slot(), 1);
        assert_eq!(table.get(1), Some(&"old"));
        assert_eq!(table.restore_cursor("extra"), Err("extra"));
    }

    #[test]
    fn should_fail_loudly_when_every_slot_is_live() {
        let mut table = SlotTable::new();
        for n in 0..4 {
            let slot = table.allocate().unwrap();
            table.install(slot, n).unwrap();
        }
        assert_eq!(table.allocate(), Err(SlotError::Exhausted(4)));
    }

    #[test]
    fn should_refuse_to_overwrite_live_slot() {
        let mut table = SlotTable::new();
        table.install(2, "a").unwrap();
        assert_eq!(table.install(2, "b"), Err("b"));
        assert_eq!(table.install(5, "c"), Err("c"));
        assert_eq!(table.install(0, "d"), Err("d"));
        assert_eq!(table.get(2), Some(&"a"));
    }

    #[test]
    fn should_skip_to_next_free_slot() {
        let mut table = SlotTable::new();
        table.install(1, 'x').unwrap();
        table.install(3, 'y').unwrap();
        // Cursor sits after slot 3.
        assert_eq!(table.allocate(), Ok(4));
        table.install(4, 'z').unwrap();
        assert_eq!(table.allocate(), Ok(2));
    }

    #[test]
    fn should_drain_and_rewind() {
        let mut table = SlotTable::new();
        table.install(2, 7).unwrap();
        table.install(4, 9).unwrap();
        assert_eq!(table.drain(), vec![7, 9]);
        assert_eq!(table.occupied(), 0);
        assert_eq!(table.cursor_slot(), 1);
    }
}
