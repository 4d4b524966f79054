//! CPU history for reverse debugging.
//!
//! Before each instruction the run loop records the registers, the opcode
//! bytes and the word on top of the stack. The history is a ring buffer;
//! a cursor walks back and forth through it without touching the machine.

use std::collections::VecDeque;

use zilog_z80::Registers;

/// One executed instruction, captured before it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub registers: Registers,
    /// Up to four bytes at PC.
    pub opcode: [u8; 4],
    /// Word at SP.
    pub stack_top: u16,
}

impl HistoryEntry {
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.registers.pc
    }
}

/// Whether a new entry replaces the newest one instead of being appended.
///
/// Repeating block instructions (LDIR and friends) and HALT execute at the
/// same PC over and over; only their latest state is kept.
#[must_use]
pub fn should_replace_last(new: &HistoryEntry, last: &HistoryEntry) -> bool {
    new.pc() == last.pc()
}

#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    /// Steps back from the newest entry; `None` when at the live state.
    cursor: Option<usize>,
}

impl History {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(0x1_0000)),
            capacity,
            cursor: None,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        self.cursor = None;
        if let Some(last) = self.entries.back_mut()
            && should_replace_last(&entry, last)
        {
            *last = entry;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    /// True while the cursor is somewhere in the past.
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.cursor.is_some()
    }

    /// Leave reverse mode.
    pub fn go_live(&mut self) {
        self.cursor = None;
    }

    fn index_of(&self, back: usize) -> usize {
        self.entries.len() - 1 - back
    }

    /// The entry under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&HistoryEntry> {
        self.cursor.map(|back| &self.entries[self.index_of(back)])
    }

    /// Move one instruction into the past. Returns `None` at the oldest
    /// entry, leaving the cursor where it was.
    pub fn step_back(&mut self) -> Option<&HistoryEntry> {
        let next = self.cursor.map_or(0, |back| back + 1);
        if next >= self.entries.len() {
            return None;
        }
        self.cursor = Some(next);
        self.current()
    }

    /// Move one instruction towards the present. Returns `None` once the
    /// live state is reached.
    pub fn step_forward(&mut self) -> Option<&HistoryEntry> {
        match self.cursor {
            None | Some(0) => {
                self.cursor = None;
                None
            }
            Some(back) => {
                self.cursor = Some(back - 1);
                self.current()
            }
        }
    }

    /// PCs of up to `count` entries on each side of the cursor, oldest
    /// first.
    #[must_use]
    pub fn spots(&self, count: usize) -> Vec<u16> {
        if self.entries.is_empty() || count == 0 {
            return Vec::new();
        }
        let centre = self.cursor.map_or(self.entries.len() - 1, |back| self.index_of(back));
        let first = centre.saturating_sub(count - 1);
        let last = (centre + count).min(self.entries.len() - 1);
        (first..=last).map(|i| self.entries[i].pc()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pc: u16) -> HistoryEntry {
        HistoryEntry {
            registers: Registers {
                pc,
                ..Registers::default()
            },
            opcode: [0; 4],
            stack_top: 0,
        }
    }

    #[test]
    fn repeated_pc_replaces_last_entry() {
        let mut history = History::new(8);
        history.push(entry(0x8000));
        history.push(entry(0x8002));
        history.push(entry(0x8002));
        assert_eq!(history.len(), 2);
        assert!(should_replace_last(&entry(1), &entry(1)));
        assert!(!should_replace_last(&entry(1), &entry(2)));
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let mut history = History::new(3);
        for pc in 0..5 {
            history.push(entry(pc));
        }
        assert_eq!(history.spots(3), [2, 3, 4]);
    }

    #[test]
    fn step_back_and_forward() {
        let mut history = History::new(10);
        for pc in [0x10, 0x11, 0x12] {
            history.push(entry(pc));
        }
        assert_eq!(history.step_back().map(HistoryEntry::pc), Some(0x12));
        assert_eq!(history.step_back().map(HistoryEntry::pc), Some(0x11));
        assert_eq!(history.step_back().map(HistoryEntry::pc), Some(0x10));
        assert_eq!(history.step_back(), None);
        assert!(history.is_reverse());

        assert_eq!(history.step_forward().map(HistoryEntry::pc), Some(0x11));
        assert_eq!(history.step_forward().map(HistoryEntry::pc), Some(0x12));
        assert_eq!(history.step_forward(), None);
        assert!(!history.is_reverse());
    }

    #[test]
    fn spots_surround_cursor() {
        let mut history = History::new(10);
        for pc in 0..8 {
            history.push(entry(pc));
        }
        for _ in 0..4 {
            history.step_back();
        }
        // Cursor at pc 4.
        assert_eq!(history.spots(2), [3, 4, 5, 6]);
    }

    #[test]
    fn pushing_leaves_reverse_mode() {
        let mut history = History::new(4);
        history.push(entry(1));
        history.step_back();
        history.push(entry(2));
        assert!(!history.is_reverse());
    }

    #[test]
    fn zero_capacity_disables_history() {
        let mut history = History::new(0);
        history.push(entry(1));
        assert!(history.is_empty());
        assert!(!history.is_enabled());
    }
}
