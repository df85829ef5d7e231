//! Edge-triggered input lines and the interrupt-side mailbox.
//!
//! Interrupt handlers never touch the state machine directly. They set a
//! single-slot flag for their line and return; the control loop drains the
//! flags once per tick through the [`Debouncer`](crate::debounce::Debouncer).
//! Several edges on the same line between two drains collapse into one.

use core::fmt;

use portable_atomic::{AtomicBool, Ordering};

/// Number of edge-triggered input lines.
pub const INPUT_LINE_COUNT: usize = 3;

/// Identifier for the edge-triggered inputs wired to the board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputLine {
    /// Mode-select button.
    Mode,
    /// Primary (arm) button.
    Primary,
    /// PIR motion sensor output.
    Motion,
}

impl InputLine {
    /// Deterministic index for lookups into [`ALL_INPUTS`].
    pub const fn as_index(self) -> usize {
        match self {
            InputLine::Mode => 0,
            InputLine::Primary => 1,
            InputLine::Motion => 2,
        }
    }

    /// Attempts to construct an [`InputLine`] from a raw index.
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(InputLine::Mode),
            1 => Some(InputLine::Primary),
            2 => Some(InputLine::Motion),
            _ => None,
        }
    }
}

impl fmt::Display for InputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(input_by_id(*self).name)
    }
}

/// Edge that triggers the line's interrupt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeKind {
    Rising,
    Falling,
}

/// Display name and trigger edge of an input line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InputDescriptor {
    pub id: InputLine,
    pub name: &'static str,
    pub edge: EdgeKind,
}

impl InputDescriptor {
    pub const fn new(id: InputLine, name: &'static str, edge: EdgeKind) -> Self {
        Self { id, name, edge }
    }
}

/// Compile-time catalog of every edge-triggered input.
pub const ALL_INPUTS: [InputDescriptor; INPUT_LINE_COUNT] = [
    InputDescriptor::new(InputLine::Mode, "MODE", EdgeKind::Rising),
    InputDescriptor::new(InputLine::Primary, "FIRE", EdgeKind::Rising),
    InputDescriptor::new(InputLine::Motion, "PIR", EdgeKind::Rising),
];

/// Retrieve input metadata by identifier.
pub const fn input_by_id(id: InputLine) -> InputDescriptor {
    ALL_INPUTS[id.as_index()]
}

/// Single-slot, lock-free mailbox with one pending flag per input line.
pub struct EdgeMailbox {
    pending: [AtomicBool; INPUT_LINE_COUNT],
}

impl EdgeMailbox {
    /// Creates a mailbox with every slot empty.
    pub const fn new() -> Self {
        Self {
            pending: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
        }
    }

    /// Records an edge. Safe to call from interrupt context.
    pub fn signal(&self, line: InputLine) {
        self.pending[line.as_index()].store(true, Ordering::Release);
    }

    /// Consumes the pending edge for `line`, returning whether one was present.
    pub fn take(&self, line: InputLine) -> bool {
        self.pending[line.as_index()].swap(false, Ordering::AcqRel)
    }

    /// Returns `true` when an edge is waiting on `line`.
    pub fn is_pending(&self, line: InputLine) -> bool {
        self.pending[line.as_index()].load(Ordering::Acquire)
    }
}

impl Default for EdgeMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_indexed_by_line() {
        for (index, descriptor) in ALL_INPUTS.iter().enumerate() {
            assert_eq!(descriptor.id.as_index(), index);
            assert_eq!(InputLine::from_index(index), Some(descriptor.id));
        }
        assert_eq!(InputLine::from_index(INPUT_LINE_COUNT), None);
    }

    #[test]
    fn every_line_triggers_on_its_rising_edge() {
        assert_eq!(input_by_id(InputLine::Mode).name, "MODE");
        assert_eq!(input_by_id(InputLine::Primary).name, "FIRE");
        assert_eq!(input_by_id(InputLine::Motion).name, "PIR");
        for descriptor in &ALL_INPUTS {
            assert_eq!(input_by_id(descriptor.id).edge, EdgeKind::Rising);
        }
    }

    #[test]
    fn repeated_signals_collapse_into_one_edge() {
        let mailbox = EdgeMailbox::new();
        mailbox.signal(InputLine::Primary);
        mailbox.signal(InputLine::Primary);

        assert!(mailbox.take(InputLine::Primary));
        assert!(!mailbox.take(InputLine::Primary));
        assert!(!mailbox.is_pending(InputLine::Mode));
    }
}
