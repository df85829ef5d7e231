//! Per-line cooldown debouncing.
//!
//! An accepted edge arms the line's cooldown; further edges on that line are
//! dropped until the control loop has ticked the cooldown back down to zero.
//! Dropped edges are lost, never deferred.

use heapless::Vec;

use crate::config::INPUT_COOLDOWN_MS;
use crate::input::{ALL_INPUTS, EdgeMailbox, INPUT_LINE_COUNT, InputLine};

/// Milliseconds remaining before a line accepts another edge.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CooldownTimer {
    remaining_ms: u32,
}

impl CooldownTimer {
    /// Creates an expired (accepting) timer.
    pub const fn new() -> Self {
        Self { remaining_ms: 0 }
    }

    /// Returns `true` when the line accepts edges.
    pub const fn is_ready(&self) -> bool {
        self.remaining_ms == 0
    }

    /// Milliseconds left on the cooldown.
    pub const fn remaining_ms(&self) -> u32 {
        self.remaining_ms
    }

    /// Restarts the cooldown.
    pub fn arm(&mut self, duration_ms: u32) {
        self.remaining_ms = duration_ms;
    }

    /// Counts the cooldown down, clamping at zero.
    pub fn elapse(&mut self, elapsed_ms: u32) {
        self.remaining_ms = self.remaining_ms.saturating_sub(elapsed_ms);
    }
}

/// Result of running one mailbox edge through the debouncer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeVerdict {
    Accepted(InputLine),
    Dropped { line: InputLine, remaining_ms: u32 },
}

impl EdgeVerdict {
    /// Line the verdict applies to.
    pub const fn line(&self) -> InputLine {
        match *self {
            EdgeVerdict::Accepted(line) | EdgeVerdict::Dropped { line, .. } => line,
        }
    }

    /// Returns the line when the edge was accepted.
    pub const fn accepted(&self) -> Option<InputLine> {
        match *self {
            EdgeVerdict::Accepted(line) => Some(line),
            EdgeVerdict::Dropped { .. } => None,
        }
    }
}

/// Cooldown gate shared by every input line.
#[derive(Clone, Debug)]
pub struct Debouncer {
    timers: [CooldownTimer; INPUT_LINE_COUNT],
    cooldown_ms: u32,
}

impl Debouncer {
    /// Creates a debouncer using the default cooldown.
    pub const fn new() -> Self {
        Self::with_cooldown(INPUT_COOLDOWN_MS)
    }

    /// Creates a debouncer with an explicit cooldown.
    pub const fn with_cooldown(cooldown_ms: u32) -> Self {
        Self {
            timers: [CooldownTimer::new(); INPUT_LINE_COUNT],
            cooldown_ms,
        }
    }

    /// Returns the cooldown timer for `line`.
    pub fn timer(&self, line: InputLine) -> CooldownTimer {
        self.timers[line.as_index()]
    }

    /// Gates a single edge. Returns `true` when the edge is accepted, in which
    /// case the line's cooldown restarts.
    pub fn on_edge(&mut self, line: InputLine) -> bool {
        let timer = &mut self.timers[line.as_index()];
        if !timer.is_ready() {
            return false;
        }
        timer.arm(self.cooldown_ms);
        true
    }

    /// Advances every cooldown by `elapsed_ms`.
    pub fn tick(&mut self, elapsed_ms: u32) {
        for timer in &mut self.timers {
            timer.elapse(elapsed_ms);
        }
    }

    /// Takes every pending mailbox slot and gates it, in catalog order.
    pub fn drain(&mut self, mailbox: &EdgeMailbox) -> Vec<EdgeVerdict, INPUT_LINE_COUNT> {
        let mut verdicts = Vec::new();
        for descriptor in &ALL_INPUTS {
            let line = descriptor.id;
            if !mailbox.take(line) {
                continue;
            }

            let remaining_ms = self.timer(line).remaining_ms();
            let verdict = if self.on_edge(line) {
                EdgeVerdict::Accepted(line)
            } else {
                EdgeVerdict::Dropped { line, remaining_ms }
            };
            // One slot per line, so the vector cannot overflow.
            let _ = verdicts.push(verdict);
        }
        verdicts
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_inside_cooldown_are_dropped() {
        let mut debouncer = Debouncer::new();
        assert!(debouncer.on_edge(InputLine::Primary));

        debouncer.tick(40);
        assert!(!debouncer.on_edge(InputLine::Primary));
        debouncer.tick(40);
        assert!(!debouncer.on_edge(InputLine::Primary));

        debouncer.tick(20);
        assert!(debouncer.on_edge(InputLine::Primary));
    }

    #[test]
    fn cooldowns_are_per_line() {
        let mut debouncer = Debouncer::new();
        assert!(debouncer.on_edge(InputLine::Mode));
        assert!(debouncer.on_edge(InputLine::Primary));
        assert!(!debouncer.on_edge(InputLine::Mode));
        assert!(debouncer.timer(InputLine::Motion).is_ready());
    }

    #[test]
    fn tick_clamps_at_zero() {
        let mut debouncer = Debouncer::new();
        debouncer.on_edge(InputLine::Motion);
        debouncer.tick(u32::MAX);
        assert_eq!(debouncer.timer(InputLine::Motion).remaining_ms(), 0);
        debouncer.tick(10);
        assert_eq!(debouncer.timer(InputLine::Motion).remaining_ms(), 0);
    }

    #[test]
    fn drain_reports_dropped_edges_with_remaining_cooldown() {
        let mailbox = EdgeMailbox::new();
        let mut debouncer = Debouncer::new();

        mailbox.signal(InputLine::Primary);
        mailbox.signal(InputLine::Mode);
        let first = debouncer.drain(&mailbox);
        assert_eq!(
            first.as_slice(),
            &[
                EdgeVerdict::Accepted(InputLine::Mode),
                EdgeVerdict::Accepted(InputLine::Primary)
            ]
        );

        debouncer.tick(30);
        mailbox.signal(InputLine::Primary);
        let second = debouncer.drain(&mailbox);
        assert_eq!(
            second.as_slice(),
            &[EdgeVerdict::Dropped {
                line: InputLine::Primary,
                remaining_ms: 70
            }]
        );
        assert!(!mailbox.is_pending(InputLine::Primary));
    }
}
