//! Process-wide device state shared between interrupt handlers and the
//! control loop.
//!
//! `State` and `Mode` are stored as single atomic bytes and are only ever
//! loaded or stored whole; there is no compare-and-swap and no lock. Callers
//! that re-check the state before a side effect get a best-effort guard, not a
//! proof: an interrupt-side write can still land between the re-check and the
//! side effect.

use core::fmt;

use portable_atomic::{AtomicU8, Ordering};

use crate::input::{EdgeMailbox, InputLine};

/// Number of selectable modes.
pub const MODE_COUNT: usize = 2;

/// Countdown / arming path selected by the mode button.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Primary button starts a countdown that ends in detonation.
    Timer,
    /// Primary button starts a countdown that arms the PIR trigger.
    Motion,
}

/// Every mode in rotation order.
pub const ALL_MODES: [Mode; MODE_COUNT] = [Mode::Timer, Mode::Motion];

impl Mode {
    /// Next mode in the rotation, wrapping after the last one.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Mode::Timer => Mode::Motion,
            Mode::Motion => Mode::Timer,
        }
    }

    /// Short label rendered on the display.
    pub const fn label(self) -> &'static str {
        match self {
            Mode::Timer => "TIMER",
            Mode::Motion => "MOTION",
        }
    }

    const fn to_raw(self) -> u8 {
        match self {
            Mode::Timer => 0,
            Mode::Motion => 1,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Mode::Motion,
            _ => Mode::Timer,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Detonation state; exactly one is active at a time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Normal,
    Countdown,
    PirCountdown,
    Armed,
    ShouldExplode,
    ModeChanged,
}

impl State {
    /// Returns `true` while a countdown owns the control loop.
    pub const fn is_counting_down(self) -> bool {
        matches!(self, State::Countdown | State::PirCountdown)
    }

    const fn to_raw(self) -> u8 {
        match self {
            State::Normal => 0,
            State::Countdown => 1,
            State::PirCountdown => 2,
            State::Armed => 3,
            State::ShouldExplode => 4,
            State::ModeChanged => 5,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => State::Countdown,
            2 => State::PirCountdown,
            3 => State::Armed,
            4 => State::ShouldExplode,
            5 => State::ModeChanged,
            _ => State::Normal,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Shared context passed by reference to interrupt handlers and the control loop.
pub struct DeviceContext {
    state: AtomicU8,
    mode: AtomicU8,
    edges: EdgeMailbox,
}

impl DeviceContext {
    /// Boot context: `Normal`, `Timer`, no pending edges.
    pub const fn new() -> Self {
        Self::with_mode(Mode::Timer)
    }

    /// Boot context starting in `mode`.
    pub const fn with_mode(mode: Mode) -> Self {
        Self {
            state: AtomicU8::new(State::Normal.to_raw()),
            mode: AtomicU8::new(mode.to_raw()),
            edges: EdgeMailbox::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        State::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Overwrites the state with a single store.
    pub fn set_state(&self, state: State) {
        self.state.store(state.to_raw(), Ordering::Release);
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        Mode::from_raw(self.mode.load(Ordering::Acquire))
    }

    /// Overwrites the mode with a single store.
    pub fn set_mode(&self, mode: Mode) {
        self.mode.store(mode.to_raw(), Ordering::Release);
    }

    /// Rotates the mode and returns the new value.
    ///
    /// Load and store are separate operations; only the control loop calls this.
    pub fn advance_mode(&self) -> Mode {
        let next = self.mode().next();
        self.set_mode(next);
        next
    }

    /// Forces the state back to `Normal`. Any countdown in flight observes
    /// this as an abort at its next re-check.
    pub fn abort(&self) {
        self.set_state(State::Normal);
    }

    /// Interrupt-side entry point: records an edge on `line`.
    pub fn signal(&self, line: InputLine) {
        self.edges.signal(line);
    }

    /// Mailbox drained by the control loop.
    pub fn edges(&self) -> &EdgeMailbox {
        &self.edges
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_rotation_returns_to_start_after_mode_count_steps() {
        for start in ALL_MODES {
            let mut mode = start;
            for _ in 0..MODE_COUNT {
                mode = mode.next();
            }
            assert_eq!(mode, start);
        }
        assert_ne!(Mode::Timer.next(), Mode::Timer);
    }

    #[test]
    fn state_round_trips_through_storage() {
        let ctx = DeviceContext::new();
        assert_eq!(ctx.state(), State::Normal);
        for state in [
            State::Normal,
            State::Countdown,
            State::PirCountdown,
            State::Armed,
            State::ShouldExplode,
            State::ModeChanged,
        ] {
            ctx.set_state(state);
            assert_eq!(ctx.state(), state);
        }
    }

    #[test]
    fn abort_restores_normal() {
        let ctx = DeviceContext::with_mode(Mode::Motion);
        ctx.set_state(State::PirCountdown);
        ctx.abort();
        assert_eq!(ctx.state(), State::Normal);
        assert_eq!(ctx.mode(), Mode::Motion);
    }
}
