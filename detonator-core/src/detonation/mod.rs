//! Detonation state machine and the actuator collaborators it drives.
//!
//! The machine itself lives in [`machine`]; this module holds the traits the
//! firmware and the emulator implement for the ignition line and the status
//! display, plus the small value types shared by both sides.

use core::fmt::{self, Write as _};

use heapless::{String, Vec};

use crate::context::State;

pub mod machine;

pub use machine::{DetonationStateMachine, MAX_IMMEDIATE_PASSES};

/// Text rows available on the status display.
pub const DISPLAY_ROWS: usize = 4;

/// Characters per display row.
pub const DISPLAY_COLUMNS: usize = 21;

/// One rendered display row.
pub type DisplayLine = String<DISPLAY_COLUMNS>;

/// Abstraction over the ignition output line.
pub trait Ignition {
    /// Transport-specific error type.
    type Error: fmt::Debug;

    /// Drives the output high (`true`) or low (`false`).
    fn set_active(&mut self, active: bool) -> Result<(), Self::Error>;
}

/// Abstraction over the text display showing mode and countdown feedback.
pub trait StatusDisplay {
    /// Transport-specific error type.
    type Error: fmt::Debug;

    /// Blanks every row.
    fn clear(&mut self) -> Result<(), Self::Error>;

    /// Replaces the contents of `row`. Text longer than a row is truncated by
    /// the implementation.
    fn write_line(&mut self, row: u8, text: &str) -> Result<(), Self::Error>;

    /// Returns the rows currently shown.
    fn capture(&mut self) -> Result<DisplaySnapshot, Self::Error>;
}

/// Ignition line that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopIgnition;

impl NoopIgnition {
    /// Creates a new no-op ignition line.
    pub const fn new() -> Self {
        Self
    }
}

impl Ignition for NoopIgnition {
    type Error = core::convert::Infallible;

    fn set_active(&mut self, _: bool) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Display that discards every write.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDisplay;

impl NoopDisplay {
    /// Creates a new no-op display.
    pub const fn new() -> Self {
        Self
    }
}

impl StatusDisplay for NoopDisplay {
    type Error = core::convert::Infallible;

    fn clear(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn write_line(&mut self, _: u8, _: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    fn capture(&mut self) -> Result<DisplaySnapshot, Self::Error> {
        Ok(DisplaySnapshot::new())
    }
}

/// Copy of the display contents taken right before ignition.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DisplaySnapshot {
    lines: Vec<DisplayLine, DISPLAY_ROWS>,
}

impl DisplaySnapshot {
    /// Creates an empty snapshot.
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Builds a snapshot from row texts, truncating each to the row width and
    /// ignoring rows past [`DISPLAY_ROWS`].
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a str>) -> Self {
        let mut snapshot = Self::new();
        for row in rows.into_iter().take(DISPLAY_ROWS) {
            let _ = snapshot.lines.push(truncate_line(row));
        }
        snapshot
    }

    /// Captured rows, top first.
    pub fn lines(&self) -> &[DisplayLine] {
        &self.lines
    }

    /// Returns `true` when no rows were captured.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Copies `text` into a display row, dropping characters past the row width.
pub fn truncate_line(text: &str) -> DisplayLine {
    let mut line = DisplayLine::new();
    for ch in text.chars() {
        if line.push(ch).is_err() {
            break;
        }
    }
    line
}

/// Text shown for the countdown step with `remaining` steps left.
pub fn countdown_text(remaining: u8) -> String<4> {
    let mut text = String::new();
    // Three digits always fit.
    let _ = write!(text, "{remaining}");
    text
}

/// Result of a countdown run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CountdownOutcome {
    /// Every step elapsed with the state unchanged.
    Completed,
    /// The shared state no longer matched the countdown's origin.
    Aborted { observed: State },
}

/// Errors surfaced by the detonation path.
///
/// Display failures are recorded as telemetry and never returned; only a
/// failing ignition line stops a detonation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DetonationError<E> {
    /// The ignition line rejected a write. The machine has already forced the
    /// line low and restored `Normal`.
    Ignition(E),
}

impl<E: fmt::Debug> fmt::Display for DetonationError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetonationError::Ignition(err) => write!(f, "ignition fault: {err:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_truncates_rows_and_row_count() {
        let snapshot = DisplaySnapshot::from_rows([
            "MODE",
            "a line that is far too long for the panel",
            "2",
            "3",
            "dropped",
        ]);
        assert_eq!(snapshot.lines().len(), DISPLAY_ROWS);
        assert_eq!(snapshot.lines()[0].as_str(), "MODE");
        assert_eq!(snapshot.lines()[1].len(), DISPLAY_COLUMNS);
    }

    #[test]
    fn countdown_text_renders_digits() {
        assert_eq!(countdown_text(3).as_str(), "3");
        assert_eq!(countdown_text(255).as_str(), "255");
    }
}
