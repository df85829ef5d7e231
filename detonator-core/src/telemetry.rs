//! Telemetry event catalog and the fixed-capacity recorder.
//!
//! The core has no logger. State machine decisions and FIFO recoveries are
//! recorded here instead, and the firmware / emulator mirror the records to
//! defmt or the terminal after every tick.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::context::{Mode, State};
use crate::input::InputLine;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Canonical timestamp units for telemetry records (milliseconds of uptime).
pub type TimestampMillis = u64;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Collaborator that failed during a side effect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultSite {
    Display,
    Ignition,
    MotionSensor,
}

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    EdgeAccepted(InputLine),
    EdgeDropped(InputLine),
    ModeSelected(Mode),
    CountdownStarted(Mode),
    CountdownStep(u8),
    CountdownAborted(State),
    CountdownComplete(Mode),
    Armed,
    Triggered,
    IgnitionOn,
    IgnitionOff,
    Detonated,
    DetonationSkipped(State),
    Fault(FaultSite),
    FifoReset,
    FifoDrained,
    FifoTimeout,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::EdgeAccepted(line) => write!(f, "edge-accepted {line}"),
            TelemetryEventKind::EdgeDropped(line) => write!(f, "edge-dropped {line}"),
            TelemetryEventKind::ModeSelected(mode) => write!(f, "mode-selected {mode}"),
            TelemetryEventKind::CountdownStarted(mode) => write!(f, "countdown-started {mode}"),
            TelemetryEventKind::CountdownStep(remaining) => write!(f, "countdown {remaining}"),
            TelemetryEventKind::CountdownAborted(observed) => {
                write!(f, "countdown-aborted observed={observed}")
            }
            TelemetryEventKind::CountdownComplete(mode) => write!(f, "countdown-complete {mode}"),
            TelemetryEventKind::Armed => f.write_str("armed"),
            TelemetryEventKind::Triggered => f.write_str("triggered"),
            TelemetryEventKind::IgnitionOn => f.write_str("ignition-on"),
            TelemetryEventKind::IgnitionOff => f.write_str("ignition-off"),
            TelemetryEventKind::Detonated => f.write_str("detonated"),
            TelemetryEventKind::DetonationSkipped(observed) => {
                write!(f, "detonation-skipped observed={observed}")
            }
            TelemetryEventKind::Fault(site) => write!(f, "fault {site:?}"),
            TelemetryEventKind::FifoReset => f.write_str("fifo-reset"),
            TelemetryEventKind::FifoDrained => f.write_str("fifo-drained"),
            TelemetryEventKind::FifoTimeout => f.write_str("fifo-timeout"),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Cooldown left on a line when its edge was dropped.
    Cooldown { remaining_ms: u32 },
    /// FIFO occupancy observed and bytes thrown away during a read.
    Fifo { occupancy: u16, discarded: u16 },
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp_ms: TimestampMillis,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} t={}ms {}", self.id, self.timestamp_ms, self.event)?;
        match self.details {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Cooldown { remaining_ms } => {
                write!(f, " cooldown={remaining_ms}ms")
            }
            TelemetryPayload::Fifo {
                occupancy,
                discarded,
            } => write!(f, " occupancy={occupancy} discarded={discarded}"),
        }
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive.
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns `true` when any retained record matches `event`.
    pub fn contains(&self, event: TelemetryEventKind) -> bool {
        self.oldest_first().any(|record| record.event == event)
    }

    /// Iterates records whose id is at least `first`, oldest first.
    pub fn since(&self, first: EventId) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.oldest_first().filter(move |record| record.id >= first)
    }

    /// Records an event without payload.
    pub fn record_event(
        &mut self,
        event: TelemetryEventKind,
        timestamp_ms: TimestampMillis,
    ) -> EventId {
        self.record(event, TelemetryPayload::none(), timestamp_ms)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp_ms: TimestampMillis,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp_ms,
            event,
            details: payload,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
