//! Log mirroring for the core telemetry ring.
//!
//! The state machine records into a `detonator_core` ring; after every
//! control-loop tick the firmware walks the records it has not reported yet and
//! emits them over defmt (or stdout on host builds) so bring-up does not need a
//! debugger attached to inspect the ring.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use detonator_core::orientation::OrientationSample;
use detonator_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Tracks which telemetry records were already logged.
#[derive(Copy, Clone, Debug, Default)]
pub struct TelemetryCursor {
    next: EventId,
}

impl TelemetryCursor {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Passes every record newer than the previous call to `sink`, oldest
    /// first, and returns how many were passed. Records that rotated out of
    /// the ring before being seen are skipped.
    pub fn drain<const N: usize>(
        &mut self,
        recorder: &TelemetryRecorder<N>,
        mut sink: impl FnMut(&TelemetryRecord),
    ) -> usize {
        let mut drained = 0;
        for record in recorder.since(self.next) {
            sink(record);
            drained += 1;
        }
        self.next = recorder.next_event_id();
        drained
    }
}

/// Emits one telemetry record.
pub fn log_record(record: &TelemetryRecord) {
    emit_record(record);
}

/// Emits one orientation sample; large movements are logged at info level.
pub fn log_orientation(sample: &OrientationSample) {
    let k = sample.frame.k;
    match sample.change {
        Some(change) if sample.is_large_movement() => emit_jolt(change, k.x, k.y, k.z),
        Some(change) => emit_orientation(change, k.x, k.y, k.z),
        None => emit_orientation(0.0, k.x, k.y, k.z),
    }
}

#[cfg(target_os = "none")]
fn emit_record(record: &TelemetryRecord) {
    defmt::info!("telemetry {}", defmt::Display2Format(record));
}

#[cfg(not(target_os = "none"))]
fn emit_record(record: &TelemetryRecord) {
    println!("telemetry {record}");
}

#[cfg(target_os = "none")]
fn emit_jolt(change: f32, x: f32, y: f32, z: f32) {
    defmt::info!("orientation: jolt change={} k=({}, {}, {})", change, x, y, z);
}

#[cfg(not(target_os = "none"))]
fn emit_jolt(change: f32, x: f32, y: f32, z: f32) {
    println!("orientation: jolt change={change:.3} k=({x:.3}, {y:.3}, {z:.3})");
}

#[cfg(target_os = "none")]
fn emit_orientation(change: f32, x: f32, y: f32, z: f32) {
    defmt::debug!("orientation: change={} k=({}, {}, {})", change, x, y, z);
}

#[cfg(not(target_os = "none"))]
fn emit_orientation(change: f32, x: f32, y: f32, z: f32) {
    println!("orientation: change={change:.3} k=({x:.3}, {y:.3}, {z:.3})");
}
