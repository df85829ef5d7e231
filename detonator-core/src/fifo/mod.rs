//! Packet synchronisation for the motion processor's FIFO.
//!
//! The DMP appends a 42-byte packet to a hardware FIFO at its own pace. The
//! reader never consumes a packet that straddles two samples: it waits for a
//! partial packet to fill, throws away everything but the newest packet when a
//! moderate backlog built up, and resets the FIFO when the backlog is too deep
//! to drain cheaply. Every call is bounded by [`FifoConfig::timeout_us`].

use core::cmp::min;
use core::fmt;

use embedded_hal_async::delay::DelayNs;

use crate::config::{FIFO_MAX_TRANSFER, FIFO_PACKET_SIZE, FifoConfig};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder, TimestampMillis};

pub mod sim;

/// One complete DMP packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FifoPacket([u8; FIFO_PACKET_SIZE]);

impl FifoPacket {
    /// Wraps raw packet bytes.
    pub const fn from_bytes(bytes: [u8; FIFO_PACKET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw packet bytes.
    pub const fn as_bytes(&self) -> &[u8; FIFO_PACKET_SIZE] {
        &self.0
    }

    /// Big-endian word stored at `offset`.
    pub const fn be_i16(&self, offset: usize) -> i16 {
        i16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }
}

impl Default for FifoPacket {
    fn default() -> Self {
        Self([0; FIFO_PACKET_SIZE])
    }
}

/// Register-level access to the sensor FIFO.
///
/// Implementations perform complete bus transactions; the reader never calls
/// these from interrupt context.
pub trait FifoRegisters {
    /// Bus error type.
    type Error: fmt::Debug;

    /// Number of bytes currently buffered.
    fn fifo_count(&mut self) -> Result<u16, Self::Error>;

    /// Pops `buf.len()` bytes, oldest first.
    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Discards every buffered byte.
    fn reset_fifo(&mut self) -> Result<(), Self::Error>;
}

/// Monotonic microsecond clock used to enforce the read budget.
pub trait MicrosClock {
    /// Microseconds since an arbitrary fixed origin.
    fn now_micros(&self) -> u64;
}

impl<T: MicrosClock + ?Sized> MicrosClock for &T {
    fn now_micros(&self) -> u64 {
        (**self).now_micros()
    }
}

/// How the last `read_packet` call ended.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadOutcome {
    /// No call has completed yet.
    #[default]
    Idle,
    /// A packet was read.
    Packet,
    /// The FIFO was empty on the first poll.
    Empty,
    /// The budget ran out before a single packet was buffered.
    TimedOut,
    /// A register access failed.
    BusError,
}

/// Bookkeeping for one `read_packet` call.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadReport {
    pub outcome: ReadOutcome,
    /// Occupancy seen on the first poll.
    pub first_occupancy: u16,
    /// Bytes thrown away to re-align on the newest packet.
    pub discarded: u16,
    /// FIFO resets issued.
    pub resets: u8,
    /// Occupancy polls issued.
    pub polls: u16,
    pub elapsed_us: u64,
}

impl ReadReport {
    /// Appends the recoveries this read performed to `recorder`.
    pub fn record_into<const N: usize>(
        &self,
        recorder: &mut TelemetryRecorder<N>,
        timestamp_ms: TimestampMillis,
    ) {
        let payload = TelemetryPayload::Fifo {
            occupancy: self.first_occupancy,
            discarded: self.discarded,
        };
        if self.resets > 0 {
            recorder.record(TelemetryEventKind::FifoReset, payload, timestamp_ms);
        }
        if self.discarded > 0 {
            recorder.record(TelemetryEventKind::FifoDrained, payload, timestamp_ms);
        }
        if self.outcome == ReadOutcome::TimedOut {
            recorder.record(TelemetryEventKind::FifoTimeout, payload, timestamp_ms);
        }
    }
}

/// Extracts whole packets from a [`FifoRegisters`] implementation within a
/// fixed time budget.
pub struct FifoSyncReader<R, C, W> {
    registers: R,
    clock: C,
    delay: W,
    config: FifoConfig,
    latest: Option<FifoPacket>,
    last_report: ReadReport,
}

impl<R, C, W> FifoSyncReader<R, C, W>
where
    R: FifoRegisters,
    C: MicrosClock,
    W: DelayNs,
{
    /// Creates a reader using the default budget.
    pub fn new(registers: R, clock: C, delay: W) -> Self {
        Self::with_config(registers, clock, delay, FifoConfig::default())
    }

    /// Creates a reader with explicit limits.
    pub fn with_config(registers: R, clock: C, delay: W, config: FifoConfig) -> Self {
        Self {
            registers,
            clock,
            delay,
            config,
            latest: None,
            last_report: ReadReport::default(),
        }
    }

    /// Last packet successfully read. Failed or empty reads leave it untouched.
    pub fn latest(&self) -> Option<&FifoPacket> {
        self.latest.as_ref()
    }

    /// Bookkeeping for the most recent call.
    pub fn last_report(&self) -> ReadReport {
        self.last_report
    }

    /// Limits in use.
    pub fn config(&self) -> FifoConfig {
        self.config
    }

    /// Register access, for setup code that shares the transport.
    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    /// Returns the newest complete packet, `Ok(None)` when none could be
    /// obtained within the budget, or the first bus error.
    ///
    /// The returned packet is also kept as [`latest`](Self::latest). Waits
    /// between polls are cooperative and never extend past the budget; the
    /// call can overrun it by at most the bus transaction in flight.
    pub async fn read_packet(&mut self) -> Result<Option<FifoPacket>, R::Error> {
        let started = self.clock.now_micros();
        let mut report = ReadReport::default();

        let result = self.synchronise(started, &mut report).await;
        report.outcome = match &result {
            Ok(Some(_)) => ReadOutcome::Packet,
            Ok(None) if report.outcome == ReadOutcome::Empty => ReadOutcome::Empty,
            Ok(None) => ReadOutcome::TimedOut,
            Err(_) => ReadOutcome::BusError,
        };
        report.elapsed_us = self.elapsed_since(started);
        self.last_report = report;

        if let Ok(Some(packet)) = result {
            self.latest = Some(packet);
        }
        result
    }

    async fn synchronise(
        &mut self,
        started: u64,
        report: &mut ReadReport,
    ) -> Result<Option<FifoPacket>, R::Error> {
        #[allow(clippy::cast_possible_truncation)]
        let packet_len = FIFO_PACKET_SIZE as u16;

        let mut count = self.poll_count(report)?;
        report.first_occupancy = count;
        if count == 0 {
            report.outcome = ReadOutcome::Empty;
            return Ok(None);
        }

        // Every transaction after the first poll is preceded by a budget
        // check, so a call overruns by at most one transaction.
        loop {
            if self.expired(started) {
                return Ok(None);
            }

            if count == packet_len {
                let mut scratch = [0u8; FIFO_PACKET_SIZE];
                self.registers.read_fifo(&mut scratch)?;
                return Ok(Some(FifoPacket::from_bytes(scratch)));
            }

            if count > self.config.high_water {
                self.registers.reset_fifo()?;
                report.resets = report.resets.saturating_add(1);
                match self.wait_for_data(started, report).await? {
                    Some(fresh) => count = fresh,
                    None => return Ok(None),
                }
                continue;
            }

            if count > packet_len {
                if !self.discard(count - packet_len, started, report)? {
                    return Ok(None);
                }
            } else if !self.pause(started).await {
                return Ok(None);
            }

            if self.expired(started) {
                return Ok(None);
            }
            count = self.poll_count(report)?;
        }
    }

    /// Polls until the FIFO holds at least one byte and returns the count, or
    /// `None` when the budget ran out first.
    async fn wait_for_data(
        &mut self,
        started: u64,
        report: &mut ReadReport,
    ) -> Result<Option<u16>, R::Error> {
        loop {
            if self.expired(started) {
                return Ok(None);
            }
            let count = self.poll_count(report)?;
            if count > 0 {
                return Ok(Some(count));
            }
            if !self.pause(started).await {
                return Ok(None);
            }
        }
    }

    /// Throws away the `excess` oldest bytes in transport-sized chunks.
    /// Returns `false` if the budget ran out part way; the newest packet is
    /// still intact at the tail, so the next call re-aligns from there.
    fn discard(
        &mut self,
        excess: u16,
        started: u64,
        report: &mut ReadReport,
    ) -> Result<bool, R::Error> {
        let mut trash = [0u8; FIFO_MAX_TRANSFER];
        let mut left = usize::from(excess);
        while left > 0 {
            if self.expired(started) {
                return Ok(false);
            }
            let chunk = min(left, FIFO_MAX_TRANSFER);
            self.registers.read_fifo(&mut trash[..chunk])?;
            left -= chunk;
            let chunk = u16::try_from(chunk).unwrap_or(u16::MAX);
            report.discarded = report.discarded.saturating_add(chunk);
        }
        Ok(true)
    }

    fn poll_count(&mut self, report: &mut ReadReport) -> Result<u16, R::Error> {
        report.polls = report.polls.saturating_add(1);
        self.registers.fifo_count()
    }

    /// Sleeps one poll interval, clamped to what is left of the budget.
    /// Returns `false` without sleeping when nothing is left.
    async fn pause(&mut self, started: u64) -> bool {
        let remaining = self.remaining_us(started);
        if remaining == 0 {
            return false;
        }
        let wait = min(u64::from(self.config.poll_interval_us), remaining);
        self.delay
            .delay_us(u32::try_from(wait).unwrap_or(u32::MAX))
            .await;
        true
    }

    fn expired(&self, started: u64) -> bool {
        self.remaining_us(started) == 0
    }

    fn remaining_us(&self, started: u64) -> u64 {
        u64::from(self.config.timeout_us).saturating_sub(self.elapsed_since(started))
    }

    fn elapsed_since(&self, started: u64) -> u64 {
        self.clock.now_micros().saturating_sub(started)
    }
}
