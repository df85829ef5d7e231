//! Software model of the DMP FIFO for host tests and the emulator.
//!
//! Time only moves when something advances the shared [`SimClock`]: a
//! [`SimDelay`] wait, a bus transaction with a non-zero cost, or the host
//! calling [`SimClock::advance_to`]. Scheduled bytes and the periodic packet
//! producer catch up lazily whenever the FIFO is accessed.

use core::cell::Cell;

use embedded_hal_async::delay::DelayNs;
use heapless::{Deque, Vec};

use crate::config::FIFO_PACKET_SIZE;

use super::{FifoPacket, FifoRegisters, MicrosClock};

/// Hardware FIFO size of the MPU6050.
pub const SIM_FIFO_CAPACITY: usize = 1024;

/// Rotation about the Z axis added by each produced packet, in degrees.
pub const SIM_DEGREES_PER_PACKET: f32 = 2.0;

const MAX_SCHEDULED: usize = 8;
const MAX_BURST: usize = 64;

/// Shared simulated time with nanosecond resolution.
#[derive(Debug, Default)]
pub struct SimClock {
    now_ns: Cell<u64>,
}

impl SimClock {
    /// Creates a clock at t = 0.
    pub const fn new() -> Self {
        Self {
            now_ns: Cell::new(0),
        }
    }

    /// Current time in microseconds.
    pub fn now(&self) -> u64 {
        self.now_ns.get() / 1_000
    }

    /// Moves time forward by `ns`.
    pub fn advance_ns(&self, ns: u64) {
        self.now_ns.set(self.now_ns.get().saturating_add(ns));
    }

    /// Moves time forward by `us`.
    pub fn advance_us(&self, us: u64) {
        self.advance_ns(us.saturating_mul(1_000));
    }

    /// Moves time forward to `us`; earlier targets are ignored.
    pub fn advance_to(&self, us: u64) {
        let target = us.saturating_mul(1_000);
        if target > self.now_ns.get() {
            self.now_ns.set(target);
        }
    }
}

impl MicrosClock for SimClock {
    fn now_micros(&self) -> u64 {
        self.now()
    }
}

/// Delay that advances a [`SimClock`] instead of sleeping.
#[derive(Copy, Clone, Debug)]
pub struct SimDelay<'a> {
    clock: &'a SimClock,
}

impl<'a> SimDelay<'a> {
    pub const fn new(clock: &'a SimClock) -> Self {
        Self { clock }
    }
}

impl DelayNs for SimDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.clock.advance_ns(u64::from(ns));
    }
}

/// Errors raised by [`SimulatedFifo`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimBusError {
    /// Failure injected through [`SimulatedFifo::fail_after`].
    Injected,
    /// More bytes were requested than the FIFO holds.
    Underflow { requested: usize, available: usize },
}

impl core::fmt::Display for SimBusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Copy, Clone, Debug)]
struct Producer {
    period_us: u64,
    next_due_us: u64,
    next_sequence: u16,
}

#[derive(Clone, Debug)]
struct Burst {
    due_us: u64,
    bytes: Vec<u8, MAX_BURST>,
}

/// Builds the packet the simulated DMP emits for `sequence`: a quaternion
/// rotated `sequence * SIM_DEGREES_PER_PACKET` degrees about Z, with the
/// sequence number in the last two bytes.
pub fn sim_packet(sequence: u16) -> FifoPacket {
    let degrees = f32::from(sequence) * SIM_DEGREES_PER_PACKET;
    let half = degrees * (core::f32::consts::PI / 180.0) / 2.0;
    let w = libm::cosf(half);
    let z = libm::sinf(half);

    let mut bytes = [0u8; FIFO_PACKET_SIZE];
    for (offset, component) in [(0, w), (4, 0.0), (8, 0.0), (12, z)] {
        // |component| <= 1, so the scaled value fits in an i16.
        #[allow(clippy::cast_possible_truncation)]
        let raw = (component * 16_384.0) as i16;
        bytes[offset..offset + 2].copy_from_slice(&raw.to_be_bytes());
    }
    bytes[FIFO_PACKET_SIZE - 2..].copy_from_slice(&sequence.to_be_bytes());
    FifoPacket::from_bytes(bytes)
}

/// Sequence number embedded by [`sim_packet`].
pub fn sim_sequence(packet: &FifoPacket) -> u16 {
    let bytes = packet.as_bytes();
    u16::from_be_bytes([bytes[FIFO_PACKET_SIZE - 2], bytes[FIFO_PACKET_SIZE - 1]])
}

/// Byte-level FIFO model implementing [`FifoRegisters`].
pub struct SimulatedFifo<'a, const CAP: usize = SIM_FIFO_CAPACITY> {
    clock: &'a SimClock,
    bytes: Deque<u8, CAP>,
    producer: Option<Producer>,
    scheduled: Vec<Burst, MAX_SCHEDULED>,
    transaction_cost_us: u64,
    transactions: u32,
    fail_at: Option<u32>,
    resets: u32,
    overflowed: bool,
}

impl<'a, const CAP: usize> SimulatedFifo<'a, CAP> {
    /// Empty FIFO with no producer and free transactions.
    pub fn new(clock: &'a SimClock) -> Self {
        Self {
            clock,
            bytes: Deque::new(),
            producer: None,
            scheduled: Vec::new(),
            transaction_cost_us: 0,
            transactions: 0,
            fail_at: None,
            resets: 0,
            overflowed: false,
        }
    }

    /// Emits [`sim_packet`]s every `period_us`, starting at `first_due_us`
    /// with sequence `first_sequence`.
    pub fn start_producer(&mut self, period_us: u64, first_due_us: u64, first_sequence: u16) {
        self.producer = (period_us > 0).then_some(Producer {
            period_us,
            next_due_us: first_due_us,
            next_sequence: first_sequence,
        });
    }

    /// Stops the periodic producer.
    pub fn stop_producer(&mut self) {
        self.producer = None;
    }

    /// Sequence number the producer emits next, if running.
    pub fn next_sequence(&self) -> Option<u16> {
        self.producer.map(|producer| producer.next_sequence)
    }

    /// Simulated time each register access takes.
    pub fn set_transaction_cost(&mut self, cost_us: u64) {
        self.transaction_cost_us = cost_us;
    }

    /// Makes the transaction after the next `successful` ones fail once.
    pub fn fail_after(&mut self, successful: u32) {
        self.fail_at = Some(self.transactions.saturating_add(successful).saturating_add(1));
    }

    /// Appends bytes immediately.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push_byte(byte);
        }
    }

    /// Appends [`sim_packet`]`(sequence)` immediately.
    pub fn push_packet(&mut self, sequence: u16) {
        self.push_bytes(sim_packet(sequence).as_bytes());
    }

    /// Appends `len` copies of `fill`.
    pub fn push_fill(&mut self, fill: u8, len: usize) {
        for _ in 0..len {
            self.push_byte(fill);
        }
    }

    /// Appends `bytes` once the clock reaches `due_us`. Bursts past the
    /// schedule capacity or longer than the burst limit are truncated.
    pub fn schedule_bytes(&mut self, due_us: u64, bytes: &[u8]) {
        let mut burst = Burst {
            due_us,
            bytes: Vec::new(),
        };
        for &byte in bytes.iter().take(MAX_BURST) {
            let _ = burst.bytes.push(byte);
        }
        let _ = self.scheduled.push(burst);
    }

    /// Bytes currently buffered, after catching up with the clock.
    pub fn occupancy(&mut self) -> usize {
        self.catch_up();
        self.bytes.len()
    }

    /// FIFO resets received.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Register accesses received, failed ones included.
    pub fn transactions(&self) -> u32 {
        self.transactions
    }

    /// Returns `true` if the producer ever overwrote unread bytes.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    fn push_byte(&mut self, byte: u8) {
        if self.bytes.is_full() {
            self.bytes.pop_front();
            self.overflowed = true;
        }
        let _ = self.bytes.push_back(byte);
    }

    fn begin(&mut self) -> Result<(), SimBusError> {
        self.transactions = self.transactions.saturating_add(1);
        self.clock.advance_us(self.transaction_cost_us);
        self.catch_up();
        if self.fail_at == Some(self.transactions) {
            self.fail_at = None;
            return Err(SimBusError::Injected);
        }
        Ok(())
    }

    fn catch_up(&mut self) {
        let now = self.clock.now();

        let mut index = 0;
        while index < self.scheduled.len() {
            if self.scheduled[index].due_us <= now {
                let burst = self.scheduled.remove(index);
                self.push_bytes(&burst.bytes);
            } else {
                index += 1;
            }
        }

        let Some(mut producer) = self.producer else {
            return;
        };
        if producer.next_due_us <= now {
            // Anything older than a full FIFO would be overwritten anyway.
            let max_packets = (CAP / FIFO_PACKET_SIZE + 1) as u64;
            let due = (now - producer.next_due_us) / producer.period_us + 1;
            if due > max_packets {
                let skipped = due - max_packets;
                #[allow(clippy::cast_possible_truncation)]
                let skipped_sequences = skipped as u16;
                producer.next_sequence = producer.next_sequence.wrapping_add(skipped_sequences);
                producer.next_due_us += skipped * producer.period_us;
            }
            while producer.next_due_us <= now {
                self.push_packet(producer.next_sequence);
                producer.next_sequence = producer.next_sequence.wrapping_add(1);
                producer.next_due_us += producer.period_us;
            }
        }
        self.producer = Some(producer);
    }
}

impl<const CAP: usize> FifoRegisters for SimulatedFifo<'_, CAP> {
    type Error = SimBusError;

    fn fifo_count(&mut self) -> Result<u16, SimBusError> {
        self.begin()?;
        Ok(u16::try_from(self.bytes.len()).unwrap_or(u16::MAX))
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), SimBusError> {
        self.begin()?;
        if buf.len() > self.bytes.len() {
            return Err(SimBusError::Underflow {
                requested: buf.len(),
                available: self.bytes.len(),
            });
        }
        for slot in buf.iter_mut() {
            *slot = self.bytes.pop_front().unwrap_or_default();
        }
        Ok(())
    }

    fn reset_fifo(&mut self) -> Result<(), SimBusError> {
        self.begin()?;
        self.bytes.clear();
        self.resets = self.resets.saturating_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_catches_up_with_the_clock() {
        let clock = SimClock::new();
        let mut fifo: SimulatedFifo<'_> = SimulatedFifo::new(&clock);
        fifo.start_producer(10_000, 10_000, 0);

        assert_eq!(fifo.occupancy(), 0);
        clock.advance_us(25_000);
        assert_eq!(fifo.occupancy(), 2 * FIFO_PACKET_SIZE);
        assert_eq!(fifo.next_sequence(), Some(2));
    }

    #[test]
    fn overflow_drops_oldest_bytes() {
        let clock = SimClock::new();
        let mut fifo: SimulatedFifo<'_, 64> = SimulatedFifo::new(&clock);
        fifo.push_fill(0xAA, 60);
        fifo.push_packet(3);

        assert!(fifo.overflowed());
        assert_eq!(fifo.occupancy(), 64);
    }

    #[test]
    fn sim_packet_carries_its_sequence() {
        let packet = sim_packet(513);
        assert_eq!(sim_sequence(&packet), 513);
        assert_eq!(sim_packet(0).be_i16(0), 16_384);
        assert_eq!(sim_packet(0).be_i16(12), 0);
    }

    #[test]
    fn sim_quaternion_stays_in_fixed_point_range_over_a_full_turn() {
        for sequence in 0..=180 {
            let packet = sim_packet(sequence);
            for offset in [0, 12] {
                let raw = packet.be_i16(offset);
                assert!((-16_384..=16_384).contains(&raw), "seq {sequence}: {raw}");
            }
        }
        assert_eq!(sim_packet(180).be_i16(0), -16_384);
        assert_eq!(sim_packet(90).be_i16(12), 16_384);
    }
}
