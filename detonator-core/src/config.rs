//! Compile-time timing and sizing constants.
//!
//! The device has no persisted configuration; everything the control loop and
//! the FIFO reader need is fixed at build time. The `const fn` config structs
//! exist so host tooling can shorten waits without touching the defaults.

/// Cooldown applied to an input line after an edge is accepted.
pub const INPUT_COOLDOWN_MS: u32 = 100;

/// Period of the cooperative control loop.
pub const TICK_PERIOD_MS: u32 = 40;

/// Number of discrete countdown steps before the countdown completes.
pub const COUNTDOWN_STEPS: u8 = 3;

/// Duration of a single countdown step.
pub const COUNTDOWN_STEP_MS: u32 = 1_000;

/// Time the ignition output stays high during a detonation.
pub const IGNITION_PULSE_MS: u32 = 1_000;

/// Size of one DMP packet in the default sensor-fusion output format.
pub const FIFO_PACKET_SIZE: usize = 42;

/// Occupancy above which draining is slower than resetting and waiting.
pub const FIFO_HIGH_WATER: u16 = 200;

/// Upper bound for a single `read_packet` call.
pub const FIFO_TIMEOUT_US: u32 = 11_000;

/// Largest burst the I2C transport moves in one transaction.
pub const FIFO_MAX_TRANSFER: usize = 32;

/// Delay between occupancy polls while waiting for a packet to fill.
pub const FIFO_POLL_INTERVAL_US: u32 = 500;

/// Timing parameters for the detonation state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimingConfig {
    pub cooldown_ms: u32,
    pub countdown_steps: u8,
    pub countdown_step_ms: u32,
    pub ignition_pulse_ms: u32,
}

impl TimingConfig {
    /// Creates a configuration from explicit values.
    pub const fn new(
        cooldown_ms: u32,
        countdown_steps: u8,
        countdown_step_ms: u32,
        ignition_pulse_ms: u32,
    ) -> Self {
        Self {
            cooldown_ms,
            countdown_steps,
            countdown_step_ms,
            ignition_pulse_ms,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::new(
            INPUT_COOLDOWN_MS,
            COUNTDOWN_STEPS,
            COUNTDOWN_STEP_MS,
            IGNITION_PULSE_MS,
        )
    }
}

/// Parameters for the FIFO synchronization protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FifoConfig {
    pub high_water: u16,
    pub timeout_us: u32,
    pub poll_interval_us: u32,
}

impl FifoConfig {
    /// Creates a configuration from explicit values.
    pub const fn new(high_water: u16, timeout_us: u32, poll_interval_us: u32) -> Self {
        Self {
            high_water,
            timeout_us,
            poll_interval_us,
        }
    }
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self::new(FIFO_HIGH_WATER, FIFO_TIMEOUT_US, FIFO_POLL_INTERVAL_US)
    }
}

