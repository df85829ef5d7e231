//! Mode/state evaluator run once per control-loop tick.

use core::cmp::min;

use embedded_hal_async::delay::DelayNs;

use crate::config::{TICK_PERIOD_MS, TimingConfig};
use crate::context::{DeviceContext, Mode, State};
use crate::debounce::{Debouncer, EdgeVerdict};
use crate::input::InputLine;
use crate::telemetry::{
    FaultSite, TelemetryEventKind, TelemetryPayload, TelemetryRecorder, TimestampMillis,
};

use super::{
    CountdownOutcome, DetonationError, DisplaySnapshot, Ignition, StatusDisplay, countdown_text,
};

/// Upper bound on state evaluations per tick. `ShouldExplode` and
/// `ModeChanged` are handled in the same tick as the transition that produced
/// them; a countdown that completes hands over to detonation, so three passes
/// cover every chain and the fourth is slack.
pub const MAX_IMMEDIATE_PASSES: usize = 4;

/// Row used for the heading ("MODE", "ARMED").
const HEADING_ROW: u8 = 0;
/// Row used for the mode label and countdown digits.
const VALUE_ROW: u8 = 1;

/// Drives the shared [`DeviceContext`] through arm, countdown and detonation.
///
/// The machine owns the actuators and the debouncer. Interrupt handlers only
/// touch the context's edge mailbox and, for external aborts, its state.
pub struct DetonationStateMachine<'a, I, D, W> {
    ctx: &'a DeviceContext,
    debouncer: Debouncer,
    ignition: I,
    display: D,
    delay: W,
    timing: TimingConfig,
    telemetry: TelemetryRecorder,
    uptime_ms: TimestampMillis,
    last_snapshot: Option<DisplaySnapshot>,
    /// Set while `run_countdown` owns the loop; primary edges are void then.
    in_countdown: bool,
}

impl<'a, I, D, W> DetonationStateMachine<'a, I, D, W>
where
    I: Ignition,
    D: StatusDisplay,
    W: DelayNs,
{
    /// Creates a machine using the default timing.
    pub fn new(ctx: &'a DeviceContext, ignition: I, display: D, delay: W) -> Self {
        Self::with_timing(ctx, ignition, display, delay, TimingConfig::default())
    }

    /// Creates a machine with explicit timing.
    pub fn with_timing(
        ctx: &'a DeviceContext,
        ignition: I,
        display: D,
        delay: W,
        timing: TimingConfig,
    ) -> Self {
        Self {
            ctx,
            debouncer: Debouncer::with_cooldown(timing.cooldown_ms),
            ignition,
            display,
            delay,
            timing,
            telemetry: TelemetryRecorder::new(),
            uptime_ms: 0,
            last_snapshot: None,
            in_countdown: false,
        }
    }

    /// Current shared state.
    pub fn state(&self) -> State {
        self.ctx.state()
    }

    /// Current shared mode.
    pub fn mode(&self) -> Mode {
        self.ctx.mode()
    }

    /// Per-line cooldowns.
    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Records produced so far.
    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Mutable access so the control loop can add its own records (FIFO
    /// recoveries, sensor faults) to the same ring.
    pub fn telemetry_mut(&mut self) -> &mut TelemetryRecorder {
        &mut self.telemetry
    }

    /// Control-loop time: the sum of every tick, countdown step and pulse.
    pub fn uptime_ms(&self) -> TimestampMillis {
        self.uptime_ms
    }

    /// Display contents captured by the most recent detonation.
    pub fn last_snapshot(&self) -> Option<&DisplaySnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Ignition collaborator.
    pub fn ignition(&self) -> &I {
        &self.ignition
    }

    /// Display collaborator.
    pub fn display(&self) -> &D {
        &self.display
    }

    /// Delay collaborator.
    pub fn delay(&self) -> &W {
        &self.delay
    }

    /// Renders the initial mode screen.
    pub fn boot(&mut self) {
        self.render_mode();
    }

    /// Runs one control-loop iteration.
    ///
    /// Counts every cooldown down by `elapsed_ms`, applies the edges waiting in
    /// the mailbox and evaluates the resulting state. A countdown or a
    /// detonation started here runs to completion (or abort) before this
    /// returns. Returns the state left behind.
    pub async fn tick(&mut self, elapsed_ms: u32) -> Result<State, DetonationError<I::Error>> {
        self.advance(elapsed_ms);
        self.service_inputs();
        self.evaluate().await
    }

    /// Drains the edge mailbox through the debouncer and applies accepted edges.
    pub fn service_inputs(&mut self) {
        for verdict in self.debouncer.drain(self.ctx.edges()) {
            match verdict {
                EdgeVerdict::Accepted(line) => {
                    self.telemetry
                        .record_event(TelemetryEventKind::EdgeAccepted(line), self.uptime_ms);
                    self.apply_edge(line);
                }
                EdgeVerdict::Dropped { line, remaining_ms } => {
                    self.telemetry.record(
                        TelemetryEventKind::EdgeDropped(line),
                        TelemetryPayload::Cooldown { remaining_ms },
                        self.uptime_ms,
                    );
                }
            }
        }
    }

    /// Applies one accepted edge to the shared state.
    ///
    /// A mode change is honoured in every state and cancels a countdown or an
    /// armed trigger. The primary button only starts a countdown from
    /// `Normal` outside a countdown, so an abort racing a press cannot hand
    /// the running countdown its origin state back. A motion edge only fires
    /// while armed in motion mode. Other edges are consumed without effect.
    pub fn apply_edge(&mut self, line: InputLine) {
        let state = self.ctx.state();
        match line {
            InputLine::Mode => {
                let mode = self.ctx.advance_mode();
                self.ctx.set_state(State::ModeChanged);
                self.telemetry
                    .record_event(TelemetryEventKind::ModeSelected(mode), self.uptime_ms);
            }
            InputLine::Primary if state == State::Normal && !self.in_countdown => {
                let next = match self.ctx.mode() {
                    Mode::Timer => State::Countdown,
                    Mode::Motion => State::PirCountdown,
                };
                self.ctx.set_state(next);
            }
            InputLine::Motion if state == State::Armed && self.ctx.mode() == Mode::Motion => {
                self.ctx.set_state(State::ShouldExplode);
                self.telemetry
                    .record_event(TelemetryEventKind::Triggered, self.uptime_ms);
            }
            InputLine::Primary | InputLine::Motion => {}
        }
    }

    /// Evaluates the shared state until it settles in `Normal` or `Armed`, at
    /// most [`MAX_IMMEDIATE_PASSES`] times.
    async fn evaluate(&mut self) -> Result<State, DetonationError<I::Error>> {
        for _ in 0..MAX_IMMEDIATE_PASSES {
            match self.ctx.state() {
                State::Normal | State::Armed => break,
                origin @ (State::Countdown | State::PirCountdown) => {
                    match self.run_countdown(origin).await {
                        CountdownOutcome::Completed => self.finish_countdown(origin),
                        CountdownOutcome::Aborted { observed } => {
                            if observed == State::Normal {
                                self.render_mode();
                            }
                        }
                    }
                }
                State::ShouldExplode => {
                    self.detonate().await?;
                }
                State::ModeChanged => {
                    self.render_mode();
                    self.ctx.set_state(State::Normal);
                }
            }
        }
        Ok(self.ctx.state())
    }

    /// Counts down from `origin`, which must be `Countdown` or `PirCountdown`.
    ///
    /// The shared state is re-read before and after every step; any value
    /// other than `origin` aborts the run. Between re-reads the mailbox keeps
    /// being serviced at the tick period so a mode change or an external abort
    /// is seen while the countdown waits.
    pub async fn run_countdown(&mut self, origin: State) -> CountdownOutcome {
        self.in_countdown = true;
        let outcome = self.count_down(origin).await;
        self.in_countdown = false;
        outcome
    }

    async fn count_down(&mut self, origin: State) -> CountdownOutcome {
        let mode = self.ctx.mode();
        self.telemetry
            .record_event(TelemetryEventKind::CountdownStarted(mode), self.uptime_ms);

        for step in 0..self.timing.countdown_steps {
            if let Some(observed) = self.changed_from(origin) {
                return self.abort_countdown(observed);
            }

            let remaining = self.timing.countdown_steps - step;
            self.render_countdown(remaining);
            self.telemetry
                .record_event(TelemetryEventKind::CountdownStep(remaining), self.uptime_ms);

            self.wait_serviced(self.timing.countdown_step_ms, origin)
                .await;

            if let Some(observed) = self.changed_from(origin) {
                return self.abort_countdown(observed);
            }
        }

        // Final check before declaring completion; also covers a zero-step
        // configuration.
        if let Some(observed) = self.changed_from(origin) {
            return self.abort_countdown(observed);
        }

        self.telemetry
            .record_event(TelemetryEventKind::CountdownComplete(mode), self.uptime_ms);
        CountdownOutcome::Completed
    }

    /// Fires the ignition pulse if the state is still `ShouldExplode`.
    ///
    /// Returns `Ok(false)` without touching the ignition line when the state
    /// changed since the transition was requested. The re-check narrows the
    /// race with interrupt-side writes; it does not close it.
    pub async fn detonate(&mut self) -> Result<bool, DetonationError<I::Error>> {
        let observed = self.ctx.state();
        if observed != State::ShouldExplode {
            self.telemetry.record_event(
                TelemetryEventKind::DetonationSkipped(observed),
                self.uptime_ms,
            );
            return Ok(false);
        }

        let snapshot = self.display.capture();
        if let Some(snapshot) = self.display_ok(snapshot) {
            self.last_snapshot = Some(snapshot);
        }

        if let Err(err) = self.ignition.set_active(true) {
            return Err(self.ignition_fault(err));
        }
        self.telemetry
            .record_event(TelemetryEventKind::IgnitionOn, self.uptime_ms);

        let pulse_ms = self.timing.ignition_pulse_ms;
        self.delay.delay_ms(pulse_ms).await;
        self.advance(pulse_ms);

        if let Err(err) = self.ignition.set_active(false) {
            return Err(self.ignition_fault(err));
        }
        self.telemetry
            .record_event(TelemetryEventKind::IgnitionOff, self.uptime_ms);

        self.ctx.set_state(State::Normal);
        self.telemetry
            .record_event(TelemetryEventKind::Detonated, self.uptime_ms);
        self.render_mode();
        Ok(true)
    }

    fn finish_countdown(&mut self, origin: State) {
        match origin {
            State::PirCountdown => {
                self.ctx.set_state(State::Armed);
                self.telemetry
                    .record_event(TelemetryEventKind::Armed, self.uptime_ms);
                self.render_armed();
            }
            _ => self.ctx.set_state(State::ShouldExplode),
        }
    }

    fn abort_countdown(&mut self, observed: State) -> CountdownOutcome {
        self.telemetry.record_event(
            TelemetryEventKind::CountdownAborted(observed),
            self.uptime_ms,
        );
        CountdownOutcome::Aborted { observed }
    }

    fn changed_from(&self, origin: State) -> Option<State> {
        let observed = self.ctx.state();
        (observed != origin).then_some(observed)
    }

    /// Sleeps `duration_ms` in tick-sized slices, servicing the mailbox after
    /// each one. Returns early once the state leaves `origin`.
    ///
    /// A state change during the slice is checked before any drained edge can
    /// overwrite it.
    async fn wait_serviced(&mut self, duration_ms: u32, origin: State) {
        let mut remaining = duration_ms;
        while remaining > 0 {
            let slice = min(remaining, TICK_PERIOD_MS);
            self.delay.delay_ms(slice).await;
            self.advance(slice);
            remaining -= slice;

            if self.ctx.state() != origin {
                break;
            }
            self.service_inputs();
            if self.ctx.state() != origin {
                break;
            }
        }
    }

    fn advance(&mut self, elapsed_ms: u32) {
        self.uptime_ms = self.uptime_ms.saturating_add(u64::from(elapsed_ms));
        self.debouncer.tick(elapsed_ms);
    }

    /// Fail-safe after an ignition write failed: try to release the line,
    /// return to `Normal` and show the mode again.
    fn ignition_fault(&mut self, err: I::Error) -> DetonationError<I::Error> {
        self.telemetry
            .record_event(TelemetryEventKind::Fault(FaultSite::Ignition), self.uptime_ms);
        // The line already failed once; a second failure leaves nothing else to try.
        let _ = self.ignition.set_active(false);
        self.ctx.set_state(State::Normal);
        self.render_mode();
        DetonationError::Ignition(err)
    }

    fn render_mode(&mut self) {
        let label = self.ctx.mode().label();
        self.render(["MODE", label]);
    }

    fn render_armed(&mut self) {
        let label = self.ctx.mode().label();
        self.render(["ARMED", label]);
    }

    fn render_countdown(&mut self, remaining: u8) {
        if !self.ctx.state().is_counting_down() {
            return;
        }
        let digits = countdown_text(remaining);
        let result = self.display.write_line(VALUE_ROW, &digits);
        self.display_ok(result);
    }

    fn render(&mut self, [heading, value]: [&str; 2]) {
        let result = self
            .display
            .clear()
            .and_then(|()| self.display.write_line(HEADING_ROW, heading))
            .and_then(|()| self.display.write_line(VALUE_ROW, value));
        self.display_ok(result);
    }

    /// Logs a display failure and carries on.
    fn display_ok<T>(&mut self, result: Result<T, D::Error>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(_) => {
                self.telemetry
                    .record_event(TelemetryEventKind::Fault(FaultSite::Display), self.uptime_ms);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use embassy_futures::block_on;

    use super::*;
    use crate::detonation::{NoopDisplay, NoopIgnition};

    struct InstantDelay;

    impl DelayNs for InstantDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    #[derive(Default)]
    struct FlakyIgnition {
        writes: u8,
        fail_on: u8,
    }

    impl Ignition for FlakyIgnition {
        type Error = u8;

        fn set_active(&mut self, _active: bool) -> Result<(), u8> {
            self.writes += 1;
            if self.writes == self.fail_on {
                Err(self.writes)
            } else {
                Ok(())
            }
        }
    }

    struct BrokenDisplay;

    impl StatusDisplay for BrokenDisplay {
        type Error = ();

        fn clear(&mut self) -> Result<(), ()> {
            Err(())
        }

        fn write_line(&mut self, _: u8, _: &str) -> Result<(), ()> {
            Err(())
        }

        fn capture(&mut self) -> Result<DisplaySnapshot, ()> {
            Err(())
        }
    }

    #[test]
    fn primary_in_timer_mode_detonates_and_returns_to_normal() {
        let ctx = DeviceContext::new();
        let mut machine =
            DetonationStateMachine::new(&ctx, NoopIgnition::new(), NoopDisplay::new(), InstantDelay);

        ctx.signal(InputLine::Primary);
        let state: Result<State, DetonationError<Infallible>> = block_on(machine.tick(40));

        assert_eq!(state, Ok(State::Normal));
        assert!(machine.telemetry().contains(TelemetryEventKind::Detonated));
        assert_eq!(machine.uptime_ms(), 40 + 3_000 + 1_000);
    }

    #[test]
    fn detonate_refuses_when_state_moved_on() {
        let ctx = DeviceContext::new();
        let mut machine =
            DetonationStateMachine::new(&ctx, NoopIgnition::new(), NoopDisplay::new(), InstantDelay);

        ctx.set_state(State::Armed);
        assert_eq!(block_on(machine.detonate()), Ok(false));
        assert!(
            machine
                .telemetry()
                .contains(TelemetryEventKind::DetonationSkipped(State::Armed))
        );
        assert!(!machine.telemetry().contains(TelemetryEventKind::IgnitionOn));
    }

    #[test]
    fn failed_ignition_release_forces_normal() {
        let ctx = DeviceContext::new();
        let ignition = FlakyIgnition {
            writes: 0,
            fail_on: 2,
        };
        let mut machine =
            DetonationStateMachine::new(&ctx, ignition, NoopDisplay::new(), InstantDelay);

        ctx.set_state(State::ShouldExplode);
        let result = block_on(machine.tick(40));

        assert_eq!(result, Err(DetonationError::Ignition(2)));
        assert_eq!(ctx.state(), State::Normal);
        // Set high, failed release, fail-safe release.
        assert_eq!(machine.ignition().writes, 3);
        assert!(
            machine
                .telemetry()
                .contains(TelemetryEventKind::Fault(FaultSite::Ignition))
        );
    }

    #[test]
    fn display_failures_do_not_block_detonation() {
        let ctx = DeviceContext::new();
        let mut machine =
            DetonationStateMachine::new(&ctx, NoopIgnition::new(), BrokenDisplay, InstantDelay);
        machine.boot();

        ctx.set_state(State::ShouldExplode);
        assert_eq!(block_on(machine.tick(40)), Ok(State::Normal));
        assert!(machine.telemetry().contains(TelemetryEventKind::Detonated));
        assert!(
            machine
                .telemetry()
                .contains(TelemetryEventKind::Fault(FaultSite::Display))
        );
        assert!(machine.last_snapshot().is_none());
    }

    #[test]
    fn motion_edge_outside_armed_is_ignored() {
        let ctx = DeviceContext::with_mode(Mode::Motion);
        let mut machine =
            DetonationStateMachine::new(&ctx, NoopIgnition::new(), NoopDisplay::new(), InstantDelay);

        ctx.signal(InputLine::Motion);
        assert_eq!(block_on(machine.tick(40)), Ok(State::Normal));
        assert!(!machine.telemetry().contains(TelemetryEventKind::Triggered));
    }

    #[test]
    fn mode_change_disarms() {
        let ctx = DeviceContext::with_mode(Mode::Motion);
        let mut machine =
            DetonationStateMachine::new(&ctx, NoopIgnition::new(), NoopDisplay::new(), InstantDelay);

        ctx.set_state(State::Armed);
        ctx.signal(InputLine::Mode);
        assert_eq!(block_on(machine.tick(40)), Ok(State::Normal));
        assert_eq!(ctx.mode(), Mode::Timer);
        assert!(!machine.telemetry().contains(TelemetryEventKind::IgnitionOn));
    }
}
