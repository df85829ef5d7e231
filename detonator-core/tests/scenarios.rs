mod support;

use detonator_core::config::{COUNTDOWN_STEP_MS, IGNITION_PULSE_MS, INPUT_COOLDOWN_MS, TICK_PERIOD_MS};
use detonator_core::context::{DeviceContext, MODE_COUNT, Mode, State};
use detonator_core::debounce::Debouncer;
use detonator_core::input::InputLine;
use detonator_core::telemetry::TelemetryEventKind;
use embassy_futures::block_on;

use support::{Injection, TestClock, machine};

#[test]
fn timer_mode_countdown_detonates_once() {
    let ctx = DeviceContext::new();
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| delay);

    ctx.signal(InputLine::Primary);
    let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");

    assert_eq!(state, State::Normal);
    assert_eq!(
        machine.delay().observed.first().copied(),
        Some(State::Countdown),
        "primary press in timer mode starts the countdown"
    );

    let ignition = machine.ignition();
    assert_eq!(ignition.single_pulse_ms(), Some(u64::from(IGNITION_PULSE_MS)));
    assert_eq!(
        ignition.transitions[0].0,
        3 * u64::from(COUNTDOWN_STEP_MS),
        "ignition fires after three uninterrupted steps"
    );

    let snapshot = machine.last_snapshot().expect("snapshot captured");
    assert_eq!(snapshot.lines()[0].as_str(), "MODE");
    assert_eq!(snapshot.lines()[1].as_str(), "1");

    // Detonation ends by showing the mode again.
    assert_eq!(machine.display().rows[1], "TIMER");
    assert_eq!(machine.display().writes.iter().filter(|w| *w == "3").count(), 1);
}

#[test]
fn motion_mode_arms_then_fires_on_pir() {
    let ctx = DeviceContext::with_mode(Mode::Motion);
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| delay);

    ctx.signal(InputLine::Primary);
    let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");
    assert_eq!(state, State::Armed);
    assert!(machine.ignition().transitions.is_empty());
    assert_eq!(machine.display().rows[0], "ARMED");

    // Armed stays armed across idle ticks.
    let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");
    assert_eq!(state, State::Armed);

    ctx.signal(InputLine::Motion);
    let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");
    assert_eq!(state, State::Normal);
    assert!(machine.telemetry().contains(TelemetryEventKind::Triggered));
    assert_eq!(
        machine.ignition().single_pulse_ms(),
        Some(u64::from(IGNITION_PULSE_MS))
    );
}

#[test]
fn pir_edge_during_pir_countdown_does_not_fire() {
    let ctx = DeviceContext::with_mode(Mode::Motion);
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| {
        delay.at(1_500, Injection::Edge(InputLine::Motion))
    });

    ctx.signal(InputLine::Primary);
    let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");

    assert_eq!(state, State::Armed);
    assert!(machine.ignition().transitions.is_empty());
}

#[test]
fn mode_press_mid_countdown_aborts_and_advances_mode() {
    let ctx = DeviceContext::new();
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| {
        delay.at(1_000, Injection::Edge(InputLine::Mode))
    });

    ctx.signal(InputLine::Primary);
    let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");

    assert_eq!(state, State::Normal);
    assert_eq!(ctx.mode(), Mode::Motion);
    assert!(machine.ignition().transitions.is_empty());
    assert!(
        machine
            .telemetry()
            .contains(TelemetryEventKind::CountdownAborted(State::ModeChanged))
    );
    assert!(
        clock.now_ms() < 2 * u64::from(COUNTDOWN_STEP_MS),
        "abort is noticed within the second step"
    );
    assert_eq!(machine.display().rows[1], "MOTION");
}

#[test]
fn external_abort_before_final_step_never_detonates() {
    for abort_at in [0, 40, 999, 1_000, 1_960, 2_500, 2_960, 2_999] {
        let ctx = DeviceContext::new();
        let clock = TestClock::default();
        let mut machine = machine(&ctx, &clock, |delay| {
            delay.at(abort_at, Injection::SetState(State::Normal))
        });

        ctx.signal(InputLine::Primary);
        let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");

        assert_eq!(state, State::Normal, "abort at {abort_at} ms");
        assert!(
            machine.ignition().transitions.is_empty(),
            "abort at {abort_at} ms still fired"
        );
        assert!(
            machine
                .telemetry()
                .contains(TelemetryEventKind::CountdownAborted(State::Normal))
        );
    }
}

#[test]
fn abort_and_press_in_the_same_slice_still_aborts() {
    let ctx = DeviceContext::new();
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| {
        delay
            .at(1_001, Injection::SetState(State::Normal))
            .at(1_030, Injection::Edge(InputLine::Primary))
    });

    ctx.signal(InputLine::Primary);
    let state = block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");

    assert_eq!(state, State::Normal);
    assert!(
        machine.ignition().transitions.is_empty(),
        "aborted countdown fired at {:?}",
        machine.ignition().transitions
    );
    assert!(
        machine
            .telemetry()
            .contains(TelemetryEventKind::CountdownAborted(State::Normal))
    );
    assert_eq!(
        machine
            .telemetry()
            .oldest_first()
            .filter(|record| record.event == TelemetryEventKind::CountdownStarted(Mode::Timer))
            .count(),
        1
    );
    // The late press is left for the next tick instead of reviving the old run.
    assert!(ctx.edges().is_pending(InputLine::Primary));
}

#[test]
fn press_after_an_aborted_countdown_starts_a_fresh_one() {
    let ctx = DeviceContext::new();
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| {
        delay
            .at(1_001, Injection::SetState(State::Normal))
            .at(1_030, Injection::Edge(InputLine::Primary))
    });

    ctx.signal(InputLine::Primary);
    block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");
    let aborted_at = clock.now_ms();

    block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");

    let ignition = machine.ignition();
    assert_eq!(ignition.single_pulse_ms(), Some(u64::from(IGNITION_PULSE_MS)));
    assert_eq!(
        ignition.transitions[0].0,
        aborted_at + 3 * u64::from(COUNTDOWN_STEP_MS),
        "second countdown runs its full length"
    );
}

#[test]
fn primary_press_while_counting_down_is_ignored() {
    let ctx = DeviceContext::new();
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| {
        delay
            .at(500, Injection::Edge(InputLine::Primary))
            .at(1_500, Injection::Edge(InputLine::Primary))
    });

    ctx.signal(InputLine::Primary);
    block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");

    assert_eq!(machine.ignition().transitions.len(), 2, "exactly one pulse");
    assert_eq!(
        machine
            .telemetry()
            .oldest_first()
            .filter(|record| record.event == TelemetryEventKind::CountdownStarted(Mode::Timer))
            .count(),
        1
    );
}

#[test]
fn mode_rotation_returns_to_start() {
    let ctx = DeviceContext::new();
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| delay);

    let mut seen = Vec::new();
    for _ in 0..MODE_COUNT {
        ctx.signal(InputLine::Mode);
        let state = block_on(machine.tick(INPUT_COOLDOWN_MS)).expect("ignition fault");
        assert_eq!(state, State::Normal);
        seen.push(ctx.mode());
    }

    assert_eq!(seen, [Mode::Motion, Mode::Timer]);
    assert_eq!(machine.display().rows[1], "TIMER");
}

#[test]
fn edges_closer_than_cooldown_collapse_to_the_first() {
    for spacing in 1..INPUT_COOLDOWN_MS {
        let mut debouncer = Debouncer::new();
        let edges = (INPUT_COOLDOWN_MS - 1) / spacing + 1;

        let mut accepted = 0;
        for index in 0..edges {
            if index > 0 {
                debouncer.tick(spacing);
            }
            if debouncer.on_edge(InputLine::Primary) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1, "spacing {spacing} ms");
    }
}

#[test]
fn edges_spaced_by_cooldown_are_all_accepted() {
    for spacing in [INPUT_COOLDOWN_MS, INPUT_COOLDOWN_MS + 1, 250, 1_000] {
        let mut debouncer = Debouncer::new();
        for index in 0..5 {
            if index > 0 {
                debouncer.tick(spacing);
            }
            assert!(
                debouncer.on_edge(InputLine::Mode),
                "spacing {spacing} ms, edge {index}"
            );
        }
    }
}

#[test]
fn bounced_button_through_the_control_loop_counts_once() {
    let ctx = DeviceContext::new();
    let clock = TestClock::default();
    let mut machine = machine(&ctx, &clock, |delay| delay);

    // Three bounces one tick apart: only the first press rotates the mode.
    for _ in 0..3 {
        ctx.signal(InputLine::Mode);
        block_on(machine.tick(TICK_PERIOD_MS)).expect("ignition fault");
    }
    assert_eq!(ctx.mode(), Mode::Motion);
    assert_eq!(
        machine
            .telemetry()
            .oldest_first()
            .filter(|record| record.event == TelemetryEventKind::EdgeDropped(InputLine::Mode))
            .count(),
        2
    );
}
