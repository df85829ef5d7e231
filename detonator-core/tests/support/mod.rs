#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use detonator_core::context::{DeviceContext, State};
use detonator_core::detonation::{
    DISPLAY_ROWS, DetonationStateMachine, DisplaySnapshot, Ignition, StatusDisplay,
};
use detonator_core::input::InputLine;
use embedded_hal_async::delay::DelayNs;

/// Simulated wall clock in nanoseconds shared by the mocks of one test.
#[derive(Clone, Default)]
pub struct TestClock(Rc<Cell<u64>>);

impl TestClock {
    pub fn now_ms(&self) -> u64 {
        self.0.get() / 1_000_000
    }

    fn advance_ns(&self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns));
    }
}

/// Something the scripted delay does to the shared context once the clock
/// reaches a given time, standing in for an interrupt.
#[derive(Copy, Clone, Debug)]
pub enum Injection {
    Edge(InputLine),
    SetState(State),
}

/// Delay that advances the [`TestClock`] and fires scripted injections.
pub struct ScriptedDelay<'a> {
    clock: TestClock,
    ctx: &'a DeviceContext,
    script: Vec<(u64, Injection)>,
    /// State seen at the start of every delay call.
    pub observed: Vec<State>,
}

impl<'a> ScriptedDelay<'a> {
    pub fn new(clock: TestClock, ctx: &'a DeviceContext) -> Self {
        Self {
            clock,
            ctx,
            script: Vec::new(),
            observed: Vec::new(),
        }
    }

    /// Fires `injection` at the first delay ending at or after `at_ms`.
    pub fn at(mut self, at_ms: u64, injection: Injection) -> Self {
        self.script.push((at_ms, injection));
        self
    }
}

impl DelayNs for ScriptedDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.observed.push(self.ctx.state());
        self.clock.advance_ns(ns);

        let now = self.clock.now_ms();
        let ctx = self.ctx;
        self.script.retain(|&(at_ms, injection)| {
            if at_ms > now {
                return true;
            }
            match injection {
                Injection::Edge(line) => ctx.signal(line),
                Injection::SetState(state) => ctx.set_state(state),
            }
            false
        });
    }
}

/// Ignition line that records every transition with its time.
pub struct RecordingIgnition {
    clock: TestClock,
    pub transitions: Vec<(u64, bool)>,
}

impl RecordingIgnition {
    pub fn new(clock: TestClock) -> Self {
        Self {
            clock,
            transitions: Vec::new(),
        }
    }

    /// Milliseconds the line spent high, when exactly one pulse was fired.
    pub fn single_pulse_ms(&self) -> Option<u64> {
        match self.transitions.as_slice() {
            [(on, true), (off, false)] => Some(off - on),
            _ => None,
        }
    }
}

impl Ignition for RecordingIgnition {
    type Error = ();

    fn set_active(&mut self, active: bool) -> Result<(), ()> {
        self.transitions.push((self.clock.now_ms(), active));
        Ok(())
    }
}

/// Display keeping its rows in memory.
#[derive(Default)]
pub struct RecordingDisplay {
    pub rows: [String; DISPLAY_ROWS],
    pub writes: Vec<String>,
}

impl StatusDisplay for RecordingDisplay {
    type Error = ();

    fn clear(&mut self) -> Result<(), ()> {
        for row in &mut self.rows {
            row.clear();
        }
        Ok(())
    }

    fn write_line(&mut self, row: u8, text: &str) -> Result<(), ()> {
        let slot = self.rows.get_mut(usize::from(row)).ok_or(())?;
        *slot = text.into();
        self.writes.push(text.into());
        Ok(())
    }

    fn capture(&mut self) -> Result<DisplaySnapshot, ()> {
        Ok(DisplaySnapshot::from_rows(self.rows.iter().map(String::as_str)))
    }
}

pub type TestMachine<'a> =
    DetonationStateMachine<'a, RecordingIgnition, RecordingDisplay, ScriptedDelay<'a>>;

/// Builds a booted machine around `ctx` with the given delay script.
pub fn machine<'a>(
    ctx: &'a DeviceContext,
    clock: &TestClock,
    script: impl FnOnce(ScriptedDelay<'a>) -> ScriptedDelay<'a>,
) -> TestMachine<'a> {
    let delay = script(ScriptedDelay::new(clock.clone(), ctx));
    let mut machine = DetonationStateMachine::new(
        ctx,
        RecordingIgnition::new(clock.clone()),
        RecordingDisplay::default(),
        delay,
    );
    machine.boot();
    machine
}
