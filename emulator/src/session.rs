use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crossterm::style::Stylize;
use detonator_core::config::TICK_PERIOD_MS;
use detonator_core::context::DeviceContext;
use detonator_core::detonation::{
    DISPLAY_ROWS, DetonationStateMachine, DisplayLine, DisplaySnapshot, Ignition, StatusDisplay,
    truncate_line,
};
use detonator_core::fifo::FifoSyncReader;
use detonator_core::fifo::sim::{SimClock, SimDelay, SimulatedFifo};
use detonator_core::input::InputLine;
use detonator_core::orientation::{OrientationEstimator, OrientationSample};
use detonator_core::telemetry::{EventId, FaultSite, TelemetryEventKind, TelemetryPayload};
use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;

/// Simulated sensor output period, matching the 40 ms control-loop tick.
const SENSOR_PERIOD_US: u64 = 40_000;
const DEFAULT_FLOOD_BYTES: usize = 500;
const FLOOD_FILL: u8 = 0xA5;
/// Sequence jump applied by `jolt`; 45 packets are a 90 degree turn.
const JOLT_SEQUENCE_STEP: u16 = 45;
const AT_USAGE: &str = "ERR usage: at <ms> <mode|fire|pir|abort>";

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("mode", "mode                    - press the mode button"),
    ("fire", "fire                    - press the primary button"),
    ("pir", "pir                     - pulse the PIR motion line"),
    ("abort", "abort                   - force the state back to Normal"),
    (
        "at",
        "at <ms> <mode|fire|pir|abort> - schedule an input relative to now",
    ),
    ("tick", "tick [count]            - run control-loop ticks"),
    ("wait", "wait <ms>               - run ticks until <ms> have passed"),
    ("flood", "flood [bytes]           - dump garbage into the sensor FIFO"),
    ("jolt", "jolt                    - rotate the simulated sensor 90 degrees"),
    ("sensor", "sensor <on|off>         - start or stop the packet producer"),
    (
        "fault",
        "fault <ignition|display|sensor> - fail the next access",
    ),
    ("status", "status                  - show mode, state, display and FIFO"),
    ("telemetry", "telemetry               - dump the telemetry ring"),
    ("help", "help [topic]            - show help for a command"),
];

/// Lines produced by the console actuators between two command responses.
type Console = Rc<RefCell<Vec<String>>>;

/// Pending inputs keyed by simulated time in microseconds, sorted.
type Schedule = Rc<RefCell<Vec<(u64, Action)>>>;

/// Input the operator can press now or schedule for later.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Action {
    Edge(InputLine),
    Abort,
}

impl Action {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "mode" => Some(Action::Edge(InputLine::Mode)),
            "fire" => Some(Action::Edge(InputLine::Primary)),
            "pir" => Some(Action::Edge(InputLine::Motion)),
            "abort" => Some(Action::Abort),
            _ => None,
        }
    }

    fn apply(self, ctx: &DeviceContext) {
        match self {
            Action::Edge(line) => ctx.signal(line),
            Action::Abort => ctx.abort(),
        }
    }

    fn label(self) -> String {
        match self {
            Action::Edge(line) => format!("edge {line}"),
            Action::Abort => "abort".to_string(),
        }
    }
}

fn stamp(clock: &SimClock) -> String {
    let ms = clock.now() / 1_000;
    format!("[{:>4}.{:03}]", ms / 1_000, ms % 1_000)
}

/// Delay that advances simulated time and delivers scheduled inputs the way
/// interrupts would, while the state machine is blocked in a countdown.
#[derive(Clone)]
struct ScheduledDelay<'a> {
    clock: &'a SimClock,
    ctx: &'a DeviceContext,
    schedule: Schedule,
    console: Console,
}

impl ScheduledDelay<'_> {
    fn fire_due(&self) {
        let now = self.clock.now();
        let mut schedule = self.schedule.borrow_mut();
        let due = schedule.partition_point(|&(at, _)| at <= now);
        for (_, action) in schedule.drain(..due) {
            action.apply(self.ctx);
            self.console.borrow_mut().push(format!(
                "{} {} (scheduled)",
                stamp(self.clock),
                action.label()
            ));
        }
    }
}

impl DelayNs for ScheduledDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.clock.advance_ns(u64::from(ns));
        self.fire_due();
    }
}

/// Operator-armed failure for the next access of a console actuator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InjectedFault;

/// Ignition line that prints its edges.
struct ConsoleIgnition<'a> {
    clock: &'a SimClock,
    console: Console,
    fail_next: Rc<Cell<bool>>,
    active: bool,
}

impl Ignition for ConsoleIgnition<'_> {
    type Error = InjectedFault;

    fn set_active(&mut self, active: bool) -> Result<(), InjectedFault> {
        if active && self.fail_next.replace(false) {
            return Err(InjectedFault);
        }
        if active != self.active {
            self.active = active;
            let text = if active {
                "IGNITION ON".red().bold().to_string()
            } else {
                "IGNITION OFF".green().to_string()
            };
            self.console
                .borrow_mut()
                .push(format!("{} {text}", stamp(self.clock)));
        }
        Ok(())
    }
}

/// Display that keeps its rows and prints every change.
struct ConsoleDisplay<'a> {
    clock: &'a SimClock,
    console: Console,
    fail_next: Rc<Cell<bool>>,
    rows: [String; DISPLAY_ROWS],
}

impl StatusDisplay for ConsoleDisplay<'_> {
    type Error = InjectedFault;

    fn clear(&mut self) -> Result<(), InjectedFault> {
        for row in &mut self.rows {
            row.clear();
        }
        Ok(())
    }

    fn write_line(&mut self, row: u8, text: &str) -> Result<(), InjectedFault> {
        if self.fail_next.replace(false) {
            return Err(InjectedFault);
        }
        let Some(slot) = self.rows.get_mut(usize::from(row)) else {
            return Ok(());
        };
        *slot = truncate_line(text).as_str().to_string();
        self.console.borrow_mut().push(format!(
            "{} display[{row}] {}",
            stamp(self.clock),
            slot.as_str().cyan()
        ));
        Ok(())
    }

    fn capture(&mut self) -> Result<DisplaySnapshot, InjectedFault> {
        Ok(DisplaySnapshot::from_rows(self.rows.iter().map(String::as_str)))
    }
}

type EmulatedMachine<'a> =
    DetonationStateMachine<'a, ConsoleIgnition<'a>, ConsoleDisplay<'a>, ScheduledDelay<'a>>;
type EmulatedReader<'a> = FifoSyncReader<SimulatedFifo<'a>, &'a SimClock, SimDelay<'a>>;

/// Host-side stand-in for the firmware control loop.
pub struct Session<'a> {
    ctx: &'a DeviceContext,
    clock: &'a SimClock,
    machine: EmulatedMachine<'a>,
    reader: EmulatedReader<'a>,
    estimator: OrientationEstimator,
    last_sample: Option<OrientationSample>,
    ticker: ScheduledDelay<'a>,
    schedule: Schedule,
    console: Console,
    ignition_fault: Rc<Cell<bool>>,
    display_fault: Rc<Cell<bool>>,
    next_event: EventId,
}

impl<'a> Session<'a> {
    pub fn new(ctx: &'a DeviceContext, clock: &'a SimClock) -> Self {
        let console = Console::default();
        let schedule = Schedule::default();
        let ignition_fault = Rc::new(Cell::new(false));
        let display_fault = Rc::new(Cell::new(false));

        let ticker = ScheduledDelay {
            clock,
            ctx,
            schedule: Rc::clone(&schedule),
            console: Rc::clone(&console),
        };
        let ignition = ConsoleIgnition {
            clock,
            console: Rc::clone(&console),
            fail_next: Rc::clone(&ignition_fault),
            active: false,
        };
        let display = ConsoleDisplay {
            clock,
            console: Rc::clone(&console),
            fail_next: Rc::clone(&display_fault),
            rows: Default::default(),
        };
        let machine = DetonationStateMachine::new(ctx, ignition, display, ticker.clone());

        let mut fifo = SimulatedFifo::new(clock);
        fifo.start_producer(SENSOR_PERIOD_US, SENSOR_PERIOD_US, 0);
        let reader = FifoSyncReader::new(fifo, clock, SimDelay::new(clock));

        Self {
            ctx,
            clock,
            machine,
            reader,
            estimator: OrientationEstimator::new(),
            last_sample: None,
            ticker,
            schedule,
            console,
            ignition_fault,
            display_fault,
            next_event: 0,
        }
    }

    /// Renders the boot screen.
    pub fn boot(&mut self) -> Vec<String> {
        self.machine.boot();
        self.flush()
    }

    pub fn handle_command(&mut self, line: &str) -> Vec<String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Vec::new();
        };
        let command = command.to_ascii_lowercase();
        let argument = words.next();

        match command.as_str() {
            "help" => handle_help(argument),
            "mode" | "fire" | "pir" | "abort" => {
                if let Some(action) = Action::parse(&command) {
                    action.apply(self.ctx);
                }
                self.run_ticks(1)
            }
            "tick" => match parse_or(argument, 1u32) {
                Ok(count) => self.run_ticks(count),
                Err(message) => vec![message],
            },
            "wait" => match argument.map(str::parse::<u32>) {
                Some(Ok(ms)) => self.run_ticks(ms.div_ceil(TICK_PERIOD_MS).max(1)),
                _ => vec!["ERR usage: wait <ms>".to_string()],
            },
            "at" => self.handle_at(argument, words.next()),
            "flood" => match parse_or(argument, DEFAULT_FLOOD_BYTES) {
                Ok(bytes) => {
                    self.reader.registers_mut().push_fill(FLOOD_FILL, bytes);
                    vec![format!("OK pushed {bytes} bytes into the FIFO")]
                }
                Err(message) => vec![message],
            },
            "jolt" => self.handle_jolt(),
            "sensor" => self.handle_sensor(argument),
            "fault" => self.handle_fault(argument),
            "status" => self.status(),
            "telemetry" => self
                .machine
                .telemetry()
                .oldest_first()
                .map(ToString::to_string)
                .collect(),
            _ => vec![format!("ERR unknown command `{command}`; try `help`")],
        }
    }

    /// Runs `count` control-loop iterations: sleep, tick, read the sensor.
    fn run_ticks(&mut self, count: u32) -> Vec<String> {
        for _ in 0..count {
            block_on(self.ticker.delay_ms(TICK_PERIOD_MS));
            if let Err(err) = block_on(self.machine.tick(TICK_PERIOD_MS)) {
                let text = err.to_string().red().to_string();
                self.console
                    .borrow_mut()
                    .push(format!("{} {text}", stamp(self.clock)));
            }
            self.read_sensor();
        }
        self.flush()
    }

    fn read_sensor(&mut self) {
        let now_ms = self.machine.uptime_ms();
        let result = block_on(self.reader.read_packet());
        let report = self.reader.last_report();
        if report.resets > 0 {
            self.estimator.reset();
        }
        match result {
            Ok(Some(packet)) => {
                let sample = self.estimator.update(&packet);
                if let Some(change) = sample.change.filter(|_| sample.is_large_movement()) {
                    self.console.borrow_mut().push(format!(
                        "{} {} change={change:.3}",
                        stamp(self.clock),
                        "orientation: jolt".yellow()
                    ));
                }
                self.last_sample = Some(sample);
            }
            Ok(None) => {}
            Err(err) => {
                self.console
                    .borrow_mut()
                    .push(format!("{} fifo read failed: {err}", stamp(self.clock)));
                self.machine.telemetry_mut().record(
                    TelemetryEventKind::Fault(FaultSite::MotionSensor),
                    TelemetryPayload::None,
                    now_ms,
                );
            }
        }
        report.record_into(self.machine.telemetry_mut(), now_ms);
    }

    fn handle_at(&mut self, delay: Option<&str>, action: Option<&str>) -> Vec<String> {
        let (Some(Ok(delay_ms)), Some(action)) =
            (delay.map(str::parse::<u64>), action.and_then(Action::parse))
        else {
            return vec![AT_USAGE.to_string()];
        };
        let Some(at) = delay_ms
            .checked_mul(1_000)
            .and_then(|delay_us| self.clock.now().checked_add(delay_us))
        else {
            return vec![AT_USAGE.to_string()];
        };
        let mut schedule = self.schedule.borrow_mut();
        let index = schedule.partition_point(|&(due, _)| due <= at);
        schedule.insert(index, (at, action));
        vec![format!("OK {} in {delay_ms} ms", action.label())]
    }

    fn handle_jolt(&mut self) -> Vec<String> {
        let fifo = self.reader.registers_mut();
        // Deliver what the old orientation already produced first.
        fifo.occupancy();
        let Some(sequence) = fifo.next_sequence() else {
            return vec!["ERR sensor is off".to_string()];
        };
        fifo.start_producer(
            SENSOR_PERIOD_US,
            self.clock.now() + SENSOR_PERIOD_US,
            sequence.wrapping_add(JOLT_SEQUENCE_STEP),
        );
        vec!["OK sensor rotated".to_string()]
    }

    fn handle_sensor(&mut self, argument: Option<&str>) -> Vec<String> {
        let fifo = self.reader.registers_mut();
        match argument {
            Some("on") => {
                let sequence = fifo.next_sequence().unwrap_or(0);
                fifo.start_producer(
                    SENSOR_PERIOD_US,
                    self.clock.now() + SENSOR_PERIOD_US,
                    sequence,
                );
                vec!["OK sensor producing".to_string()]
            }
            Some("off") => {
                fifo.stop_producer();
                vec!["OK sensor stopped".to_string()]
            }
            _ => vec!["ERR usage: sensor <on|off>".to_string()],
        }
    }

    fn handle_fault(&mut self, argument: Option<&str>) -> Vec<String> {
        match argument {
            Some("ignition") => self.ignition_fault.set(true),
            Some("display") => self.display_fault.set(true),
            Some("sensor") => self.reader.registers_mut().fail_after(0),
            _ => return vec!["ERR usage: fault <ignition|display|sensor>".to_string()],
        }
        vec![format!("OK next {} access fails", argument.unwrap_or_default())]
    }

    fn status(&mut self) -> Vec<String> {
        let uptime = self.machine.uptime_ms();
        let mut lines = vec![format!(
            "mode {}  state {}  uptime {}.{:03}s",
            self.ctx.mode(),
            self.ctx.state(),
            uptime / 1_000,
            uptime % 1_000
        )];
        let rows: Vec<&str> = self
            .machine
            .display()
            .rows
            .iter()
            .map(String::as_str)
            .collect();
        lines.push(format!("display |{}|", rows.join("|")));

        let report = self.reader.last_report();
        let fifo = self.reader.registers_mut();
        lines.push(format!(
            "fifo {} bytes buffered, {} resets, producer {}, last read {:?}",
            fifo.occupancy(),
            fifo.resets(),
            if fifo.next_sequence().is_some() { "on" } else { "off" },
            report.outcome
        ));
        if let Some(sample) = self.last_sample {
            let k = sample.frame.k;
            lines.push(format!(
                "orientation change={:.3} k=({:.3}, {:.3}, {:.3})",
                sample.change.unwrap_or(0.0),
                k.x,
                k.y,
                k.z
            ));
        }
        if let Some(snapshot) = self.machine.last_snapshot() {
            let shown: Vec<&str> = snapshot.lines().iter().map(DisplayLine::as_str).collect();
            lines.push(format!("last detonation showed |{}|", shown.join("|")));
        }
        lines
    }

    /// Collects actuator output plus telemetry recorded since the last call.
    fn flush(&mut self) -> Vec<String> {
        let mut lines: Vec<String> = self.console.borrow_mut().drain(..).collect();
        let telemetry = self.machine.telemetry();
        lines.extend(
            telemetry
                .since(self.next_event)
                .map(|record| format!("  {}", record.to_string().dark_grey())),
        );
        self.next_event = telemetry.next_event_id();
        lines
    }
}

fn handle_help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_or<T: std::str::FromStr>(argument: Option<&str>, default: T) -> Result<T, String> {
    match argument {
        None => Ok(default),
        Some(text) => text
            .parse()
            .map_err(|_| format!("ERR expected a number, got `{text}`")),
    }
}

#[cfg(test)]
mod tests {
    use detonator_core::context::{Mode, State};

    use super::*;

    fn contains(lines: &[String], needle: &str) -> bool {
        lines.iter().any(|line| line.contains(needle))
    }

    #[test]
    fn fire_in_timer_mode_pulses_ignition() {
        let ctx = DeviceContext::new();
        let clock = SimClock::new();
        let mut session = Session::new(&ctx, &clock);
        session.boot();

        let lines = session.handle_command("fire");

        assert!(contains(&lines, "IGNITION ON"));
        assert!(contains(&lines, "IGNITION OFF"));
        assert_eq!(ctx.state(), State::Normal);
    }

    #[test]
    fn scheduled_mode_press_aborts_the_countdown() {
        let ctx = DeviceContext::new();
        let clock = SimClock::new();
        let mut session = Session::new(&ctx, &clock);
        session.boot();

        session.handle_command("at 1500 mode");
        let lines = session.handle_command("fire");

        assert!(!contains(&lines, "IGNITION ON"));
        assert!(contains(&lines, "(scheduled)"));
        assert_eq!(ctx.mode(), Mode::Motion);
    }

    #[test]
    fn at_with_an_unrepresentable_delay_is_rejected() {
        let ctx = DeviceContext::new();
        let clock = SimClock::new();
        let mut session = Session::new(&ctx, &clock);
        session.boot();

        let lines = session.handle_command("at 18446744073709551615 fire");
        assert!(lines[0].starts_with("ERR"), "{lines:?}");

        // Nothing was queued, so a later fire runs a plain countdown.
        let lines = session.handle_command("fire");
        assert!(!contains(&lines, "(scheduled)"));
        assert!(contains(&lines, "IGNITION ON"));
    }

    #[test]
    fn injected_ignition_fault_leaves_the_line_low() {
        let ctx = DeviceContext::new();
        let clock = SimClock::new();
        let mut session = Session::new(&ctx, &clock);
        session.boot();

        session.handle_command("fault ignition");
        let lines = session.handle_command("fire");

        assert!(contains(&lines, "ignition fault"));
        assert!(!contains(&lines, "IGNITION ON"));
        assert_eq!(ctx.state(), State::Normal);
    }

    #[test]
    fn jolt_is_reported_as_large_movement() {
        let ctx = DeviceContext::new();
        let clock = SimClock::new();
        let mut session = Session::new(&ctx, &clock);
        session.boot();
        session.handle_command("tick 3");

        session.handle_command("jolt");
        let lines = session.handle_command("tick");

        assert!(contains(&lines, "jolt"));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        let ctx = DeviceContext::new();
        let clock = SimClock::new();
        let mut session = Session::new(&ctx, &clock);

        let lines = session.handle_command("detonate");
        assert!(lines[0].starts_with("ERR unknown command"));
    }
}
