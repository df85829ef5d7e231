mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use detonator_core::context::{ALL_MODES, DeviceContext, Mode};
use detonator_core::fifo::sim::SimClock;

use session::Session;

fn main() -> io::Result<()> {
    let mode = parse_mode().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: detonator-emulator [--mode <timer|motion>]");
        process::exit(2);
    });

    let ctx = DeviceContext::with_mode(mode);
    let clock = SimClock::new();
    let mut session = Session::new(&ctx, &clock);

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Detonator emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for response in session.boot() {
        writeln!(writer, "{response}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed) {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_mode() -> Result<Mode, String> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(Mode::Timer);
    };
    let value = if let Some(value) = arg.strip_prefix("--mode=") {
        value.to_string()
    } else if arg == "--mode" {
        args.next()
            .ok_or_else(|| "Expected value after --mode".to_string())?
    } else {
        return Err(format!("Unknown argument `{arg}`"));
    };
    ALL_MODES
        .into_iter()
        .find(|mode| mode.label().eq_ignore_ascii_case(&value))
        .ok_or_else(|| format!("Unknown mode `{value}`"))
}
