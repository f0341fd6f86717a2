//! Reference host for the plume runtime.
//!
//! Subscribes the `LOG_*` event kinds to stdout/stderr, forwards stdin
//! lines as `INPUT` events, and maps unhandled runtime errors to exit
//! code 1.

use std::{env, io::BufRead, process::ExitCode, thread};

use plume::{EventKind, event_bus, run};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: plume <file.code> [--verbose]");
        return ExitCode::FAILURE;
    };
    let verbose = args.iter().any(|arg| arg == "--verbose");

    let config = serde_json::json!({
        "file": file_path,
        "verbose": verbose,
    });
    if plume::config::init(&config.to_string()).is_err() {
        eprintln!("error: could not build configuration");
        return ExitCode::FAILURE;
    }

    event_bus::subscribe(EventKind::LogInfo, Box::new(|data| println!("{data}")));
    event_bus::subscribe(EventKind::LogWarning, Box::new(|data| eprintln!("warning: {data}")));
    event_bus::subscribe(EventKind::LogError, Box::new(|data| eprintln!("{data}")));
    if verbose {
        event_bus::subscribe(EventKind::LogDebug, Box::new(|data| eprintln!("debug: {data}")));
    }

    // Forward stdin lines as INPUT events so the `input()` builtin works
    // interactively; EOF closes the stream and unblocks waiters.
    thread::spawn(|| {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => event_bus::publish(EventKind::Input, &line),
                Err(_) => break,
            }
        }
        event_bus::close_input();
    });

    let result = if file_path.ends_with(".code") {
        run::interpret_bytecode()
    } else {
        run::interpret()
    };

    match run::exit_code(&result) {
        0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
