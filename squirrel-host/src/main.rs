mod midi;
mod request;

use std::fs::File;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver};
use squirrel_audio::backend::fallback::output::CpalOutput;
use squirrel_audio::{AudioFacade, ClockMode, Config, FallbackBackend, NativeBridgeBackend, Topic};
use squirrel_types::BackendKind;

use midi::MidiInputManager;
use request::{error_line, event_line, outcome_line, parse_request, Request};

struct Args {
    config: Option<PathBuf>,
    backend: Option<BackendKind>,
    midi_port: Option<String>,
    list_midi: bool,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let value_of = |flag: &str| args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned();
    let backend = match value_of("--backend") {
        Some(name) => Some(name.parse::<BackendKind>()?),
        None => None,
    };
    Ok(Args {
        config: value_of("--config").map(PathBuf::from),
        backend,
        midi_port: value_of("--midi-port"),
        list_midi: args.iter().any(|a| a == "--list-midi"),
        verbose: args.iter().any(|a| a == "--verbose" || a == "-v"),
    })
}

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("squirrel")
        .join("squirrel.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path).or_else(|_| File::create("/tmp/squirrel.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("squirrel: cannot create log file: {}", e);
            return;
        }
    };

    if let Err(e) = WriteLogger::init(log_level, Config::default(), log_file) {
        eprintln!("squirrel: failed to initialize logger: {}", e);
        return;
    }

    log::info!("squirrel starting (log level: {:?})", log_level);
}

fn print_line(value: &serde_json::Value) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{}", value);
    let _ = out.flush();
}

/// Read request lines on a separate thread so the frame loop never blocks on stdin.
fn spawn_stdin_reader() -> std::io::Result<Receiver<Request>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new().name("stdin-requests".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!(target: "host", "stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_request(&line) {
                Ok(request) => {
                    if tx.send(request).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!(target: "host", "bad request '{}': {}", line, e);
                    print_line(&error_line("parse", &e));
                }
            }
        }
        log::debug!(target: "host", "stdin closed");
    })?;
    Ok(rx)
}

fn connect_midi(selector: Option<&str>) -> MidiInputManager {
    let mut midi = MidiInputManager::new();
    midi.refresh_ports();
    let index = match selector {
        Some(selector) => midi.find_port(selector).or_else(|| {
            log::warn!(target: "midi", "no MIDI input matches '{}'", selector);
            None
        }),
        None => midi.list_ports().first().map(|p| p.index),
    };
    if let Some(index) = index {
        if let Err(e) = midi.connect(index) {
            log::warn!(target: "midi", "could not connect MIDI input {}: {}", index, e);
        }
    }
    midi
}

/// Returns false once the host should exit.
fn handle(facade: &mut AudioFacade, request: Request, preferred: &[BackendKind]) -> bool {
    match request {
        Request::Command(command) => {
            let name = command.name();
            let result = facade.submit(command);
            if let Some(line) = outcome_line(name, &result) {
                print_line(&line);
            }
        }
        Request::SetBackend(kind) => {
            if let Err(e) = facade.set_backend(kind) {
                print_line(&error_line("set_backend", &e.to_string()));
            }
        }
        Request::DetectBackend(order) => {
            let order = if order.is_empty() { preferred.to_vec() } else { order };
            if facade.detect_and_set_backend(&order).is_none() {
                print_line(&error_line("detect_backend", "no available backend"));
            }
        }
        Request::Quit => return false,
    }
    true
}

fn main() -> std::io::Result<()> {
    let raw: Vec<String> = std::env::args().collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("squirrel: {}", e);
            std::process::exit(2);
        }
    };
    init_logging(args.verbose);

    if args.list_midi {
        let mut midi = MidiInputManager::new();
        midi.refresh_ports();
        for port in midi.list_ports() {
            println!("{}: {}", port.index, port.name);
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    // The output stream must outlive the loop and stay on this thread.
    let mut fallback = FallbackBackend::from_config(&config)?;
    let _output = if config.fallback_output() {
        match CpalOutput::start(fallback.mixer()) {
            Ok(output) => {
                log::info!(target: "host", "output on '{}' at {} Hz", output.device_name(), output.sample_rate());
                fallback.set_clock(ClockMode::External);
                Some(output)
            }
            Err(e) => {
                log::warn!(target: "host", "no audio output, fallback runs on the wall clock: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut facade = AudioFacade::new();
    facade.register_backend(Box::new(NativeBridgeBackend::from_config(&config)));
    facade.register_backend(Box::new(fallback));
    facade.subscribe(Topic::All, |event| print_line(&event_line(event)));

    let preferred = match args.backend {
        Some(kind) => vec![kind],
        None => config.preferred_backends(),
    };
    if facade.detect_and_set_backend(&preferred).is_none() {
        eprintln!("squirrel: no audio backend available");
    }

    let midi = connect_midi(args.midi_port.as_deref());
    if let Some(name) = midi.connected_port_name() {
        log::info!(target: "host", "MIDI input: {}", name);
    }

    let mut requests = spawn_stdin_reader()?;
    let frame = Duration::from_secs_f64(1.0 / config.frame_rate_hz() as f64);
    let ticker = crossbeam_channel::tick(frame);

    loop {
        let received = select! {
            recv(requests) -> request => Some(request),
            recv(ticker) -> _ => None,
        };
        match received {
            Some(Ok(request)) => {
                if !handle(&mut facade, request, &preferred) {
                    break;
                }
            }
            // stdin closed: keep playing until killed
            Some(Err(_)) => requests = crossbeam_channel::never(),
            None => {
                for data in midi.poll() {
                    let _ = facade.midi_input(&data);
                }
                facade.tick();
            }
        }
    }

    facade.tick();
    log::info!(target: "host", "squirrel exiting");
    Ok(())
}
