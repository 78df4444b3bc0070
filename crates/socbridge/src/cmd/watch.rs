use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use socbridge_session::read_bitmap;

use crate::cmd::{open_session, LinkArgs, WatchArgs};
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{now_unix_millis, print_json, table, OutputFormat};

#[derive(Serialize)]
struct PinLevel {
    port: u8,
    pin: u8,
    high: bool,
}

#[derive(Serialize)]
struct Sample {
    timestamp_ms: u128,
    bitmap: u32,
    pins: Vec<PinLevel>,
}

/// Poll until Ctrl-C or `--count`, then reset the board on the way out.
pub fn run(args: WatchArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = open_session(link, true)?;
    let pins: Vec<(u8, u8)> = session
        .with_topology(|t| t.pins().collect())
        .map_err(|err| session_error("discovery failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut last = None;
    let mut printed = 0usize;
    let mut result = Ok(SUCCESS);

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let bitmap = match read_bitmap(&session) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                result = Err(session_error("pin read failed", err));
                break;
            }
        };

        if args.all || last != Some(bitmap) {
            print_sample(&sample(bitmap, &pins), format);
            printed = printed.saturating_add(1);
            last = Some(bitmap);
            if args.count.is_some_and(|count| printed >= count) {
                break;
            }
        }

        if let Some(rest) = args.interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let closed = session
        .disconnect()
        .map_err(|err| session_error("reset failed", err));
    result.and_then(|code| closed.map(|()| code))
}

fn sample(bitmap: u32, pins: &[(u8, u8)]) -> Sample {
    Sample {
        timestamp_ms: now_unix_millis(),
        bitmap,
        pins: pins
            .iter()
            .enumerate()
            .map(|(bit, &(port, pin))| PinLevel {
                port,
                pin,
                high: bit < 32 && (bitmap >> bit) & 1 == 1,
            })
            .collect(),
    }
}

fn print_sample(sample: &Sample, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(sample),
        OutputFormat::Table => {
            let mut header = vec!["TIME (ms)".to_string()];
            header.extend(sample.pins.iter().map(|p| format!("P{}[{}]", p.port, p.pin)));
            let mut out = table(header.iter().map(String::as_str).collect());
            let mut row = vec![sample.timestamp_ms.to_string()];
            row.extend(sample.pins.iter().map(|p| u8::from(p.high).to_string()));
            out.add_row(row);
            println!("{out}");
        }
        OutputFormat::Pretty => {
            let levels: Vec<String> = sample
                .pins
                .iter()
                .map(|p| format!("P{}[{}]={}", p.port, p.pin, u8::from(p.high)))
                .collect();
            println!("{} {}", sample.timestamp_ms, levels.join(" "));
        }
        OutputFormat::Raw => println!("{:#b}", sample.bitmap),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
