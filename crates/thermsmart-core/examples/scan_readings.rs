//! Example: Passive Readings
//!
//! Collects indoor temperature, indoor humidity and outdoor temperature from
//! sensor advertisements without connecting, then prints them as JSON or as
//! InfluxDB line protocol.
//!
//! Run with:
//! `cargo run --example scan_readings -- [--format json|influxdb] [--field NAME] [--timeout MS] [ADDRESS...]`

use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use thermsmart_core::{AddressFilter, BtleRadio, PassiveScanner, Reading};

/// Readings that complete a report.
const WANTED: [&str; 3] = [
    "indoor-temperature",
    "indoor-humidity",
    "outdoor-temperature",
];

enum Format {
    Json,
    InfluxDb,
}

struct Args {
    format: Format,
    field: String,
    timeout: Duration,
    filter: AddressFilter,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        format: Format::Json,
        field: "value".to_string(),
        timeout: Duration::from_millis(5000),
        filter: AddressFilter::any(),
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-f" | "--format" => {
                args.format = match iter.next().as_deref() {
                    Some("json") => Format::Json,
                    Some("influxdb") => Format::InfluxDb,
                    other => bail!("Invalid format: {}", other.unwrap_or("<missing>")),
                };
            }
            "--field" => {
                args.field = iter.next().context("--field needs a name")?;
            }
            "-t" | "--timeout" => {
                let ms: u64 = iter
                    .next()
                    .context("--timeout needs a value")?
                    .parse()
                    .context("--timeout must be milliseconds")?;
                args.timeout = Duration::from_millis(ms);
            }
            address => args.filter.insert(address),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let radio = BtleRadio::new().await?;
    let scanner = Arc::new(PassiveScanner::new(radio));

    // Give up after the timeout and print whatever was collected.
    let timer = tokio::spawn({
        let scanner = Arc::clone(&scanner);
        let timeout = args.timeout;
        async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = scanner.stop_scan().await {
                eprintln!("Failed to stop scan: {e}");
            }
        }
    });

    let mut readings: BTreeMap<String, Reading> = BTreeMap::new();
    scanner
        .scan_for_readings(
            |reading, _sensor| {
                let key = reading.key();
                if !WANTED.contains(&key.as_str()) {
                    return;
                }
                readings.insert(key, *reading);
                if WANTED.iter().all(|k| readings.contains_key(*k)) {
                    scanner.request_stop();
                }
            },
            &args.filter,
        )
        .await?;
    timer.abort();

    match args.format {
        Format::Json => {
            let values: Vec<&Reading> = readings.values().collect();
            println!("{}", serde_json::to_string(&values)?);
        }
        Format::InfluxDb => {
            for reading in readings.values() {
                let sensor = reading
                    .sensor
                    .map(|s| s.as_str())
                    .unwrap_or("device");
                println!(
                    "{},sensor={} {}={}",
                    reading.kind,
                    sensor,
                    args.field,
                    reading.value.as_f64()
                );
            }
        }
    }

    Ok(())
}
