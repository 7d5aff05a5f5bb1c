//! Example: Reading a Sensor Over a Connection
//!
//! This example connects to a ThermSmart sensor, issues the sensor-data
//! command and prints every field of the response plus the battery level.
//!
//! Run with: `cargo run --example read_sensor -- [SENSOR_ADDRESS]`
//!
//! Without an address the first sensor found is used.

use std::env;

use thermsmart_core::{BtleRadio, Error, SensorConfig, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = SensorConfig::default();
    if let Some(address) = env::args().nth(1) {
        println!("Looking for {}...", address);
        config = config.address(address);
    } else {
        println!("Looking for the first ThermSmart sensor...");
    }
    config.validate()?;

    let radio = BtleRadio::new().await?;
    let session = Session::new(radio, config);
    session.connect().await?;

    if let Some(identity) = session.identity().await {
        println!(
            "Connected to {} ({})",
            identity.name.as_deref().unwrap_or("unnamed sensor"),
            identity.address
        );
    }
    println!();

    let response = session.read_response().await?;
    println!("Current Readings:");
    println!("  Indoor:   {:.1} °C", response.indoor_temperature);
    println!("  Humidity: {}%", response.relative_humidity);
    println!("  Outdoor:  {:.1} °C", response.outdoor_temperature);
    match session.get_battery_level().await {
        Ok(level) => println!("  Battery:  {}%", level),
        Err(Error::CharacteristicNotFound { .. }) => println!("  Battery:  n/a"),
        Err(e) => return Err(e.into()),
    }

    session.disconnect().await?;
    println!();
    println!("Disconnected.");

    Ok(())
}
