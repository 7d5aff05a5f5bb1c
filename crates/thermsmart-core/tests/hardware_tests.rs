//! Hardware integration tests for thermsmart-core
//!
//! These tests require actual BLE hardware and should be run with:
//! ```
//! cargo test --package thermsmart-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the sensor via environment variable:
//! - `THERMSMART_SENSOR`: sensor address; the first sensor found is used when unset
//!
//! Example:
//! ```
//! THERMSMART_SENSOR="AA:BB:CC:DD:EE:FF" cargo test --package thermsmart-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use thermsmart_core::{
    AddressFilter, BtleRadio, Error, PassiveScanner, ScanOptions, SensorConfig, Session,
    scan_for_sensors,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(45);

fn sensor_config() -> SensorConfig {
    match env::var("THERMSMART_SENSOR").ok().filter(|s| !s.is_empty()) {
        Some(address) => SensorConfig::default().address(address),
        None => SensorConfig::default(),
    }
}

fn sensor_filter() -> AddressFilter {
    env::var("THERMSMART_SENSOR")
        .ok()
        .filter(|s| !s.is_empty())
        .into_iter()
        .collect()
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_discovers_sensors() {
    let radio = BtleRadio::new().await.expect("no Bluetooth adapter");
    let options = ScanOptions::default().duration_secs(10);

    let result = timeout(BLE_TIMEOUT, scan_for_sensors(&radio, options, None)).await;
    match result {
        Ok(Ok(sensors)) => {
            println!("Scan discovered {} sensors:", sensors.len());
            for sensor in &sensors {
                println!(
                    "  - {} ({}, rssi {:?})",
                    sensor.identity.name.as_deref().unwrap_or("Unknown"),
                    sensor.identity.address,
                    sensor.rssi
                );
            }
        }
        Ok(Err(e)) => panic!("Scan failed: {}", e),
        Err(_) => panic!("Scan timed out"),
    }
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_session_reads_all_fields() {
    let radio = BtleRadio::new().await.expect("no Bluetooth adapter");
    let session = Session::new(radio, sensor_config());

    let response = timeout(BLE_TIMEOUT, session.read_response())
        .await
        .expect("read timed out")
        .expect("read failed");
    println!("Response: {:?}", response);
    assert!((-40.0..=80.0).contains(&response.indoor_temperature));
    assert!(response.relative_humidity <= 100);

    match session.get_battery_level().await {
        Ok(level) => {
            println!("Battery: {}%", level);
            assert!(level <= 100);
        }
        Err(Error::CharacteristicNotFound { .. }) => println!("No battery characteristic"),
        Err(e) => panic!("Battery read failed: {}", e),
    }

    session.disconnect().await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_session_reconnects_after_disconnect() {
    let radio = BtleRadio::new().await.expect("no Bluetooth adapter");
    let session = Session::new(radio, sensor_config());

    timeout(BLE_TIMEOUT, session.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");
    session.disconnect().await.expect("disconnect failed");

    let temperature = timeout(BLE_TIMEOUT, session.get_indoor_temperature())
        .await
        .expect("read timed out")
        .expect("read failed");
    println!("Indoor after reconnect: {:.1} °C", temperature);

    session.disconnect().await.expect("disconnect failed");
}

// =============================================================================
// Passive Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_passive_scan_receives_readings() {
    let radio = BtleRadio::new().await.expect("no Bluetooth adapter");
    let scanner = Arc::new(PassiveScanner::new(radio));

    let stopper = tokio::spawn({
        let scanner = Arc::clone(&scanner);
        async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            let _ = scanner.stop_scan().await;
        }
    });

    let mut received = 0;
    scanner
        .scan_for_readings(
            |reading, sensor| {
                println!("{} {}", sensor.address, reading);
                received += 1;
                if received >= 10 {
                    scanner.request_stop();
                }
            },
            &sensor_filter(),
        )
        .await
        .expect("passive scan failed");
    stopper.abort();

    assert!(received > 0, "no readings received");
}
