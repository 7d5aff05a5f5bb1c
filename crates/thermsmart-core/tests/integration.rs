//! Integration tests for thermsmart-core
//!
//! These tests drive the public API end to end against the in-process mock
//! radio, so they run without Bluetooth hardware.

use std::sync::Arc;
use std::time::Duration;

use thermsmart_core::mock::{DEFAULT_RESPONSE, MockRadio};
use thermsmart_core::{
    AddressFilter, Error, PassiveScanner, ReadingKind, ScanOptions, SensorConfig, SensorLocation,
    Session, SessionEvent, SessionState, scan_for_sensors,
};

/// Advertisement body: battery 87, indoor 21.5 °C, humidity 45.
const INDOOR_BODY: [u8; 11] = [
    87, 0x11, 0xAA, 0x31, 0xF4, 0x31, 0x72, 0x31, 0x45, 0x60, 0x38,
];

#[tokio::test]
async fn test_discover_then_connect() {
    let radio = MockRadio::new();
    radio.add_peripheral("AA:BB:CC:DD:EE:01", Some("Kitchen"));
    radio.add_peripheral("AA:BB:CC:DD:EE:02", Some("Porch"));
    radio.end_scan_after_discoveries();

    let mut sensors = scan_for_sensors(&radio, ScanOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(sensors.len(), 2);

    let porch = sensors.remove(1);
    assert_eq!(porch.identity.name.as_deref(), Some("Porch"));

    let session = Session::from_discovered(radio.clone(), SensorConfig::default(), porch);
    assert_eq!(session.get_outdoor_temperature().await.unwrap(), -3.5);
    assert_eq!(radio.scan_starts(), 1);
    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_session_from_toml_config() {
    let config = SensorConfig::from_toml_str(
        r#"
        address = "AA:BB:CC:DD:EE:02"
        dataTtl = 60
        "#,
    )
    .unwrap();

    let radio = MockRadio::new();
    radio.add_peripheral("AA:BB:CC:DD:EE:01", None);
    let wanted = radio.add_peripheral("AA:BB:CC:DD:EE:02", None);

    let session = Session::new(radio, config);
    let response = session.read_response().await.unwrap();
    assert_eq!(response.indoor_temperature, 21.5);
    assert_eq!(response.relative_humidity, 45);
    assert_eq!(wanted.connect_count(), 1);
    assert_eq!(
        session.identity().await.unwrap().address,
        "aabbccddee02"
    );
}

#[tokio::test]
async fn test_session_events_serialize() {
    let radio = MockRadio::new();
    radio.add_peripheral("AA:BB:CC:DD:EE:FF", None);
    let session = Session::new(radio, SensorConfig::default());
    let mut events = session.subscribe();

    session.read_payload().await.unwrap();

    let mut loaded = false;
    while let Ok(event) = events.try_recv() {
        let json = serde_json::to_string(&event).unwrap();
        if let SessionEvent::PayloadLoaded { len, .. } = event {
            assert_eq!(len, DEFAULT_RESPONSE.len());
            assert!(json.contains("payload_loaded"));
            loaded = true;
        }
    }
    assert!(loaded);
}

#[tokio::test]
async fn test_undecodable_response_is_reported() {
    let radio = MockRadio::new();
    let peripheral = radio.add_peripheral("AA:BB:CC:DD:EE:FF", None);
    // Right tag, too short.
    peripheral.set_response(&[0xD2, 0x00, 0x00]);

    let session = Session::new(radio, SensorConfig::default());
    let err = session.get_indoor_temperature().await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert_eq!(session.state().await, SessionState::Ready);
}

#[tokio::test]
async fn test_passive_and_connected_on_one_radio() {
    let radio = MockRadio::new();
    let peripheral = radio.add_peripheral("AA:BB:CC:DD:EE:FF", None);
    peripheral.set_sensor_advertisement("AA:BB:CC:DD:EE:FF", &INDOOR_BODY);
    radio.end_scan_after_discoveries();

    let scanner = Arc::new(PassiveScanner::new(radio.clone()));
    let mut humidity = None;
    scanner
        .scan_for_readings(
            |reading, _sensor| {
                if reading.sensor == Some(SensorLocation::Indoor)
                    && reading.kind == ReadingKind::Humidity
                {
                    humidity = reading.value.measured();
                }
            },
            &AddressFilter::any(),
        )
        .await
        .unwrap();
    assert_eq!(humidity, Some(45.0));

    let session = Session::new(radio, SensorConfig::default());
    assert_eq!(session.get_relative_humidity().await.unwrap(), 45);
}

#[tokio::test(start_paused = true)]
async fn test_passive_scan_stops_from_another_task() {
    let radio = MockRadio::new();
    let scanner = Arc::new(PassiveScanner::new(radio.clone()));

    tokio::spawn({
        let scanner = Arc::clone(&scanner);
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            scanner.stop_scan().await.unwrap();
        }
    });

    scanner
        .scan_for_readings(|_, _| {}, &AddressFilter::any())
        .await
        .unwrap();
    assert!(!radio.is_scanning());
    assert!(!scanner.is_scanning());
}
