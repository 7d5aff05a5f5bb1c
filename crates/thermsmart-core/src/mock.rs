//! In-process mock radio for testing.
//!
//! This module provides a [`MockRadio`] and [`MockPeripheral`] implementing
//! the [`RadioAdapter`] / [`RadioPeripheral`] traits, so sessions and the
//! passive scanner can be exercised without Bluetooth hardware.
//!
//! # Features
//!
//! - **Scripted sensors**: registered peripherals are discovered when a scan
//!   starts and answer the `0xD2` command with a configurable response
//! - **Failure injection**: fail connect, subscribe or write, or hide the
//!   notify characteristic
//! - **Latency simulation**: delay responses to open race windows
//! - **Link control**: drop the link or the adapter power at any point
//! - **Counters**: connects and command writes, for single-flight assertions

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use thermsmart_types::uuid::{
    BATTERY_LEVEL, BATTERY_SERVICE, GET_SENSOR_DATA, MANUFACTURER_ID, NOTIFY_CHARACTERISTIC,
    THERMSMART_SERVICE, WRITE_CHARACTERISTIC,
};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::radio::{
    Advertisement, Characteristic, Notification, PowerState, RadioAdapter, RadioEvent,
    RadioPeripheral,
};
use crate::util::normalize_address;

/// Command response the mock answers with unless told otherwise:
/// 21.5 °C indoor, 45 % humidity, -3.5 °C outdoor.
pub const DEFAULT_RESPONSE: [u8; 14] = [
    0xD2, 0x00, 0x00, 0xAE, 0x31, 0x00, 0x00, 0x00, 0x00, 0x45, 0x00, 0x00, 0xBA, 0x2F,
];

const EVENT_CAPACITY: usize = 64;
const NOTIFICATION_CAPACITY: usize = 16;

/// Turn a broadcast receiver into a stream, skipping over lag.
fn receiver_stream<T: Clone + Send + 'static>(
    receiver: broadcast::Receiver<T>,
) -> BoxStream<'static, T> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(item) => return Some((item, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Mock event stream lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

fn encode_power(state: PowerState) -> u8 {
    match state {
        PowerState::Unknown => 0,
        PowerState::PoweredOn => 1,
        PowerState::PoweredOff => 2,
    }
}

fn decode_power(value: u8) -> PowerState {
    match value {
        1 => PowerState::PoweredOn,
        2 => PowerState::PoweredOff,
        _ => PowerState::Unknown,
    }
}

/// A mock Bluetooth adapter.
///
/// Cloning yields another handle to the same adapter.
///
/// # Example
///
/// ```
/// use thermsmart_core::mock::MockRadio;
/// use thermsmart_core::{Session, SensorConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let radio = MockRadio::new();
///     radio.add_peripheral("AA:BB:CC:DD:EE:FF", Some("ThermSmart"));
///
///     let session = Session::new(radio, SensorConfig::default());
///     let temperature = session.get_indoor_temperature().await.unwrap();
///     assert_eq!(temperature, 21.5);
/// }
/// ```
#[derive(Clone)]
pub struct MockRadio {
    inner: Arc<MockRadioInner>,
}

struct MockRadioInner {
    power: AtomicU8,
    scanning: AtomicBool,
    scan_starts: AtomicU32,
    end_after_discoveries: AtomicBool,
    events: broadcast::Sender<RadioEvent<MockPeripheral>>,
    peripherals: Mutex<Vec<MockPeripheral>>,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRadio")
            .field("power", &self.current_power_state())
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// Create a powered-on mock adapter with no peripherals.
    pub fn new() -> Self {
        Self::with_power_state(PowerState::PoweredOn)
    }

    /// Create a mock adapter in the given power state.
    pub fn with_power_state(state: PowerState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MockRadioInner {
                power: AtomicU8::new(encode_power(state)),
                scanning: AtomicBool::new(false),
                scan_starts: AtomicU32::new(0),
                end_after_discoveries: AtomicBool::new(false),
                events,
                peripherals: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a ThermSmart peripheral that is discovered by every scan.
    pub fn add_peripheral(&self, address: &str, name: Option<&str>) -> MockPeripheral {
        let address = normalize_address(address);
        let advertisement = Advertisement {
            id: format!("mock-{address}"),
            address,
            local_name: name.map(str::to_string),
            services: vec![THERMSMART_SERVICE],
            rssi: Some(-60),
            ..Default::default()
        };
        let peripheral = MockPeripheral::new(advertisement, self.inner.events.clone());
        self.inner
            .peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(peripheral.clone());
        peripheral
    }

    /// Change the adapter power state and report it.
    pub fn set_power_state(&self, state: PowerState) {
        self.inner.power.store(encode_power(state), Ordering::SeqCst);
        self.emit(RadioEvent::StateChanged(state));
    }

    /// Current adapter power state.
    pub fn current_power_state(&self) -> PowerState {
        decode_power(self.inner.power.load(Ordering::SeqCst))
    }

    /// Report a discovery of `peripheral` with its current advertisement.
    pub fn advertise(&self, peripheral: &MockPeripheral) {
        self.emit(RadioEvent::Discovered {
            peripheral: peripheral.clone(),
            advertisement: peripheral.advertisement(),
        });
    }

    /// Report that scanning ended on the radio side.
    pub fn end_scan(&self) {
        self.inner.scanning.store(false, Ordering::SeqCst);
        self.emit(RadioEvent::ScanStopped);
    }

    /// End every scan right after the registered peripherals were reported.
    ///
    /// Lets a scan run to completion in tests without an external stop.
    pub fn end_scan_after_discoveries(&self) {
        self.inner
            .end_after_discoveries
            .store(true, Ordering::SeqCst);
    }

    /// Emit an arbitrary radio event.
    pub fn emit(&self, event: RadioEvent<MockPeripheral>) {
        // No listeners is fine
        let _ = self.inner.events.send(event);
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Number of `start_scan` calls.
    pub fn scan_starts(&self) -> u32 {
        self.inner.scan_starts.load(Ordering::SeqCst)
    }

    /// Number of live event streams.
    pub fn listener_count(&self) -> usize {
        self.inner.events.receiver_count()
    }
}

#[async_trait]
impl RadioAdapter for MockRadio {
    type Peripheral = MockPeripheral;

    async fn power_state(&self) -> Result<PowerState> {
        Ok(self.current_power_state())
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent<MockPeripheral>>> {
        Ok(receiver_stream(self.inner.events.subscribe()))
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        let state = self.current_power_state();
        if state != PowerState::PoweredOn {
            return Err(Error::RadioUnavailable { state });
        }
        self.inner.scanning.store(true, Ordering::SeqCst);
        self.inner.scan_starts.fetch_add(1, Ordering::SeqCst);

        let peripherals = self
            .inner
            .peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for peripheral in peripherals {
            let advertisement = peripheral.advertisement();
            if advertisement.services.contains(&service) {
                self.emit(RadioEvent::Discovered {
                    peripheral,
                    advertisement,
                });
            }
        }
        if self.inner.end_after_discoveries.load(Ordering::SeqCst) {
            self.end_scan();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.inner.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A mock ThermSmart peripheral.
///
/// Cloning yields another handle to the same peripheral.
#[derive(Clone)]
pub struct MockPeripheral {
    inner: Arc<MockPeripheralInner>,
}

struct MockPeripheralInner {
    id: String,
    advertisement: Mutex<Advertisement>,
    radio_events: broadcast::Sender<RadioEvent<MockPeripheral>>,
    notifications: broadcast::Sender<Notification>,
    response: Mutex<Vec<u8>>,
    connected: AtomicBool,
    auto_respond: AtomicBool,
    has_battery: AtomicBool,
    hide_notify: AtomicBool,
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_write: AtomicBool,
    battery: AtomicU8,
    /// Response delay in milliseconds (0 = respond immediately).
    response_delay_ms: AtomicU64,
    /// Connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    connect_count: AtomicU32,
    command_count: AtomicU32,
}

impl std::fmt::Debug for MockPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeripheral")
            .field("id", &self.inner.id)
            .field("connected", &self.inner.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockPeripheral {
    fn new(
        advertisement: Advertisement,
        radio_events: broadcast::Sender<RadioEvent<MockPeripheral>>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(MockPeripheralInner {
                id: advertisement.id.clone(),
                advertisement: Mutex::new(advertisement),
                radio_events,
                notifications,
                response: Mutex::new(DEFAULT_RESPONSE.to_vec()),
                connected: AtomicBool::new(false),
                auto_respond: AtomicBool::new(true),
                has_battery: AtomicBool::new(true),
                hide_notify: AtomicBool::new(false),
                fail_connect: AtomicBool::new(false),
                fail_subscribe: AtomicBool::new(false),
                fail_write: AtomicBool::new(false),
                battery: AtomicU8::new(87),
                response_delay_ms: AtomicU64::new(0),
                connect_latency_ms: AtomicU64::new(0),
                connect_count: AtomicU32::new(0),
                command_count: AtomicU32::new(0),
            }),
        }
    }

    /// The advertisement reported on discovery.
    pub fn advertisement(&self) -> Advertisement {
        self.inner
            .advertisement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the manufacturer data payload (company id excluded).
    pub fn set_manufacturer_data(&self, company_id: u16, data: Vec<u8>) {
        let mut advertisement = self
            .inner
            .advertisement
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        advertisement.manufacturer_data.clear();
        advertisement.manufacturer_data.insert(company_id, data);
    }

    /// Set a ThermSmart advertisement: embedded address, header padding, body.
    ///
    /// `embedded_address` is written little-endian after the company id, as
    /// the sensor does; pass the peripheral's own address for a consistent
    /// advertisement.
    pub fn set_sensor_advertisement(&self, embedded_address: &str, body: &[u8]) {
        let normalized = normalize_address(embedded_address);
        let mut data: Vec<u8> = (0..6)
            .rev()
            .map(|i| {
                normalized
                    .get(i * 2..i * 2 + 2)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .unwrap_or(0)
            })
            .collect();
        data.extend_from_slice(body);
        self.set_manufacturer_data(MANUFACTURER_ID, data);
    }

    /// Set the response sent to the `0xD2` command.
    pub fn set_response(&self, response: &[u8]) {
        *self
            .inner
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = response.to_vec();
    }

    /// Whether the command is answered automatically.
    pub fn set_auto_respond(&self, enabled: bool) {
        self.inner.auto_respond.store(enabled, Ordering::SeqCst);
    }

    /// Delay automatic responses.
    pub fn set_response_delay(&self, delay: Duration) {
        self.inner
            .response_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay connect attempts.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.inner
            .connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the battery level, or remove the battery characteristic.
    pub fn set_battery(&self, level: Option<u8>) {
        self.inner
            .has_battery
            .store(level.is_some(), Ordering::SeqCst);
        self.inner
            .battery
            .store(level.unwrap_or(0), Ordering::SeqCst);
    }

    /// Leave the notify characteristic out of discovery.
    pub fn set_hide_notify_characteristic(&self, hide: bool) {
        self.inner.hide_notify.store(hide, Ordering::SeqCst);
    }

    /// Make connect attempts fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subscribe calls fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make writes fail.
    pub fn set_fail_write(&self, fail: bool) {
        self.inner.fail_write.store(fail, Ordering::SeqCst);
    }

    /// Send a notification as if the sensor had produced it.
    pub fn notify(&self, characteristic: Uuid, value: &[u8]) {
        let _ = self.inner.notifications.send(Notification {
            characteristic,
            value: value.to_vec(),
        });
    }

    /// Drop the link from the sensor side.
    pub fn disconnect_now(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        let _ = self
            .inner
            .radio_events
            .send(RadioEvent::Disconnected(self.inner.id.clone()));
    }

    /// Whether the link is up.
    pub fn is_connected_sync(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Number of connect attempts.
    pub fn connect_count(&self) -> u32 {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    /// Number of command writes received.
    pub fn command_count(&self) -> u32 {
        self.inner.command_count.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<()> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn schedule_response(&self) {
        let peripheral = self.clone();
        let delay = Duration::from_millis(self.inner.response_delay_ms.load(Ordering::SeqCst));
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if peripheral.is_connected_sync() {
                let response = peripheral
                    .inner
                    .response
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                peripheral.notify(NOTIFY_CHARACTERISTIC, &response);
            }
        });
    }
}

#[async_trait]
impl RadioPeripheral for MockPeripheral {
    fn id(&self) -> String {
        self.inner.id.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.inner.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                Some(self.inner.id.clone()),
                ConnectionFailureReason::Rejected,
            ));
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool> {
        Ok(self.is_connected_sync())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .inner
                .radio_events
                .send(RadioEvent::Disconnected(self.inner.id.clone()));
        }
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>> {
        self.check_connected()?;

        let mut characteristics = vec![Characteristic {
            uuid: WRITE_CHARACTERISTIC,
            service_uuid: THERMSMART_SERVICE,
        }];
        if !self.inner.hide_notify.load(Ordering::SeqCst) {
            characteristics.push(Characteristic {
                uuid: NOTIFY_CHARACTERISTIC,
                service_uuid: THERMSMART_SERVICE,
            });
        }
        if self.inner.has_battery.load(Ordering::SeqCst) {
            characteristics.push(Characteristic {
                uuid: BATTERY_LEVEL,
                service_uuid: BATTERY_SERVICE,
            });
        }
        Ok(characteristics)
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()> {
        self.check_connected()?;
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::subscribe_failed(
                characteristic.uuid.to_string(),
                "mock subscribe failure",
            ));
        }
        Ok(())
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
        self.check_connected()?;
        if self.inner.fail_write.load(Ordering::SeqCst) {
            return Err(Error::write_failed(
                characteristic.uuid.to_string(),
                "mock write failure",
            ));
        }

        if characteristic.uuid == WRITE_CHARACTERISTIC && data.first() == Some(&GET_SENSOR_DATA) {
            self.inner.command_count.fetch_add(1, Ordering::SeqCst);
            if self.inner.auto_respond.load(Ordering::SeqCst) {
                self.schedule_response();
            }
        }
        Ok(())
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        self.check_connected()?;
        if characteristic.uuid == BATTERY_LEVEL && self.inner.has_battery.load(Ordering::SeqCst) {
            return Ok(vec![self.inner.battery.load(Ordering::SeqCst)]);
        }
        Err(Error::characteristic_not_found(
            characteristic.uuid.to_string(),
            0,
        ))
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        Ok(receiver_stream(self.inner.notifications.subscribe()))
    }
}
