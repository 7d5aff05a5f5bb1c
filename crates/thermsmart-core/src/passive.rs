//! Passive monitoring via BLE advertisements.
//!
//! ThermSmart sensors broadcast their readings continuously, so readings can
//! be collected from any number of sensors without connecting.
//!
//! # Benefits
//!
//! - **Lower power consumption**: No connection overhead
//! - **More devices**: Not limited by the BLE connection limit
//! - **Simpler**: No connection management needed
//!
//! # Example
//!
//! ```no_run
//! use thermsmart_core::{AddressFilter, BtleRadio, PassiveScanner};
//!
//! # async fn example() -> thermsmart_core::Result<()> {
//! let radio = BtleRadio::new().await?;
//! let scanner = PassiveScanner::new(radio);
//!
//! scanner
//!     .scan_for_readings(
//!         |reading, sensor| println!("{}: {reading}", sensor.address),
//!         &AddressFilter::any(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use thermsmart_types::uuid::THERMSMART_SERVICE;
use thermsmart_types::{Reading, SensorIdentity};

use crate::advertisement::{Diagnostic, parse_manufacturer_data};
use crate::config::DEFAULT_POWER_ON_TIMEOUT_MS;
use crate::error::{Error, Result};
use crate::radio::{Advertisement, PowerState, RadioAdapter, RadioEvent, wait_for_power_on};
use crate::util::AddressFilter;

/// A reading from passive advertisement monitoring.
#[derive(Debug, Clone)]
pub struct PassiveReading {
    /// The sensor that advertised.
    pub identity: SensorIdentity,
    /// One decoded reading.
    pub reading: Reading,
    /// RSSI signal strength.
    pub rssi: Option<i16>,
    /// When the advertisement was received.
    pub received_at: SystemTime,
}

/// Options for passive scanning.
#[derive(Debug, Clone)]
pub struct PassiveScannerOptions {
    /// How long to wait for the adapter to power on.
    pub power_on_timeout: Duration,
    /// Channel capacity for broadcast readings.
    pub channel_capacity: usize,
}

impl Default for PassiveScannerOptions {
    fn default() -> Self {
        Self {
            power_on_timeout: Duration::from_millis(DEFAULT_POWER_ON_TIMEOUT_MS),
            channel_capacity: 100,
        }
    }
}

impl PassiveScannerOptions {
    /// Create new options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the power-on timeout.
    pub fn power_on_timeout(mut self, timeout: Duration) -> Self {
        self.power_on_timeout = timeout;
        self
    }

    /// Set the broadcast channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Listens for ThermSmart advertisements and dispatches decoded readings.
///
/// Every reading goes to the handler passed to
/// [`scan_for_readings`](Self::scan_for_readings) and to all
/// [`subscribe`](Self::subscribe) receivers.
pub struct PassiveScanner<R: RadioAdapter> {
    radio: R,
    options: PassiveScannerOptions,
    /// Broadcast sender for readings.
    sender: broadcast::Sender<PassiveReading>,
    /// Id and stop token of the running scan.
    active: Mutex<Option<(u64, CancellationToken)>>,
    next_scan_id: AtomicU64,
}

impl<R: RadioAdapter> std::fmt::Debug for PassiveScanner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassiveScanner")
            .field("options", &self.options)
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}

impl<R: RadioAdapter> PassiveScanner<R> {
    /// Create a scanner with default options.
    pub fn new(radio: R) -> Self {
        Self::with_options(radio, PassiveScannerOptions::default())
    }

    /// Create a scanner with the given options.
    pub fn with_options(radio: R, options: PassiveScannerOptions) -> Self {
        let (sender, _) = broadcast::channel(options.channel_capacity.max(1));
        Self {
            radio,
            options,
            sender,
            active: Mutex::new(None),
            next_scan_id: AtomicU64::new(0),
        }
    }

    /// Subscribe to passive readings.
    pub fn subscribe(&self) -> broadcast::Receiver<PassiveReading> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Scan until stopped, calling `handler` once per decoded reading.
    ///
    /// Waits for the adapter to power on, then scans for the ThermSmart
    /// service. Advertisements whose embedded address disagrees with the
    /// reported address are dropped, as are sensors outside `filter`.
    ///
    /// Resolves `Ok(())` after [`stop_scan`](Self::stop_scan) or when the
    /// radio ends the scan. Starting a new scan stops the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioUnavailable`] if the adapter does not power on
    /// in time or powers off during the scan, and radio errors from starting
    /// the scan.
    #[tracing::instrument(level = "info", skip_all, fields(filter_len = filter.len()))]
    pub async fn scan_for_readings<F>(&self, mut handler: F, filter: &AddressFilter) -> Result<()>
    where
        F: FnMut(&Reading, &SensorIdentity) + Send,
    {
        let scan_id = self.next_scan_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        if let Some((_, previous)) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((scan_id, cancel.clone()))
        {
            previous.cancel();
        }

        let result = self.run(&cancel, &mut handler, filter).await;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(id, _)| *id == scan_id) {
            *active = None;
        }
        result
    }

    async fn run<F>(
        &self,
        cancel: &CancellationToken,
        handler: &mut F,
        filter: &AddressFilter,
    ) -> Result<()>
    where
        F: FnMut(&Reading, &SensorIdentity) + Send,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = wait_for_power_on(&self.radio, self.options.power_on_timeout) => result?,
        }

        let mut events = self.radio.events().await?;
        self.radio.start_scan(THERMSMART_SERVICE).await?;
        info!("Passive scan started");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = self.radio.stop_scan().await {
                        warn!("Failed to stop scan: {}", e);
                    }
                    info!("Passive scan stopped");
                    return Ok(());
                }
                event = events.next() => event,
            };

            match event {
                Some(RadioEvent::Discovered { advertisement, .. }) => {
                    self.dispatch(&advertisement, filter, cancel, handler);
                }
                Some(RadioEvent::StateChanged(state)) if state != PowerState::PoweredOn => {
                    warn!("Radio left powered-on state during passive scan: {}", state);
                    return Err(Error::RadioUnavailable { state });
                }
                Some(RadioEvent::ScanStopped) => {
                    info!("Passive scan ended by radio");
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    debug!("Radio event stream closed");
                    return Ok(());
                }
            }
        }
    }

    fn dispatch<F>(
        &self,
        advertisement: &Advertisement,
        filter: &AddressFilter,
        cancel: &CancellationToken,
        handler: &mut F,
    ) where
        F: FnMut(&Reading, &SensorIdentity),
    {
        let outcome = parse_manufacturer_data(&advertisement.manufacturer_data);
        match &outcome.diagnostic {
            Some(Diagnostic::ForeignManufacturer) => {
                trace!(id = %advertisement.id, "Ignoring non-ThermSmart advertisement");
                return;
            }
            Some(diagnostic) => {
                debug!(id = %advertisement.id, "Skipping advertisement: {}", diagnostic);
                return;
            }
            None => {}
        }

        for err in &outcome.skipped {
            debug!(id = %advertisement.id, "Skipping advertisement field: {}", err);
        }

        if !outcome.address_matches(&advertisement.address) {
            debug!(
                id = %advertisement.id,
                reported = %advertisement.address,
                embedded = ?outcome.embedded_address,
                "Dropping advertisement with mismatched embedded address"
            );
            return;
        }

        let address = outcome.resolve_address(&advertisement.address);
        if !filter.matches(&address) {
            trace!(%address, "Sensor not in address filter");
            return;
        }

        let identity = SensorIdentity {
            id: advertisement.id.clone(),
            address,
            name: advertisement.local_name.clone(),
        };
        let received_at = SystemTime::now();

        for reading in &outcome.readings {
            if cancel.is_cancelled() {
                return;
            }
            handler(reading, &identity);
            // Ignore error if no receivers
            let _ = self.sender.send(PassiveReading {
                identity: identity.clone(),
                reading: *reading,
                rssi: advertisement.rssi,
                received_at,
            });
        }
    }

    /// Ask the running scan to stop without touching the radio.
    ///
    /// Safe to call from inside the reading handler. No reading is delivered
    /// after this returns.
    pub fn request_stop(&self) {
        if let Some((_, token)) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            token.cancel();
        }
    }

    /// Stop the running scan and the radio scan.
    ///
    /// Idempotent: stopping an idle scanner is a no-op.
    pub async fn stop_scan(&self) -> Result<()> {
        let token = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((_, token)) = token {
            token.cancel();
            self.radio.stop_scan().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use thermsmart_types::{ReadingKind, ReadingValue, SensorLocation};

    use crate::mock::{MockPeripheral, MockRadio};

    const INDOOR_BODY: [u8; 11] = [
        87, 0x11, 0xAA, 0x31, 0xF4, 0x31, 0x72, 0x31, 0x45, 0x60, 0x38,
    ];

    const OUTDOOR_BODY: [u8; 8] = [64, 0x23, 0xDC, 0x2F, 0x00, 0x30, 0xB8, 0x2F];

    fn sensor(radio: &MockRadio, address: &str, body: &[u8]) -> MockPeripheral {
        let peripheral = radio.add_peripheral(address, Some("ThermSmart"));
        peripheral.set_sensor_advertisement(address, body);
        peripheral
    }

    /// Collects until the radio ends the scan.
    async fn collect(
        scanner: &PassiveScanner<MockRadio>,
        filter: &AddressFilter,
    ) -> Vec<(String, Reading)> {
        let mut seen = Vec::new();
        scanner
            .scan_for_readings(|reading, sensor| seen.push((sensor.address.clone(), *reading)), filter)
            .await
            .unwrap();
        seen
    }

    #[test]
    fn test_options_builder() {
        let opts = PassiveScannerOptions::new()
            .power_on_timeout(Duration::from_secs(1))
            .channel_capacity(10);
        assert_eq!(opts.power_on_timeout, Duration::from_secs(1));
        assert_eq!(opts.channel_capacity, 10);
    }

    #[test]
    fn test_subscribe() {
        let scanner = PassiveScanner::new(MockRadio::new());
        let _rx1 = scanner.subscribe();
        let _rx2 = scanner.subscribe();
        assert_eq!(scanner.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_readings_dispatched_once_each() {
        let radio = MockRadio::new();
        sensor(&radio, "AA:BB:CC:DD:EE:FF", &INDOOR_BODY);
        radio.end_scan_after_discoveries();

        let scanner = PassiveScanner::new(radio.clone());
        let seen = collect(&scanner, &AddressFilter::any()).await;

        assert_eq!(seen.len(), 7);
        assert!(seen.iter().all(|(address, _)| address == "aabbccddeeff"));
        assert_eq!(seen[0].1.kind, ReadingKind::BatteryLevel);
        assert_eq!(seen[1].1.sensor, Some(SensorLocation::Indoor));
        assert_eq!(radio.scan_starts(), 1);
    }

    #[tokio::test]
    async fn test_allow_list() {
        let radio = MockRadio::new();
        sensor(&radio, "AA:BB:CC:DD:EE:FF", &INDOOR_BODY);
        sensor(&radio, "11:22:33:44:55:66", &OUTDOOR_BODY);
        radio.end_scan_after_discoveries();

        let scanner = PassiveScanner::new(radio);
        let filter: AddressFilter = ["aabbccddeeff"].into_iter().collect();
        let seen = collect(&scanner, &filter).await;

        assert_eq!(seen.len(), 7);
        assert!(seen.iter().all(|(address, _)| address == "aabbccddeeff"));
    }

    #[tokio::test]
    async fn test_outdoor_sensor_has_no_humidity() {
        let radio = MockRadio::new();
        sensor(&radio, "11:22:33:44:55:66", &OUTDOOR_BODY);
        radio.end_scan_after_discoveries();

        let scanner = PassiveScanner::new(radio);
        let seen = collect(&scanner, &AddressFilter::any()).await;

        assert_eq!(seen.len(), 4);
        assert!(
            seen[1..]
                .iter()
                .all(|(_, r)| r.sensor == Some(SensorLocation::Outdoor))
        );
    }

    #[tokio::test]
    async fn test_embedded_address_mismatch_dropped() {
        let radio = MockRadio::new();
        let peripheral = radio.add_peripheral("AA:BB:CC:DD:EE:FF", None);
        peripheral.set_sensor_advertisement("11:22:33:44:55:66", &INDOOR_BODY);
        radio.end_scan_after_discoveries();

        let scanner = PassiveScanner::new(radio);
        let seen = collect(&scanner, &AddressFilter::any()).await;
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_hidden_address_uses_embedded() {
        let radio = MockRadio::new();
        let peripheral = radio.add_peripheral("00:00:00:00:00:00", None);
        peripheral.set_sensor_advertisement("AA:BB:CC:DD:EE:FF", &INDOOR_BODY);
        radio.end_scan_after_discoveries();

        let scanner = PassiveScanner::new(radio);
        let filter: AddressFilter = ["aabbccddeeff"].into_iter().collect();
        let seen = collect(&scanner, &filter).await;
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn test_foreign_skipped_and_unknown_type_reports_battery() {
        let radio = MockRadio::new();
        let foreign = radio.add_peripheral("AA:BB:CC:DD:EE:01", None);
        foreign.set_manufacturer_data(0x004C, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let mut body = INDOOR_BODY;
        body[1] = 0x15; // unknown sensor type 5
        sensor(&radio, "AA:BB:CC:DD:EE:02", &body);
        radio.end_scan_after_discoveries();

        let scanner = PassiveScanner::new(radio);
        let seen = collect(&scanner, &AddressFilter::any()).await;
        assert_eq!(seen.len(), 1);
        let (address, reading) = &seen[0];
        assert_eq!(address, "aabbccddee02");
        assert_eq!(reading.kind, ReadingKind::BatteryLevel);
        assert_eq!(reading.value, ReadingValue::Measured(87.0));
    }

    #[tokio::test]
    async fn test_nothing_delivered_after_stop_request() {
        let radio = MockRadio::new();
        sensor(&radio, "AA:BB:CC:DD:EE:FF", &INDOOR_BODY);
        sensor(&radio, "11:22:33:44:55:66", &OUTDOOR_BODY);

        let scanner = PassiveScanner::new(radio);
        let mut seen = 0;
        scanner
            .scan_for_readings(
                |_, _| {
                    seen += 1;
                    scanner.request_stop();
                },
                &AddressFilter::any(),
            )
            .await
            .unwrap();

        assert_eq!(seen, 1);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let radio = MockRadio::new();
        sensor(&radio, "AA:BB:CC:DD:EE:FF", &OUTDOOR_BODY);
        radio.end_scan_after_discoveries();

        let scanner = PassiveScanner::new(radio);
        let mut rx = scanner.subscribe();
        let seen = collect(&scanner, &AddressFilter::any()).await;

        for (_, reading) in &seen {
            let passive = rx.try_recv().unwrap();
            assert_eq!(passive.reading, *reading);
            assert_eq!(passive.identity.address, "aabbccddeeff");
            assert_eq!(passive.identity.name.as_deref(), Some("ThermSmart"));
            assert_eq!(passive.rssi, Some(-60));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_scan_is_idempotent() {
        let radio = MockRadio::new();
        let scanner = Arc::new(PassiveScanner::new(radio.clone()));
        let listeners_before = radio.listener_count();

        // Stopping an idle scanner is fine
        scanner.stop_scan().await.unwrap();

        let task = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move {
                scanner
                    .scan_for_readings(|_, _| {}, &AddressFilter::any())
                    .await
            })
        };
        while !radio.is_scanning() {
            tokio::task::yield_now().await;
        }
        assert!(scanner.is_scanning());

        scanner.stop_scan().await.unwrap();
        scanner.stop_scan().await.unwrap();
        task.await.unwrap().unwrap();

        assert!(!radio.is_scanning());
        assert!(!scanner.is_scanning());
        assert_eq!(radio.listener_count(), listeners_before);
    }

    #[tokio::test]
    async fn test_power_loss_fails_scan() {
        let radio = MockRadio::new();
        let scanner = Arc::new(PassiveScanner::new(radio.clone()));

        let task = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move {
                scanner
                    .scan_for_readings(|_, _| {}, &AddressFilter::any())
                    .await
            })
        };
        while !radio.is_scanning() {
            tokio::task::yield_now().await;
        }

        radio.set_power_state(PowerState::PoweredOff);
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::RadioUnavailable {
                state: PowerState::PoweredOff
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_on_timeout() {
        let radio = MockRadio::with_power_state(PowerState::PoweredOff);
        let scanner = PassiveScanner::new(radio.clone());

        let err = scanner
            .scan_for_readings(|_, _| {}, &AddressFilter::any())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RadioUnavailable { .. }));
        assert_eq!(radio.scan_starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_power_on() {
        let radio = MockRadio::with_power_state(PowerState::Unknown);
        sensor(&radio, "AA:BB:CC:DD:EE:FF", &OUTDOOR_BODY);
        radio.end_scan_after_discoveries();
        let scanner = Arc::new(PassiveScanner::new(radio.clone()));

        let task = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move {
                let mut count = 0;
                scanner
                    .scan_for_readings(|_, _| count += 1, &AddressFilter::any())
                    .await
                    .map(|()| count)
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        radio.set_power_state(PowerState::PoweredOn);

        assert_eq!(task.await.unwrap().unwrap(), 4);
    }
}
