//! Sensor discovery.
//!
//! This module lists the ThermSmart sensors in range with a timed scan. The
//! result can be handed to [`Session::from_discovered`](crate::Session::from_discovered)
//! to connect without scanning again.

use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use thermsmart_types::SensorIdentity;
use thermsmart_types::uuid::THERMSMART_SERVICE;

use crate::advertisement::{is_thermsmart, sensor_address};
use crate::config::DEFAULT_POWER_ON_TIMEOUT_MS;
use crate::error::{Error, Result};
use crate::radio::{PowerState, RadioAdapter, RadioEvent, RadioPeripheral, wait_for_power_on};
use crate::util::AddressFilter;

/// Progress update for a discovery scan.
#[derive(Debug, Clone)]
pub enum ScanProgress {
    /// The scan started.
    Started {
        /// Scan duration.
        duration_secs: u64,
    },
    /// A sensor was seen for the first time.
    Found(SensorIdentity),
    /// The scan ended.
    Finished {
        /// Number of distinct sensors found.
        found: usize,
    },
}

/// Callback type for progress updates during a scan.
pub type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

/// A ThermSmart sensor seen during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredSensor<P> {
    /// Who the sensor is.
    pub identity: SensorIdentity,
    /// Handle for connecting.
    pub peripheral: P,
    /// Latest signal strength.
    pub rssi: Option<i16>,
}

/// Options for scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long to scan for sensors.
    pub duration: Duration,
    /// Addresses to report; empty reports every sensor.
    pub filter: AddressFilter,
    /// How long to wait for the adapter to power on.
    pub power_on_timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            filter: AddressFilter::any(),
            power_on_timeout: Duration::from_millis(DEFAULT_POWER_ON_TIMEOUT_MS),
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set scan duration in seconds.
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = Duration::from_secs(secs);
        self
    }

    /// Only report sensors in `filter`.
    pub fn filter(mut self, filter: AddressFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the power-on timeout.
    pub fn power_on_timeout(mut self, timeout: Duration) -> Self {
        self.power_on_timeout = timeout;
        self
    }
}

/// Scan for ThermSmart sensors in range.
///
/// Returns one entry per sensor, in the order they were first seen. An empty
/// list means nothing was found and is not an error. The scan ends early if
/// the radio stops it.
///
/// # Errors
///
/// Returns [`Error::RadioUnavailable`] if the adapter is not powered on in
/// time or loses power during the scan.
pub async fn scan_for_sensors<R: RadioAdapter>(
    radio: &R,
    options: ScanOptions,
    progress: Option<ProgressCallback>,
) -> Result<Vec<DiscoveredSensor<R::Peripheral>>> {
    wait_for_power_on(radio, options.power_on_timeout).await?;

    let mut events = radio.events().await?;
    radio.start_scan(THERMSMART_SERVICE).await?;
    info!(
        "Starting BLE scan for {} seconds...",
        options.duration.as_secs()
    );
    if let Some(ref cb) = progress {
        cb(ScanProgress::Started {
            duration_secs: options.duration.as_secs(),
        });
    }

    let deadline = tokio::time::Instant::now() + options.duration;
    let mut discovered: Vec<DiscoveredSensor<R::Peripheral>> = Vec::new();
    let outcome = loop {
        let event = match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => break Ok(()),
        };
        match event {
            RadioEvent::Discovered {
                peripheral,
                advertisement,
            } => {
                if !is_thermsmart(&advertisement) {
                    continue;
                }
                let address = sensor_address(&advertisement);
                if !options.filter.matches(&address) {
                    debug!("Ignoring sensor {} (not in filter)", address);
                    continue;
                }

                let id = peripheral.id();
                if let Some(known) = discovered.iter_mut().find(|s| s.identity.id == id) {
                    if advertisement.rssi.is_some() {
                        known.rssi = advertisement.rssi;
                    }
                    if known.identity.name.is_none() {
                        known.identity.name = advertisement.local_name;
                    }
                    continue;
                }

                let sensor = DiscoveredSensor {
                    identity: SensorIdentity {
                        id,
                        address,
                        name: advertisement.local_name,
                    },
                    peripheral,
                    rssi: advertisement.rssi,
                };
                info!(
                    "Found ThermSmart sensor: {} ({:?})",
                    sensor.identity.address, sensor.identity.name
                );
                if let Some(ref cb) = progress {
                    cb(ScanProgress::Found(sensor.identity.clone()));
                }
                discovered.push(sensor);
            }
            RadioEvent::StateChanged(state) if state != PowerState::PoweredOn => {
                break Err(Error::RadioUnavailable { state });
            }
            RadioEvent::ScanStopped => {
                debug!("Radio ended the scan early");
                break Ok(());
            }
            _ => {}
        }
    };

    if let Err(e) = radio.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }
    outcome?;

    info!("Scan complete. Found {} sensor(s)", discovered.len());
    if let Some(ref cb) = progress {
        cb(ScanProgress::Finished {
            found: discovered.len(),
        });
    }
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::mock::MockRadio;
    use crate::radio::Advertisement;

    #[test]
    fn test_scan_options_builder() {
        let options = ScanOptions::new()
            .duration_secs(10)
            .filter(["AA:BB:CC:DD:EE:FF"].into_iter().collect())
            .power_on_timeout(Duration::from_secs(1));
        assert_eq!(options.duration, Duration::from_secs(10));
        assert_eq!(options.filter.len(), 1);
        assert_eq!(options.power_on_timeout, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_lists_sensors_once() {
        let radio = MockRadio::new();
        let first = radio.add_peripheral("AA:BB:CC:DD:EE:01", Some("Kitchen"));
        radio.add_peripheral("AA:BB:CC:DD:EE:02", None);

        // Re-advertise during the scan; the sensor must not be listed twice.
        tokio::spawn({
            let radio = radio.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                radio.advertise(&first);
            }
        });

        let sensors = scan_for_sensors(&radio, ScanOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].identity.address, "aabbccddee01");
        assert_eq!(sensors[0].identity.name.as_deref(), Some("Kitchen"));
        assert_eq!(sensors[0].rssi, Some(-60));
        assert_eq!(sensors[1].identity.address, "aabbccddee02");
        assert!(!radio.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_applies_filter_and_skips_foreign() {
        let radio = MockRadio::new();
        let sensor = radio.add_peripheral("AA:BB:CC:DD:EE:01", None);
        radio.add_peripheral("AA:BB:CC:DD:EE:02", None);

        tokio::spawn({
            let radio = radio.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                radio.emit(RadioEvent::Discovered {
                    peripheral: sensor,
                    advertisement: Advertisement {
                        id: "headphones".to_string(),
                        address: "11:22:33:44:55:66".to_string(),
                        ..Default::default()
                    },
                });
            }
        });

        let options =
            ScanOptions::default().filter(["aa:bb:cc:dd:ee:02"].into_iter().collect());
        let sensors = scan_for_sensors(&radio, options, None).await.unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].identity.address, "aabbccddee02");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_reports_progress() {
        let radio = MockRadio::new();
        radio.add_peripheral("AA:BB:CC:DD:EE:01", None);
        radio.add_peripheral("AA:BB:CC:DD:EE:02", None);

        let found = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let callback: ProgressCallback = Box::new({
            let found = Arc::clone(&found);
            let finished = Arc::clone(&finished);
            move |progress| match progress {
                ScanProgress::Found(_) => {
                    found.fetch_add(1, Ordering::SeqCst);
                }
                ScanProgress::Finished { found } => {
                    finished.store(found, Ordering::SeqCst);
                }
                ScanProgress::Started { .. } => {}
            }
        });

        scan_for_sensors(&radio, ScanOptions::default(), Some(callback))
            .await
            .unwrap();
        assert_eq!(found.load(Ordering::SeqCst), 2);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_ends_when_radio_stops() {
        let radio = MockRadio::new();
        radio.add_peripheral("AA:BB:CC:DD:EE:01", None);
        radio.end_scan_after_discoveries();

        let started = tokio::time::Instant::now();
        let sensors = scan_for_sensors(&radio, ScanOptions::default().duration_secs(60), None)
            .await
            .unwrap();
        assert_eq!(sensors.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_fails_on_power_loss() {
        let radio = MockRadio::new();
        radio.add_peripheral("AA:BB:CC:DD:EE:01", None);

        tokio::spawn({
            let radio = radio.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                radio.set_power_state(PowerState::PoweredOff);
            }
        });

        let err = scan_for_sensors(&radio, ScanOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RadioUnavailable {
                state: PowerState::PoweredOff
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_requires_power() {
        let radio = MockRadio::with_power_state(PowerState::PoweredOff);
        let err = scan_for_sensors(&radio, ScanOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RadioUnavailable { .. }));
        assert_eq!(radio.scan_starts(), 0);
    }
}
