//! Trait abstractions over the platform Bluetooth stack.
//!
//! The session and the passive scanner only ever talk to a [`RadioAdapter`]
//! and its [`RadioPeripheral`]s. [`crate::btle::BtleRadio`] implements these
//! traits on top of btleplug; [`crate::mock::MockRadio`] implements them
//! in-process for tests.
//!
//! Everything the radio stack reports asynchronously (power changes,
//! discoveries, link loss, scan end) arrives as a [`RadioEvent`] on the
//! stream returned by [`RadioAdapter::events`]. Each call returns an
//! independent stream; dropping it unregisters the listener.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Power state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// The stack has not reported a state yet.
    Unknown,
    /// The adapter is on and usable.
    PoweredOn,
    /// The adapter is off.
    PoweredOff,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Unknown => write!(f, "unknown"),
            PowerState::PoweredOn => write!(f, "powered on"),
            PowerState::PoweredOff => write!(f, "powered off"),
        }
    }
}

/// Advertisement data reported with a discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform peripheral identifier.
    pub id: String,
    /// Address as reported; empty (or all zeros) when the platform hides it.
    pub address: String,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Manufacturer data keyed by company id, company id bytes excluded.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Something the radio stack reported.
#[derive(Debug, Clone)]
pub enum RadioEvent<P> {
    /// The adapter power state changed.
    StateChanged(PowerState),
    /// A peripheral advertised (first sighting or update).
    Discovered {
        /// Handle to the advertising peripheral.
        peripheral: P,
        /// What it advertised.
        advertisement: Advertisement,
    },
    /// The link to the peripheral with this id dropped.
    Disconnected(String),
    /// Scanning ended without being asked to.
    ScanStopped,
}

/// A GATT characteristic on a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Characteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service it belongs to.
    pub service_uuid: Uuid,
}

/// A value notification from a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The characteristic that notified.
    pub characteristic: Uuid,
    /// The notified value.
    pub value: Vec<u8>,
}

/// A remote peripheral handle.
///
/// Handles are cheap to clone and stay valid across disconnects, so a
/// session can reconnect without rescanning.
#[async_trait]
pub trait RadioPeripheral: Clone + Send + Sync + 'static {
    /// Platform identifier; matches [`RadioEvent::Disconnected`] payloads.
    fn id(&self) -> String;

    /// Establish the link.
    async fn connect(&self) -> Result<()>;

    /// Whether the stack considers the link up.
    async fn is_connected(&self) -> Result<bool>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<()>;

    /// Discover services and return every characteristic found.
    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()>;

    /// Write with response.
    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>>;

    /// Stream of notifications from all subscribed characteristics.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>>;
}

/// The local Bluetooth adapter.
#[async_trait]
pub trait RadioAdapter: Send + Sync + 'static {
    /// Peripheral handle type produced by discoveries.
    type Peripheral: RadioPeripheral;

    /// Current power state.
    async fn power_state(&self) -> Result<PowerState>;

    /// A fresh stream of radio events.
    async fn events(&self) -> Result<BoxStream<'static, RadioEvent<Self::Peripheral>>>;

    /// Start scanning for peripherals advertising `service`.
    async fn start_scan(&self, service: Uuid) -> Result<()>;

    /// Stop scanning. Stopping an idle adapter is not an error.
    async fn stop_scan(&self) -> Result<()>;
}

/// Wait until the adapter reports [`PowerState::PoweredOn`].
///
/// Subscribes to events before sampling the current state so a transition
/// in between is not missed.
///
/// # Errors
///
/// Returns [`Error::RadioUnavailable`] with the last observed state if the
/// adapter does not power on within `timeout`.
pub async fn wait_for_power_on<R: RadioAdapter>(radio: &R, timeout: Duration) -> Result<()> {
    let mut events = radio.events().await?;
    let mut state = radio.power_state().await?;
    if state == PowerState::PoweredOn {
        return Ok(());
    }

    debug!("Waiting up to {:?} for radio power-on (state: {})", timeout, state);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(RadioEvent::StateChanged(new_state))) => {
                state = new_state;
                if state == PowerState::PoweredOn {
                    return Ok(());
                }
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return Err(Error::RadioUnavailable { state }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;

    #[test]
    fn test_power_state_display() {
        assert_eq!(PowerState::PoweredOn.to_string(), "powered on");
        assert_eq!(PowerState::PoweredOff.to_string(), "powered off");
        assert_eq!(PowerState::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_power_state_serialization() {
        let json = serde_json::to_string(&PowerState::PoweredOn).unwrap();
        assert_eq!(json, "\"powered_on\"");
    }

    #[tokio::test]
    async fn test_wait_for_power_on_immediate() {
        let radio = MockRadio::new();
        wait_for_power_on(&radio, Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_power_on_transition() {
        let radio = MockRadio::with_power_state(PowerState::PoweredOff);
        let waiter = {
            let radio = radio.clone();
            tokio::spawn(async move { wait_for_power_on(&radio, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        radio.set_power_state(PowerState::PoweredOn);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_power_on_timeout() {
        let radio = MockRadio::with_power_state(PowerState::PoweredOff);
        let err = wait_for_power_on(&radio, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RadioUnavailable {
                state: PowerState::PoweredOff
            }
        ));
    }
}
