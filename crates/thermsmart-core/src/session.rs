//! Connection session for a single ThermSmart sensor.
//!
//! A [`Session`] drives the link to one sensor through discovery, connection,
//! characteristic discovery and notification subscription, then answers
//! reading requests with the `0xD2` command exchange:
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> DiscoveringCharacteristics
//!              -> Subscribing -> Ready
//! ```
//!
//! Any other failure on the way leaves the session [`SessionState::Faulted`];
//! the next request starts a fresh attempt. A link loss in any state, including
//! mid-connect, returns the session to [`SessionState::Disconnected`], fails
//! every pending request
//! exactly once and clears the payload cache. The discovered peripheral
//! handle is kept, so reconnecting does not rescan.
//!
//! Concurrent callers share work: while an attempt or an exchange is in
//! flight, later callers join it instead of starting their own.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use thermsmart_types::uuid::{
    BATTERY_LEVEL, GET_SENSOR_DATA, NOTIFY_CHARACTERISTIC, THERMSMART_SERVICE,
    WRITE_CHARACTERISTIC,
};
use thermsmart_types::decode::{
    INDOOR_TEMPERATURE_OFFSET, OUTDOOR_TEMPERATURE_OFFSET, RELATIVE_HUMIDITY_OFFSET,
    command_humidity, command_temperature,
};
use thermsmart_types::{CommandResponse, SensorIdentity, decode_command_response};

use crate::advertisement::{is_thermsmart, sensor_address};
use crate::cache::PayloadCache;
use crate::config::SensorConfig;
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventDispatcher, EventReceiver, SessionEvent};
use crate::radio::{
    Characteristic, PowerState, RadioAdapter, RadioEvent, RadioPeripheral, wait_for_power_on,
};
use crate::scan::DiscoveredSensor;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No link.
    Disconnected,
    /// Looking for the sensor.
    Scanning,
    /// Establishing the link.
    Connecting,
    /// Looking up the command and notify characteristics.
    DiscoveringCharacteristics,
    /// Enabling notifications.
    Subscribing,
    /// Commands can be exchanged.
    Ready,
    /// The last attempt failed with the given reason.
    Faulted(String),
}

impl SessionState {
    /// Whether a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            SessionState::Scanning
                | SessionState::Connecting
                | SessionState::DiscoveringCharacteristics
                | SessionState::Subscribing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Scanning => write!(f, "scanning"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::DiscoveringCharacteristics => write!(f, "discovering characteristics"),
            SessionState::Subscribing => write!(f, "subscribing"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Faulted(reason) => write!(f, "faulted: {reason}"),
        }
    }
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

/// A connect attempt or command exchange other callers can join.
struct InFlight<T> {
    id: u64,
    future: SharedResult<T>,
}

/// A discovered sensor; survives disconnects.
struct SensorHandle<P> {
    identity: SensorIdentity,
    peripheral: P,
}

/// One established (or establishing) link.
struct Link {
    generation: u64,
    lost: CancellationToken,
    watcher: JoinHandle<()>,
}

impl Link {
    fn close(self) {
        self.lost.cancel();
        self.watcher.abort();
    }
}

struct SessionRecord<P> {
    state: SessionState,
    sensor: Option<SensorHandle<P>>,
    link: Option<Link>,
    write: Option<Characteristic>,
    notify: Option<Characteristic>,
    battery: Option<u8>,
    characteristics_found: usize,
    cache: PayloadCache,
    connecting: Option<InFlight<()>>,
    pending: Option<InFlight<Bytes>>,
}

impl<P> SessionRecord<P> {
    /// Forget everything tied to the current link and hand it back.
    fn drop_link(&mut self) -> Option<Link> {
        self.write = None;
        self.notify = None;
        self.battery = None;
        self.characteristics_found = 0;
        self.cache.clear();
        self.pending = None;
        self.link.take()
    }

    fn sensor_id(&self) -> String {
        self.sensor
            .as_ref()
            .map(|s| s.identity.id.clone())
            .unwrap_or_default()
    }
}

struct SessionInner<R: RadioAdapter> {
    radio: R,
    config: SensorConfig,
    record: Mutex<SessionRecord<R::Peripheral>>,
    events: EventDispatcher,
    next_id: AtomicU64,
}

/// Session with one ThermSmart sensor.
///
/// Cloning is cheap; clones share the link, the cache and any in-flight work.
///
/// # Example
///
/// ```
/// use thermsmart_core::mock::MockRadio;
/// use thermsmart_core::{SensorConfig, Session};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> thermsmart_core::Result<()> {
/// let radio = MockRadio::new();
/// radio.add_peripheral("AA:BB:CC:DD:EE:FF", Some("ThermSmart"));
///
/// let session = Session::new(radio, SensorConfig::default());
/// assert_eq!(session.get_indoor_temperature().await?, 21.5);
/// session.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session<R: RadioAdapter> {
    inner: Arc<SessionInner<R>>,
}

impl<R: RadioAdapter> Clone for Session<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RadioAdapter> fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.inner.config.address)
            .finish_non_exhaustive()
    }
}

impl<R: RadioAdapter> Session<R> {
    /// Create a session that discovers its sensor on first use.
    ///
    /// With no address configured, the first ThermSmart sensor found is used.
    pub fn new(radio: R, config: SensorConfig) -> Self {
        Self::with_sensor(radio, config, None)
    }

    /// Create a session for a sensor found by [`scan_for_sensors`](crate::scan::scan_for_sensors).
    pub fn from_discovered(
        radio: R,
        config: SensorConfig,
        sensor: DiscoveredSensor<R::Peripheral>,
    ) -> Self {
        Self::with_sensor(
            radio,
            config,
            Some(SensorHandle {
                identity: sensor.identity,
                peripheral: sensor.peripheral,
            }),
        )
    }

    fn with_sensor(
        radio: R,
        config: SensorConfig,
        sensor: Option<SensorHandle<R::Peripheral>>,
    ) -> Self {
        let cache = PayloadCache::new(config.data_ttl_duration());
        Self {
            inner: Arc::new(SessionInner {
                radio,
                config,
                record: Mutex::new(SessionRecord {
                    state: SessionState::Disconnected,
                    sensor,
                    link: None,
                    write: None,
                    notify: None,
                    battery: None,
                    characteristics_found: 0,
                    cache,
                    connecting: None,
                    pending: None,
                }),
                events: EventDispatcher::default(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current state.
    pub async fn state(&self) -> SessionState {
        self.inner.record.lock().await.state.clone()
    }

    /// Whether the session is [`SessionState::Ready`] and the radio still
    /// reports the link up.
    pub async fn is_connected(&self) -> bool {
        let peripheral = {
            let record = self.inner.record.lock().await;
            if record.state != SessionState::Ready {
                return false;
            }
            match record.sensor.as_ref() {
                Some(sensor) => sensor.peripheral.clone(),
                None => return false,
            }
        };
        peripheral.is_connected().await.unwrap_or(false)
    }

    /// Identity of the sensor, once discovered.
    pub async fn identity(&self) -> Option<SensorIdentity> {
        self.inner
            .record
            .lock()
            .await
            .sensor
            .as_ref()
            .map(|s| s.identity.clone())
    }

    /// The session configuration.
    pub fn config(&self) -> &SensorConfig {
        &self.inner.config
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Bring the session to [`SessionState::Ready`].
    ///
    /// Returns immediately when already ready. Concurrent callers join the
    /// attempt in flight and all observe its outcome.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let attempt = {
            let mut record = self.inner.record.lock().await;
            if record.state == SessionState::Ready {
                return Ok(());
            }
            match &record.connecting {
                Some(in_flight) => {
                    debug!("Joining connection attempt {}", in_flight.id);
                    in_flight.future.clone()
                }
                None => {
                    let id = self.inner.next_id();
                    let future = SessionInner::run_connect(Arc::clone(&self.inner), id)
                        .boxed()
                        .shared();
                    record.connecting = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        attempt.await
    }

    /// Tear the link down.
    ///
    /// Pending requests fail with [`Error::UnexpectedDisconnect`]. The sensor
    /// stays known, so the next request reconnects without scanning.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let peripheral = {
            let mut record = self.inner.record.lock().await;
            let link = record.drop_link();
            if link.is_none() && record.state == SessionState::Disconnected {
                return Ok(());
            }
            let had_link = link.is_some();
            if let Some(link) = link {
                link.close();
            }
            self.inner
                .transition(&mut record, SessionState::Disconnected);
            if had_link {
                self.inner.events.send(SessionEvent::Disconnected {
                    sensor_id: record.sensor_id(),
                    reason: DisconnectReason::UserRequested,
                });
            }
            record
                .sensor
                .as_ref()
                .filter(|_| had_link)
                .map(|s| s.peripheral.clone())
        };

        if let Some(peripheral) = peripheral {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    /// The raw command-response payload, from the cache while fresh.
    ///
    /// Connects first if needed. While an exchange is in flight, callers
    /// join it rather than writing the command again.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn read_payload(&self) -> Result<Bytes> {
        self.connect().await?;

        let exchange = {
            let mut record = self.inner.record.lock().await;
            if let Some(bytes) = record.cache.get() {
                trace!("Serving cached payload");
                return Ok(bytes);
            }
            match &record.pending {
                Some(in_flight) => {
                    debug!("Joining exchange {}", in_flight.id);
                    in_flight.future.clone()
                }
                None => {
                    let (Some(link), Some(write), Some(notify), Some(sensor)) =
                        (&record.link, record.write, record.notify, &record.sensor)
                    else {
                        return Err(Error::NotConnected);
                    };
                    let id = self.inner.next_id();
                    let future = SessionInner::run_exchange(
                        Arc::clone(&self.inner),
                        id,
                        sensor.peripheral.clone(),
                        write,
                        notify,
                        link.lost.clone(),
                    )
                    .boxed()
                    .shared();
                    record.pending = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        exchange.await
    }

    /// The full decoded command response.
    pub async fn read_response(&self) -> Result<CommandResponse> {
        let payload = self.read_payload().await?;
        Ok(decode_command_response(&payload)?)
    }

    /// Indoor temperature in °C.
    pub async fn get_indoor_temperature(&self) -> Result<f64> {
        let payload = self.read_payload().await?;
        Ok(command_temperature(&payload, INDOOR_TEMPERATURE_OFFSET)?)
    }

    /// Outdoor temperature in °C.
    pub async fn get_outdoor_temperature(&self) -> Result<f64> {
        let payload = self.read_payload().await?;
        Ok(command_temperature(&payload, OUTDOOR_TEMPERATURE_OFFSET)?)
    }

    /// Relative humidity in percent.
    pub async fn get_relative_humidity(&self) -> Result<u8> {
        let payload = self.read_payload().await?;
        Ok(command_humidity(&payload, RELATIVE_HUMIDITY_OFFSET)?)
    }

    /// Battery level in percent, read once per connection.
    ///
    /// # Errors
    ///
    /// [`Error::CharacteristicNotFound`] when the sensor exposes no battery
    /// level characteristic.
    pub async fn get_battery_level(&self) -> Result<u8> {
        self.connect().await?;
        let record = self.inner.record.lock().await;
        if record.link.is_none() {
            return Err(Error::NotConnected);
        }
        record.battery.ok_or_else(|| {
            Error::characteristic_not_found(
                BATTERY_LEVEL.to_string(),
                record.characteristics_found,
            )
        })
    }
}

impl<R: RadioAdapter> SessionInner<R> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn transition(&self, record: &mut SessionRecord<R::Peripheral>, state: SessionState) {
        if record.state != state {
            debug!("Session state: {} -> {}", record.state, state);
            record.state = state.clone();
            self.events.send(SessionEvent::StateChanged { state });
        }
    }

    async fn set_state(&self, state: SessionState) {
        let mut record = self.record.lock().await;
        self.transition(&mut record, state);
    }

    /// Body of a shared connect attempt.
    async fn run_connect(inner: Arc<Self>, attempt: u64) -> Result<()> {
        let result = inner.establish(attempt).await;

        let peripheral = {
            let mut record = inner.record.lock().await;
            if record
                .connecting
                .as_ref()
                .is_some_and(|in_flight| in_flight.id == attempt)
            {
                record.connecting = None;
            }

            let Err(err) = &result else {
                return result;
            };
            warn!("Connection attempt failed: {}", err);

            // Only tear down the link this attempt created.
            let ours = record
                .link
                .as_ref()
                .is_some_and(|link| link.generation == attempt);
            let peripheral = if ours {
                if let Some(link) = record.drop_link() {
                    link.close();
                }
                record.sensor.as_ref().map(|s| s.peripheral.clone())
            } else {
                None
            };
            // A lost link has already been reported as Disconnected.
            if ours || !matches!(err, Error::UnexpectedDisconnect) {
                inner.transition(&mut record, SessionState::Faulted(err.to_string()));
            }
            peripheral
        };

        if let Some(peripheral) = peripheral
            && let Err(e) = peripheral.disconnect().await
        {
            debug!("Disconnect after failed attempt: {}", e);
        }
        result
    }

    async fn establish(self: &Arc<Self>, attempt: u64) -> Result<()> {
        wait_for_power_on(&self.radio, self.config.power_on_timeout_duration()).await?;

        let known = {
            let record = self.record.lock().await;
            record.sensor.as_ref().map(|s| s.peripheral.clone())
        };
        let peripheral = match known {
            Some(peripheral) => peripheral,
            None => {
                self.set_state(SessionState::Scanning).await;
                let sensor = self.discover().await?;
                let peripheral = sensor.peripheral.clone();
                self.record.lock().await.sensor = Some(sensor);
                peripheral
            }
        };

        // Watch for link loss before connecting so no disconnect is missed.
        let lost = CancellationToken::new();
        let radio_events = self.radio.events().await?;
        {
            let mut record = self.record.lock().await;
            let watcher = spawn_watcher(
                Arc::downgrade(self),
                attempt,
                peripheral.id(),
                lost.clone(),
                radio_events,
            );
            if let Some(stale) = record.link.replace(Link {
                generation: attempt,
                lost: lost.clone(),
                watcher,
            }) {
                stale.close();
            }
            self.transition(&mut record, SessionState::Connecting);
        }

        info!("Connecting to {}", peripheral.id());
        guarded(&lost, peripheral.connect()).await?;

        self.set_state(SessionState::DiscoveringCharacteristics).await;
        let characteristics = guarded(&lost, peripheral.discover_characteristics())
            .await
            .map_err(|e| match e {
                Error::UnexpectedDisconnect | Error::CharacteristicDiscoveryFailed(_) => e,
                other => Error::CharacteristicDiscoveryFailed(other.to_string()),
            })?;
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .copied()
                .ok_or_else(|| {
                    Error::characteristic_not_found(uuid.to_string(), characteristics.len())
                })
        };
        let write = find(WRITE_CHARACTERISTIC)?;
        let notify = find(NOTIFY_CHARACTERISTIC)?;
        let battery_characteristic = find(BATTERY_LEVEL).ok();

        self.set_state(SessionState::Subscribing).await;
        guarded(&lost, peripheral.subscribe(&notify)).await?;

        let battery = match battery_characteristic {
            Some(characteristic) => match guarded(&lost, peripheral.read(&characteristic)).await {
                Ok(value) => value.first().copied(),
                Err(Error::UnexpectedDisconnect) => return Err(Error::UnexpectedDisconnect),
                Err(e) => {
                    warn!("Failed to read battery level: {}", e);
                    None
                }
            },
            None => {
                debug!("Sensor has no battery level characteristic");
                None
            }
        };

        let mut record = self.record.lock().await;
        if lost.is_cancelled() {
            return Err(Error::UnexpectedDisconnect);
        }
        record.write = Some(write);
        record.notify = Some(notify);
        record.battery = battery;
        record.characteristics_found = characteristics.len();
        self.transition(&mut record, SessionState::Ready);
        info!("Session ready ({})", peripheral.id());
        Ok(())
    }

    /// Scan until the configured sensor (or any sensor) shows up.
    async fn discover(&self) -> Result<SensorHandle<R::Peripheral>> {
        let wanted = self.config.normalized_address();
        let timeout = self.config.scan_timeout_duration();

        let mut events = self.radio.events().await?;
        self.radio.start_scan(THERMSMART_SERVICE).await?;
        info!(
            "Scanning for {} (timeout {:?})",
            wanted.as_deref().unwrap_or("any ThermSmart sensor"),
            timeout
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let result = loop {
            match tokio::time::timeout_at(deadline, events.next()).await {
                Err(_) => break Err(Error::scan_timeout(timeout)),
                Ok(None) => {
                    break Err(Error::device_not_found(
                        wanted.clone().unwrap_or_else(|| "ThermSmart sensor".to_string()),
                    ));
                }
                Ok(Some(RadioEvent::StateChanged(state))) if state != PowerState::PoweredOn => {
                    break Err(Error::RadioUnavailable { state });
                }
                Ok(Some(RadioEvent::Discovered {
                    peripheral,
                    advertisement,
                })) => {
                    if !is_thermsmart(&advertisement) {
                        continue;
                    }
                    let address = sensor_address(&advertisement);
                    if let Some(wanted) = &wanted
                        && *wanted != address
                    {
                        debug!("Skipping sensor {} (looking for {})", address, wanted);
                        continue;
                    }
                    info!("Found sensor {} ({})", address, advertisement.id);
                    break Ok(SensorHandle {
                        identity: SensorIdentity {
                            id: peripheral.id(),
                            address,
                            name: advertisement.local_name,
                        },
                        peripheral,
                    });
                }
                Ok(Some(_)) => {}
            }
        };

        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        result
    }

    /// Body of a shared command exchange.
    async fn run_exchange(
        inner: Arc<Self>,
        id: u64,
        peripheral: R::Peripheral,
        write: Characteristic,
        notify: Characteristic,
        lost: CancellationToken,
    ) -> Result<Bytes> {
        let sensor_id = peripheral.id();
        let result = guarded(&lost, async {
            // Listen before writing so a fast response is not missed.
            let mut notifications = peripheral.notifications().await?;
            peripheral
                .write(&write, &[GET_SENSOR_DATA])
                .await
                .map_err(|e| match e {
                    Error::WriteFailed { .. } | Error::UnexpectedDisconnect => e,
                    other => Error::write_failed(write.uuid.to_string(), other.to_string()),
                })?;
            inner.events.send(SessionEvent::CommandWritten {
                sensor_id: sensor_id.clone(),
            });

            while let Some(notification) = notifications.next().await {
                if notification.characteristic == notify.uuid
                    && notification.value.first() == Some(&GET_SENSOR_DATA)
                {
                    return Ok(Bytes::from(notification.value));
                }
                trace!(
                    "Ignoring notification on {} ({} bytes)",
                    notification.characteristic,
                    notification.value.len()
                );
            }
            Err(Error::UnexpectedDisconnect)
        })
        .await;

        let mut record = inner.record.lock().await;
        if record
            .pending
            .as_ref()
            .is_some_and(|in_flight| in_flight.id == id)
        {
            record.pending = None;
        }
        // A disconnect wins over a response that raced it.
        let result = if lost.is_cancelled() {
            Err(Error::UnexpectedDisconnect)
        } else {
            result
        };
        if let Ok(bytes) = &result {
            record.cache.store(bytes.clone());
            inner.events.send(SessionEvent::PayloadLoaded {
                sensor_id,
                len: bytes.len(),
            });
        }
        result
    }

    /// React to the radio reporting the link of `generation` as lost.
    async fn handle_disconnect(&self, generation: u64) {
        let mut record = self.record.lock().await;
        if record
            .link
            .as_ref()
            .is_none_or(|link| link.generation != generation)
        {
            return;
        }
        if let Some(link) = record.drop_link() {
            // Called from the watcher itself; cancelling is enough.
            link.lost.cancel();
        }
        warn!("Link to {} lost", record.sensor_id());
        self.transition(&mut record, SessionState::Disconnected);
        self.events.send(SessionEvent::Disconnected {
            sensor_id: record.sensor_id(),
            reason: DisconnectReason::LinkLost,
        });
    }
}

impl<R: RadioAdapter> Drop for SessionInner<R> {
    fn drop(&mut self) {
        let record = self.record.get_mut();
        if let Some(link) = record.link.take() {
            warn!(
                sensor_id = %record.sensor_id(),
                "Session dropped without calling disconnect()"
            );
            link.close();
        }
    }
}

/// Run `operation` unless the link is lost first.
async fn guarded<T>(
    lost: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = lost.cancelled() => Err(Error::UnexpectedDisconnect),
        result = operation => result,
    }
}

fn spawn_watcher<R: RadioAdapter>(
    session: Weak<SessionInner<R>>,
    generation: u64,
    peripheral_id: String,
    lost: CancellationToken,
    mut events: BoxStream<'static, RadioEvent<R::Peripheral>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = lost.cancelled() => return,
                event = events.next() => event,
            };
            let link_lost = match event {
                Some(RadioEvent::Disconnected(id)) => id == peripheral_id,
                Some(RadioEvent::StateChanged(state)) => state != PowerState::PoweredOn,
                Some(_) => false,
                None => true,
            };
            if link_lost {
                if let Some(session) = session.upgrade() {
                    session.handle_disconnect(generation).await;
                }
                return;
            }
        }
    })
}
