//! btleplug-backed radio.
//!
//! [`BtleRadio`] wraps the first Bluetooth adapter of the host and translates
//! btleplug's central events into [`RadioEvent`]s. Peripheral ids are the
//! formatted btleplug [`PeripheralId`]s, so disconnect events can be matched
//! against [`RadioPeripheral::id`].

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::radio::{
    Advertisement, Characteristic, Notification, PowerState, RadioAdapter, RadioEvent,
    RadioPeripheral,
};
use crate::util::format_peripheral_id;

/// The host Bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BtleRadio {
    adapter: Adapter,
}

impl BtleRadio {
    /// Open the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceNotFoundReason::NoAdapter`] when the host has none.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))?;
        Ok(Self::from_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn from_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// The wrapped adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

/// A peripheral known to a [`BtleRadio`].
#[derive(Debug, Clone)]
pub struct BtlePeripheral {
    peripheral: Peripheral,
}

impl BtlePeripheral {
    /// The underlying btleplug peripheral.
    pub fn inner(&self) -> &Peripheral {
        &self.peripheral
    }

    fn find_characteristic(
        &self,
        characteristic: &Characteristic,
    ) -> Result<btleplug::api::Characteristic> {
        let characteristics = self.peripheral.characteristics();
        characteristics
            .iter()
            .find(|c| {
                c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid
            })
            .cloned()
            .ok_or_else(|| {
                Error::characteristic_not_found(
                    characteristic.uuid.to_string(),
                    characteristics.len(),
                )
            })
    }
}

fn power_state(state: CentralState) -> PowerState {
    match state {
        CentralState::PoweredOn => PowerState::PoweredOn,
        CentralState::PoweredOff => PowerState::PoweredOff,
        _ => PowerState::Unknown,
    }
}

/// Build an advertisement from the peripheral's latest properties.
async fn advertisement_for(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Option<(BtlePeripheral, Advertisement)> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return None,
        Err(e) => {
            debug!("Error reading peripheral properties: {}", e);
            return None;
        }
    };

    let advertisement = Advertisement {
        id: format_peripheral_id(id),
        address: properties.address.to_string(),
        local_name: properties.local_name,
        manufacturer_data: properties.manufacturer_data,
        services: properties.services,
        rssi: properties.rssi,
    };
    Some((BtlePeripheral { peripheral }, advertisement))
}

async fn translate(adapter: &Adapter, event: CentralEvent) -> Option<RadioEvent<BtlePeripheral>> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => {
            let (peripheral, advertisement) = advertisement_for(adapter, &id).await?;
            Some(RadioEvent::Discovered {
                peripheral,
                advertisement,
            })
        }
        CentralEvent::DeviceDisconnected(id) => {
            Some(RadioEvent::Disconnected(format_peripheral_id(&id)))
        }
        CentralEvent::StateUpdate(state) => Some(RadioEvent::StateChanged(power_state(state))),
        other => {
            trace!("Ignoring central event: {:?}", other);
            None
        }
    }
}

#[async_trait]
impl RadioAdapter for BtleRadio {
    type Peripheral = BtlePeripheral;

    async fn power_state(&self) -> Result<PowerState> {
        Ok(power_state(self.adapter.adapter_state().await?))
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent<BtlePeripheral>>> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?;
        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move { translate(&adapter, event).await }
            })
            .boxed())
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }
}

#[async_trait]
impl RadioPeripheral for BtlePeripheral {
    fn id(&self) -> String {
        format_peripheral_id(&self.peripheral.id())
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await.map_err(|e| {
            Error::connection_failed(
                Some(self.id()),
                ConnectionFailureReason::BleError(e.to_string()),
            )
        })
    }

    async fn is_connected(&self) -> Result<bool> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| Error::CharacteristicDiscoveryFailed(e.to_string()))?;

        Ok(self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|c| Characteristic {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
            })
            .collect())
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()> {
        let target = self.find_characteristic(characteristic)?;
        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| Error::subscribe_failed(target.uuid.to_string(), e.to_string()))
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
        let target = self.find_characteristic(characteristic)?;
        self.peripheral
            .write(&target, data, WriteType::WithResponse)
            .await
            .map_err(|e| Error::write_failed(target.uuid.to_string(), e.to_string()))
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let target = self.find_characteristic(characteristic)?;
        Ok(self.peripheral.read(&target).await?)
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .map(|n| Notification {
                characteristic: n.uuid,
                value: n.value,
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_mapping() {
        assert_eq!(power_state(CentralState::PoweredOn), PowerState::PoweredOn);
        assert_eq!(power_state(CentralState::PoweredOff), PowerState::PoweredOff);
        assert_eq!(power_state(CentralState::Unknown), PowerState::Unknown);
    }
}
