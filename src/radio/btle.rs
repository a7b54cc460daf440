use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RadioError;
use crate::radio::{
    CharacteristicHandle, CharacteristicProps, DeviceHandle, LinkState, Radio, RadioEvent,
    RadioStatus, ServiceEntry, ServiceTree,
};

struct BtleState {
    known: HashMap<String, Peripheral>,
    connected: Option<Peripheral>,
    notifications_cancel: Option<CancellationToken>,
}

/**
 * Production Radio on top of btleplug. Operations run against the first
 * available adapter; discoveries, link drops and characteristic changes are
 * converted into RadioEvent values on the channel handed out by `new`.
 */
pub struct BtleRadio {
    adapter: Adapter,
    events: UnboundedSender<RadioEvent>,
    state: Arc<Mutex<BtleState>>,
}

impl BtleRadio {
    pub async fn new() -> Result<(Self, UnboundedReceiver<RadioEvent>), RadioError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(RadioError::NoAdapter)?;

        info!(
            "Using adapter {}",
            adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string())
        );

        let (events, receiver) = unbounded_channel();
        let state = Arc::new(Mutex::new(BtleState {
            known: HashMap::new(),
            connected: None,
            notifications_cancel: None,
        }));

        let radio = BtleRadio {
            adapter: adapter.clone(),
            events: events.clone(),
            state: Arc::clone(&state),
        };
        spawn(pump_adapter_events(adapter, state, events));

        Ok((radio, receiver))
    }

    async fn connected_peripheral(&self) -> Result<Peripheral, RadioError> {
        self.state
            .lock()
            .await
            .connected
            .clone()
            .ok_or(RadioError::NotConnected)
    }

    /// Attempt the link and report the outcome as a ConnectionStateChange,
    /// the way a connection callback would.
    async fn drive_connect(&self, peripheral: Peripheral) {
        match peripheral.connect().await {
            Ok(()) => {
                {
                    let mut state = self.state.lock().await;
                    state.connected = Some(peripheral.clone());
                }
                self.start_notification_pump(peripheral).await;
                let _ = self.events.send(RadioEvent::ConnectionStateChange {
                    status: RadioStatus::Success,
                    state: LinkState::Connected,
                });
            }
            Err(err) => {
                warn!("Connecting to peripheral failed: {:?}", err);
                let _ = self.events.send(RadioEvent::ConnectionStateChange {
                    status: RadioStatus::Failure,
                    state: LinkState::Disconnected,
                });
            }
        }
    }

    async fn start_notification_pump(&self, peripheral: Peripheral) {
        let cancel = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            if let Some(old) = state.notifications_cancel.replace(cancel.clone()) {
                old.cancel();
            }
        }

        let events = self.events.clone();
        spawn(async move {
            let mut notification_stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Failed to open the notification stream: {:?}", err);
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = notification_stream.next() => match notification {
                        Some(data) => {
                            let _ = events.send(RadioEvent::CharacteristicChanged {
                                characteristic: data.uuid,
                                value: data.value,
                            });
                        }
                        None => break,
                    },
                }
            }

            debug!("Notification pump stopped");
        });
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        uuid: Uuid,
    ) -> Result<btleplug::api::Characteristic, RadioError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|candidate| candidate.uuid == uuid)
            .ok_or_else(|| RadioError::Rejected {
                reason: format!("characteristic {} is not present on the peripheral", uuid),
            })
    }
}

#[async_trait]
impl Radio for BtleRadio {
    async fn start_scan(&self) -> Result<(), RadioError> {
        // no filter; the session machine matches on the advertised name
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<(), RadioError> {
        let peripheral = self
            .state
            .lock()
            .await
            .known
            .get(&device.id)
            .cloned()
            .ok_or_else(|| RadioError::UnknownPeripheral { handle: device.id.clone() })?;

        self.drive_connect(peripheral).await;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral().await?;
        self.drive_connect(peripheral).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral().await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_services(&self) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral().await?;
        peripheral.discover_services().await?;

        let mut tree = ServiceTree::default();
        for service in peripheral.services() {
            let characteristics = service
                .characteristics
                .iter()
                .map(|characteristic| CharacteristicHandle {
                    service: service.uuid,
                    uuid: characteristic.uuid,
                    properties: CharacteristicProps {
                        notify: characteristic.properties.contains(CharPropFlags::NOTIFY),
                        indicate: characteristic.properties.contains(CharPropFlags::INDICATE),
                    },
                })
                .collect();

            tree.services.push(ServiceEntry { uuid: service.uuid, characteristics });
        }

        let _ = self.events.send(RadioEvent::ServicesDiscovered { services: tree });
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<(), RadioError> {
        // btleplug exposes no explicit MTU request; the platform stack
        // negotiates the transfer unit on its own during connection, so the
        // request is acknowledged right away
        self.connected_peripheral().await?;
        let _ = self.events.send(RadioEvent::MtuChanged { mtu });
        Ok(())
    }

    async fn register_notifications(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral().await?;
        let found = Self::find_characteristic(&peripheral, characteristic.uuid)?;

        if enabled {
            peripheral.subscribe(&found).await?;
        } else {
            peripheral.unsubscribe(&found).await?;
        }
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral().await?;
        let found = Self::find_characteristic(&peripheral, characteristic.uuid)?;

        match found.descriptors.iter().find(|candidate| candidate.uuid == descriptor) {
            Some(found_descriptor) => {
                peripheral.write_descriptor(found_descriptor, payload).await?;
            }
            None => {
                // not all platforms surface the CCCD; there the configuration
                // write already happened inside subscribe/unsubscribe
                debug!(
                    "Descriptor {} not exposed for {}, relying on the subscription",
                    descriptor, characteristic.uuid
                );
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), RadioError> {
        let (peripheral, cancel) = {
            let mut state = self.state.lock().await;
            (state.connected.take(), state.notifications_cancel.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(peripheral) = peripheral {
            if let Err(err) = peripheral.disconnect().await {
                debug!("Disconnect while releasing the link failed: {:?}", err);
            }
        }
        Ok(())
    }
}

/// Convert adapter-level events into RadioEvents: discoveries (and name
/// updates) while scanning, and drops of the tracked link.
async fn pump_adapter_events(
    adapter: Adapter,
    state: Arc<Mutex<BtleState>>,
    events: UnboundedSender<RadioEvent>,
) {
    let mut event_stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("Failed to open the adapter event stream: {:?}", err);
            return;
        }
    };

    while let Some(event) = event_stream.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(peripheral) => peripheral,
                    Err(err) => {
                        debug!("Could not resolve discovered peripheral: {:?}", err);
                        continue;
                    }
                };

                let name = match peripheral.properties().await {
                    Ok(Some(properties)) => properties.local_name,
                    _ => None,
                };

                let handle = DeviceHandle { id: format!("{:?}", id), name };
                state.lock().await.known.insert(handle.id.clone(), peripheral);
                let _ = events.send(RadioEvent::DeviceFound { device: handle });
            }
            CentralEvent::DeviceDisconnected(id) => {
                let is_tracked_link = state
                    .lock()
                    .await
                    .connected
                    .as_ref()
                    .map(|peripheral| peripheral.id() == id)
                    .unwrap_or(false);

                if is_tracked_link {
                    let _ = events.send(RadioEvent::ConnectionStateChange {
                        status: RadioStatus::Success,
                        state: LinkState::Disconnected,
                    });
                }
            }
            _ => {}
        }
    }

    debug!("Adapter event pump stopped");
}
