use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::ReceiverConfig;
use crate::device::decode::decode_reading;
use crate::device::stream::ResultStream;
use crate::device::subscription::{disable_notifications, enable_notifications};
use crate::device::types::{Event, Reading};
use crate::radio::{
    DeviceHandle, LinkState, Radio, RadioEvent, RadioStatus, ServiceTree,
};

/// Requests from the consumer, pushed onto the same intake the radio
/// events arrive on so that all session state has a single writer.
#[derive(Debug)]
enum Command {
    StartReceiving,
    Reconnect,
    Disconnect,
    CloseConnection,
}

/// Handshake phase. `Failed` and `Closed` are terminal for the session;
/// a fresh `start_receiving` begins a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scanning,
    Connecting,
    ServiceDiscovery,
    MtuNegotiation,
    SubscribingNotifications,
    Streaming,
    Disconnected,
    Failed,
    Closed,
}

impl Phase {
    /// A link (or an attempt at one) exists in these phases; a disconnect
    /// event outside of them is a stale callback and is dropped.
    fn has_link(&self) -> bool {
        matches!(
            self,
            Phase::Connecting
                | Phase::ServiceDiscovery
                | Phase::MtuNegotiation
                | Phase::SubscribingNotifications
                | Phase::Streaming
        )
    }
}

/// The single active link. Created on the successful-connect event,
/// destroyed on close or disconnect.
#[derive(Debug)]
struct Session {
    device: DeviceHandle,
    services: Option<ServiceTree>,
    target: Option<Uuid>,
}

/**
 * Drives one sensor session: scan, connect with bounded retry, discover
 * services, negotiate the MTU, subscribe to the sensor characteristic and
 * stream decoded readings. All progress and results are published to the
 * ResultStream as Loading/Success/Error events.
 *
 * There is no timeout on individual handshake steps; a step that never
 * completes leaves the machine where it is until the radio reports a link
 * drop or the consumer closes the connection.
 */
struct SessionMachine<R: Radio> {
    radio: R,
    config: ReceiverConfig,
    stream: Arc<ResultStream>,
    phase: Phase,
    attempt: u32,
    scanning: bool,
    session: Option<Session>,
    pending_device: Option<DeviceHandle>,
}

impl<R: Radio> SessionMachine<R> {
    async fn run(
        mut self,
        cancel: CancellationToken,
        mut commands: UnboundedReceiver<Command>,
        mut radio_events: UnboundedReceiver<RadioEvent>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = radio_events.recv() => match event {
                    Some(event) => self.handle_radio_event(event).await,
                    None => break,
                },
            }
        }

        debug!("Session machine stopped");
    }

    fn emit(&self, event: Event<Reading>) {
        self.stream.publish(event);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartReceiving => {
                if self.session.is_some() {
                    warn!("start_receiving ignored, a session is already open");
                    return;
                }
                self.attempt = 1;
                self.begin_scan().await;
            }
            Command::Reconnect => {
                // low-level reconnect of the existing handle only, no rescan
                // and no attempt counter reset
                if let Err(err) = self.radio.reconnect().await {
                    warn!("Reconnect request failed: {}", err);
                }
            }
            Command::Disconnect => {
                if let Err(err) = self.radio.disconnect().await {
                    warn!("Disconnect request failed: {}", err);
                }
            }
            Command::CloseConnection => self.close_connection().await,
        }
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::DeviceFound { device } => self.on_device_found(device).await,
            RadioEvent::ConnectionStateChange { status, state } => {
                self.on_connection_state_change(status, state).await
            }
            RadioEvent::ServicesDiscovered { services } => {
                self.on_services_discovered(services).await
            }
            RadioEvent::MtuChanged { mtu } => self.on_mtu_changed(mtu).await,
            RadioEvent::CharacteristicChanged { characteristic, value } => {
                self.on_characteristic_changed(characteristic, &value)
            }
        }
    }

    async fn begin_scan(&mut self) {
        self.emit(Event::loading("Scanning Ble devices..."));
        self.phase = Phase::Scanning;
        self.scanning = true;

        if let Err(err) = self.radio.start_scan().await {
            self.scanning = false;
            warn!("Failed to start scanning: {}", err);
            self.emit(Event::error(err.to_string()));
        }
    }

    async fn on_device_found(&mut self, device: DeviceHandle) {
        // matches arriving after the scan was stopped are duplicates
        if !self.scanning || self.phase != Phase::Scanning {
            return;
        }
        if device.name.as_deref() != Some(self.config.device_name.as_str()) {
            return;
        }

        info!("Found {} ({}), connecting", self.config.device_name, device.id);
        self.emit(Event::loading("Connecting to device..."));

        self.scanning = false;
        if let Err(err) = self.radio.stop_scan().await {
            warn!("Failed to stop scanning: {}", err);
        }

        self.phase = Phase::Connecting;
        self.pending_device = Some(device.clone());
        if let Err(err) = self.radio.connect(&device).await {
            warn!("Failed to initiate connection: {}", err);
            self.emit(Event::error(err.to_string()));
        }
    }

    async fn on_connection_state_change(&mut self, status: RadioStatus, state: LinkState) {
        if status != RadioStatus::Success {
            if !self.phase.has_link() {
                debug!("Ignoring stale connection failure");
                return;
            }
            self.retry_or_fail().await;
            return;
        }

        match state {
            LinkState::Connected => {
                // a fresh connect carries a pending device; a reconnect
                // reuses the one of the existing session
                let device = match self.pending_device.take() {
                    Some(device) => device,
                    None => match self.session.take() {
                        Some(session) => session.device,
                        None => {
                            debug!("Ignoring stale connect event");
                            return;
                        }
                    },
                };

                self.emit(Event::loading("Discovering Services..."));
                self.phase = Phase::ServiceDiscovery;
                self.session = Some(Session { device, services: None, target: None });

                if let Err(err) = self.radio.discover_services().await {
                    warn!("Failed to request service discovery: {}", err);
                    self.emit(Event::error(err.to_string()));
                }
            }
            LinkState::Disconnected => {
                if !self.phase.has_link() {
                    debug!("Ignoring stale disconnect event");
                    return;
                }
                if let Some(session) = self.session.as_ref() {
                    info!("Link to {} dropped", session.device.id);
                }

                // a clean link drop, not a failure: terminal zeroed reading
                self.emit(Event::success(Reading::disconnected()));
                self.session = None;
                self.pending_device = None;
                self.phase = Phase::Disconnected;

                if let Err(err) = self.radio.close().await {
                    warn!("Failed to release the link after disconnect: {}", err);
                }
            }
        }
    }

    /// Bounded retry with no backoff: close the dead handle and re-run the
    /// whole scan sequence until the attempts are exhausted.
    async fn retry_or_fail(&mut self) {
        if let Err(err) = self.radio.close().await {
            warn!("Failed to close the handle after a connect failure: {}", err);
        }
        self.pending_device = None;

        self.attempt += 1;
        self.emit(Event::loading(format!(
            "Attempting to connect {}/{}",
            self.attempt, self.config.maximum_connection_attempts
        )));

        if self.attempt <= self.config.maximum_connection_attempts {
            self.begin_scan().await;
        } else {
            self.phase = Phase::Failed;
            self.emit(Event::error("Could not connect to ble device"));
        }
    }

    async fn on_services_discovered(&mut self, services: ServiceTree) {
        let Some(session) = self.session.as_mut() else {
            debug!("Ignoring discovered services without a session");
            return;
        };
        session.services = Some(services);

        self.emit(Event::loading("Adjusting MTU space..."));
        self.phase = Phase::MtuNegotiation;

        if let Err(err) = self.radio.request_mtu(self.config.requested_mtu).await {
            warn!("Failed to request the MTU: {}", err);
            self.emit(Event::error(err.to_string()));
        }
    }

    async fn on_mtu_changed(&mut self, mtu: u16) {
        if self.session.is_none() {
            debug!("Ignoring MTU change without a session");
            return;
        }
        debug!("Transfer unit adjusted to {}", mtu);

        let characteristic = self.session.as_ref().and_then(|session| {
            session.services.as_ref()?.find_characteristic(
                &self.config.service_uuid,
                &self.config.characteristic_uuid,
            ).cloned()
        });

        let Some(characteristic) = characteristic else {
            // the peripheral does not expose the sensor characteristic;
            // this is a configuration failure, there is nothing to retry
            self.emit(Event::error("Could not find temp and humidity publisher"));
            return;
        };

        self.phase = Phase::SubscribingNotifications;
        match enable_notifications(&self.radio, &characteristic).await {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.target = Some(characteristic.uuid);
                }
            }
            Err(err) => {
                warn!("Failed to enable notifications: {}", err);
                self.emit(Event::error(err.to_string()));
            }
        }
    }

    fn on_characteristic_changed(&mut self, characteristic: Uuid, value: &[u8]) {
        // other characteristics may notify as well; only values for the
        // subscribed target are decoded
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.target != Some(characteristic) {
            return;
        }

        match decode_reading(value) {
            Ok(reading) => {
                self.phase = Phase::Streaming;
                self.emit(Event::success(reading));
            }
            Err(err) => {
                // a malformed notification does not tear the session down
                warn!("Failed to decode notification: {}", err);
                self.emit(Event::error(err.to_string()));
            }
        }
    }

    /// Best-effort teardown: stop scanning, disable the subscription when the
    /// characteristic is still resolvable, release the link. Idempotent and
    /// silent on the result stream.
    async fn close_connection(&mut self) {
        debug!("Closing connection");

        self.scanning = false;
        if let Err(err) = self.radio.stop_scan().await {
            debug!("Stopping the scan during close failed: {}", err);
        }

        let characteristic = self.session.as_ref().and_then(|session| {
            session.services.as_ref()?.find_characteristic(
                &self.config.service_uuid,
                &self.config.characteristic_uuid,
            ).cloned()
        });
        if let Some(characteristic) = characteristic {
            if let Err(err) = disable_notifications(&self.radio, &characteristic).await {
                debug!("Disabling notifications during close failed: {}", err);
            }
        }

        if let Err(err) = self.radio.close().await {
            debug!("Releasing the link during close failed: {}", err);
        }

        self.session = None;
        self.pending_device = None;
        self.phase = Phase::Closed;
    }
}

/**
 * Public facade over the session machine. Methods are synchronous and
 * non-blocking; they enqueue a request which the machine task processes in
 * order with the radio events. Dropping the manager stops the machine.
 */
pub struct ReceiveManager {
    commands: UnboundedSender<Command>,
    stream: Arc<ResultStream>,
    cancel: CancellationToken,
}

impl ReceiveManager {
    /// Spawn the session machine on the current tokio runtime. `radio_events`
    /// is the intake handed out by the Radio implementation.
    pub fn spawn<R>(
        radio: R,
        radio_events: UnboundedReceiver<RadioEvent>,
        config: ReceiverConfig,
    ) -> Self
    where
        R: Radio + 'static,
    {
        let stream = Arc::new(ResultStream::new());
        let (commands, command_receiver) = unbounded_channel();
        let cancel = CancellationToken::new();

        let machine = SessionMachine {
            radio,
            config,
            stream: Arc::clone(&stream),
            phase: Phase::Idle,
            attempt: 1,
            scanning: false,
            session: None,
            pending_device: None,
        };
        tokio::spawn(machine.run(cancel.clone(), command_receiver, radio_events));

        ReceiveManager { commands, stream, cancel }
    }

    /// Subscribe to the event stream. Subscribe before `start_receiving` to
    /// observe the early Loading events.
    pub fn subscribe(&self) -> UnboundedReceiver<Event<Reading>> {
        self.stream.subscribe()
    }

    pub fn start_receiving(&self) {
        self.send(Command::StartReceiving);
    }

    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    pub fn close_connection(&self) {
        self.send(Command::CloseConnection);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Session machine is gone, dropping command");
        }
    }
}

impl Drop for ReceiveManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
