use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use mijia_receiver::config::types::ReceiverConfig;
use mijia_receiver::device::constants::{
    make_cccd_uuid, make_temp_humidity_characteristic_uuid, make_temp_humidity_service_uuid,
    DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use mijia_receiver::device::session::ReceiveManager;
use mijia_receiver::device::types::{ConnectionState, Event, Reading};
use mijia_receiver::error::RadioError;
use mijia_receiver::radio::{
    CharacteristicHandle, CharacteristicProps, DeviceHandle, LinkState, Radio, RadioEvent,
    RadioStatus, ServiceEntry, ServiceTree,
};

#[derive(Debug, Clone, PartialEq)]
enum RadioCall {
    StartScan,
    StopScan,
    Connect(String),
    Reconnect,
    Disconnect,
    DiscoverServices,
    RequestMtu(u16),
    RegisterNotifications(Uuid, bool),
    WriteDescriptor(Uuid, Uuid, Vec<u8>),
    Close,
}

#[derive(Default)]
struct MockState {
    calls: Vec<RadioCall>,
    reject_registration: bool,
}

/// Records every operation the session machine drives; completions are
/// injected by the tests as RadioEvents.
#[derive(Clone, Default)]
struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

impl MockRadio {
    fn record(&self, call: RadioCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn calls(&self) -> Vec<RadioCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RadioCall::Connect(_)))
            .count()
    }

    fn descriptor_writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RadioCall::WriteDescriptor(_, _, payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    fn reject_registration(&self) {
        self.state.lock().unwrap().reject_registration = true;
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn start_scan(&self) -> Result<(), RadioError> {
        self.record(RadioCall::StartScan);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.record(RadioCall::StopScan);
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<(), RadioError> {
        self.record(RadioCall::Connect(device.id.clone()));
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), RadioError> {
        self.record(RadioCall::Reconnect);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.record(RadioCall::Disconnect);
        Ok(())
    }

    async fn discover_services(&self) -> Result<(), RadioError> {
        self.record(RadioCall::DiscoverServices);
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<(), RadioError> {
        self.record(RadioCall::RequestMtu(mtu));
        Ok(())
    }

    async fn register_notifications(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), RadioError> {
        self.record(RadioCall::RegisterNotifications(characteristic.uuid, enabled));
        if enabled && self.state.lock().unwrap().reject_registration {
            return Err(RadioError::Rejected { reason: "registration refused".to_string() });
        }
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        self.record(RadioCall::WriteDescriptor(
            characteristic.uuid,
            descriptor,
            payload.to_vec(),
        ));
        Ok(())
    }

    async fn close(&self) -> Result<(), RadioError> {
        self.record(RadioCall::Close);
        Ok(())
    }
}

struct Harness {
    radio: MockRadio,
    manager: ReceiveManager,
    radio_events: UnboundedSender<RadioEvent>,
    events: UnboundedReceiver<Event<Reading>>,
}

impl Harness {
    fn spawn() -> Self {
        let radio = MockRadio::default();
        let (radio_events, receiver) = unbounded_channel();
        let manager = ReceiveManager::spawn(radio.clone(), receiver, ReceiverConfig::default());
        let events = manager.subscribe();

        Harness { radio, manager, radio_events, events }
    }

    fn push(&self, event: RadioEvent) {
        self.radio_events.send(event).expect("machine is gone");
    }

    async fn next_event(&mut self) -> Event<Reading> {
        timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed")
    }

    async fn expect_loading(&mut self, message: &str) {
        assert_eq!(self.next_event().await, Event::loading(message));
    }

    async fn expect_silence(&mut self) {
        let result = timeout(Duration::from_millis(100), self.events.recv()).await;
        assert!(result.is_err(), "expected no event, got {:?}", result);
    }

    /// Drive the machine through the whole handshake up to an enabled
    /// subscription.
    async fn drive_to_subscribed(&mut self, tree: ServiceTree) {
        self.manager.start_receiving();
        self.expect_loading("Scanning Ble devices...").await;

        self.push(RadioEvent::DeviceFound { device: sensor_device() });
        self.expect_loading("Connecting to device...").await;

        self.push(RadioEvent::ConnectionStateChange {
            status: RadioStatus::Success,
            state: LinkState::Connected,
        });
        self.expect_loading("Discovering Services...").await;

        self.push(RadioEvent::ServicesDiscovered { services: tree });
        self.expect_loading("Adjusting MTU space...").await;

        self.push(RadioEvent::MtuChanged { mtu: 517 });
    }
}

fn sensor_device() -> DeviceHandle {
    DeviceHandle { id: "peripheral-0".to_string(), name: Some("LYWSD03MMC".to_string()) }
}

fn sensor_tree(props: CharacteristicProps) -> ServiceTree {
    let service = make_temp_humidity_service_uuid();
    ServiceTree {
        services: vec![ServiceEntry {
            uuid: service,
            characteristics: vec![CharacteristicHandle {
                service,
                uuid: make_temp_humidity_characteristic_uuid(),
                properties: props,
            }],
        }],
    }
}

fn notify_only() -> CharacteristicProps {
    CharacteristicProps { notify: true, indicate: false }
}

#[tokio::test]
async fn handshake_emits_progress_in_order_and_streams_readings() {
    let mut harness = Harness::spawn();

    harness.drive_to_subscribed(sensor_tree(notify_only())).await;

    let characteristic = make_temp_humidity_characteristic_uuid();

    // a foreign characteristic never reaches the decoder
    harness.push(RadioEvent::CharacteristicChanged {
        characteristic: make_cccd_uuid(),
        value: vec![0xE8, 0x08, 0x2C],
    });
    harness.push(RadioEvent::CharacteristicChanged {
        characteristic,
        value: vec![0xE8, 0x08, 0x2C],
    });

    match harness.next_event().await {
        Event::Success { data } => {
            assert_eq!(data.temperature_celsius, 22.80);
            assert_eq!(data.humidity_percent, 44.0);
            assert_eq!(data.state, ConnectionState::Connected);
        }
        other => panic!("expected a reading, got {:?}", other),
    }

    // subscription: local registration plus the CCCD enable payload
    let calls = harness.radio.calls();
    assert!(calls.contains(&RadioCall::RequestMtu(517)));
    assert!(calls.contains(&RadioCall::RegisterNotifications(characteristic, true)));
    assert!(calls.contains(&RadioCall::WriteDescriptor(
        characteristic,
        make_cccd_uuid(),
        ENABLE_NOTIFICATION_VALUE.to_vec(),
    )));

    // the scan is stopped before the connection is initiated
    let stop_position = calls.iter().position(|c| *c == RadioCall::StopScan).unwrap();
    let connect_position = calls.iter().position(|c| matches!(c, RadioCall::Connect(_))).unwrap();
    assert!(stop_position < connect_position);
}

#[tokio::test]
async fn scan_matches_are_filtered_by_name_and_only_honored_once() {
    let mut harness = Harness::spawn();

    harness.manager.start_receiving();
    harness.expect_loading("Scanning Ble devices...").await;

    harness.push(RadioEvent::DeviceFound {
        device: DeviceHandle { id: "other".to_string(), name: Some("ATC_Sensor".to_string()) },
    });
    harness.push(RadioEvent::DeviceFound {
        device: DeviceHandle { id: "anon".to_string(), name: None },
    });
    harness.push(RadioEvent::DeviceFound { device: sensor_device() });
    harness.expect_loading("Connecting to device...").await;

    // a duplicate late match after the scan stopped is ignored
    harness.push(RadioEvent::DeviceFound { device: sensor_device() });
    harness.expect_silence().await;

    assert_eq!(harness.radio.connect_count(), 1);
}

#[tokio::test]
async fn connect_failures_retry_bounded_then_fail() {
    let mut harness = Harness::spawn();

    harness.manager.start_receiving();
    harness.expect_loading("Scanning Ble devices...").await;
    harness.push(RadioEvent::DeviceFound { device: sensor_device() });
    harness.expect_loading("Connecting to device...").await;

    for attempt in 2..=5u32 {
        harness.push(RadioEvent::ConnectionStateChange {
            status: RadioStatus::Failure,
            state: LinkState::Disconnected,
        });
        harness
            .expect_loading(&format!("Attempting to connect {}/5", attempt))
            .await;

        // the retry re-runs the whole scan sequence, with no backoff
        harness.expect_loading("Scanning Ble devices...").await;
        harness.push(RadioEvent::DeviceFound { device: sensor_device() });
        harness.expect_loading("Connecting to device...").await;
    }

    harness.push(RadioEvent::ConnectionStateChange {
        status: RadioStatus::Failure,
        state: LinkState::Disconnected,
    });
    harness.expect_loading("Attempting to connect 6/5").await;
    assert_eq!(
        harness.next_event().await,
        Event::error("Could not connect to ble device")
    );

    // attempts are exhausted: no rescan, and a stray match connects nothing
    harness.push(RadioEvent::DeviceFound { device: sensor_device() });
    harness.expect_silence().await;
    assert_eq!(harness.radio.connect_count(), 5);
}

#[tokio::test]
async fn reconnect_keeps_the_attempt_counter_and_does_not_rescan() {
    let mut harness = Harness::spawn();

    harness.manager.start_receiving();
    harness.expect_loading("Scanning Ble devices...").await;
    harness.push(RadioEvent::DeviceFound { device: sensor_device() });
    harness.expect_loading("Connecting to device...").await;

    // two failures move the counter to 3
    for attempt in 2..=3u32 {
        harness.push(RadioEvent::ConnectionStateChange {
            status: RadioStatus::Failure,
            state: LinkState::Disconnected,
        });
        harness
            .expect_loading(&format!("Attempting to connect {}/5", attempt))
            .await;
        harness.expect_loading("Scanning Ble devices...").await;
        harness.push(RadioEvent::DeviceFound { device: sensor_device() });
        harness.expect_loading("Connecting to device...").await;
    }

    harness.push(RadioEvent::ConnectionStateChange {
        status: RadioStatus::Success,
        state: LinkState::Connected,
    });
    harness.expect_loading("Discovering Services...").await;

    let scans_before = harness
        .radio
        .calls()
        .iter()
        .filter(|c| **c == RadioCall::StartScan)
        .count();

    harness.manager.reconnect();
    harness.expect_silence().await;

    let calls = harness.radio.calls();
    assert!(calls.contains(&RadioCall::Reconnect));
    let scans_after = calls.iter().filter(|c| **c == RadioCall::StartScan).count();
    assert_eq!(scans_before, scans_after);

    // the next failure continues the old count instead of restarting at 2
    harness.push(RadioEvent::ConnectionStateChange {
        status: RadioStatus::Failure,
        state: LinkState::Disconnected,
    });
    harness.expect_loading("Attempting to connect 4/5").await;
}

#[tokio::test]
async fn missing_characteristic_is_a_fatal_configuration_error() {
    let mut harness = Harness::spawn();

    let service = make_temp_humidity_service_uuid();
    let unrelated = ServiceTree {
        services: vec![ServiceEntry { uuid: service, characteristics: vec![] }],
    };
    harness.drive_to_subscribed(unrelated).await;

    assert_eq!(
        harness.next_event().await,
        Event::error("Could not find temp and humidity publisher")
    );

    // no subscription attempt follows, and notifications go nowhere
    harness.push(RadioEvent::CharacteristicChanged {
        characteristic: make_temp_humidity_characteristic_uuid(),
        value: vec![0xE8, 0x08, 0x2C],
    });
    harness.expect_silence().await;

    assert!(!harness
        .radio
        .calls()
        .iter()
        .any(|c| matches!(c, RadioCall::RegisterNotifications(_, _))));
}

#[tokio::test]
async fn indication_takes_priority_over_notification() {
    let mut harness = Harness::spawn();

    harness
        .drive_to_subscribed(sensor_tree(CharacteristicProps { notify: true, indicate: true }))
        .await;
    harness.expect_silence().await;

    assert_eq!(
        harness.radio.descriptor_writes(),
        vec![ENABLE_INDICATION_VALUE.to_vec()]
    );
}

#[tokio::test]
async fn unsupported_characteristic_is_a_configuration_error() {
    let mut harness = Harness::spawn();

    harness
        .drive_to_subscribed(sensor_tree(CharacteristicProps::default()))
        .await;

    assert_eq!(
        harness.next_event().await,
        Event::error("The characteristic supports neither notification nor indication")
    );
    assert!(!harness
        .radio
        .calls()
        .iter()
        .any(|c| matches!(c, RadioCall::RegisterNotifications(_, _))));
}

#[tokio::test]
async fn rejected_registration_is_a_configuration_error() {
    let mut harness = Harness::spawn();
    harness.radio.reject_registration();

    harness.drive_to_subscribed(sensor_tree(notify_only())).await;

    match harness.next_event().await {
        Event::Error { message } => {
            assert!(message.contains("Failed to register"), "got: {}", message)
        }
        other => panic!("expected an error, got {:?}", other),
    }
    assert!(harness.radio.descriptor_writes().is_empty());
}

#[tokio::test]
async fn malformed_payloads_do_not_tear_down_the_session() {
    let mut harness = Harness::spawn();
    harness.drive_to_subscribed(sensor_tree(notify_only())).await;

    let characteristic = make_temp_humidity_characteristic_uuid();
    harness.push(RadioEvent::CharacteristicChanged {
        characteristic,
        value: vec![0xE8, 0x08],
    });
    match harness.next_event().await {
        Event::Error { message } => assert!(message.contains("too short"), "got: {}", message),
        other => panic!("expected a decode error, got {:?}", other),
    }

    harness.push(RadioEvent::CharacteristicChanged {
        characteristic,
        value: vec![0x0A, 0x00, 0x2C],
    });
    match harness.next_event().await {
        Event::Success { data } => assert_eq!(data.temperature_celsius, 0.10),
        other => panic!("expected a reading, got {:?}", other),
    }
}

#[tokio::test]
async fn link_drop_emits_one_zeroed_reading_and_stops_the_stream() {
    let mut harness = Harness::spawn();
    harness.drive_to_subscribed(sensor_tree(notify_only())).await;

    let characteristic = make_temp_humidity_characteristic_uuid();
    harness.push(RadioEvent::CharacteristicChanged {
        characteristic,
        value: vec![0xE8, 0x08, 0x2C],
    });
    assert!(matches!(harness.next_event().await, Event::Success { .. }));

    harness.push(RadioEvent::ConnectionStateChange {
        status: RadioStatus::Success,
        state: LinkState::Disconnected,
    });
    assert_eq!(harness.next_event().await, Event::success(Reading::disconnected()));

    // a duplicate disconnect is stale, and notifications are over
    harness.push(RadioEvent::ConnectionStateChange {
        status: RadioStatus::Success,
        state: LinkState::Disconnected,
    });
    harness.push(RadioEvent::CharacteristicChanged {
        characteristic,
        value: vec![0xE8, 0x08, 0x2C],
    });
    harness.expect_silence().await;

    assert!(harness.radio.calls().contains(&RadioCall::Close));
}

#[tokio::test]
async fn close_connection_is_idempotent_and_silent() {
    let mut harness = Harness::spawn();
    harness.drive_to_subscribed(sensor_tree(notify_only())).await;
    harness.expect_silence().await;

    harness.manager.close_connection();
    harness.manager.close_connection();
    harness.expect_silence().await;

    // the first close still had the characteristic to disable; the second
    // had no session left
    assert_eq!(
        harness.radio.descriptor_writes(),
        vec![
            ENABLE_NOTIFICATION_VALUE.to_vec(),
            DISABLE_NOTIFICATION_VALUE.to_vec(),
        ]
    );
    let closes = harness
        .radio
        .calls()
        .iter()
        .filter(|c| **c == RadioCall::Close)
        .count();
    assert_eq!(closes, 2);

    // a fresh start after close begins with the scan progress event
    harness.manager.start_receiving();
    harness.expect_loading("Scanning Ble devices...").await;
}
