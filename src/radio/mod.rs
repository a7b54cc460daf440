use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RadioError;

pub mod btle;

/**
 * Opaque handle to a peripheral seen during a scan. The `id` is only
 * meaningful to the Radio implementation that produced it.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
}

/// Capability flags of a characteristic, as reported by service discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProps {
    pub notify: bool,
    pub indicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicHandle>,
}

/**
 * The services and characteristics discovered on a connected peripheral.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTree {
    pub services: Vec<ServiceEntry>,
}

impl ServiceTree {
    /// Exact match on both identifiers; the first match wins.
    pub fn find_characteristic(
        &self,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Option<&CharacteristicHandle> {
        self.services
            .iter()
            .find(|entry| entry.uuid == *service)?
            .characteristics
            .iter()
            .find(|handle| handle.uuid == *characteristic)
    }
}

/// Whether an asynchronous radio operation completed successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/**
 * Asynchronous completions and notifications delivered by a Radio. The
 * session state machine consumes these from a single intake channel.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    DeviceFound {
        device: DeviceHandle,
    },
    ConnectionStateChange {
        status: RadioStatus,
        state: LinkState,
    },
    ServicesDiscovered {
        services: ServiceTree,
    },
    MtuChanged {
        mtu: u16,
    },
    CharacteristicChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/**
 * The transport capability the session core drives. Operations only initiate
 * work; completions arrive as RadioEvent values on the channel handed out by
 * the implementation. Implementations track the single active link
 * themselves, so connect/disconnect/close need no handle argument beyond the
 * scanned device.
 */
#[async_trait]
pub trait Radio: Send + Sync {
    /// Start an unfiltered scan. Discoveries arrive as DeviceFound events.
    async fn start_scan(&self) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Initiate a connection, without auto-reconnect. The outcome arrives as
    /// a ConnectionStateChange event.
    async fn connect(&self, device: &DeviceHandle) -> Result<(), RadioError>;

    /// Re-attempt the link on the existing (possibly stale) handle.
    async fn reconnect(&self) -> Result<(), RadioError>;

    /// Gracefully disconnect the existing handle without releasing it.
    async fn disconnect(&self) -> Result<(), RadioError>;

    /// Enumerate services. The tree arrives as a ServicesDiscovered event.
    async fn discover_services(&self) -> Result<(), RadioError>;

    /// Negotiate the transfer unit. The result arrives as MtuChanged.
    async fn request_mtu(&self, mtu: u16) -> Result<(), RadioError>;

    /// Register or deregister local delivery of characteristic changes.
    async fn register_notifications(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), RadioError>;

    /// Write a payload to one of the characteristic's descriptors.
    async fn write_descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    /// Release the connection handle. Safe to call without an active link.
    async fn close(&self) -> Result<(), RadioError>;
}
