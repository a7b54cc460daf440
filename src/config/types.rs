use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    make_temp_humidity_characteristic_uuid, make_temp_humidity_service_uuid, DEVICE_NAME,
    MAXIMUM_CONNECTION_ATTEMPTS, REQUESTED_MTU,
};

/**
 * Connection behavior of the receiver. The defaults are the protocol
 * constants of the LYWSD03MMC sensor class; overriding them is only useful
 * for clones that advertise a different name.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverConfig {
    pub device_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub requested_mtu: u16,
    pub maximum_connection_attempts: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            device_name: DEVICE_NAME.to_string(),
            service_uuid: make_temp_humidity_service_uuid(),
            characteristic_uuid: make_temp_humidity_characteristic_uuid(),
            requested_mtu: REQUESTED_MTU,
            maximum_connection_attempts: MAXIMUM_CONNECTION_ATTEMPTS,
        }
    }
}
