use uuid::Uuid;

/**
 * The advertised name of the sensor. Scanning runs unfiltered and results
 * are matched against this name.
 */
pub const DEVICE_NAME: &str = "LYWSD03MMC";

/**
 * The UUID of the Bluetooth BLE service publishing temperature and humidity.
 */
pub const TEMP_HUMIDITY_SERVICE: &str = "ebe0ccb0-7a0a-4b0c-8a1a-6ff2997da3a6";

/**
 * The UUID of the remote GATT characteristic that notifies sensor values.
 */
pub const TEMP_HUMIDITY_CHARACTERISTIC: &str = "ebe0ccc1-7a0a-4b0c-8a1a-6ff2997da3a6";

/**
 * The standard Client Characteristic Configuration Descriptor.
 */
pub const CCCD_DESCRIPTOR: &str = "00002902-0000-1000-8000-00805f9b34fb";

/**
 * MTU requested after service discovery, the maximum payload negotiation.
 */
pub const REQUESTED_MTU: u16 = 517;

/**
 * How often a failed connection is re-attempted before giving up.
 */
pub const MAXIMUM_CONNECTION_ATTEMPTS: u32 = 5;

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

pub fn make_temp_humidity_service_uuid() -> Uuid {
    Uuid::parse_str(TEMP_HUMIDITY_SERVICE).unwrap()
}

pub fn make_temp_humidity_characteristic_uuid() -> Uuid {
    Uuid::parse_str(TEMP_HUMIDITY_CHARACTERISTIC).unwrap()
}

pub fn make_cccd_uuid() -> Uuid {
    Uuid::parse_str(CCCD_DESCRIPTOR).unwrap()
}
