use log::debug;

use crate::device::constants::{
    make_cccd_uuid, DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::error::SubscribeError;
use crate::radio::{CharacteristicHandle, Radio};

/**
 * Enable change delivery for a characteristic.
 *
 * Indication takes priority when the characteristic supports both. The
 * delivery mode is registered locally with the radio first, then the
 * matching payload is written to the configuration descriptor.
 */
pub async fn enable_notifications<R: Radio>(
    radio: &R,
    characteristic: &CharacteristicHandle,
) -> Result<(), SubscribeError> {
    let payload = if characteristic.properties.indicate {
        ENABLE_INDICATION_VALUE
    } else if characteristic.properties.notify {
        ENABLE_NOTIFICATION_VALUE
    } else {
        return Err(SubscribeError::Unsupported);
    };

    radio
        .register_notifications(characteristic, true)
        .await
        .map_err(|source| SubscribeError::Registration { source })?;

    debug!("Writing CCCD enable payload {:?} for {}", payload, characteristic.uuid);
    radio
        .write_descriptor(characteristic, make_cccd_uuid(), &payload)
        .await
        .map_err(|source| SubscribeError::DescriptorWrite { source })
}

/**
 * Symmetric teardown path: deregister locally and write the disable payload.
 */
pub async fn disable_notifications<R: Radio>(
    radio: &R,
    characteristic: &CharacteristicHandle,
) -> Result<(), SubscribeError> {
    radio
        .register_notifications(characteristic, false)
        .await
        .map_err(|source| SubscribeError::Registration { source })?;

    radio
        .write_descriptor(characteristic, make_cccd_uuid(), &DISABLE_NOTIFICATION_VALUE)
        .await
        .map_err(|source| SubscribeError::DescriptorWrite { source })
}
