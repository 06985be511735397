//! Hub device discovery.
//!
//! Hubs enumerate as USB serial devices with a fixed vendor/product pair;
//! everything else on the bus is ignored.

use crate::error::ClientError;
use tokio_serial::{SerialPortInfo, SerialPortType};

/// USB vendor identifier of the hub.
pub const HUB_VENDOR_ID: u16 = 0x0694;

/// USB product identifier of the hub.
pub const HUB_PRODUCT_ID: u16 = 0x0009;

fn is_hub_port(port: &SerialPortInfo) -> bool {
    matches!(
        &port.port_type,
        SerialPortType::UsbPort(usb) if usb.vid == HUB_VENDOR_ID && usb.pid == HUB_PRODUCT_ID
    )
}

/// Lists the serial ports with a hub attached.
pub fn enumerate() -> Result<Vec<SerialPortInfo>, ClientError> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().filter(is_hub_port).collect())
}

/// Path of the single connected hub.
///
/// Zero candidates and several candidates are both caller errors: with
/// several hubs plugged in the caller has to pick a path itself.
pub fn find_hub_port() -> Result<String, ClientError> {
    let mut candidates = enumerate()?;
    match candidates.len() {
        0 => Err(ClientError::NoHubFound),
        1 => Ok(candidates.remove(0).port_name),
        n => Err(ClientError::MultipleHubsFound(n)),
    }
}
