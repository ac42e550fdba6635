use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use log::warn;
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, Recipient, RequestType};

pub const VENDOR_ID: u16 = 0x0c45;
pub const PRODUCT_ID: u16 = 0x7401;

/// The device exposes two HID interfaces; the reading comes in on the second.
const INTERFACES: [u8; 2] = [0, 1];
const ENDPOINT_IN: u8 = 0x82;
const REPORT_LEN: usize = 8;
const TIMEOUT: Duration = Duration::from_millis(5000);

const SET_REPORT: u8 = 0x09;
const CMD_CONFIGURE: [u8; 2] = [0x01, 0x01];
const CMD_TEMPERATURE: [u8; REPORT_LEN] = [0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00];

pub fn matches_ids(vendor: u16, product: u16) -> bool {
    vendor == VENDOR_ID && product == PRODUCT_ID
}

/// True if the descriptor belongs to a TEMPerUSB v1.4.
pub fn is_sensor(descriptor: &DeviceDescriptor) -> bool {
    matches_ids(descriptor.vendor_id(), descriptor.product_id())
}

/// An open sensor with its interfaces claimed best-effort. Whatever was
/// claimed is released on drop, before the handle closes the device.
pub struct Sensor {
    handle: DeviceHandle<Context>,
    claimed: Vec<u8>,
}

impl Sensor {
    pub fn open(device: &Device<Context>) -> Result<Self> {
        let handle = device.open().with_context(|| {
            format!(
                "failed to open device at bus {:03} address {:03}",
                device.bus_number(),
                device.address()
            )
        })?;
        let mut sensor = Sensor {
            handle,
            claimed: Vec::new(),
        };
        sensor.claim_interfaces();
        Ok(sensor)
    }

    // A busy interface is usually held by the kernel hid driver: detach it
    // and retry the claim once. A claim that still fails is abandoned and
    // the exchange proceeds without it.
    fn claim_interfaces(&mut self) {
        for &interface in &INTERFACES {
            let result = match self.handle.claim_interface(interface) {
                Err(rusb::Error::Busy) => {
                    let _ = self.handle.detach_kernel_driver(interface);
                    self.handle.claim_interface(interface)
                }
                other => other,
            };
            match result {
                Ok(()) => self.claimed.push(interface),
                Err(e) => warn!("could not claim interface {}: {}", interface, e),
            }
        }
    }

    /// Run the fixed query sequence and return the raw 8 byte report.
    pub fn read_report(&self) -> Result<[u8; REPORT_LEN]> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        self.handle
            .write_control(request_type, SET_REPORT, 0x0201, 0x0000, &CMD_CONFIGURE, TIMEOUT)
            .context("failed to configure sensor")?;
        self.handle
            .write_control(
                request_type,
                SET_REPORT,
                0x0200,
                0x0001,
                &CMD_TEMPERATURE,
                TIMEOUT,
            )
            .context("failed to request temperature")?;

        let mut report = [0u8; REPORT_LEN];
        let read = self
            .handle
            .read_interrupt(ENDPOINT_IN, &mut report, TIMEOUT)
            .context("failed to read temperature report")?;
        // The temperature word sits at offsets 2 and 3. A short report must
        // not be decoded as a reading of zero.
        if read < 4 {
            return Err(anyhow!("short temperature report: {} bytes", read));
        }
        Ok(report)
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        for &interface in &self.claimed {
            let _ = self.handle.release_interface(interface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_only_the_temper_ids() {
        assert!(matches_ids(0x0c45, 0x7401));
        assert!(!matches_ids(0x0c45, 0x7402));
        assert!(!matches_ids(0x0c46, 0x7401));
        assert!(!matches_ids(0x7401, 0x0c45));
        assert!(!matches_ids(0, 0));
    }
}
