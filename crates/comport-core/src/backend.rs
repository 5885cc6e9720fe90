//! Native serial layer: device enumeration and open port handles.
//!
//! [`SystemBackend`] talks to the operating system through the `serialport` crate.
//! Anything else implementing [`SerialBackend`] can stand in for it, which is how
//! the channel is tested without hardware.

use crate::config::ChannelConfig;
use crate::error::{IoOp, PortError};
use serialport::{SerialPortInfo, SerialPortType};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortInfo {
    /// A port known only by name.
    pub fn named(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            port_type: "Unknown".to_string(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = PortInfo::named(info.port_name);
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                port.port_type = "USB".to_string();
                port.vid = Some(usb.vid);
                port.pid = Some(usb.pid);
                port.serial_number = usb.serial_number;
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
            }
            SerialPortType::PciPort => port.port_type = "PCI".to_string(),
            SerialPortType::BluetoothPort => port.port_type = "Bluetooth".to_string(),
            SerialPortType::Unknown => {}
        }
        port
    }
}

/// An open native port.
pub trait PortIo: Send {
    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Release the native handle. Dropping the port must also release it.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Enumerates and opens serial devices.
pub trait SerialBackend: Send + Sync {
    fn list_ports(&self) -> io::Result<Vec<PortInfo>>;

    fn open(&self, config: &ChannelConfig) -> Result<Box<dyn PortIo>, PortError>;
}

/// Backend over the operating system's serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl SerialBackend for SystemBackend {
    fn list_ports(&self) -> io::Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(PortInfo::from).collect())
    }

    fn open(&self, config: &ChannelConfig) -> Result<Box<dyn PortIo>, PortError> {
        let (data_bits, parity, stop_bits) = config.to_serialport()?;
        let port = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::NotFound(config.port_name.clone()),
                serialport::ErrorKind::InvalidInput => {
                    PortError::config(&config.port_name, e.to_string())
                }
                _ => PortError::io(IoOp::Open, &config.port_name, e.into()),
            })?;
        Ok(Box::new(NativePort::new(port)))
    }
}

/// `serialport` handle that can be closed while other owners still hold it.
struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl NativePort {
    fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port: Some(port) }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port is closed"))
    }
}

impl PortIo for NativePort {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(buf)?;
        port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        // serialport closes the descriptor on drop.
        drop(self.port.take());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};

    #[test]
    fn usb_port_info() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyACM0".into(),
            port_type: serialport::SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: Some("7553".into()),
                manufacturer: Some("Arduino".into()),
                product: None,
            }),
        };
        let info = PortInfo::from(info);
        assert!(info.port_type == "USB");
        assert!(info.vid == Some(0x2341));
        assert!(info.manufacturer.as_deref() == Some("Arduino"));
    }

    #[test]
    fn open_rejects_unsupported_parity_before_touching_the_device() {
        let cfg = ChannelConfig::new("/dev/nonexistent_port_12345", 9600)
            .parity(crate::Parity::Space);
        let_assert!(Err(PortError::Config { port, .. }) = SystemBackend.open(&cfg));
        assert!(port == "/dev/nonexistent_port_12345");
    }

    #[test]
    fn open_missing_device_fails() {
        let cfg = ChannelConfig::new("/dev/nonexistent_port_12345", 9600);
        assert!(let Err(_) = SystemBackend.open(&cfg));
    }

    #[test]
    fn closed_port_rejects_io() {
        let mut port = NativePort { port: None };
        let_assert!(Err(e) = port.write_all(b"x"));
        assert!(e.kind() == io::ErrorKind::NotConnected);
        let_assert!(Err(e) = port.bytes_to_read());
        assert!(e.kind() == io::ErrorKind::NotConnected);
        let_assert!(Err(e) = port.read(&mut [0u8; 4]));
        assert!(e.kind() == io::ErrorKind::NotConnected);
        assert!(let Ok(()) = port.close());
    }

    #[cfg(unix)]
    #[test]
    fn close_releases_the_handle() {
        let_assert!(Ok((master, _slave)) = serialport::TTYPort::pair());
        let mut port = NativePort::new(Box::new(master));
        assert!(let Ok(_) = port.bytes_to_read());

        assert!(let Ok(()) = port.close());
        assert!(port.port.is_none());
        let_assert!(Err(e) = port.write_all(b"ping"));
        assert!(e.kind() == io::ErrorKind::NotConnected);
    }
}
