//! Serial port link

use crate::adapters::SerialLink;
use crate::config::LinkSettings;
use crate::error::AppResult;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Line settings for the pyrometer board
///
/// The board always talks 8N1 without flow control; only the rate and the
/// read timeout are configurable.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Baud rate (the board ships at 9600)
    pub baud_rate: u32,

    /// Read timeout; a read that stalls this long is treated as a lost reply
    pub timeout: Duration,
}

impl SerialSettings {
    /// Settings for `port_name` using the configured link section.
    pub fn from_link(port_name: &str, link: &LinkSettings) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate: link.baud_rate,
            timeout: link.read_timeout(),
        }
    }
}

/// Serial port wrapped as a [`SerialLink`]
pub struct SerialPortLink {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl Read for SerialPortLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialPortLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl SerialLink for SerialPortLink {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(std::io::Error::from)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.port.set_timeout(timeout).map_err(std::io::Error::from)
    }

    fn describe(&self) -> String {
        self.port_name.clone()
    }
}

/// Open the serial port described by `settings` (8 data bits, no parity, 1 stop bit).
pub fn open_serial_link(settings: &SerialSettings) -> AppResult<SerialPortLink> {
    let port = serialport::new(&settings.port_name, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(settings.timeout)
        .open()?;

    debug!(
        "Serial port '{}' opened at {} baud",
        settings.port_name, settings.baud_rate
    );

    Ok(SerialPortLink {
        port_name: settings.port_name.clone(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_link_defaults() {
        let settings = SerialSettings::from_link("/dev/ttyUSB0", &LinkSettings::default());
        assert_eq!(settings.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.timeout, Duration::from_secs(4));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let settings = SerialSettings {
            port_name: "/dev/does-not-exist-pyrometer".to_string(),
            baud_rate: 9600,
            timeout: Duration::from_millis(100),
        };
        assert!(open_serial_link(&settings).is_err());
    }
}
