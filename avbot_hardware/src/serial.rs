//! Host serial devices via the `serialport` crate.
use std::io::Write;
use std::time::Duration;

use avbot_traits::{BoxError, PortEnumerator, SerialOpener, SerialPort};
use tracing::{debug, info};

use crate::error::HwError;

const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct HardwareSerial {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialPort for HardwareSerial {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        self.port.write_all(bytes).map_err(HwError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BoxError> {
        self.port.flush().map_err(HwError::Io)?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), BoxError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| HwError::Serial(e.to_string()))?;
        Ok(())
    }
}

/// Opens and lists real serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl SerialOpener for SystemPorts {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialPort + Send>, BoxError> {
        let handle = serialport::new(port, baud)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => HwError::PortNotFound(port.to_string()),
                serialport::ErrorKind::Io(kind) if kind == std::io::ErrorKind::NotFound => {
                    HwError::PortNotFound(port.to_string())
                }
                _ => HwError::Serial(e.to_string()),
            })?;
        info!(port, baud, "serial port opened");
        Ok(Box::new(HardwareSerial { port: handle }))
    }
}

impl PortEnumerator for SystemPorts {
    fn ports(&self) -> Result<Vec<String>, BoxError> {
        let ports = serialport::available_ports().map_err(|e| HwError::Serial(e.to_string()))?;
        let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
        debug!(count = names.len(), "enumerated serial ports");
        Ok(names)
    }
}
