//! RS-232 adapter for the voltage source.
//!
//! Implements [`InstrumentLink`] over a host serial device. Responses are
//! accumulated into a bounded buffer until a line feed or a quiet timeout;
//! a partial frame is returned as-is so the controller's header-error
//! retry path can deal with it, exactly as it deals with a frame the
//! instrument itself truncated.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::app::ports::InstrumentLink;
use crate::config::SystemConfig;
use crate::error::LinkError;

/// Longest response frame the source produces.
const FRAME_CAP: usize = 256;

/// Serial connection to the source.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open and configure the device named in the config.
    pub fn open(config: &SystemConfig) -> Result<Self, LinkError> {
        let port = serialport::new(&config.serial_device, config.baud_rate)
            .timeout(Duration::from_millis(config.link_timeout_ms))
            .open()
            .map_err(|e| LinkError::Device(e.to_string()))?;
        Ok(Self { port })
    }
}

impl InstrumentLink for SerialLink {
    fn send(&mut self, command: &str) -> Result<(), LinkError> {
        self.port.write_all(command.as_bytes())?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, LinkError> {
        let mut line: heapless::Vec<u8, FRAME_CAP> = heapless::Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if line.push(byte[0]).is_err() {
                        // Overlong frame: hand back what we have; the
                        // parse layer treats it as garbled.
                        break;
                    }
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                // Quiet timeout: the frame (possibly empty) is complete as
                // far as the wire is concerned.
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}
