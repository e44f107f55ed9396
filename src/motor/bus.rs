// fdcanusb serial transport
//
// The adapter speaks an ASCII line protocol over USB serial:
//   -> "can send {flags}{id} {hex payload}\n"
//   <- "OK"                                   (adapter acknowledgement)
//   <- "rcv {arbitration} {hex payload} ..."  (device reply, if requested)
// Flag 0x80 in the arbitration high byte asks the node to reply.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BAUDRATE: u32 = 3_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Reply-request flag in the arbitration id high byte
const REPLY_FLAG: u8 = 0x80;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("adapter rejected frame: {0}")]
    AdapterError(String),

    #[error("malformed adapter line: {0}")]
    MalformedLine(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One message out, one message back. The bus is half-duplex and singly
/// owned; a requested reply must be drained with `receive` before the
/// next send.
pub trait Transport {
    fn send(&mut self, id: u8, frame: &[u8], expect_reply: bool) -> Result<()>;
    fn receive(&mut self) -> Result<Vec<u8>>;
}

/// fdcanusb adapter on a serial port.
pub struct FdcanUsb {
    port: Box<dyn SerialPort>,
}

impl FdcanUsb {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }

    /// Read one non-empty newline-terminated line.
    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.port.read_exact(&mut byte)?;
            if byte[0] == b'\n' {
                if !line.is_empty() {
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
            } else {
                line.push(byte[0]);
            }
        }
    }
}

fn hexify(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn dehexify(data: &str) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(TransportError::MalformedLine(data.to_owned()));
    }
    (0..data.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&data[i..i + 2], 16)
                .map_err(|_| TransportError::MalformedLine(data.to_owned()))
        })
        .collect()
}

impl Transport for FdcanUsb {
    fn send(&mut self, id: u8, frame: &[u8], expect_reply: bool) -> Result<()> {
        let flags = if expect_reply { REPLY_FLAG } else { 0x00 };
        let line = format!("can send {:02x}{:02x} {}\n", flags, id, hexify(frame));
        debug!("bus tx id={} {} bytes", id, frame.len());
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;

        // Adapter acknowledges every send before any device reply
        let ack = self.read_line()?;
        if !ack.starts_with("OK") {
            return Err(TransportError::AdapterError(ack));
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let line = self.read_line()?;
        // "rcv {arbitration} {payload hex} [flags...]"
        let mut fields = line.split_whitespace();
        let (Some(tag), Some(_arb), Some(payload)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(TransportError::MalformedLine(line.clone()));
        };
        if tag != "rcv" {
            return Err(TransportError::MalformedLine(line.clone()));
        }
        dehexify(payload)
    }
}
