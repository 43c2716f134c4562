//! Binary wire protocol of the pyrometer board.
//!
//! Protocol Overview:
//! - Command: `[SYNC][Address][Opcode][Payload...]`, written as one transmission
//! - Reply:   `[SYNC][Address][Opcode echo][Thermopile u16][Thermistor u16][Reference u16]`
//! - All multi-byte fields are big-endian; there is no checksum
//! - Address `0xFF` is broadcast: every board acts on it, none replies
//!
//! On a shared line a reply is located by scanning for the two-byte sequence
//! `[SYNC, own address]`. Everything before the match (noise, partial frames,
//! frames for other boards) is discarded; exactly [`REPLY_PAYLOAD_LEN`] bytes
//! must follow it.

use crate::error::{AppResult, PyroError};
use std::fmt;
use tracing::{debug, warn};

/// Leading byte of every frame.
pub const SYNC_BYTE: u8 = 0x55;

/// Reserved address that targets every board on the line.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Bytes following the `[SYNC, address]` match in a REPORT reply.
pub const REPLY_PAYLOAD_LEN: usize = 7;

/// Exclusive band outside of which a channel is considered near ADC saturation.
pub const ADC_SAFE_BAND: (u16, u16) = (16, 1008);

/// Command opcodes understood by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Request one measurement of all three channels.
    Report = 0x00,
    /// Set both amplifier feedback potentiometers.
    SetGains = 0x01,
}

impl Opcode {
    /// Byte on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Unicast address of one board on the line.
///
/// Never equal to [`BROADCAST_ADDRESS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    /// Validate a unicast address.
    pub fn new(address: u8) -> AppResult<Self> {
        if address == BROADCAST_ADDRESS {
            return Err(PyroError::Validation(format!(
                "Device id must be one byte; 0x{:02X} is reserved for broadcast",
                BROADCAST_ADDRESS
            )));
        }
        Ok(Self(address))
    }

    /// Address byte on the wire.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u32> for DeviceAddress {
    type Error = PyroError;

    fn try_from(value: u32) -> AppResult<Self> {
        let byte = u8::try_from(value)
            .map_err(|_| PyroError::Validation(format!("Device id {} is not one byte", value)))?;
        Self::new(byte)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Amplifier potentiometer settings for the two channels.
///
/// A larger setting means less amplification ahead of the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainPair {
    /// Thermopile channel potentiometer.
    pub thermopile: u8,
    /// Thermistor channel potentiometer.
    pub thermistor: u8,
}

impl GainPair {
    /// Pair the two potentiometer settings.
    pub const fn new(thermopile: u8, thermistor: u8) -> Self {
        Self {
            thermopile,
            thermistor,
        }
    }
}

impl TryFrom<(u32, u32)> for GainPair {
    type Error = PyroError;

    fn try_from((thermopile, thermistor): (u32, u32)) -> AppResult<Self> {
        match (u8::try_from(thermopile), u8::try_from(thermistor)) {
            (Ok(tp), Ok(tr)) => Ok(Self::new(tp, tr)),
            _ => Err(PyroError::Validation(format!(
                "Gains must be single byte, got ({}, {})",
                thermopile, thermistor
            ))),
        }
    }
}

impl fmt::Display for GainPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tp={} tr={}", self.thermopile, self.thermistor)
    }
}

/// One REPORT reply, in raw ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Mid-rail reference the thermopile swings around.
    pub reference: u16,
    /// Thermistor divider.
    pub thermistor: u16,
    /// Amplified thermopile.
    pub thermopile: u16,
}

impl RawSample {
    /// Warn about every channel that sits outside [`ADC_SAFE_BAND`].
    pub fn check_saturation(&self) {
        let (low, high) = ADC_SAFE_BAND;
        for (name, value) in [
            ("Thermopile", self.thermopile),
            ("Thermistor", self.thermistor),
            ("Reference", self.reference),
        ] {
            if !(low < value && value < high) {
                warn!("Measurement {} ({}) is close to ADC limits", name, value);
            }
        }
    }
}

/// Outgoing command frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask for one reading.
    Report,
    /// Program both potentiometers; the board sends nothing back.
    SetGains(GainPair),
}

impl Command {
    /// Opcode byte this command is sent with.
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Report => Opcode::Report,
            Command::SetGains(_) => Opcode::SetGains,
        }
    }

    /// Whether the board answers this command with a REPORT-shaped reply.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Command::Report)
    }
}

/// Where an outgoing frame is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One board.
    Unicast(DeviceAddress),
    /// Every board on the line.
    Broadcast,
}

impl Target {
    /// Address byte for the frame header.
    pub fn byte(self) -> u8 {
        match self {
            Target::Unicast(address) => address.value(),
            Target::Broadcast => BROADCAST_ADDRESS,
        }
    }
}

/// Encode a command as one contiguous frame.
pub fn encode(command: &Command, target: Target) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5);
    frame.push(SYNC_BYTE);
    frame.push(target.byte());
    frame.push(command.opcode().code());
    if let Command::SetGains(gains) = command {
        frame.push(gains.thermopile);
        frame.push(gains.thermistor);
    }
    frame
}

/// Incremental matcher for the `[SYNC, address]` reply header.
#[derive(Debug, Clone)]
pub struct SyncScanner {
    address: u8,
    previous: Option<u8>,
    discarded: Vec<u8>,
}

impl SyncScanner {
    /// Scanner for replies from `address`.
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address: address.value(),
            previous: None,
            discarded: Vec::new(),
        }
    }

    /// Feed one byte; returns true once the header has been matched.
    pub fn feed(&mut self, byte: u8) -> bool {
        if self.previous == Some(SYNC_BYTE) && byte == self.address {
            return true;
        }
        if let Some(prev) = self.previous.replace(byte) {
            self.discarded.push(prev);
        }
        false
    }

    /// Bytes skipped ahead of the match, for diagnostics.
    pub fn discarded(&self) -> &[u8] {
        &self.discarded
    }
}

/// Decode the bytes that follow a header match.
///
/// Anything other than exactly [`REPLY_PAYLOAD_LEN`] bytes is a framing error.
pub fn decode_payload(payload: &[u8]) -> AppResult<RawSample> {
    if payload.len() != REPLY_PAYLOAD_LEN {
        return Err(PyroError::Framing {
            expected: REPLY_PAYLOAD_LEN,
            received: payload.len(),
        });
    }

    if payload[0] != Opcode::Report.code() {
        warn!(
            "Response echoed command 0x{:02X} instead of 0x{:02X}",
            payload[0],
            Opcode::Report.code()
        );
    }

    let field = |i: usize| u16::from_be_bytes([payload[i], payload[i + 1]]);
    let sample = RawSample {
        thermopile: field(1),
        thermistor: field(3),
        reference: field(5),
    };
    debug!(
        "Measured: ref {}; tr {}; tp {}",
        sample.reference, sample.thermistor, sample.thermopile
    );
    sample.check_saturation();
    Ok(sample)
}

/// Locate and decode a reply addressed to `address` inside a byte buffer.
///
/// Bytes after the fixed-length payload are ignored.
pub fn decode_frame(bytes: &[u8], address: DeviceAddress) -> AppResult<RawSample> {
    let mut scanner = SyncScanner::new(address);
    let start = bytes
        .iter()
        .position(|&b| scanner.feed(b))
        .map(|i| i + 1)
        .ok_or(PyroError::Framing {
            expected: REPLY_PAYLOAD_LEN,
            received: 0,
        })?;
    let end = (start + REPLY_PAYLOAD_LEN).min(bytes.len());
    decode_payload(&bytes[start..end])
}

/// Hex dump used by the wire-level debug logs.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
