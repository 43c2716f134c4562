//! In-memory serial link for running without hardware.
//!
//! `MockLink` behaves like a serial port with a zero-latency far end. Frames
//! written by the transport are handed to a responder when the transport
//! flushes, and whatever the responder produces becomes readable input. An
//! empty input buffer reads as `ErrorKind::TimedOut`, which is what a real port
//! does once its read timeout expires.
//!
//! Two responders are available:
//! - **Scripted**: every REPORT pops the next [`MockReply`]; other frames are ignored.
//! - **Board**: a simulated board that tracks SET_GAINS and answers REPORT with
//!   the readings produced by a [`BoardModel`].

use crate::adapters::SerialLink;
use crate::protocol::{GainPair, Opcode, RawSample, BROADCAST_ADDRESS, SYNC_BYTE};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Reading model of a simulated board: current gains in, ADC counts out.
pub type BoardModel = Arc<dyn Fn(Option<GainPair>) -> RawSample + Send + Sync>;

/// One scripted answer to a REPORT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Raw bytes placed on the line, noise included.
    Bytes(Vec<u8>),
    /// Nothing comes back; the next read times out.
    Silence,
}

impl MockReply {
    /// A well-formed REPORT reply from `address`.
    pub fn report(address: u8, sample: RawSample) -> Self {
        Self::Bytes(report_frame(address, sample))
    }
}

enum Responder {
    Scripted(VecDeque<MockReply>),
    Board {
        address: u8,
        gains: Option<GainPair>,
        model: BoardModel,
        silent_reports: VecDeque<bool>,
    },
}

struct MockState {
    input: VecDeque<u8>,
    pending: Vec<u8>,
    written: Vec<Vec<u8>>,
    clears: usize,
    read_timeouts: Vec<Duration>,
    responder: Responder,
}

/// Simulated serial link; clones share the same far end.
#[derive(Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    fn with_responder(responder: Responder) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                input: VecDeque::new(),
                pending: Vec::new(),
                written: Vec::new(),
                clears: 0,
                read_timeouts: Vec::new(),
                responder,
            })),
        }
    }

    /// A link that answers REPORT commands from a fixed script.
    pub fn scripted(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self::with_responder(Responder::Scripted(replies.into_iter().collect()))
    }

    /// A link with a simulated board at `address` behind it.
    pub fn board(address: u8, model: BoardModel) -> Self {
        Self::with_responder(Responder::Board {
            address,
            gains: None,
            model,
            silent_reports: VecDeque::new(),
        })
    }

    /// Make the simulated board ignore upcoming REPORTs; `true` entries are dropped.
    pub fn drop_reports(&self, pattern: impl IntoIterator<Item = bool>) {
        if let Responder::Board { silent_reports, .. } = &mut self.lock().responder {
            silent_reports.extend(pattern);
        }
    }

    /// Place bytes on the line as if they had just arrived.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().input.extend(bytes.iter().copied());
    }

    /// Every frame written so far, one entry per flush.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Number of times the input buffer was cleared.
    pub fn clear_count(&self) -> usize {
        self.lock().clears
    }

    /// Read timeouts requested so far, one per read.
    pub fn read_timeouts(&self) -> Vec<Duration> {
        self.lock().read_timeouts.clone()
    }

    /// Gains last applied to the simulated board, if any.
    pub fn board_gains(&self) -> Option<GainPair> {
        match &self.lock().responder {
            Responder::Board { gains, .. } => *gains,
            Responder::Scripted(_) => None,
        }
    }

    /// Simulate a power cycle: the board forgets its gains.
    pub fn power_cycle(&self) {
        if let Responder::Board { gains, .. } = &mut self.lock().responder {
            *gains = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.lock();
        if state.input.is_empty() {
            return Err(std::io::Error::new(ErrorKind::TimedOut, "mock read timed out"));
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.lock().pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return Ok(());
        }
        let frame = std::mem::take(&mut state.pending);
        let reply = respond(&mut state.responder, &frame);
        state.written.push(frame);
        state.input.extend(reply);
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn clear_input(&mut self) -> std::io::Result<()> {
        let mut state = self.lock();
        state.input.clear();
        state.clears += 1;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.lock().read_timeouts.push(timeout);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Encode a REPORT reply the way the board firmware does.
pub fn report_frame(address: u8, sample: RawSample) -> Vec<u8> {
    let mut frame = vec![SYNC_BYTE, address, Opcode::Report.code()];
    frame.extend_from_slice(&sample.thermopile.to_be_bytes());
    frame.extend_from_slice(&sample.thermistor.to_be_bytes());
    frame.extend_from_slice(&sample.reference.to_be_bytes());
    frame
}

fn respond(responder: &mut Responder, frame: &[u8]) -> Vec<u8> {
    let (target, opcode, payload) = match frame {
        [SYNC_BYTE, target, opcode, payload @ ..] => (*target, *opcode, payload),
        _ => return Vec::new(),
    };

    match responder {
        Responder::Scripted(script) => {
            if opcode != Opcode::Report.code() {
                return Vec::new();
            }
            match script.pop_front() {
                Some(MockReply::Bytes(bytes)) => bytes,
                Some(MockReply::Silence) | None => Vec::new(),
            }
        }
        Responder::Board {
            address,
            gains,
            model,
            silent_reports,
        } => {
            let addressed = target == *address;
            if !addressed && target != BROADCAST_ADDRESS {
                return Vec::new();
            }
            if opcode == Opcode::SetGains.code() {
                if let [tp, tr] = payload {
                    *gains = Some(GainPair::new(*tp, *tr));
                }
                Vec::new()
            } else if opcode == Opcode::Report.code() && addressed {
                if silent_reports.pop_front().unwrap_or(false) {
                    return Vec::new();
                }
                report_frame(*address, (**model)(*gains))
            } else {
                Vec::new()
            }
        }
    }
}
