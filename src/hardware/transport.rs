//! Blocking frame transport over a [`SerialLink`].
//!
//! Every exchange is clear, send, receive. The clear step recovers from a
//! previous caller that gave up halfway through a reply; the receive step
//! resynchronizes on `[SYNC, own address]` and then reads the fixed-length
//! payload.
//!
//! The transport is not safe for two in-flight exchanges: callers must hold
//! exclusive access for the whole exchange.

use crate::adapters::SerialLink;
use crate::error::{AppResult, PyroError};
use crate::protocol::{
    self, Command, DeviceAddress, RawSample, SyncScanner, Target, REPLY_PAYLOAD_LEN,
};
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tracing::debug;

/// Frame transport for one board address on one link.
pub struct Transport<L: SerialLink> {
    link: L,
    address: DeviceAddress,
    timeout: Duration,
}

enum ByteRead {
    Byte(u8),
    TimedOut,
}

impl<L: SerialLink> Transport<L> {
    /// Wrap `link`, talking to the board at `address`.
    ///
    /// `timeout` bounds each receive as a whole, scan and payload together.
    pub fn new(link: L, address: DeviceAddress, timeout: Duration) -> Self {
        Self {
            link,
            address,
            timeout,
        }
    }

    /// Address replies are matched on.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Bound on one receive.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write one command frame and flush. No acknowledgment is awaited.
    pub fn send(&mut self, command: &Command, broadcast: bool) -> AppResult<()> {
        let target = if broadcast {
            Target::Broadcast
        } else {
            Target::Unicast(self.address)
        };
        let frame = protocol::encode(command, target);
        debug!("Writing {}", protocol::hex(&frame));
        self.link.write_all(&frame)?;
        self.link.flush()?;
        Ok(())
    }

    /// Discard unread input left over from an abandoned exchange.
    pub fn clear(&mut self) -> AppResult<()> {
        self.link.clear_input()?;
        Ok(())
    }

    /// Wait for a reply addressed to this board and decode it.
    ///
    /// Fails with `ReadTimeout` if the header never shows up, and with `Framing`
    /// if the payload is cut short.
    pub fn receive(&mut self) -> AppResult<RawSample> {
        let deadline = Instant::now() + self.timeout;
        let mut scanner = SyncScanner::new(self.address);

        loop {
            match self.read_byte(deadline)? {
                ByteRead::Byte(byte) => {
                    if scanner.feed(byte) {
                        break;
                    }
                }
                ByteRead::TimedOut => {
                    debug!("Read {} before timeout", protocol::hex(scanner.discarded()));
                    return Err(PyroError::ReadTimeout(self.timeout));
                }
            }
        }
        if !scanner.discarded().is_empty() {
            debug!("Skipped {}", protocol::hex(scanner.discarded()));
        }

        let mut payload = Vec::with_capacity(REPLY_PAYLOAD_LEN);
        while payload.len() < REPLY_PAYLOAD_LEN {
            match self.read_byte(deadline)? {
                ByteRead::Byte(byte) => payload.push(byte),
                ByteRead::TimedOut => break,
            }
        }
        debug!("Read {}", protocol::hex(&payload));
        protocol::decode_payload(&payload)
    }

    /// Clear, send, and, for commands that have one, receive the reply.
    ///
    /// Broadcast commands never get a reply addressed to us, so they return `None`
    /// like any other fire-and-forget command.
    pub fn exchange(&mut self, command: &Command, broadcast: bool) -> AppResult<Option<RawSample>> {
        self.clear()?;
        self.send(command, broadcast)?;
        if broadcast || !command.expects_reply() {
            return Ok(None);
        }
        self.receive().map(Some)
    }

    // Each read is capped at the time left, so the whole receive never outlives the deadline.
    fn read_byte(&mut self, deadline: Instant) -> AppResult<ByteRead> {
        let mut buf = [0u8; 1];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ByteRead::TimedOut);
            }
            self.link.set_read_timeout(remaining)?;
            match self.link.read(&mut buf) {
                Ok(1) => return Ok(ByteRead::Byte(buf[0])),
                Ok(_) => return Ok(ByteRead::TimedOut),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(ByteRead::TimedOut),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockLink, MockReply};
    use crate::protocol::GainPair;

    const REPLY: [u8; 9] = [0x55, 0x04, 0x00, 0x0A, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F];

    fn transport(link: MockLink) -> Transport<MockLink> {
        Transport::new(link, DeviceAddress::new(4).unwrap(), Duration::from_millis(200))
    }

    #[test]
    fn test_exchange_report() {
        let link = MockLink::scripted([MockReply::Bytes(REPLY.to_vec())]);
        let mut transport = transport(link.clone());
        let sample = transport.exchange(&Command::Report, false).unwrap().unwrap();
        assert_eq!(sample.thermopile, 0x0A1B);
        assert_eq!(sample.thermistor, 0x2C3D);
        assert_eq!(sample.reference, 0x4E5F);
        assert_eq!(link.written(), vec![vec![0x55, 0x04, 0x00]]);
        assert_eq!(link.clear_count(), 1);
    }

    #[test]
    fn test_exchange_clears_stale_input() {
        let link = MockLink::scripted([MockReply::Bytes(REPLY.to_vec())]);
        link.inject(&[0x55, 0x04, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let mut transport = transport(link);
        let sample = transport.exchange(&Command::Report, false).unwrap().unwrap();
        assert_eq!(sample.thermopile, 0x0A1B);
    }

    #[test]
    fn test_set_gains_is_fire_and_forget() {
        let link = MockLink::scripted([]);
        let mut transport = transport(link.clone());
        let reply = transport
            .exchange(&Command::SetGains(GainPair::new(12, 34)), false)
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(link.written(), vec![vec![0x55, 0x04, 0x01, 12, 34]]);
    }

    #[test]
    fn test_reads_are_capped_by_time_left() {
        let link = MockLink::scripted([MockReply::Bytes(REPLY.to_vec())]);
        let mut transport = transport(link.clone());
        transport.exchange(&Command::Report, false).unwrap();

        let caps = link.read_timeouts();
        assert_eq!(caps.len(), REPLY.len());
        assert!(caps.iter().all(|&cap| cap <= Duration::from_millis(200)));
        assert!(caps.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_silence_is_read_timeout() {
        let link = MockLink::scripted([MockReply::Silence]);
        let mut transport = transport(link);
        let err = transport.exchange(&Command::Report, false).unwrap_err();
        assert!(matches!(err, PyroError::ReadTimeout(_)));
    }

    #[test]
    fn test_truncated_reply_is_framing_error() {
        let link = MockLink::scripted([MockReply::Bytes(REPLY[..6].to_vec())]);
        let mut transport = transport(link);
        let err = transport.exchange(&Command::Report, false).unwrap_err();
        assert!(matches!(
            err,
            PyroError::Framing {
                expected: 7,
                received: 4
            }
        ));
    }

    #[test]
    fn test_reply_for_other_address_times_out() {
        let mut foreign = REPLY.to_vec();
        foreign[1] = 0x05;
        let link = MockLink::scripted([MockReply::Bytes(foreign)]);
        let mut transport = transport(link);
        assert!(matches!(
            transport.exchange(&Command::Report, false),
            Err(PyroError::ReadTimeout(_))
        ));
    }
}
