//! Wire protocol against a simulated link
//!
//! Run with: cargo test --test protocol_end_to_end

use std::time::Duration;
use uw_pyrometer::adapters::{MockLink, MockReply};
use uw_pyrometer::hardware::Pyrometer;
use uw_pyrometer::protocol::{self, DeviceAddress, GainPair};
use uw_pyrometer::PyroError;

const FRAME: [u8; 9] = [0x55, 0x04, 0x00, 0x0A, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F];

fn board(link: MockLink) -> Pyrometer<MockLink> {
    Pyrometer::new(
        link,
        DeviceAddress::new(4).unwrap(),
        Duration::from_millis(100),
        None,
    )
}

#[test]
fn test_report_returns_fields_in_wire_order() {
    let link = MockLink::scripted([MockReply::Bytes(FRAME.to_vec())]);
    let mut pyro = board(link.clone());

    let sample = pyro.get_measurement(false).unwrap();
    assert_eq!(sample.thermopile, 0x0A1B);
    assert_eq!(sample.thermistor, 0x2C3D);
    assert_eq!(sample.reference, 0x4E5F);
    assert_eq!(link.written(), vec![vec![0x55, 0x04, 0x00]]);
}

#[test]
fn test_leading_junk_does_not_change_result() {
    let junk_sets: [&[u8]; 4] = [
        &[0x00, 0xFF, 0x13],
        &[0x55],
        &[0x55, 0x05, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
        &[0x55, 0x55, 0x55],
    ];
    for junk in junk_sets {
        let mut bytes = junk.to_vec();
        bytes.extend_from_slice(&FRAME);
        let mut pyro = board(MockLink::scripted([MockReply::Bytes(bytes)]));
        let sample = pyro.get_measurement(false).unwrap();
        assert_eq!(
            (sample.thermopile, sample.thermistor, sample.reference),
            (0x0A1B, 0x2C3D, 0x4E5F),
            "junk {:02X?}",
            junk
        );
    }
}

#[test]
fn test_short_reply_is_framing_error_and_forgets_gains() {
    let link = MockLink::scripted([MockReply::Bytes(FRAME[..8].to_vec())]);
    let mut pyro = board(link);
    pyro.set_gains(GainPair::new(20, 20), false).unwrap();

    let err = pyro.get_measurement(false).unwrap_err();
    assert!(matches!(err, PyroError::Framing { expected: 7, received: 6 }));
    assert!(err.is_link_failure());
    assert_eq!(pyro.gains(), None);
}

#[test]
fn test_silent_board_times_out() {
    let mut pyro = board(MockLink::scripted([MockReply::Silence]));
    assert!(matches!(
        pyro.get_measurement(false),
        Err(PyroError::ReadTimeout(_))
    ));
}

#[test]
fn test_decode_frame_matches_transport() {
    let mut bytes = vec![0xDE, 0xAD];
    bytes.extend_from_slice(&FRAME);
    let sample = protocol::decode_frame(&bytes, DeviceAddress::new(4).unwrap()).unwrap();
    assert_eq!(sample.thermopile, 0x0A1B);
    assert_eq!(sample.reference, 0x4E5F);
}

#[test]
fn test_broadcast_address_is_not_a_device() {
    assert!(matches!(
        DeviceAddress::new(0xFF),
        Err(PyroError::Validation(_))
    ));
    assert!(DeviceAddress::try_from(300u32).is_err());
    assert!(GainPair::try_from((256u32, 0u32)).is_err());
}
