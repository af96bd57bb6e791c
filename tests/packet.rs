//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

use bfd::packet::{AuthData, AuthSection, AuthType, Diag, DecodeError, Packet, PacketFlags};
use bfd::types::State;

fn packet1() -> (Vec<u8>, Packet) {
    (
        vec![
            0x20, 0xc0, 0x03, 0x18, 0x9f, 0xb2, 0x05, 0xd6, 0x4a, 0x23, 0x57,
            0xdc, 0x00, 0x04, 0x93, 0xe0, 0x00, 0x04, 0x93, 0xe0, 0x00, 0x00,
            0xc3, 0x50,
        ],
        Packet {
            version: 1,
            diag: Diag::Nothing,
            state: State::Up,
            flags: PacketFlags::empty(),
            detect_mult: 3,
            my_discr: 0x9fb205d6,
            your_discr: 0x4a2357dc,
            desired_min_tx: 300_000,
            req_min_rx: 300_000,
            req_min_echo_rx: 50_000,
            auth: None,
        },
    )
}

#[test]
fn decodes_packet1() {
    let (bytes, expected) = packet1();
    assert_eq!(Packet::unmarshal(&bytes), Ok(expected));
}

#[test]
fn round_trips_packet1() {
    let (bytes, packet) = packet1();
    let mut buf = [0u8; 76];
    let len = packet.marshal(&mut buf).unwrap();
    assert_eq!(&buf[..len], bytes.as_slice());
}

#[test]
fn rejects_short_packets() {
    let (bytes, _) = packet1();
    assert_eq!(
        Packet::unmarshal(&bytes[..23]),
        Err(DecodeError::PacketTooShort)
    );
}

#[test]
fn rejects_unsupported_version() {
    let (mut bytes, _) = packet1();
    bytes[0] = (2 << 5) | (bytes[0] & 0x1F);
    assert_eq!(
        Packet::unmarshal(&bytes),
        Err(DecodeError::InvalidVersion(2))
    );
}

#[test]
fn rejects_zero_detect_mult() {
    let (mut bytes, _) = packet1();
    bytes[2] = 0;
    assert_eq!(
        Packet::unmarshal(&bytes),
        Err(DecodeError::ZeroDetectMult)
    );
}

#[test]
fn rejects_multipoint_bit() {
    let (mut bytes, _) = packet1();
    bytes[1] |= PacketFlags::M.bits();
    assert_eq!(Packet::unmarshal(&bytes), Err(DecodeError::MultipointSet));
}

#[test]
fn rejects_zero_my_discriminator() {
    let (mut bytes, _) = packet1();
    bytes[4..8].copy_from_slice(&0u32.to_be_bytes());
    assert_eq!(
        Packet::unmarshal(&bytes),
        Err(DecodeError::ZeroMyDiscriminator)
    );
}

#[test]
fn rejects_zero_your_discriminator_in_up_state() {
    let (mut bytes, _) = packet1();
    bytes[8..12].copy_from_slice(&0u32.to_be_bytes());
    assert_eq!(
        Packet::unmarshal(&bytes),
        Err(DecodeError::ZeroYourDiscriminator)
    );
}

#[test]
fn allows_zero_your_discriminator_in_down_state() {
    let (mut bytes, mut packet) = packet1();
    bytes[1] = 1 << 6; // state = Down, flags cleared
    bytes[8..12].copy_from_slice(&0u32.to_be_bytes());
    packet.state = State::Down;
    packet.your_discr = 0;
    assert_eq!(Packet::unmarshal(&bytes), Ok(packet));
}

#[test]
fn rejects_length_exceeding_payload() {
    let (mut bytes, _) = packet1();
    bytes[3] = 30;
    assert_eq!(
        Packet::unmarshal(&bytes),
        Err(DecodeError::LengthExceedsPayload(30))
    );
}

#[test]
fn rejects_buffer_too_small_on_encode() {
    let (_, packet) = packet1();
    let mut buf = [0u8; 10];
    assert_eq!(
        packet.marshal(&mut buf),
        Err(bfd::packet::EncodeError::BufferTooSmall)
    );
}

fn md5_auth_packet() -> Packet {
    let (_, mut packet) = packet1();
    packet.flags = PacketFlags::A;
    packet.auth = Some(AuthSection {
        auth_type: AuthType::KeyedMd5,
        key_id: 9,
        data: AuthData::Md5 {
            sequence: 42,
            digest: [0xAB; 16],
        },
    });
    packet
}

#[test]
fn round_trips_packet_with_keyed_md5_auth() {
    let packet = md5_auth_packet();
    let mut buf = [0u8; 76];
    let len = packet.marshal(&mut buf).unwrap();
    // 24-byte mandatory section + 24-byte MD5 auth section.
    assert_eq!(len, 48);
    assert_eq!(Packet::unmarshal(&buf[..len]), Ok(packet));
}

#[test]
fn rejects_auth_section_truncated_below_header() {
    let packet = md5_auth_packet();
    let mut buf = [0u8; 76];
    packet.marshal(&mut buf).unwrap();

    // Keep only 2 bytes of the auth section (Type, Len) and tell the
    // mandatory header so via Length; `remaining` ends up under 3.
    let mut truncated = buf[..26].to_vec();
    truncated[3] = 26;
    assert_eq!(
        Packet::unmarshal(&truncated),
        Err(DecodeError::AuthSectionTruncated)
    );
}

#[test]
fn rejects_invalid_auth_type() {
    let packet = md5_auth_packet();
    let mut buf = [0u8; 76];
    let len = packet.marshal(&mut buf).unwrap();

    buf[24] = 9; // no AuthType variant is 9
    assert_eq!(
        Packet::unmarshal(&buf[..len]),
        Err(DecodeError::InvalidAuthType(9))
    );
}

#[test]
fn rejects_invalid_auth_section_length_for_type() {
    let packet = md5_auth_packet();
    let mut buf = [0u8; 76];
    let len = packet.marshal(&mut buf).unwrap();

    // Keyed MD5 only accepts an auth-section Len of 24; 20 is out of range.
    buf[25] = 20;
    assert_eq!(
        Packet::unmarshal(&buf[..len]),
        Err(DecodeError::InvalidLength(20))
    );
}
