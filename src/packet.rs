//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! BFD Control packet wire format (RFC 5880, Section 4).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Vers |  Diag   |Sta|P|F|C|A|D|M|  Detect Mult  |    Length     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       My Discriminator                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Your Discriminator                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Desired Min TX Interval                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Required Min RX Interval                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Required Min Echo RX Interval                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Auth Section (optional)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::types::State;

// Upper bound on an encoded packet: the 24-byte mandatory header plus the
// largest auth section (SHA1, 28 bytes), with margin. Sessions reserve a
// buffer of at least this size so that `Packet::marshal` never allocates.
pub const MAX_PACKET_SIZE: usize = 76;

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Diag {
    Nothing = 0,
    ControlTimeExpired = 1,
    EchoFailed = 2,
    NeighborDown = 3,
    ForwardingPlaneReset = 4,
    PathDown = 5,
    ConcatPathDown = 6,
    AdminDown = 7,
    ReverseConcatPathDown = 8,
}

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthType {
    SimplePassword = 1,
    KeyedMd5 = 2,
    MeticulousKeyedMd5 = 3,
    KeyedSha1 = 4,
    MeticulousKeyedSha1 = 5,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct PacketFlags: u8 {
        const P = 1 << 5;
        const F = 1 << 4;
        const C = 1 << 3;
        const A = 1 << 2;
        const D = 1 << 1;
        const M = 1 << 0;
    }
}

// Authentication section (RFC 5880, Section 4.2/4.3).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AuthSection {
    pub auth_type: AuthType,
    pub key_id: u8,
    pub data: AuthData,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthData {
    SimplePassword { password: Vec<u8> },
    Md5 { sequence: u32, digest: [u8; 16] },
    Sha1 { sequence: u32, digest: [u8; 20] },
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Packet {
    pub version: u8,
    pub diag: Diag,
    pub state: State,
    pub flags: PacketFlags,
    pub detect_mult: u8,
    pub my_discr: u32,
    pub your_discr: u32,
    pub desired_min_tx: u32,
    pub req_min_rx: u32,
    pub req_min_echo_rx: u32,
    pub auth: Option<AuthSection>,
}

// BFD packet decode errors, one per acceptance check (RFC 5880, Section
// 6.8.6), tried in order: the first failing check determines the error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeError {
    PacketTooShort,
    InvalidVersion(u8),
    InvalidLength(u8),
    LengthExceedsPayload(u8),
    ZeroDetectMult,
    MultipointSet,
    ZeroMyDiscriminator,
    ZeroYourDiscriminator,
    InvalidAuthType(u8),
    AuthSectionTruncated,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncodeError {
    BufferTooSmall,
    InvalidAuth,
}

// ===== impl Packet =====

impl Packet {
    pub const VERSION: u8 = 1;
    pub const MANDATORY_SECTION_LEN: u8 = 24;

    // Encodes the packet into `buf`, returning the number of bytes written.
    //
    // Never allocates: `buf` is written through `bytes::BufMut`, which is
    // implemented directly for `&mut [u8]`.
    pub fn marshal(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let encoded_len = Self::MANDATORY_SECTION_LEN as usize
            + self.auth.as_ref().map_or(0, AuthSection::wire_len);
        if buf.len() < encoded_len {
            return Err(EncodeError::BufferTooSmall);
        }
        if self.flags.contains(PacketFlags::A) != self.auth.is_some() {
            return Err(EncodeError::InvalidAuth);
        }

        let mut b = &mut buf[..];
        b.put_u8((self.version << 5) | (self.diag as u8));
        b.put_u8(((self.state as u8) << 6) | self.flags.bits());
        b.put_u8(self.detect_mult);
        b.put_u8(encoded_len as u8);
        b.put_u32(self.my_discr);
        b.put_u32(self.your_discr);
        b.put_u32(self.desired_min_tx);
        b.put_u32(self.req_min_rx);
        b.put_u32(self.req_min_echo_rx);
        if let Some(auth) = &self.auth {
            auth.marshal(&mut b)?;
        }

        Ok(encoded_len)
    }

    // Decodes a packet from `bytes`, performing the acceptance checks of
    // RFC 5880 Section 6.8.6 in order. Terminates for any input (never
    // panics), returning the first failing check's error.
    pub fn unmarshal(bytes: &[u8]) -> Result<Packet, DecodeError> {
        if bytes.len() < Self::MANDATORY_SECTION_LEN as usize {
            return Err(DecodeError::PacketTooShort);
        }

        let mut b = bytes;
        let first = b.get_u8();
        let second = b.get_u8();

        let version = first >> 5;
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let diag = Diag::from_u8(first & 0x1F).unwrap_or(Diag::Nothing);
        let state = State::from_u8(second >> 6).unwrap();
        let flags = PacketFlags::from_bits_truncate(second & 0x3F);

        let detect_mult = b.get_u8();
        let length = b.get_u8();

        let min_length = if flags.contains(PacketFlags::A) {
            Self::MANDATORY_SECTION_LEN + 2
        } else {
            Self::MANDATORY_SECTION_LEN
        };
        if length < min_length {
            return Err(DecodeError::InvalidLength(length));
        }
        if length as usize > bytes.len() {
            return Err(DecodeError::LengthExceedsPayload(length));
        }
        if detect_mult == 0 {
            return Err(DecodeError::ZeroDetectMult);
        }
        if flags.contains(PacketFlags::M) {
            return Err(DecodeError::MultipointSet);
        }

        let my_discr = b.get_u32();
        if my_discr == 0 {
            return Err(DecodeError::ZeroMyDiscriminator);
        }
        let your_discr = b.get_u32();
        if your_discr == 0 && matches!(state, State::Init | State::Up) {
            return Err(DecodeError::ZeroYourDiscriminator);
        }
        let desired_min_tx = b.get_u32();
        let req_min_rx = b.get_u32();
        let req_min_echo_rx = b.get_u32();

        let auth = if flags.contains(PacketFlags::A) {
            // Bytes available to the auth section, bounded by Length (any
            // further UDP padding is ignored).
            let remaining = length as usize - Self::MANDATORY_SECTION_LEN as usize;
            Some(AuthSection::unmarshal(&mut b, remaining)?)
        } else {
            None
        };

        Ok(Packet {
            version,
            diag,
            state,
            flags,
            detect_mult,
            my_discr,
            your_discr,
            desired_min_tx,
            req_min_rx,
            req_min_echo_rx,
            auth,
        })
    }
}

// ===== impl AuthSection =====

impl AuthSection {
    // Builds a zero-filled section of the right shape for `auth_type`, for
    // a session to marshal into an outbound buffer before handing it to an
    // `Authenticator` to sign in place (the digest/sequence are meaningless
    // until then).
    pub fn placeholder(auth_type: AuthType, key_id: u8) -> AuthSection {
        let data = match auth_type {
            AuthType::SimplePassword => AuthData::SimplePassword {
                password: vec![0; 16],
            },
            AuthType::KeyedMd5 | AuthType::MeticulousKeyedMd5 => AuthData::Md5 {
                sequence: 0,
                digest: [0; 16],
            },
            AuthType::KeyedSha1 | AuthType::MeticulousKeyedSha1 => AuthData::Sha1 {
                sequence: 0,
                digest: [0; 20],
            },
        };
        AuthSection {
            auth_type,
            key_id,
            data,
        }
    }

    // On-wire length of this section, including the Type/Len/KeyID header.
    fn wire_len(&self) -> usize {
        match &self.data {
            AuthData::SimplePassword { password } => 3 + password.len(),
            AuthData::Md5 { .. } => 24,
            AuthData::Sha1 { .. } => 28,
        }
    }

    fn marshal(&self, b: &mut &mut [u8]) -> Result<(), EncodeError> {
        b.put_u8(self.auth_type as u8);
        b.put_u8(self.wire_len() as u8);
        b.put_u8(self.key_id);
        match &self.data {
            AuthData::SimplePassword { password } => {
                if password.is_empty() || password.len() > 16 {
                    return Err(EncodeError::InvalidAuth);
                }
                b.put_slice(password);
            }
            AuthData::Md5 { sequence, digest } => {
                b.put_u8(0);
                b.put_u32(*sequence);
                b.put_slice(digest);
            }
            AuthData::Sha1 { sequence, digest } => {
                b.put_u8(0);
                b.put_u32(*sequence);
                b.put_slice(digest);
            }
        }
        Ok(())
    }

    // `remaining` is the number of bytes left in the packet (per Length)
    // available for the auth section, per step 9 of the acceptance order.
    fn unmarshal(
        b: &mut &[u8],
        remaining: usize,
    ) -> Result<AuthSection, DecodeError> {
        if remaining < 3 || b.remaining() < 3 {
            return Err(DecodeError::AuthSectionTruncated);
        }
        let raw_type = b.get_u8();
        let auth_len = b.get_u8();
        let key_id = b.get_u8();

        let Some(auth_type) = AuthType::from_u8(raw_type) else {
            return Err(DecodeError::InvalidAuthType(raw_type));
        };

        let expected_len: std::ops::RangeInclusive<u8> = match auth_type {
            AuthType::SimplePassword => 4..=19,
            AuthType::KeyedMd5 | AuthType::MeticulousKeyedMd5 => 24..=24,
            AuthType::KeyedSha1 | AuthType::MeticulousKeyedSha1 => 28..=28,
        };
        if !expected_len.contains(&auth_len) {
            return Err(DecodeError::InvalidLength(auth_len));
        }
        if (auth_len as usize) > remaining {
            return Err(DecodeError::AuthSectionTruncated);
        }

        // Bytes remaining in this section after Type/Len/KeyID.
        let body_len = auth_len as usize - 3;
        if b.remaining() < body_len {
            return Err(DecodeError::AuthSectionTruncated);
        }

        let data = match auth_type {
            AuthType::SimplePassword => {
                let mut password = vec![0u8; body_len];
                b.copy_to_slice(&mut password);
                AuthData::SimplePassword { password }
            }
            AuthType::KeyedMd5 | AuthType::MeticulousKeyedMd5 => {
                let _reserved = b.get_u8();
                let sequence = b.get_u32();
                let mut digest = [0u8; 16];
                b.copy_to_slice(&mut digest);
                AuthData::Md5 { sequence, digest }
            }
            AuthType::KeyedSha1 | AuthType::MeticulousKeyedSha1 => {
                let _reserved = b.get_u8();
                let sequence = b.get_u32();
                let mut digest = [0u8; 20];
                b.copy_to_slice(&mut digest);
                AuthData::Sha1 { sequence, digest }
            }
        };

        Ok(AuthSection {
            auth_type,
            key_id,
            data,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::PacketTooShort => write!(f, "packet too short"),
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid BFD version: {version}")
            }
            DecodeError::InvalidLength(len) => {
                write!(f, "invalid packet length: {len}")
            }
            DecodeError::LengthExceedsPayload(len) => {
                write!(f, "length {len} exceeds payload size")
            }
            DecodeError::ZeroDetectMult => {
                write!(f, "detect mult must be nonzero")
            }
            DecodeError::MultipointSet => {
                write!(f, "multipoint bit is set")
            }
            DecodeError::ZeroMyDiscriminator => {
                write!(f, "my discriminator must be nonzero")
            }
            DecodeError::ZeroYourDiscriminator => {
                write!(f, "your discriminator must be nonzero in this state")
            }
            DecodeError::InvalidAuthType(auth_type) => {
                write!(f, "invalid authentication type: {auth_type}")
            }
            DecodeError::AuthSectionTruncated => {
                write!(f, "authentication section truncated")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::BufferTooSmall => write!(f, "buffer too small"),
            EncodeError::InvalidAuth => write!(f, "invalid authentication data"),
        }
    }
}

impl std::error::Error for EncodeError {}
