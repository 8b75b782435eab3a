//! Handshake message parsing and serialization.
//!
//! Every datagram on the channel starts with a two-byte sentinel:
//! - [`HANDSHAKE_MAGIC`] followed by a message type byte and its payload
//! - [`APPLICATION_MAGIC`] followed by opaque application bytes
//!
//! Neither sentinel shares its first byte with the chunk marker, so the three
//! datagram families are told apart without ambiguity.
//!
//! All multi-byte integers use little-endian byte order. Every length field is
//! checked against fixed bounds before it is used to slice the datagram.

use crate::{Error, Result};

/// Sentinel prefixing every handshake datagram.
pub const HANDSHAKE_MAGIC: [u8; 2] = [0xA7, 0x48];
/// Sentinel prefixing every post-handshake application datagram.
pub const APPLICATION_MAGIC: [u8; 2] = [0xA7, 0x44];

// Message type identifiers (1 byte)
/// Type identifier for RsaKey (0x00).
pub const TYPE_RSA_KEY: u8 = 0x00;
/// Type identifier for AesKey (0x01).
pub const TYPE_AES_KEY: u8 = 0x01;
/// Type identifier for AuthToken (0x02).
pub const TYPE_AUTH_TOKEN: u8 = 0x02;
/// Type identifier for AuthResult (0x03).
pub const TYPE_AUTH_RESULT: u8 = 0x03;
/// Type identifier for ResendRequest (0x04).
pub const TYPE_RESEND_REQUEST: u8 = 0x04;

/// Smallest accepted RSA modulus (2048-bit key).
pub const MIN_MODULUS_SIZE: usize = 256;
/// Largest accepted RSA modulus (4096-bit key).
pub const MAX_MODULUS_SIZE: usize = 512;
/// Smallest accepted RSA exponent.
pub const MIN_EXPONENT_SIZE: usize = 2;
/// Largest accepted RSA exponent.
pub const MAX_EXPONENT_SIZE: usize = 4;
/// Largest RSA-wrapped blob (one 4096-bit block).
pub const MAX_WRAPPED_SIZE: usize = 512;
/// Largest encrypted token segment.
pub const MAX_SEGMENT_CIPHER_SIZE: usize = 16 * 48;

/// Handshake message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Initiator's RSA public key.
    RsaKey = TYPE_RSA_KEY,
    /// Responder's RSA-wrapped AES key and IV.
    AesKey = TYPE_AES_KEY,
    /// One AES-encrypted identity token segment.
    AuthToken = TYPE_AUTH_TOKEN,
    /// Verification verdict.
    AuthResult = TYPE_AUTH_RESULT,
    /// Ask the peer to send a message again.
    ResendRequest = TYPE_RESEND_REQUEST,
}

impl MessageType {
    /// Convert to wire format.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from wire format.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            TYPE_RSA_KEY => Some(Self::RsaKey),
            TYPE_AES_KEY => Some(Self::AesKey),
            TYPE_AUTH_TOKEN => Some(Self::AuthToken),
            TYPE_AUTH_RESULT => Some(Self::AuthResult),
            TYPE_RESEND_REQUEST => Some(Self::ResendRequest),
            _ => None,
        }
    }
}

/// Handshake wire messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// RsaKey - initiator's public key, big-endian components.
    RsaKey {
        /// Public modulus (256..=512 bytes).
        modulus: Vec<u8>,
        /// Public exponent (2..=4 bytes).
        exponent: Vec<u8>,
    },

    /// AesKey - responder's symmetric key, each part RSA-wrapped.
    AesKey {
        /// RSA-encrypted AES key.
        encrypted_key: Vec<u8>,
        /// RSA-encrypted IV.
        encrypted_iv: Vec<u8>,
    },

    /// AuthToken - one encrypted segment of the identity token.
    AuthToken {
        /// Zero-based segment position.
        segment_index: u8,
        /// Number of segments in the token (at least 1).
        total_segments: u8,
        /// AES-CBC ciphertext (1..=768 bytes).
        cipher_text: Vec<u8>,
    },

    /// AuthResult - responder's verdict.
    AuthResult {
        /// Whether the initiator was accepted.
        accepted: bool,
    },

    /// ResendRequest - ask the peer to repeat a message.
    ResendRequest {
        /// The message the sender is waiting for.
        requested: MessageType,
    },
}

impl HandshakeMessage {
    /// Wire type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            HandshakeMessage::RsaKey { .. } => MessageType::RsaKey,
            HandshakeMessage::AesKey { .. } => MessageType::AesKey,
            HandshakeMessage::AuthToken { .. } => MessageType::AuthToken,
            HandshakeMessage::AuthResult { .. } => MessageType::AuthResult,
            HandshakeMessage::ResendRequest { .. } => MessageType::ResendRequest,
        }
    }

    /// Parse a handshake datagram, sentinel included.
    pub fn parse(data: &[u8]) -> Result<Self> {
        check_len(data, 3)?;
        if data[0..2] != HANDSHAKE_MAGIC {
            return Err(Error::InvalidFrame(format!(
                "bad handshake sentinel 0x{:02X}{:02X}",
                data[0], data[1]
            )));
        }

        let body = &data[3..];
        let (message, consumed) = match MessageType::from_u8(data[2]) {
            Some(MessageType::RsaKey) => Self::parse_rsa_key(body)?,
            Some(MessageType::AesKey) => Self::parse_aes_key(body)?,
            Some(MessageType::AuthToken) => Self::parse_auth_token(body)?,
            Some(MessageType::AuthResult) => Self::parse_auth_result(body)?,
            Some(MessageType::ResendRequest) => Self::parse_resend_request(body)?,
            None => return Err(Error::UnknownMessageType(data[2])),
        };

        if consumed != body.len() {
            return Err(Error::InvalidFrame(format!(
                "{} trailing bytes after {:?}",
                body.len() - consumed,
                message.message_type()
            )));
        }

        Ok(message)
    }

    /// Serialize to a handshake datagram, sentinel included.
    ///
    /// The same bounds enforced by [`parse`](Self::parse) are enforced here, so
    /// a message that serializes successfully always parses back.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&HANDSHAKE_MAGIC);
        buf.push(self.message_type().to_u8());

        match self {
            HandshakeMessage::RsaKey { modulus, exponent } => {
                check_bounds("modulus size", modulus.len(), MIN_MODULUS_SIZE, MAX_MODULUS_SIZE)?;
                check_bounds("exponent size", exponent.len(), MIN_EXPONENT_SIZE, MAX_EXPONENT_SIZE)?;
                buf.extend_from_slice(&(modulus.len() as u16).to_le_bytes());
                buf.extend_from_slice(&(exponent.len() as u16).to_le_bytes());
                buf.extend_from_slice(modulus);
                buf.extend_from_slice(exponent);
            }
            HandshakeMessage::AesKey {
                encrypted_key,
                encrypted_iv,
            } => {
                check_bounds("encrypted key size", encrypted_key.len(), 1, MAX_WRAPPED_SIZE)?;
                check_bounds("encrypted IV size", encrypted_iv.len(), 1, MAX_WRAPPED_SIZE)?;
                buf.extend_from_slice(&(encrypted_key.len() as u16).to_le_bytes());
                buf.extend_from_slice(&(encrypted_iv.len() as u16).to_le_bytes());
                buf.extend_from_slice(encrypted_key);
                buf.extend_from_slice(encrypted_iv);
            }
            HandshakeMessage::AuthToken {
                segment_index,
                total_segments,
                cipher_text,
            } => {
                check_segment(*segment_index, *total_segments)?;
                check_bounds("segment size", cipher_text.len(), 1, MAX_SEGMENT_CIPHER_SIZE)?;
                buf.push(*segment_index);
                buf.push(*total_segments);
                buf.extend_from_slice(&(cipher_text.len() as u16).to_le_bytes());
                buf.extend_from_slice(cipher_text);
            }
            HandshakeMessage::AuthResult { accepted } => {
                buf.push(u8::from(*accepted));
            }
            HandshakeMessage::ResendRequest { requested } => {
                buf.push(requested.to_u8());
            }
        }

        Ok(buf)
    }

    fn encoded_len(&self) -> usize {
        3 + match self {
            HandshakeMessage::RsaKey { modulus, exponent } => 4 + modulus.len() + exponent.len(),
            HandshakeMessage::AesKey {
                encrypted_key,
                encrypted_iv,
            } => 4 + encrypted_key.len() + encrypted_iv.len(),
            HandshakeMessage::AuthToken { cipher_text, .. } => 4 + cipher_text.len(),
            HandshakeMessage::AuthResult { .. } | HandshakeMessage::ResendRequest { .. } => 1,
        }
    }

    // === RsaKey ===

    fn parse_rsa_key(data: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;

        check_len(data, offset + 4)?;
        let modulus_size = read_u16_le(&data[offset..offset + 2]) as usize;
        let exponent_size = read_u16_le(&data[offset + 2..offset + 4]) as usize;
        offset += 4;

        check_bounds("modulus size", modulus_size, MIN_MODULUS_SIZE, MAX_MODULUS_SIZE)?;
        check_bounds("exponent size", exponent_size, MIN_EXPONENT_SIZE, MAX_EXPONENT_SIZE)?;

        check_len(data, offset + modulus_size + exponent_size)?;
        let modulus = data[offset..offset + modulus_size].to_vec();
        offset += modulus_size;
        let exponent = data[offset..offset + exponent_size].to_vec();
        offset += exponent_size;

        Ok((HandshakeMessage::RsaKey { modulus, exponent }, offset))
    }

    // === AesKey ===

    fn parse_aes_key(data: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;

        check_len(data, offset + 4)?;
        let key_size = read_u16_le(&data[offset..offset + 2]) as usize;
        let iv_size = read_u16_le(&data[offset + 2..offset + 4]) as usize;
        offset += 4;

        check_bounds("encrypted key size", key_size, 1, MAX_WRAPPED_SIZE)?;
        check_bounds("encrypted IV size", iv_size, 1, MAX_WRAPPED_SIZE)?;

        check_len(data, offset + key_size + iv_size)?;
        let encrypted_key = data[offset..offset + key_size].to_vec();
        offset += key_size;
        let encrypted_iv = data[offset..offset + iv_size].to_vec();
        offset += iv_size;

        Ok((
            HandshakeMessage::AesKey {
                encrypted_key,
                encrypted_iv,
            },
            offset,
        ))
    }

    // === AuthToken ===

    fn parse_auth_token(data: &[u8]) -> Result<(Self, usize)> {
        check_len(data, 4)?;
        let segment_index = data[0];
        let total_segments = data[1];
        let packet_size = read_u16_le(&data[2..4]) as usize;

        check_segment(segment_index, total_segments)?;
        check_bounds("segment size", packet_size, 1, MAX_SEGMENT_CIPHER_SIZE)?;

        check_len(data, 4 + packet_size)?;
        let cipher_text = data[4..4 + packet_size].to_vec();

        Ok((
            HandshakeMessage::AuthToken {
                segment_index,
                total_segments,
                cipher_text,
            },
            4 + packet_size,
        ))
    }

    // === AuthResult ===

    fn parse_auth_result(data: &[u8]) -> Result<(Self, usize)> {
        check_len(data, 1)?;
        let accepted = match data[0] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::InvalidFrame(format!(
                    "auth result must be 0 or 1, got {}",
                    other
                )))
            }
        };
        Ok((HandshakeMessage::AuthResult { accepted }, 1))
    }

    // === ResendRequest ===

    fn parse_resend_request(data: &[u8]) -> Result<(Self, usize)> {
        check_len(data, 1)?;
        let requested = MessageType::from_u8(data[0]).ok_or(Error::UnknownMessageType(data[0]))?;
        Ok((HandshakeMessage::ResendRequest { requested }, 1))
    }
}

/// Datagram family, decided by its leading sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// Handshake datagram (pass the whole datagram to [`HandshakeMessage::parse`]).
    Handshake,
    /// Application datagram; the payload follows the sentinel.
    Application(&'a [u8]),
    /// Neither sentinel matched.
    Unknown,
}

/// Classify a (reassembled) datagram by its sentinel.
pub fn classify(data: &[u8]) -> FrameKind<'_> {
    if data.len() < 2 {
        return FrameKind::Unknown;
    }
    match [data[0], data[1]] {
        HANDSHAKE_MAGIC => FrameKind::Handshake,
        APPLICATION_MAGIC => FrameKind::Application(&data[2..]),
        _ => FrameKind::Unknown,
    }
}

/// Prefix application bytes with [`APPLICATION_MAGIC`].
pub fn encode_application(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 2);
    buf.extend_from_slice(&APPLICATION_MAGIC);
    buf.extend_from_slice(payload);
    buf
}

// === Helper functions ===

#[inline]
fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(Error::InsufficientData(needed))
    } else {
        Ok(())
    }
}

#[inline]
fn check_bounds(field: &'static str, value: usize, min: usize, max: usize) -> Result<()> {
    if value < min || value > max {
        Err(Error::OutOfBounds {
            field,
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

fn check_segment(index: u8, total: u8) -> Result<()> {
    if total == 0 || index >= total {
        return Err(Error::InvalidFrame(format!(
            "segment index {} out of range for {} segments",
            index, total
        )));
    }
    Ok(())
}

#[inline]
pub(crate) fn read_u16_le(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

#[inline]
pub(crate) fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}
