//! NanoTDF payload and the complete container
//!
//! ```text
//! ┌──────────────┬─────────┬──────────────────────┬──────────────┐
//! │ Length (3B)  │ IV (3B) │ Ciphertext ‖ Tag     │ Signature?   │
//! └──────────────┴─────────┴──────────────────────┴──────────────┘
//! ```
//!
//! The length covers IV, ciphertext and tag. The 3-byte IV is the low three
//! bytes of the 12-byte GCM nonce; the upper nine bytes are always zero.

use crate::binary::{invalid_data, invalid_input, read_array, read_bytes, read_u24_be};
use crate::binary::{write_u24_be, BinaryRead, BinaryWrite, U24_MAX};
use crate::nanotdf::header::Header;
use std::io::{self, Read, Write};

/// Length of the IV stored on the wire
pub const PAYLOAD_IV_SIZE: usize = 3;

/// Length of the GCM nonce the wire IV expands to
pub const GCM_NONCE_SIZE: usize = 12;

/// Expand a 24-bit counter into a 12-byte GCM nonce
pub fn nonce_from_counter(counter: u32) -> [u8; GCM_NONCE_SIZE] {
    let mut nonce = [0u8; GCM_NONCE_SIZE];
    nonce[GCM_NONCE_SIZE - 3..].copy_from_slice(&counter.to_be_bytes()[1..]);
    nonce
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    iv: [u8; PAYLOAD_IV_SIZE],
    ciphertext_and_tag: Vec<u8>,
}

impl Payload {
    pub fn new(iv: [u8; PAYLOAD_IV_SIZE], ciphertext_and_tag: Vec<u8>) -> io::Result<Self> {
        if (PAYLOAD_IV_SIZE + ciphertext_and_tag.len()) as u64 > U24_MAX as u64 {
            return Err(invalid_input(format!(
                "payload too large for NanoTDF: {} bytes",
                ciphertext_and_tag.len()
            )));
        }
        Ok(Self {
            iv,
            ciphertext_and_tag,
        })
    }

    pub fn iv(&self) -> [u8; PAYLOAD_IV_SIZE] {
        self.iv
    }

    /// Full 12-byte nonce for the payload cipher
    pub fn nonce(&self) -> [u8; GCM_NONCE_SIZE] {
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        nonce[GCM_NONCE_SIZE - PAYLOAD_IV_SIZE..].copy_from_slice(&self.iv);
        nonce
    }

    pub fn ciphertext_and_tag(&self) -> &[u8] {
        &self.ciphertext_and_tag
    }
}

impl BinaryRead for Payload {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let len = read_u24_be(reader)? as usize;
        if len < PAYLOAD_IV_SIZE {
            return Err(invalid_data(format!("payload length {len} shorter than iv")));
        }
        let iv = read_array(reader)?;
        let ciphertext_and_tag = read_bytes(reader, len - PAYLOAD_IV_SIZE)?;
        Ok(Self {
            iv,
            ciphertext_and_tag,
        })
    }
}

impl BinaryWrite for Payload {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u24_be(writer, (PAYLOAD_IV_SIZE + self.ciphertext_and_tag.len()) as u32)?;
        writer.write_all(&self.iv)?;
        writer.write_all(&self.ciphertext_and_tag)
    }

    fn serialized_size(&self) -> usize {
        3 + PAYLOAD_IV_SIZE + self.ciphertext_and_tag.len()
    }
}

/// A complete NanoTDF container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NanoTdf {
    pub header: Header,
    pub payload: Payload,
    /// Trailing signature material, present when the header announces one
    pub signature: Option<Vec<u8>>,
}

impl NanoTdf {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self {
            header,
            payload,
            signature: None,
        }
    }

    /// Decode a container, rejecting trailing garbage
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut cursor = io::Cursor::new(bytes);
        let tdf = Self::read_from(&mut cursor)?;
        if cursor.position() as usize != bytes.len() {
            return Err(invalid_data(format!(
                "{} unexpected bytes after NanoTDF payload",
                bytes.len() - cursor.position() as usize
            )));
        }
        Ok(tdf)
    }
}

impl BinaryRead for NanoTdf {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let header = Header::read_from(reader)?;
        let payload = Payload::read_from(reader)?;
        let signature_size = header.payload_config().signature_size();
        let signature = if signature_size > 0 {
            Some(read_bytes(reader, signature_size)?)
        } else {
            None
        };
        Ok(Self {
            header,
            payload,
            signature,
        })
    }
}

impl BinaryWrite for NanoTdf {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.header.write_to(writer)?;
        self.payload.write_to(writer)?;
        if let Some(signature) = &self.signature {
            writer.write_all(signature)?;
        }
        Ok(())
    }

    fn serialized_size(&self) -> usize {
        self.header.serialized_size()
            + self.payload.serialized_size()
            + self.signature.as_ref().map_or(0, Vec::len)
    }
}
