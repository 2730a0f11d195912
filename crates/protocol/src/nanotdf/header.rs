//! NanoTDF header
//!
//! ```text
//! magic+version (3B) · kas locator · ecc/binding mode (1B)
//!   · symmetric/payload config (1B) · policy · ephemeral public key
//! ```
//!
//! A header is immutable once built. The KAS rewrap endpoint is derived from
//! the KAS locator on demand rather than stored.

use crate::binary::{invalid_data, invalid_input, read_array, read_bytes, read_u8, write_u8};
use crate::binary::{BinaryRead, BinaryWrite};
use crate::nanotdf::policy::Policy;
use crate::nanotdf::resource_locator::ResourceLocator;
use std::io::{self, Read, Write};

/// Magic prefix shared by every NanoTDF version
pub const NANOTDF_MAGIC: [u8; 2] = *b"L1";

/// Format version, carried in the third header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NanoTdfVersion {
    /// `L1L`
    #[default]
    V12,
    /// `L1M`
    V13,
}

impl NanoTdfVersion {
    pub fn byte(self) -> u8 {
        match self {
            NanoTdfVersion::V12 => b'L',
            NanoTdfVersion::V13 => b'M',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'L' => Some(NanoTdfVersion::V12),
            b'M' => Some(NanoTdfVersion::V13),
            _ => None,
        }
    }

    /// The three magic-and-version bytes; this is also the HKDF salt input
    pub fn magic_bytes(self) -> [u8; 3] {
        [NANOTDF_MAGIC[0], NANOTDF_MAGIC[1], self.byte()]
    }
}

impl BinaryRead for NanoTdfVersion {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let bytes: [u8; 3] = read_array(reader)?;
        if bytes[..2] != NANOTDF_MAGIC {
            return Err(invalid_data(format!(
                "not a NanoTDF container: magic {:02X}{:02X}{:02X}",
                bytes[0], bytes[1], bytes[2]
            )));
        }
        NanoTdfVersion::from_byte(bytes[2])
            .ok_or_else(|| invalid_data(format!("unsupported NanoTDF version {:#04x}", bytes[2])))
    }
}

impl BinaryWrite for NanoTdfVersion {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.magic_bytes())
    }

    fn serialized_size(&self) -> usize {
        3
    }
}

/// Curve used for the ephemeral key and any ECDSA binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EccMode {
    Secp256r1 = 0x00,
    Secp384r1 = 0x01,
    Secp521r1 = 0x02,
    Secp256k1 = 0x03,
}

impl EccMode {
    pub fn from_bits(bits: u8) -> io::Result<Self> {
        match bits & 0x07 {
            0x00 => Ok(EccMode::Secp256r1),
            0x01 => Ok(EccMode::Secp384r1),
            0x02 => Ok(EccMode::Secp521r1),
            0x03 => Ok(EccMode::Secp256k1),
            other => Err(invalid_data(format!("unknown ecc mode {other}"))),
        }
    }

    /// Size of a SEC1 compressed point
    pub fn public_key_size(self) -> usize {
        match self {
            EccMode::Secp256r1 | EccMode::Secp256k1 => 33,
            EccMode::Secp384r1 => 49,
            EccMode::Secp521r1 => 67,
        }
    }

    /// Size of a raw `r || s` ECDSA signature
    pub fn signature_size(self) -> usize {
        match self {
            EccMode::Secp256r1 | EccMode::Secp256k1 => 64,
            EccMode::Secp384r1 => 96,
            EccMode::Secp521r1 => 132,
        }
    }
}

/// How the policy is bound to the negotiated key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyBindingMode {
    /// Truncated GCM tag over the policy body
    #[default]
    Gmac,
    /// ECDSA signature by the ephemeral key over the policy body digest
    Ecdsa,
}

/// Length of the GMAC policy binding
pub const GMAC_BINDING_SIZE: usize = 8;

/// ECC and binding mode byte: `USE_ECDSA(1b) | UNUSED(4b) | ECC(3b)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EccAndBindingMode {
    pub binding: PolicyBindingMode,
    pub ecc_mode: EccMode,
}

impl EccAndBindingMode {
    pub fn new(binding: PolicyBindingMode, ecc_mode: EccMode) -> Self {
        Self { binding, ecc_mode }
    }

    pub fn from_byte(byte: u8) -> io::Result<Self> {
        let binding = if byte & 0x80 != 0 {
            PolicyBindingMode::Ecdsa
        } else {
            PolicyBindingMode::Gmac
        };
        Ok(Self {
            binding,
            ecc_mode: EccMode::from_bits(byte)?,
        })
    }

    pub fn to_byte(self) -> u8 {
        let ecdsa = match self.binding {
            PolicyBindingMode::Ecdsa => 0x80,
            PolicyBindingMode::Gmac => 0x00,
        };
        ecdsa | self.ecc_mode as u8
    }

    /// Number of binding bytes that follow the policy body
    pub fn binding_size(self) -> usize {
        match self.binding {
            PolicyBindingMode::Gmac => GMAC_BINDING_SIZE,
            PolicyBindingMode::Ecdsa => self.ecc_mode.signature_size(),
        }
    }
}

/// Payload cipher, which in practice selects the GCM tag length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymmetricCipher {
    Aes256Gcm64 = 0x00,
    Aes256Gcm96 = 0x01,
    Aes256Gcm104 = 0x02,
    Aes256Gcm112 = 0x03,
    Aes256Gcm120 = 0x04,
    Aes256Gcm128 = 0x05,
}

impl SymmetricCipher {
    pub fn from_bits(bits: u8) -> io::Result<Self> {
        match bits & 0x0F {
            0x00 => Ok(SymmetricCipher::Aes256Gcm64),
            0x01 => Ok(SymmetricCipher::Aes256Gcm96),
            0x02 => Ok(SymmetricCipher::Aes256Gcm104),
            0x03 => Ok(SymmetricCipher::Aes256Gcm112),
            0x04 => Ok(SymmetricCipher::Aes256Gcm120),
            0x05 => Ok(SymmetricCipher::Aes256Gcm128),
            other => Err(invalid_data(format!("unknown symmetric cipher {other}"))),
        }
    }

    /// Authentication tag length in bytes
    pub fn tag_size(self) -> usize {
        match self {
            SymmetricCipher::Aes256Gcm64 => 8,
            SymmetricCipher::Aes256Gcm96 => 12,
            SymmetricCipher::Aes256Gcm104 => 13,
            SymmetricCipher::Aes256Gcm112 => 14,
            SymmetricCipher::Aes256Gcm120 => 15,
            SymmetricCipher::Aes256Gcm128 => 16,
        }
    }

    pub fn from_tag_size(bytes: usize) -> Option<Self> {
        match bytes {
            8 => Some(SymmetricCipher::Aes256Gcm64),
            12 => Some(SymmetricCipher::Aes256Gcm96),
            13 => Some(SymmetricCipher::Aes256Gcm104),
            14 => Some(SymmetricCipher::Aes256Gcm112),
            15 => Some(SymmetricCipher::Aes256Gcm120),
            16 => Some(SymmetricCipher::Aes256Gcm128),
            _ => None,
        }
    }
}

/// Symmetric and payload config byte: `HAS_SIG(1b) | SIG_ECC(3b) | CIPHER(4b)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricAndPayloadConfig {
    /// Curve of the trailing payload signature, when one is present
    pub signature: Option<EccMode>,
    pub cipher: SymmetricCipher,
}

impl SymmetricAndPayloadConfig {
    pub fn new(cipher: SymmetricCipher) -> Self {
        Self {
            signature: None,
            cipher,
        }
    }

    pub fn from_byte(byte: u8) -> io::Result<Self> {
        let signature = if byte & 0x80 != 0 {
            Some(EccMode::from_bits(byte >> 4)?)
        } else {
            None
        };
        Ok(Self {
            signature,
            cipher: SymmetricCipher::from_bits(byte)?,
        })
    }

    pub fn to_byte(self) -> u8 {
        let sig = self
            .signature
            .map_or(0x00, |ecc| 0x80 | ((ecc as u8) << 4));
        sig | self.cipher as u8
    }

    /// Bytes of trailing signature material (public key and `r || s`)
    pub fn signature_size(self) -> usize {
        self.signature
            .map_or(0, |ecc| ecc.public_key_size() + ecc.signature_size())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    version: NanoTdfVersion,
    kas: ResourceLocator,
    ecc_and_binding_mode: EccAndBindingMode,
    payload_config: SymmetricAndPayloadConfig,
    policy: Policy,
    ephemeral_public_key: Vec<u8>,
}

impl Header {
    /// Build a header, checking the ephemeral key and binding sizes against the modes
    pub fn new(
        version: NanoTdfVersion,
        kas: ResourceLocator,
        ecc_and_binding_mode: EccAndBindingMode,
        payload_config: SymmetricAndPayloadConfig,
        policy: Policy,
        ephemeral_public_key: Vec<u8>,
    ) -> io::Result<Self> {
        let expected = ecc_and_binding_mode.ecc_mode.public_key_size();
        if ephemeral_public_key.len() != expected {
            return Err(invalid_input(format!(
                "ephemeral public key is {} bytes, expected {expected}",
                ephemeral_public_key.len()
            )));
        }
        let binding = ecc_and_binding_mode.binding_size();
        if policy.binding().len() != binding {
            return Err(invalid_input(format!(
                "policy binding is {} bytes, expected {binding}",
                policy.binding().len()
            )));
        }
        Ok(Self {
            version,
            kas,
            ecc_and_binding_mode,
            payload_config,
            policy,
            ephemeral_public_key,
        })
    }

    pub fn version(&self) -> NanoTdfVersion {
        self.version
    }

    pub fn kas(&self) -> &ResourceLocator {
        &self.kas
    }

    pub fn ecc_and_binding_mode(&self) -> EccAndBindingMode {
        self.ecc_and_binding_mode
    }

    pub fn payload_config(&self) -> SymmetricAndPayloadConfig {
        self.payload_config
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn ephemeral_public_key(&self) -> &[u8] {
        &self.ephemeral_public_key
    }

    /// Payload authentication tag length in bytes
    pub fn auth_tag_length(&self) -> usize {
        self.payload_config.cipher.tag_size()
    }

    /// KAS base URL from the locator
    pub fn kas_url(&self) -> io::Result<String> {
        self.kas.to_url()
    }

    /// `{kas}/v2/rewrap`
    pub fn kas_rewrap_url(&self) -> io::Result<String> {
        Ok(format!("{}/v2/rewrap", self.kas.to_url()?.trim_end_matches('/')))
    }
}

impl BinaryRead for Header {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let version = NanoTdfVersion::read_from(reader)?;
        let kas = ResourceLocator::read_from(reader)?;
        let ecc_and_binding_mode = EccAndBindingMode::from_byte(read_u8(reader)?)?;
        let payload_config = SymmetricAndPayloadConfig::from_byte(read_u8(reader)?)?;
        let policy = Policy::read_with_mode(reader, ecc_and_binding_mode)?;
        let ephemeral_public_key =
            read_bytes(reader, ecc_and_binding_mode.ecc_mode.public_key_size())?;
        Ok(Self {
            version,
            kas,
            ecc_and_binding_mode,
            payload_config,
            policy,
            ephemeral_public_key,
        })
    }
}

impl BinaryWrite for Header {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.version.write_to(writer)?;
        self.kas.write_to(writer)?;
        write_u8(writer, self.ecc_and_binding_mode.to_byte())?;
        write_u8(writer, self.payload_config.to_byte())?;
        self.policy.write_to(writer)?;
        writer.write_all(&self.ephemeral_public_key)
    }

    fn serialized_size(&self) -> usize {
        self.version.serialized_size()
            + self.kas.serialized_size()
            + 2
            + self.policy.serialized_size()
            + self.ephemeral_public_key.len()
    }
}
