//! NanoTDF policy section: a type byte, a mode-dependent body, and the binding
//!
//! The binding length is not self-describing; it is fixed by the header's
//! ECC/binding mode, so decoding goes through [`Policy::read_with_mode`].

use crate::binary::{checked_u16_len, invalid_data, read_bytes, read_u16_be, read_u8};
use crate::binary::{write_u16_be, write_u8, BinaryRead, BinaryWrite};
use crate::nanotdf::header::EccAndBindingMode;
use crate::nanotdf::resource_locator::ResourceLocator;
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PolicyType {
    Remote = 0x00,
    EmbeddedPlaintext = 0x01,
    EmbeddedEncrypted = 0x02,
    EmbeddedEncryptedWithKeyAccess = 0x03,
}

impl PolicyType {
    pub fn from_byte(byte: u8) -> io::Result<Self> {
        match byte {
            0x00 => Ok(PolicyType::Remote),
            0x01 => Ok(PolicyType::EmbeddedPlaintext),
            0x02 => Ok(PolicyType::EmbeddedEncrypted),
            0x03 => Ok(PolicyType::EmbeddedEncryptedWithKeyAccess),
            other => Err(invalid_data(format!("unknown policy type {other:#04x}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyBody {
    Remote(ResourceLocator),
    EmbeddedPlaintext(Vec<u8>),
    /// Policy JSON encrypted with the payload key under the reserved IV 0
    EmbeddedEncrypted(Vec<u8>),
    EmbeddedEncryptedWithKeyAccess {
        content: Vec<u8>,
        key_access: ResourceLocator,
        ephemeral_key: Vec<u8>,
    },
}

impl PolicyBody {
    pub fn policy_type(&self) -> PolicyType {
        match self {
            PolicyBody::Remote(_) => PolicyType::Remote,
            PolicyBody::EmbeddedPlaintext(_) => PolicyType::EmbeddedPlaintext,
            PolicyBody::EmbeddedEncrypted(_) => PolicyType::EmbeddedEncrypted,
            PolicyBody::EmbeddedEncryptedWithKeyAccess { .. } => {
                PolicyType::EmbeddedEncryptedWithKeyAccess
            }
        }
    }

    /// Bytes the binding is computed over
    pub fn content(&self) -> io::Result<Vec<u8>> {
        match self {
            PolicyBody::Remote(locator) => locator.to_bytes(),
            PolicyBody::EmbeddedPlaintext(content)
            | PolicyBody::EmbeddedEncrypted(content)
            | PolicyBody::EmbeddedEncryptedWithKeyAccess { content, .. } => Ok(content.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    body: PolicyBody,
    binding: Vec<u8>,
}

impl Policy {
    pub fn new(body: PolicyBody, binding: Vec<u8>) -> Self {
        Self { body, binding }
    }

    pub fn body(&self) -> &PolicyBody {
        &self.body
    }

    pub fn binding(&self) -> &[u8] {
        &self.binding
    }

    /// Decode a policy whose binding and key sizes are given by `mode`
    pub fn read_with_mode<R: Read>(reader: &mut R, mode: EccAndBindingMode) -> io::Result<Self> {
        let policy_type = PolicyType::from_byte(read_u8(reader)?)?;
        let body = match policy_type {
            PolicyType::Remote => PolicyBody::Remote(ResourceLocator::read_from(reader)?),
            PolicyType::EmbeddedPlaintext => PolicyBody::EmbeddedPlaintext(read_content(reader)?),
            PolicyType::EmbeddedEncrypted => PolicyBody::EmbeddedEncrypted(read_content(reader)?),
            PolicyType::EmbeddedEncryptedWithKeyAccess => {
                let content = read_content(reader)?;
                let key_access = ResourceLocator::read_from(reader)?;
                let ephemeral_key = read_bytes(reader, mode.ecc_mode.public_key_size())?;
                PolicyBody::EmbeddedEncryptedWithKeyAccess {
                    content,
                    key_access,
                    ephemeral_key,
                }
            }
        };
        let binding = read_bytes(reader, mode.binding_size())?;
        Ok(Self { body, binding })
    }
}

fn read_content<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u16_be(reader)? as usize;
    read_bytes(reader, len)
}

fn write_content<W: Write>(writer: &mut W, content: &[u8]) -> io::Result<()> {
    write_u16_be(writer, checked_u16_len(content.len(), "policy content")?)?;
    writer.write_all(content)
}

impl BinaryWrite for Policy {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u8(writer, self.body.policy_type() as u8)?;
        match &self.body {
            PolicyBody::Remote(locator) => locator.write_to(writer)?,
            PolicyBody::EmbeddedPlaintext(content) | PolicyBody::EmbeddedEncrypted(content) => {
                write_content(writer, content)?
            }
            PolicyBody::EmbeddedEncryptedWithKeyAccess {
                content,
                key_access,
                ephemeral_key,
            } => {
                write_content(writer, content)?;
                key_access.write_to(writer)?;
                writer.write_all(ephemeral_key)?;
            }
        }
        writer.write_all(&self.binding)
    }

    fn serialized_size(&self) -> usize {
        let body = match &self.body {
            PolicyBody::Remote(locator) => locator.serialized_size(),
            PolicyBody::EmbeddedPlaintext(content) | PolicyBody::EmbeddedEncrypted(content) => {
                2 + content.len()
            }
            PolicyBody::EmbeddedEncryptedWithKeyAccess {
                content,
                key_access,
                ephemeral_key,
            } => 2 + content.len() + key_access.serialized_size() + ephemeral_key.len(),
        };
        1 + body + self.binding.len()
    }
}
