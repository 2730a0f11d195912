//! Resource locator: the compact URL encoding used for the KAS and remote policies
//!
//! ```text
//! ┌──────────────────────┬──────────────┬────────────┬──────────────────────┐
//! │ IdType(4b)|Proto(4b) │ Body Len (1B)│ Body (var) │ Identifier (0/2/8/32)│
//! └──────────────────────┴──────────────┴────────────┴──────────────────────┘
//! ```

use crate::binary::{invalid_data, invalid_input, read_bytes, read_u8, write_u8};
use crate::binary::{BinaryRead, BinaryWrite};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Http = 0x0,
    Https = 0x1,
    /// Shared resource directory; the body is a lookup key, not a host
    SharedResourceDirectory = 0xF,
}

impl Protocol {
    fn from_nibble(nibble: u8) -> io::Result<Self> {
        match nibble & 0x0F {
            0x0 => Ok(Protocol::Http),
            0x1 => Ok(Protocol::Https),
            0xF => Ok(Protocol::SharedResourceDirectory),
            other => Err(invalid_data(format!("unknown locator protocol {other:#x}"))),
        }
    }

    fn scheme(self) -> Option<&'static str> {
        match self {
            Protocol::Http => Some("http://"),
            Protocol::Https => Some("https://"),
            Protocol::SharedResourceDirectory => None,
        }
    }
}

/// Length of the optional key identifier carried after the body
fn identifier_len(nibble: u8) -> io::Result<usize> {
    match nibble {
        0x0 => Ok(0),
        0x1 => Ok(2),
        0x2 => Ok(8),
        0x3 => Ok(32),
        other => Err(invalid_data(format!("unknown identifier type {other:#x}"))),
    }
}

fn identifier_nibble(len: usize) -> u8 {
    match len {
        2 => 0x1,
        8 => 0x2,
        32 => 0x3,
        _ => 0x0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    protocol: Protocol,
    body: Vec<u8>,
    identifier: Option<Vec<u8>>,
}

impl ResourceLocator {
    pub fn new(protocol: Protocol, body: impl Into<Vec<u8>>) -> Self {
        Self {
            protocol,
            body: body.into(),
            identifier: None,
        }
    }

    /// Parse an `http://` or `https://` URL
    pub fn from_url(url: &str) -> io::Result<Self> {
        let (protocol, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (Protocol::Https, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (Protocol::Http, rest)
        } else {
            return Err(invalid_input(format!(
                "locator url must start with http:// or https://: {url}"
            )));
        };
        if rest.len() > u8::MAX as usize {
            return Err(invalid_input(format!(
                "locator body too long: {} bytes (max 255)",
                rest.len()
            )));
        }
        Ok(Self::new(protocol, rest.as_bytes()))
    }

    /// Attach a key identifier (2, 8 or 32 bytes)
    pub fn with_identifier(mut self, identifier: Vec<u8>) -> io::Result<Self> {
        match identifier.len() {
            0 => self.identifier = None,
            2 | 8 | 32 => self.identifier = Some(identifier),
            n => return Err(invalid_input(format!("invalid identifier length {n}"))),
        }
        Ok(self)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn identifier(&self) -> Option<&[u8]> {
        self.identifier.as_deref()
    }

    pub fn to_url(&self) -> io::Result<String> {
        let scheme = self.protocol.scheme().ok_or_else(|| {
            invalid_data("shared resource directory locators have no url form")
        })?;
        let body = std::str::from_utf8(&self.body)
            .map_err(|_| invalid_data("locator body is not utf-8"))?;
        Ok(format!("{scheme}{body}"))
    }
}

impl BinaryRead for ResourceLocator {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let lead = read_u8(reader)?;
        let protocol = Protocol::from_nibble(lead)?;
        let id_len = identifier_len(lead >> 4)?;
        let body_len = read_u8(reader)? as usize;
        let body = read_bytes(reader, body_len)?;
        let identifier = if id_len > 0 {
            Some(read_bytes(reader, id_len)?)
        } else {
            None
        };
        Ok(Self {
            protocol,
            body,
            identifier,
        })
    }
}

impl BinaryWrite for ResourceLocator {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let body_len = u8::try_from(self.body.len()).map_err(|_| {
            invalid_input(format!(
                "locator body too long: {} bytes (max 255)",
                self.body.len()
            ))
        })?;
        let id_nibble = identifier_nibble(self.identifier.as_ref().map_or(0, Vec::len));
        write_u8(writer, (id_nibble << 4) | self.protocol as u8)?;
        write_u8(writer, body_len)?;
        writer.write_all(&self.body)?;
        if let Some(id) = &self.identifier {
            writer.write_all(id)?;
        }
        Ok(())
    }

    fn serialized_size(&self) -> usize {
        2 + self.body.len() + self.identifier.as_ref().map_or(0, Vec::len)
    }
}
