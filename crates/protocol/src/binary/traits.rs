//! Codec traits shared by the NanoTDF structures

use std::io::{self, Read, Write};

/// Decode a value from a byte stream
pub trait BinaryRead: Sized {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self>;
}

/// Encode a value to a byte stream
pub trait BinaryWrite {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Exact number of bytes `write_to` produces
    fn serialized_size(&self) -> usize;

    /// Encode into a freshly allocated buffer
    fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}
