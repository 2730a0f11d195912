//! Big-endian binary primitives for the NanoTDF codec
//!
//! Every multi-byte integer in a NanoTDF container is big-endian. The helpers
//! here are the only place that touches byte order; the codec types build on
//! them through [`BinaryRead`] and [`BinaryWrite`].

use std::io::{self, Read, Write};

pub mod traits;

pub use traits::{BinaryRead, BinaryWrite};

/// Largest value representable in a 24-bit field
pub const U24_MAX: u32 = 0x00FF_FFFF;

pub fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let [byte] = read_array::<R, 1>(reader)?;
    Ok(byte)
}

pub fn read_u16_be<R: Read>(reader: &mut R) -> io::Result<u16> {
    Ok(u16::from_be_bytes(read_array(reader)?))
}

/// Read a 3-byte big-endian integer, widened to u32
pub fn read_u24_be<R: Read>(reader: &mut R) -> io::Result<u32> {
    let [a, b, c] = read_array::<R, 3>(reader)?;
    Ok(u32::from_be_bytes([0, a, b, c]))
}

/// Read a fixed-size array
pub fn read_array<R: Read, const N: usize>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read exactly `n` bytes
pub fn read_bytes<R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> io::Result<()> {
    writer.write_all(&[value])
}

pub fn write_u16_be<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

/// Write the low 24 bits of `value`; values that do not fit are rejected
pub fn write_u24_be<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    if value > U24_MAX {
        return Err(invalid_input(format!(
            "value {value:#x} does not fit in 24 bits"
        )));
    }
    writer.write_all(&value.to_be_bytes()[1..])
}

/// Length-check a field before narrowing it to a u16 prefix
pub fn checked_u16_len(len: usize, field: &str) -> io::Result<u16> {
    u16::try_from(len).map_err(|_| invalid_input(format!("{field} too large: {len} bytes")))
}

pub(crate) fn invalid_input(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.into())
}

pub(crate) fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}
