//! Streaming zip32 writer for the two-entry TDF3 archive
//!
//! Entries are stored uncompressed with bit 3 set, so each local header
//! carries zero CRC and sizes and the real values follow the data in a
//! descriptor. Nothing is seeked or rewritten; every record is produced in
//! emission order.
//!
//! ```text
//! [local header 0.payload] [segments…] [descriptor]
//! [local header 0.manifest.json] [json] [descriptor]
//! [central directory × 2] [end of central directory]
//! ```

use crate::error::TdfError;
use chrono::{Datelike, NaiveDateTime, Timelike};
use crc32fast::Hasher;

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

const VERSION_NEEDED: u16 = 20;
/// Unix host, spec version 2.0
const VERSION_MADE_BY: u16 = 0x0314;
/// Bit 3: sizes and CRC are in the data descriptor
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const METHOD_STORED: u16 = 0;
/// `-rw-r--r--` regular file
const EXTERNAL_ATTRIBUTES: u32 = 0x81A4_0000;

pub(crate) const LOCAL_HEADER_FIXED_SIZE: u64 = 30;
pub(crate) const DATA_DESCRIPTOR_SIZE: u64 = 16;

#[derive(Debug)]
struct OpenEntry {
    name: String,
    offset: u64,
    crc: Hasher,
    size: u64,
}

#[derive(Debug, Clone)]
struct FinishedEntry {
    name: String,
    offset: u32,
    crc: u32,
    size: u32,
}

/// Produces the byte records of a zip32 archive one at a time
#[derive(Debug)]
pub(crate) struct ZipStream {
    offset: u64,
    dos_time: u16,
    dos_date: u16,
    current: Option<OpenEntry>,
    entries: Vec<FinishedEntry>,
}

impl ZipStream {
    pub(crate) fn new(modified: NaiveDateTime) -> Self {
        let (dos_time, dos_date) = dos_timestamp(modified);
        Self {
            offset: 0,
            dos_time,
            dos_date,
            current: None,
            entries: Vec::new(),
        }
    }

    /// Total bytes produced so far
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Local file header for a new entry
    pub(crate) fn start_entry(&mut self, name: &str) -> Result<Vec<u8>, TdfError> {
        if let Some(open) = &self.current {
            return Err(TdfError::extraction(format!(
                "zip entry {} still open",
                open.name
            )));
        }
        let name_len = u16::try_from(name.len())
            .map_err(|_| TdfError::extraction(format!("zip entry name too long: {name}")))?;

        let mut header = Vec::with_capacity(LOCAL_HEADER_FIXED_SIZE as usize + name.len());
        put_u32(&mut header, LOCAL_FILE_HEADER_SIGNATURE);
        put_u16(&mut header, VERSION_NEEDED);
        put_u16(&mut header, FLAG_DATA_DESCRIPTOR);
        put_u16(&mut header, METHOD_STORED);
        put_u16(&mut header, self.dos_time);
        put_u16(&mut header, self.dos_date);
        put_u32(&mut header, 0);
        put_u32(&mut header, 0);
        put_u32(&mut header, 0);
        put_u16(&mut header, name_len);
        put_u16(&mut header, 0);
        header.extend_from_slice(name.as_bytes());

        self.current = Some(OpenEntry {
            name: name.to_string(),
            offset: self.offset,
            crc: Hasher::new(),
            size: 0,
        });
        self.advance(header.len() as u64)?;
        Ok(header)
    }

    /// Account for entry data the caller emits itself
    pub(crate) fn write_data(&mut self, data: &[u8]) -> Result<(), TdfError> {
        let open = self
            .current
            .as_mut()
            .ok_or_else(|| TdfError::extraction("zip data written outside an entry"))?;
        open.crc.update(data);
        open.size += data.len() as u64;
        self.advance(data.len() as u64)
    }

    /// Data descriptor closing the open entry
    pub(crate) fn finish_entry(&mut self) -> Result<Vec<u8>, TdfError> {
        let open = self
            .current
            .take()
            .ok_or_else(|| TdfError::extraction("no zip entry to finish"))?;
        let size = zip32(open.size, "entry size")?;
        let entry = FinishedEntry {
            name: open.name,
            offset: zip32(open.offset, "entry offset")?,
            crc: open.crc.finalize(),
            size,
        };

        let mut descriptor = Vec::with_capacity(DATA_DESCRIPTOR_SIZE as usize);
        put_u32(&mut descriptor, DATA_DESCRIPTOR_SIGNATURE);
        put_u32(&mut descriptor, entry.crc);
        put_u32(&mut descriptor, entry.size);
        put_u32(&mut descriptor, entry.size);

        self.entries.push(entry);
        self.advance(descriptor.len() as u64)?;
        Ok(descriptor)
    }

    /// Central directory records and the end-of-central-directory record
    pub(crate) fn finish(&mut self) -> Result<Vec<u8>, TdfError> {
        if self.current.is_some() {
            return Err(TdfError::extraction("zip entry still open at finish"));
        }
        let cd_offset = zip32(self.offset, "central directory offset")?;
        let entry_count = u16::try_from(self.entries.len())
            .map_err(|_| TdfError::ResourceLimit("too many zip entries".to_string()))?;

        let mut out = Vec::new();
        for entry in &self.entries {
            put_u32(&mut out, CENTRAL_DIRECTORY_SIGNATURE);
            put_u16(&mut out, VERSION_MADE_BY);
            put_u16(&mut out, VERSION_NEEDED);
            put_u16(&mut out, FLAG_DATA_DESCRIPTOR);
            put_u16(&mut out, METHOD_STORED);
            put_u16(&mut out, self.dos_time);
            put_u16(&mut out, self.dos_date);
            put_u32(&mut out, entry.crc);
            put_u32(&mut out, entry.size);
            put_u32(&mut out, entry.size);
            put_u16(&mut out, entry.name.len() as u16);
            put_u16(&mut out, 0);
            put_u16(&mut out, 0);
            put_u16(&mut out, 0);
            put_u16(&mut out, 0);
            put_u32(&mut out, EXTERNAL_ATTRIBUTES);
            put_u32(&mut out, entry.offset);
            out.extend_from_slice(entry.name.as_bytes());
        }
        let cd_size = zip32(out.len() as u64, "central directory size")?;

        put_u32(&mut out, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, entry_count);
        put_u16(&mut out, entry_count);
        put_u32(&mut out, cd_size);
        put_u32(&mut out, cd_offset);
        put_u16(&mut out, 0);

        self.advance(out.len() as u64)?;
        Ok(out)
    }

    fn advance(&mut self, len: u64) -> Result<(), TdfError> {
        self.offset += len;
        zip32(self.offset, "archive size").map(|_| ())
    }
}

fn zip32(value: u64, what: &str) -> Result<u32, TdfError> {
    u32::try_from(value).map_err(|_| {
        TdfError::ResourceLimit(format!("{what} {value} exceeds zip32 limits; zip64 is not supported"))
    })
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// MS-DOS time and date fields; years before 1980 clamp to 1980-01-01
fn dos_timestamp(at: NaiveDateTime) -> (u16, u16) {
    if at.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let time = (at.hour() << 11) | (at.minute() << 5) | (at.second() / 2);
    let date = (((at.year() - 1980) as u32) << 9) | (at.month() << 5) | at.day();
    (time as u16, date as u16)
}
