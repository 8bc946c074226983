//! The 512-byte header record.
//!
//! ```text
//! 0x000 name      100   0x101 magic      6   0x1F0 offset       u32le
//! 0x064 mode        8   0x107 version    2   0x1F4 textoffset   u32le
//! 0x06C uid         8   0x109 uname     32   0x1F8 textsize     u32le
//! 0x074 gid         8   0x129 gname     32   0x1FC numfixuppgs  u32le
//! 0x07C size       12   0x149 devmajor   8
//! 0x088 mtime      12   0x151 devminor   8
//! 0x094 chksum      8   0x159 prefix   151
//! 0x09C type        1
//! 0x09D linkname  100
//! ```
//!
//! Numeric text fields are zero-padded octal followed by a NUL.

use std::ops::Range;
use std::str;

use error::{ErrorKind, Result};
use meta::EntryType;

pub const RECORD_SIZE: usize = 512;
/// Alignment of file content and size of the terminator.
pub const PAGE_SIZE: u64 = 4096;
pub const MAGIC: [u8; 6] = *b"visor ";

const NAME: Range<usize> = 0x000..0x064;
const MODE: Range<usize> = 0x064..0x06C;
const UID: Range<usize> = 0x06C..0x074;
const GID: Range<usize> = 0x074..0x07C;
const SIZE: Range<usize> = 0x07C..0x088;
const MTIME: Range<usize> = 0x088..0x094;
const CHKSUM: Range<usize> = 0x094..0x09C;
const TYPE: usize = 0x09C;
const MAGIC_FIELD: Range<usize> = 0x101..0x107;
const VERSION: Range<usize> = 0x107..0x109;
const UNAME: Range<usize> = 0x109..0x129;
const GNAME: Range<usize> = 0x129..0x149;
const DEVMAJOR: Range<usize> = 0x149..0x151;
const DEVMINOR: Range<usize> = 0x151..0x159;
const OFFSET: Range<usize> = 0x1F0..0x1F4;
const TEXTOFFSET: Range<usize> = 0x1F4..0x1F8;
const TEXTSIZE: Range<usize> = 0x1F8..0x1FC;
const NUMFIXUPPGS: Range<usize> = 0x1FC..0x200;

/// Metadata every archive entry carries regardless of its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub uid: u32,
    pub gid: u32,
    pub uname: &'static str,
    pub gname: &'static str,
    pub file_mode: u32,
    pub dir_mode: u32,
    pub magic: [u8; 6],
    pub version: [u8; 2],
}

pub const FORMAT: Format = Format {
    uid: 311,
    gid: 311,
    uname: "mts",
    gname: "mts",
    file_mode: 0o444,
    dir_mode: 0o755,
    magic: MAGIC,
    version: *b" \0",
};

impl Default for Format {
    fn default() -> Self { FORMAT }
}

/// The variable part of a record, as written.
#[derive(Debug, Clone)]
pub struct Header<'a> {
    pub name: &'a str,
    pub entry_type: EntryType,
    pub size: u64,
    pub mtime: u64,
    pub offset: u32,
}

impl<'a> Header<'a> {
    pub fn encode(&self, format: &Format) -> Result<[u8; RECORD_SIZE]> {
        let mut buf = [0; RECORD_SIZE];

        let name = self.name.as_bytes();
        if name.len() > NAME.len() {
            return Err(ErrorKind::NameTooLong { name: self.name.to_owned(), max: NAME.len() }.into());
        }
        buf[..name.len()].copy_from_slice(name);

        let mode = match self.entry_type {
            EntryType::Directory => format.dir_mode,
            _ => format.file_mode,
        };
        put_octal(&mut buf[MODE], mode as u64)?;
        put_octal(&mut buf[UID], format.uid as u64)?;
        put_octal(&mut buf[GID], format.gid as u64)?;
        put_octal(&mut buf[SIZE], self.size)?;
        put_octal(&mut buf[MTIME], self.mtime)?;
        buf[TYPE] = self.entry_type.as_byte();
        buf[MAGIC_FIELD].copy_from_slice(&format.magic);
        buf[VERSION].copy_from_slice(&format.version);
        put_str(&mut buf[UNAME], format.uname);
        put_str(&mut buf[GNAME], format.gname);
        put_octal(&mut buf[DEVMAJOR], 0)?;
        put_octal(&mut buf[DEVMINOR], 0)?;
        buf[OFFSET].copy_from_slice(&self.offset.to_le_bytes());
        // textoffset, textsize and numfixuppgs stay zero

        let sum = checksum(&buf);
        buf[CHKSUM].copy_from_slice(&sum);
        Ok(buf)
    }
}

/// Computes the `chksum` field for `record`, treating the field itself as spaces.
pub fn checksum(record: &[u8]) -> [u8; 8] {
    let sum = record.iter().enumerate()
        .map(|(i, &x)| if CHKSUM.contains(&i) { b' ' as u32 } else { x as u32 })
        .sum::<u32>() & 0o777777;
    let mut field = [0; 8];
    field[..6].copy_from_slice(format!("{:06o}", sum).as_bytes());
    field[7] = b' ';
    field
}

pub fn verify_checksum(record: &[u8]) -> bool {
    record.len() == RECORD_SIZE && record[CHKSUM] == checksum(record)
}

fn put_octal(field: &mut [u8], value: u64) -> Result<()> {
    let width = field.len() - 1;
    let digits = format!("{:0width$o}", value, width = width);
    if digits.len() > width {
        return Err(ErrorKind::FieldOverflow { value, width: field.len() }.into());
    }
    field[..width].copy_from_slice(digits.as_bytes());
    field[width] = 0;
    Ok(())
}

fn put_str(field: &mut [u8], value: &str) {
    let n = value.len().min(field.len());
    field[..n].copy_from_slice(&value.as_bytes()[..n]);
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub magic: [u8; 6],
    pub entry_type: EntryType,
    pub name: String,
    pub size: u64,
    pub offset: u32,
    pub textoffset: u32,
    pub textsize: u32,
    pub numfixuppgs: u32,
}

impl Record {
    /// Decodes without looking at the checksum.
    ///
    /// A live record must carry a UTF-8 name; the name of a record past the
    /// end of the archive is never used, so it is decoded lossily.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != RECORD_SIZE {
            return Err(ErrorKind::MalformedRecord { expected: RECORD_SIZE, actual: buf.len() }.into());
        }
        let mut magic = [0; 6];
        magic.copy_from_slice(&buf[MAGIC_FIELD]);
        let raw_name = trim_nul(&buf[NAME]);
        let name = match str::from_utf8(raw_name) {
            Ok(x) => x.to_owned(),
            Err(_) if magic != MAGIC => String::from_utf8_lossy(raw_name).into_owned(),
            Err(_) => return Err(ErrorKind::InvalidName(String::from_utf8_lossy(raw_name).into_owned()).into()),
        };
        Ok(Self {
            magic,
            entry_type: EntryType::from_byte(buf[TYPE]),
            name,
            size: parse_octal(trim_nul(&buf[SIZE])),
            offset: le32(&buf[OFFSET]),
            textoffset: le32(&buf[TEXTOFFSET]),
            textsize: le32(&buf[TEXTSIZE]),
            numfixuppgs: le32(&buf[NUMFIXUPPGS]),
        })
    }

    /// Whether this record is an entry rather than the end of the archive.
    pub fn is_live(&self) -> bool { self.magic == MAGIC }
}

fn trim_nul(x: &[u8]) -> &[u8] {
    let end = x.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
    &x[..end]
}

fn parse_octal(x: &[u8]) -> u64 {
    x.iter()
        .take_while(|&&c| c >= b'0' && c <= b'7')
        .fold(0, |acc, &c| acc * 8 + (c - b'0') as u64)
}

fn le32(x: &[u8]) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(x);
    u32::from_le_bytes(bytes)
}
