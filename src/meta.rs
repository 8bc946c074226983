use std::path::PathBuf;

/// Type codes of the `type` header byte. Only `File` and `Directory` are ever
/// written or extracted; the rest are recognized so they can be reported.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Link,
    Symlink,
    CharDevice,
    BlockDevice,
    Directory,
    Fifo,
    SharedFile,
    GnuLongLink,
    GnuLongName,
    Other(u8),
}

impl EntryType {
    pub fn from_byte(x: u8) -> Self {
        use self::EntryType::*;
        match x {
            b'0' => File,
            b'1' => Link,
            b'2' => Symlink,
            b'3' => CharDevice,
            b'4' => BlockDevice,
            b'5' => Directory,
            b'6' => Fifo,
            b'7' => SharedFile,
            b'K' => GnuLongLink,
            b'L' => GnuLongName,
            x => Other(x),
        }
    }

    pub fn as_byte(&self) -> u8 {
        use self::EntryType::*;
        match *self {
            File => b'0',
            Link => b'1',
            Symlink => b'2',
            CharDevice => b'3',
            BlockDevice => b'4',
            Directory => b'5',
            Fifo => b'6',
            SharedFile => b'7',
            GnuLongLink => b'K',
            GnuLongName => b'L',
            Other(x) => x,
        }
    }
}

/// One discovered entry of a tree being archived.
///
/// `slot` and the `offset` of regular files start out zero and are filled in
/// by the header and content passes respectively.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Location on disk.
    pub source: PathBuf,
    /// Name within the archive; directories end in `/`.
    pub name: String,
    pub mtime: u64,
    pub data: Data,
    /// Absolute position of this entry's header record.
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Regular {
        length: u64,
        offset: u32,
    },
    Directory,
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        match self.data {
            Data::Regular { .. } => EntryType::File,
            Data::Directory => EntryType::Directory,
        }
    }
}

/// Running totals reported while an archive is written or extracted.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub entries: u64,
    pub bytes: u64,
    /// Zero when unknown in advance.
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}
