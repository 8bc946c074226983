use failure::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "malformed record: expected {} bytes, got {}", expected, actual)]
    MalformedRecord { expected: usize, actual: usize },
    #[fail(display = "short read at 0x{:X}: expected {} bytes, got {}", position, expected, actual)]
    ShortRead { position: u64, expected: u64, actual: u64 },
    #[fail(display = "missing directory argument (-C DIR) for creating an archive")]
    MissingArgument,
    #[fail(display = "entry name {:?} is not valid UTF-8", _0)]
    InvalidName(String),
    #[fail(display = "entry name {:?} does not fit in {} bytes", name, max)]
    NameTooLong { name: String, max: usize },
    #[fail(display = "value {} does not fit in a {}-byte octal field", value, width)]
    FieldOverflow { value: u64, width: usize },
    #[fail(display = "content offset {} is beyond the 32-bit offset field", _0)]
    OffsetOverflow(u64),
    #[fail(display = "refusing to extract unsafe path {:?}", _0)]
    UnsafePath(String),
}

/// Finds the `ErrorKind` anywhere in the cause chain of `err`.
#[cfg(test)]
pub fn kind(err: &Error) -> Option<&ErrorKind> {
    err.iter_chain().filter_map(|x| x.downcast_ref::<ErrorKind>()).next()
}
