use std::io::{Seek, SeekFrom};

use error::Result;

/// Runs `f` with `stream` positioned at `pos`, then puts the cursor back where
/// it was, whether or not `f` succeeded.
pub fn at<S, T, F>(stream: &mut S, pos: u64, f: F) -> Result<T>
    where S: Seek + ?Sized, F: FnOnce(&mut S) -> Result<T>
{
    let saved = stream.seek(SeekFrom::Current(0))?;
    stream.seek(SeekFrom::Start(pos))?;
    let result = f(stream);
    stream.seek(SeekFrom::Start(saved))?;
    result
}

pub fn round_up(x: u64, multiple: u64) -> u64 {
    (x + multiple - 1) / multiple * multiple
}
