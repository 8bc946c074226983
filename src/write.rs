use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Component, Path};
use std::time::UNIX_EPOCH;

use failure::ResultExt;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile;
use walkdir::WalkDir;

use error::{ErrorKind, Result};
use header::{Format, Header, PAGE_SIZE, RECORD_SIZE};
use meta::{Data, Entry, EntryType, Progress, Summary};
use seek;

const ZERO_PAGE: [u8; PAGE_SIZE as usize] = [0; PAGE_SIZE as usize];

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Compress the finished archive.
    pub gzip: bool,
    pub format: Format,
}

/// Lists everything under `root` in pre-order, so every directory precedes its contents.
///
/// Symlinks are archived as what they point to: a link to a file becomes a
/// file entry with the target's content, a link to a directory becomes an
/// empty directory entry whose target is not walked.
pub fn discover(root: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|_| format!("failed to walk {}", root.display()))?;
        let path = entry.path();
        let mut name = match archive_name(path.strip_prefix(root)?) {
            Some(x) => x,
            None => {
                warn!("skipping non-unicode path {}", path.display());
                continue;
            }
        };
        let meta = if entry.path_is_symlink() {
            match fs::metadata(path) {
                Ok(x) => x,
                Err(e) => {
                    warn!("skipping dangling symlink {}: {}", path.display(), e);
                    continue;
                }
            }
        } else {
            entry.metadata()
                .with_context(|_| format!("failed to access metadata for {}", path.display()))?
        };
        let data = if meta.is_dir() {
            name.push('/');
            Data::Directory
        } else if meta.is_file() {
            Data::Regular { length: meta.len(), offset: 0 }
        } else {
            warn!("skipping {}: not a regular file or directory", path.display());
            continue;
        };
        let mtime = meta.modified()
            .with_context(|_| format!("failed to read mtime of {}", path.display()))?
            .duration_since(UNIX_EPOCH).map(|x| x.as_secs()).unwrap_or(0);
        entries.push(Entry { source: path.to_owned(), name, mtime, data, slot: 0 });
    }
    Ok(entries)
}

fn archive_name(rel: &Path) -> Option<String> {
    let parts = rel.components()
        .map(|c| match c {
            Component::Normal(x) => x.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

fn header(entry: &Entry) -> Header {
    let (size, offset) = match entry.data {
        Data::Regular { length, offset } => (length, offset),
        Data::Directory => (0, 0),
    };
    Header { name: &entry.name, entry_type: entry.entry_type(), size, mtime: entry.mtime, offset }
}

/// Writes `entries` as a complete archive: every header, then every file's
/// content on its own page with the owning header rewritten to point at it,
/// then the terminator page.
pub fn write_archive<W>(entries: &mut [Entry], out: &mut W, format: &Format,
                        progress: &mut dyn FnMut(&Progress)) -> Result<Summary>
    where W: Write + Seek
{
    let mut status = Progress {
        total_bytes: entries.iter().map(|e| match e.data {
            Data::Regular { length, .. } => length,
            Data::Directory => 0,
        }).sum(),
        ..Progress::default()
    };
    let mut summary = Summary::default();

    for entry in entries.iter_mut() {
        entry.slot = out.seek(SeekFrom::Current(0))?;
        out.write_all(&header(entry).encode(format)?)?;
        debug!("header 0x{:08X} {}", entry.slot, entry.name);
    }

    // Leave at least one zero record between the headers and the first file's
    // content so a reader's scan can never run into it. Without files the
    // terminator serves that purpose.
    if entries.iter().any(|e| e.entry_type() == EntryType::File) {
        let headers_end = out.seek(SeekFrom::Current(0))?;
        out.seek(SeekFrom::Start(headers_end + RECORD_SIZE as u64))?;
    }

    for entry in entries.iter_mut() {
        let expected = match entry.data {
            Data::Regular { length, .. } => length,
            Data::Directory => {
                summary.directories += 1;
                continue;
            }
        };

        let start = seek::round_up(out.seek(SeekFrom::Current(0))?, PAGE_SIZE);
        if start > u32::max_value() as u64 {
            return Err(ErrorKind::OffsetOverflow(start).into());
        }
        out.seek(SeekFrom::Start(start))?;
        let mut file = File::open(&entry.source)
            .with_context(|_| format!("failed to open {}", entry.source.display()))?;
        let length = io::copy(&mut file, &mut *out)
            .with_context(|_| format!("failed to archive {}", entry.source.display()))?;
        if length < PAGE_SIZE {
            out.write_all(&ZERO_PAGE[length as usize..])?;
        }
        if length != expected {
            warn!("{} changed size while archiving ({} -> {} bytes)", entry.source.display(), expected, length);
        }
        debug!("content 0x{:08X} {} ({} bytes)", start, entry.name, length);

        entry.data = Data::Regular { length, offset: start as u32 };
        let record = header(entry).encode(format)?;
        seek::at(&mut *out, entry.slot, |out| { out.write_all(&record)?; Ok(()) })?;

        summary.files += 1;
        summary.bytes += length;
        status.entries += 1;
        status.bytes += length;
        progress(&status);
    }

    out.write_all(&ZERO_PAGE)?;
    out.flush()?;
    Ok(summary)
}

/// Archives the tree under `source` into a new file at `archive`.
pub fn create(source: &Path, archive: &Path, options: &Options,
              progress: &mut dyn FnMut(&Progress)) -> Result<Summary> {
    let meta = fs::metadata(source).with_context(|_| format!("failed to access {}", source.display()))?;
    if !meta.is_dir() {
        bail!("{} is not a directory", source.display());
    }
    let mut entries = discover(source)?;
    // an archive being overwritten inside its own source tree must not archive itself
    if let Ok(target) = fs::canonicalize(archive) {
        entries.retain(|e| fs::canonicalize(&e.source).ok().as_ref() != Some(&target));
    }
    info!("archiving {} entries from {}", entries.len(), source.display());

    let file = File::create(archive).with_context(|_| format!("failed to create {}", archive.display()))?;
    if !options.gzip {
        return Ok(write_archive(&mut entries, &mut BufWriter::new(file), &options.format, progress)
                  .with_context(|_| format!("failed to write {}", archive.display()))?);
    }

    // The writer seeks back into the header region, so build uncompressed first.
    let mut scratch = tempfile::tempfile().context("failed to create temporary file")?;
    let summary = write_archive(&mut entries, &mut BufWriter::new(&mut scratch), &options.format, progress)
        .with_context(|_| format!("failed to write {}", archive.display()))?;
    scratch.seek(SeekFrom::Start(0))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    io::copy(&mut scratch, &mut encoder).with_context(|_| format!("failed to compress {}", archive.display()))?;
    encoder.finish()?.flush()?;
    Ok(summary)
}
