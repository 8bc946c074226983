use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use failure::ResultExt;
use flate2::read::GzDecoder;
use tempfile;

use error::{ErrorKind, Result};
use header::{verify_checksum, Record, RECORD_SIZE};
use meta::{EntryType, Progress, Summary};
use seek;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Sequential access to the records of an archive, with random access to
/// their content.
pub struct Archive<R> {
    inner: R,
}

impl Archive<Box<dyn ReadSeek>> {
    /// Opens the archive at `path`, transparently decompressing it if it is
    /// gzipped. Offsets always refer to the decompressed stream.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_context(|_| format!("failed to open {}", path.display()))?;
        let mut magic = Vec::with_capacity(GZIP_MAGIC.len());
        (&mut file).take(GZIP_MAGIC.len() as u64).read_to_end(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let inner: Box<dyn ReadSeek> = if magic == GZIP_MAGIC {
            debug!("{} is gzip compressed", path.display());
            // records point backwards and forwards, so keep a seekable copy
            let mut scratch = tempfile::tempfile().context("failed to create temporary file")?;
            io::copy(&mut GzDecoder::new(BufReader::new(file)), &mut scratch)
                .with_context(|_| format!("failed to decompress {}", path.display()))?;
            scratch.seek(SeekFrom::Start(0))?;
            Box::new(BufReader::new(scratch))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Archive::new(inner))
    }
}

impl<R: Read + Seek> Archive<R> {
    pub fn new(inner: R) -> Self { Self { inner } }

    /// Reads the record at the cursor, returning its position along with it,
    /// or `None` once a record without the magic is found.
    pub fn next_record(&mut self) -> Result<Option<(u64, Record)>> {
        let pos = self.inner.seek(SeekFrom::Current(0))?;
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        self.inner.by_ref().take(RECORD_SIZE as u64).read_to_end(&mut buf)?;
        if buf.len() < RECORD_SIZE {
            return Err(ErrorKind::ShortRead {
                position: pos, expected: RECORD_SIZE as u64, actual: buf.len() as u64,
            }.into());
        }
        let record = Record::decode(&buf)?;
        if !record.is_live() {
            debug!("end of archive at 0x{:X}", pos);
            return Ok(None);
        }
        if !verify_checksum(&buf) {
            warn!("bad checksum in record at 0x{:X} ({})", pos, record.name);
        }
        debug!("{}", Row(pos, &record));
        Ok(Some((pos, record)))
    }

    /// Copies the content of the file described by `record` into `out`
    /// without disturbing the position of the record scan.
    pub fn copy_content<W: Write>(&mut self, record: &Record, out: &mut W) -> Result<u64> {
        let offset = record.offset as u64;
        seek::at(&mut self.inner, offset, |inner| {
            let n = io::copy(&mut inner.by_ref().take(record.size), out)?;
            if n < record.size {
                return Err(ErrorKind::ShortRead { position: offset, expected: record.size, actual: n }.into());
            }
            Ok(n)
        })
    }

    /// Materializes every directory and file of the archive under `dest`.
    pub fn extract(&mut self, dest: &Path, progress: &mut dyn FnMut(&Progress)) -> Result<Summary> {
        fs::create_dir_all(dest).with_context(|_| format!("failed to create {}", dest.display()))?;
        let mut summary = Summary::default();
        let mut status = Progress::default();
        while let Some((pos, record)) = self.next_record()? {
            match record.entry_type {
                EntryType::Directory => {
                    let path = dest.join(relative_path(&record.name)?);
                    fs::create_dir_all(&path).with_context(|_| format!("failed to create {}", path.display()))?;
                    summary.directories += 1;
                }
                EntryType::File => {
                    let path = dest.join(relative_path(&record.name)?);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).with_context(|_| format!("failed to create {}", parent.display()))?;
                    }
                    let file = File::create(&path).with_context(|_| format!("failed to create {}", path.display()))?;
                    let mut out = BufWriter::new(file);
                    let n = self.copy_content(&record, &mut out)
                        .with_context(|_| format!("failed to extract {}", record.name))?;
                    out.flush().with_context(|_| format!("failed to write {}", path.display()))?;
                    summary.files += 1;
                    summary.bytes += n;
                }
                x => {
                    debug!("ignoring {:?} entry {} at 0x{:X}", x, record.name, pos);
                }
            }
            status.entries += 1;
            status.bytes = summary.bytes;
            progress(&status);
        }
        Ok(summary)
    }
}

/// Maps an entry name onto a path that cannot leave the extraction root.
fn relative_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name.trim_end_matches('/'));
    let safe = path.components().all(|c| match c {
        Component::Normal(_) | Component::CurDir => true,
        _ => false,
    });
    if !safe || path.as_os_str().is_empty() {
        return Err(ErrorKind::UnsafePath(name.to_owned()).into());
    }
    Ok(path.to_owned())
}

pub const LISTING_HEADER: &'static str = "pos         type offset   txtoff   txtsz    nfix size     name";

/// One line of an archive listing, aligned with `LISTING_HEADER`.
pub struct Row<'a>(pub u64, pub &'a Record);

impl<'a> fmt::Display for Row<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Row(pos, r) = *self;
        write!(f, "0x{:08X}  {}    {:08X} {:08X} {:08X} {:04X} {:08X} {}",
               pos, r.entry_type.as_byte() as char, r.offset, r.textoffset, r.textsize,
               r.numfixuppgs, r.size, r.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use walkdir::WalkDir;
    use error;
    use header::{Header, FORMAT};
    use write;

    fn example_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"bye").unwrap();
        dir
    }

    fn build(root: &Path) -> Vec<u8> {
        let mut entries = write::discover(root).unwrap();
        let mut out = Cursor::new(Vec::new());
        write::write_archive(&mut entries, &mut out, &FORMAT, &mut |_| {}).unwrap();
        out.into_inner()
    }

    fn extract(archive: Vec<u8>) -> Result<(tempfile::TempDir, Summary)> {
        let dest = tempfile::tempdir().unwrap();
        let summary = Archive::new(Cursor::new(archive)).extract(dest.path(), &mut |_| {})?;
        Ok((dest, summary))
    }

    /// Relative paths of everything under `root`, directories suffixed with `/`.
    fn tree(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
        let mut result = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter()
            .map(|e| {
                let e = e.unwrap();
                let name = e.path().strip_prefix(root).unwrap().to_str().unwrap().to_owned();
                if e.file_type().is_dir() { (name + "/", None) } else { (name, Some(fs::read(e.path()).unwrap())) }
            })
            .collect::<Vec<_>>();
        result.sort();
        result
    }

    fn raw(records: &[(Header, &[u8])]) -> Vec<u8> {
        let mut archive = vec![0; 0x1000 * (records.len() + 2)];
        for (i, &(ref header, content)) in records.iter().enumerate() {
            let buf = header.encode(&FORMAT).unwrap();
            archive[i * RECORD_SIZE..(i + 1) * RECORD_SIZE].copy_from_slice(&buf);
            let offset = header.offset as usize;
            archive[offset..offset + content.len()].copy_from_slice(content);
        }
        archive
    }

    #[test]
    fn example_round_trip() {
        let source = example_tree();
        let (dest, summary) = extract(build(source.path())).unwrap();
        assert_eq!(summary, Summary { files: 2, directories: 1, bytes: 5 });
        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"hi");
        assert_eq!(fs::read(dest.path().join("sub/b.txt")).unwrap(), b"bye");
        assert!(dest.path().join("sub").is_dir());
    }

    #[test]
    fn full_header_page_keeps_a_terminator() {
        let source = tempfile::tempdir().unwrap();
        let root = source.path();
        let inner = build(example_tree().path());
        fs::write(root.join("a.vtar"), &inner).unwrap();
        for name in &["b", "c", "d", "e", "f", "g", "h"] {
            fs::write(root.join(name), name.as_bytes()).unwrap();
        }

        let archive = build(root);
        assert!(archive[0x1000..0x1000 + RECORD_SIZE].iter().all(|&x| x == 0));
        let first = Record::decode(&archive[..RECORD_SIZE]).unwrap();
        assert_eq!(first.offset, 0x2000);

        let (dest, summary) = extract(archive).unwrap();
        assert_eq!(summary.files, 8);
        assert_eq!(summary.directories, 0);
        assert_eq!(fs::read(dest.path().join("a.vtar")).unwrap(), inner);
        assert_eq!(tree(dest.path()), tree(root));
    }

    #[test]
    fn round_trip() {
        let source = tempfile::tempdir().unwrap();
        let root = source.path();
        fs::create_dir_all(root.join("x/y/z")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("empty.bin"), b"").unwrap();
        fs::write(root.join("x/page.bin"), vec![7u8; 4096]).unwrap();
        fs::write(root.join("x/y/big.bin"), (0..20000u32).map(|x| (x * 31) as u8).collect::<Vec<_>>()).unwrap();
        fs::write(root.join("x/y/z/deep.txt"), b"deep").unwrap();
        fs::write(root.join("x/y/z/vtar"), build(example_tree().path())).unwrap();

        let (dest, summary) = extract(build(root)).unwrap();
        assert_eq!(tree(dest.path()), tree(root));
        assert_eq!(summary.files, 5);
        assert_eq!(summary.directories, 4);
    }

    #[test]
    fn gzip_transparency() {
        let source = example_tree();
        let plain = build(source.path());
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let packed = encoder.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("plain.vtar"), &plain).unwrap();
        fs::write(dir.path().join("packed.vtar"), &packed).unwrap();

        let mut results = Vec::new();
        for name in &["plain.vtar", "packed.vtar"] {
            let dest = dir.path().join(format!("{}.out", name));
            let summary = Archive::open(&dir.path().join(name)).unwrap()
                .extract(&dest, &mut |_| {}).unwrap();
            results.push((summary, tree(&dest)));
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(tree(&dir.path().join("plain.vtar.out")), tree(source.path()));
    }

    #[test]
    fn scan_stops_at_terminator() {
        let source = example_tree();
        let mut archive = Archive::new(Cursor::new(build(source.path())));
        let mut seen = Vec::new();
        while let Some((pos, record)) = archive.next_record().unwrap() {
            seen.push((pos, record.name));
        }
        assert_eq!(seen, [(0, "a.txt".to_owned()), (512, "sub/".to_owned()), (1024, "sub/b.txt".to_owned())]);
    }

    #[test]
    fn content_read_keeps_scan_position() {
        let source = example_tree();
        let mut archive = Archive::new(Cursor::new(build(source.path())));
        let (_, first) = archive.next_record().unwrap().unwrap();
        let mut content = Vec::new();
        assert_eq!(archive.copy_content(&first, &mut content).unwrap(), 2);
        assert_eq!(content, b"hi");
        let (pos, second) = archive.next_record().unwrap().unwrap();
        assert_eq!((pos, &second.name[..]), (512, "sub/"));
    }

    #[test]
    fn corrupt_magic_extracts_nothing() {
        let source = example_tree();
        let mut archive = build(source.path());
        archive[0x101..0x107].copy_from_slice(b"ustar\0");
        let (dest, summary) = extract(archive).unwrap();
        assert_eq!(summary, Summary::default());
        assert!(tree(dest.path()).is_empty());
    }

    #[test]
    fn bad_checksum_is_not_fatal() {
        let source = example_tree();
        let mut archive = build(source.path());
        archive[0x88] = b'7';
        assert!(!verify_checksum(&archive[..RECORD_SIZE]));
        let (dest, summary) = extract(archive).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"hi");
    }

    #[test]
    fn truncated_header() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("d")).unwrap();
        let mut archive = build(dir.path());
        archive.truncate(600);
        let err = extract(archive).unwrap_err();
        match error::kind(&err) {
            Some(&ErrorKind::ShortRead { position: 512, expected: 512, actual: 88 }) => {}
            x => panic!("unexpected error {:?}", x),
        }
    }

    #[test]
    fn truncated_content() {
        let source = example_tree();
        let mut archive = build(source.path());
        archive.truncate(0x1001);
        let err = extract(archive).unwrap_err();
        match error::kind(&err) {
            Some(&ErrorKind::ShortRead { position: 0x1000, expected: 2, actual: 1 }) => {}
            x => panic!("unexpected error {:?}", x),
        }
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        for name in &["../evil", "/etc/evil", "a/../../evil", "/"] {
            let archive = raw(&[
                (Header { name, entry_type: EntryType::File, size: 4, mtime: 0, offset: 0x1000 }, &b"evil"[..]),
            ]);
            let err = extract(archive).unwrap_err();
            match error::kind(&err) {
                Some(&ErrorKind::UnsafePath(ref x)) => assert_eq!(x, name),
                x => panic!("unexpected error {:?}", x),
            }
        }
    }

    #[test]
    fn other_types_are_skipped() {
        let archive = raw(&[
            (Header { name: "link", entry_type: EntryType::Symlink, size: 0, mtime: 0, offset: 0 }, &b""[..]),
            (Header { name: "dev", entry_type: EntryType::CharDevice, size: 0, mtime: 0, offset: 0 }, &b""[..]),
            (Header { name: "f", entry_type: EntryType::File, size: 3, mtime: 0, offset: 0x1000 }, &b"abc"[..]),
        ]);
        let (dest, summary) = extract(archive).unwrap();
        assert_eq!(summary, Summary { files: 1, directories: 0, bytes: 3 });
        assert_eq!(tree(dest.path()), [("f".to_owned(), Some(b"abc".to_vec()))]);
    }

    #[test]
    fn nested_directories_without_parents() {
        let archive = raw(&[
            (Header { name: "x/y/", entry_type: EntryType::Directory, size: 0, mtime: 0, offset: 0 }, &b""[..]),
            (Header { name: "p/q/f", entry_type: EntryType::File, size: 1, mtime: 0, offset: 0x1000 }, &b"1"[..]),
        ]);
        let (dest, _) = extract(archive.clone()).unwrap();
        assert!(dest.path().join("x/y").is_dir());
        assert_eq!(fs::read(dest.path().join("p/q/f")).unwrap(), b"1");

        // existing directories are fine
        Archive::new(Cursor::new(archive)).extract(dest.path(), &mut |_| {}).unwrap();
    }

    #[test]
    fn listing_row() {
        let record = Record::decode(
            &Header { name: "a.txt", entry_type: EntryType::File, size: 2, mtime: 0, offset: 0x1000 }
                .encode(&FORMAT).unwrap()).unwrap();
        assert_eq!(Row(0x200, &record).to_string(),
                   "0x00000200  0    00001000 00000000 00000000 0000 00000002 a.txt");
    }
}
