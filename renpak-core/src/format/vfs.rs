use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::error::{Error, Result};

/// Random access storage that archive files are served from.
pub trait ByteSource: Debug + Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_range(&self, offset: u64, len: u64) -> Result<Bytes>;
}

fn check_range(source_len: u64, offset: u64, len: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= source_len => Ok(()),
        _ => Err(Error::BufferUnderrun {
            offset: offset as usize,
            wanted: len as usize,
            len: source_len as usize,
        }),
    }
}

/// An archive held fully in memory. Reads are zero-copy slices.
#[derive(Debug, Clone)]
pub struct MemorySource(Bytes);

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        check_range(self.len(), offset, len)?;
        Ok(self.0.slice(offset as usize..(offset + len) as usize))
    }
}

/// An archive on disk. Every read opens the file and seeks to the range.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&path)?.len();
        Ok(Self { path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        check_range(self.len, offset, len)?;
        let mut buffer = vec![0; len as usize];
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer.into())
    }
}

/// One contiguous byte range of an archived file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub offset: u64,
    pub len: u64,
}

/// A file inside an archive: its sections, concatenated in order.
///
/// Nothing is read until the content is asked for.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    source: Arc<dyn ByteSource>,
    sections: Vec<Section>,
    len: u64,
}

impl ArchiveFile {
    /// Every section must lie inside `source`.
    pub fn new(source: Arc<dyn ByteSource>, sections: Vec<Section>) -> Result<Self> {
        let source_len = source.len();
        let len = sections.iter().try_fold(0u64, |total, section| {
            check_range(source_len, section.offset, section.len)?;
            total
                .checked_add(section.len)
                .ok_or(Error::BufferUnderrun {
                    offset: section.offset as usize,
                    wanted: section.len as usize,
                    len: source_len as usize,
                })
        })?;
        Ok(Self {
            source,
            sections,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parts(&self) -> &[Section] {
        &self.sections
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for section in &self.sections {
            out.extend_from_slice(&self.source.read_range(section.offset, section.len)?);
        }
        Ok(out)
    }

    /// A streaming reader that fetches one section at a time.
    pub fn reader(&self) -> ArchiveFileReader {
        ArchiveFileReader {
            file: self.clone(),
            next_part: 0,
            current: Bytes::new(),
        }
    }
}

pub struct ArchiveFileReader {
    file: ArchiveFile,
    next_part: usize,
    current: Bytes,
}

impl Read for ArchiveFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            let Some(section) = self.file.sections.get(self.next_part) else {
                return Ok(0);
            };
            self.next_part += 1;
            self.current = self
                .file
                .source
                .read_range(section.offset, section.len)
                .map_err(io::Error::other)?;
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    File(ArchiveFile),
    Directory(Directory),
}

/// Splits a path into its components.
///
/// Both separators are accepted, and empty or `.` components are dropped.
pub fn resolve_path(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

/// A directory tree built from archive paths. Children keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    children: Vec<(String, Node)>,
    index: HashMap<String, usize>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Adds a file, creating intermediate directories on demand.
    ///
    /// Paths that climb out of the archive root with `..` are rejected.
    pub fn insert_file(&mut self, path: &str, file: ArchiveFile) -> Result<()> {
        let components = resolve_path(path);
        if components.is_empty() {
            return Err(Error::DuplicateNameConflict {
                path: path.to_string(),
            });
        }
        if components.contains(&"..") {
            return Err(Error::FormatMismatch {
                offset: 0,
                expected: "path inside the archive".to_string(),
                actual: path.to_string(),
            });
        }
        self.insert_at(&components, file, path)
    }

    fn push(&mut self, name: &str, node: Node) -> usize {
        let i = self.children.len();
        self.children.push((name.to_string(), node));
        self.index.insert(name.to_string(), i);
        i
    }

    fn insert_at(&mut self, components: &[&str], file: ArchiveFile, path: &str) -> Result<()> {
        let conflict = || Error::DuplicateNameConflict {
            path: path.to_string(),
        };
        let (name, rest) = match components.split_first() {
            Some(split) => split,
            None => return Err(conflict()),
        };

        if rest.is_empty() {
            return match self.index.get(*name) {
                Some(&i) => match &mut self.children[i].1 {
                    Node::Directory(_) => Err(conflict()),
                    slot @ Node::File(_) => {
                        log::warn!("{} is listed twice, keeping the last entry", path);
                        *slot = Node::File(file);
                        Ok(())
                    }
                },
                None => {
                    self.push(name, Node::File(file));
                    Ok(())
                }
            };
        }

        let i = match self.index.get(*name) {
            Some(&i) => i,
            None => self.push(name, Node::Directory(Directory::new())),
        };
        match &mut self.children[i].1 {
            Node::Directory(dir) => dir.insert_at(rest, file, path),
            Node::File(_) => Err(conflict()),
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.children[i].1)
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        let components = resolve_path(path);
        let (last, parents) = components.split_last()?;
        let mut dir = self;
        for name in parents {
            match dir.child(name)? {
                Node::Directory(d) => dir = d,
                Node::File(_) => return None,
            }
        }
        dir.child(last)
    }

    pub fn get_file(&self, path: &str) -> Option<&ArchiveFile> {
        match self.get(path)? {
            Node::File(f) => Some(f),
            Node::Directory(_) => None,
        }
    }

    /// An empty path resolves to this directory.
    pub fn get_directory(&self, path: &str) -> Option<&Directory> {
        if resolve_path(path).is_empty() {
            return Some(self);
        }
        match self.get(path)? {
            Node::Directory(d) => Some(d),
            Node::File(_) => None,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Immediate children. Directory names carry a trailing `/`.
    pub fn list_entries(&self) -> Vec<String> {
        self.entries()
            .map(|(name, node)| match node {
                Node::Directory(_) => format!("{name}/"),
                Node::File(_) => name.to_string(),
            })
            .collect()
    }

    /// Every file below this directory with its full path.
    pub fn files(&self) -> Vec<(String, &ArchiveFile)> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    fn collect_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a ArchiveFile)>) {
        for (name, node) in self.entries() {
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };
            match node {
                Node::File(f) => out.push((path, f)),
                Node::Directory(d) => d.collect_files(&path, out),
            }
        }
    }

    /// Materialises one file, or `None` if `path` is not a file.
    pub fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.get_file(path).map(ArchiveFile::read_all).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(data: &[u8]) -> Arc<dyn ByteSource> {
        Arc::new(MemorySource::new(data.to_vec()))
    }

    fn file(source: &Arc<dyn ByteSource>, parts: &[(u64, u64)]) -> ArchiveFile {
        ArchiveFile::new(
            source.clone(),
            parts
                .iter()
                .map(|&(offset, len)| Section { offset, len })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn parts_concatenate_in_list_order() {
        let source = memory(b"AAAA????BBBB");
        let f = file(&source, &[(0, 4), (8, 4)]);
        assert_eq!(f.len(), 8);
        assert_eq!(f.read_all().unwrap(), b"AAAABBBB");

        let f = file(&source, &[(8, 4), (0, 4)]);
        let mut streamed = Vec::new();
        f.reader().read_to_end(&mut streamed).unwrap();
        assert_eq!(streamed, b"BBBBAAAA");
    }

    fn sections(parts: &[(u64, u64)]) -> Vec<Section> {
        parts
            .iter()
            .map(|&(offset, len)| Section { offset, len })
            .collect()
    }

    #[test]
    fn sections_past_the_source_are_rejected() {
        let source = memory(b"AAAA????BBBB");
        assert!(matches!(
            ArchiveFile::new(source.clone(), sections(&[(0, 4), (10, 4)])),
            Err(Error::BufferUnderrun { offset: 10, .. })
        ));
        assert!(matches!(
            ArchiveFile::new(source, sections(&[(0, u64::MAX)])),
            Err(Error::BufferUnderrun { offset: 0, .. })
        ));
    }

    #[test]
    fn section_lengths_that_overflow_are_rejected() {
        let source = memory(b"abcd");
        assert!(ArchiveFile::new(source, sections(&[(0, u64::MAX), (0, 2)])).is_err());
    }

    #[derive(Debug)]
    struct Huge;

    impl ByteSource for Huge {
        fn len(&self) -> u64 {
            u64::MAX
        }

        fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
            Err(Error::BufferUnderrun {
                offset: offset as usize,
                wanted: len as usize,
                len: 0,
            })
        }
    }

    #[test]
    fn total_length_overflow_is_an_error() {
        let source: Arc<dyn ByteSource> = Arc::new(Huge);
        assert!(matches!(
            ArchiveFile::new(source.clone(), sections(&[(0, u64::MAX - 1), (1, 2)])),
            Err(Error::BufferUnderrun { offset: 1, wanted: 2, .. })
        ));
        let big = ArchiveFile::new(source, sections(&[(0, u64::MAX)])).unwrap();
        assert_eq!(big.len(), u64::MAX);
        assert!(big.read_all().is_err());
        assert!(big.reader().read_to_end(&mut Vec::new()).is_err());
    }

    #[test]
    fn tree_building_and_lookup() {
        let source = memory(b"0123456789");
        let mut root = Directory::new();
        root.insert_file("images/bg/room.png", file(&source, &[(0, 2)]))
            .unwrap();
        root.insert_file("script.rpyc", file(&source, &[(2, 3)]))
            .unwrap();
        root.insert_file("images/eileen.png", file(&source, &[(5, 5)]))
            .unwrap();

        assert_eq!(root.list_entries(), ["images/", "script.rpyc"]);
        assert_eq!(
            root.get_directory("images").unwrap().list_entries(),
            ["bg/", "eileen.png"]
        );
        assert_eq!(
            root.read_file("images\\bg\\room.png").unwrap().unwrap(),
            b"01"
        );
        assert_eq!(root.read_file("/script.rpyc/").unwrap().unwrap(), b"234");
        assert!(root.get_file("images").is_none());
        assert!(root.get_directory("script.rpyc").is_none());
        assert!(root.get_file("images/missing.png").is_none());
        assert!(root.get_file("script.rpyc/inner").is_none());
        assert!(root.read_file("nope").unwrap().is_none());

        let paths: Vec<_> = root.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            ["images/bg/room.png", "images/eileen.png", "script.rpyc"]
        );
    }

    #[test]
    fn parent_components_are_rejected() {
        let source = memory(b"xx");
        let mut root = Directory::new();
        for path in ["../../outside/evil.sh", "images/../../evil", "a\\..\\b"] {
            assert!(matches!(
                root.insert_file(path, file(&source, &[(0, 1)])),
                Err(Error::FormatMismatch { .. })
            ));
        }
        root.insert_file("./a/..b/c..", file(&source, &[(0, 1)]))
            .unwrap();
        let paths: Vec<_> = root.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, ["a/..b/c.."]);
    }

    #[test]
    fn file_and_directory_collide() {
        let source = memory(b"xx");
        let mut root = Directory::new();
        root.insert_file("a/b", file(&source, &[(0, 1)])).unwrap();
        assert!(matches!(
            root.insert_file("a", file(&source, &[(0, 1)])),
            Err(Error::DuplicateNameConflict { .. })
        ));
        assert!(matches!(
            root.insert_file("a/b/c", file(&source, &[(0, 1)])),
            Err(Error::DuplicateNameConflict { .. })
        ));
    }
}
