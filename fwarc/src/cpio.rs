//! cpio "newc" writer for the boot time firmware loader
//!
//! Each entry is a 110 byte ascii header followed by the NUL terminated
//! name and the data, both padded to 4 bytes:
//!
//! | Field     | Value |
//! | --------- | ----- |
//! | magic     | `070701` |
//! | ino       | monotonically increasing from 1 |
//! | mode      | `040755` for directories, `0100644` otherwise |
//! | uid, gid  | 0 |
//! | nlink     | number of names sharing the inode |
//! | mtime     | 0 |
//! | filesize  | data length, 0 for directories and hard links |
//! | dev/rdev  | 0 (four fields) |
//! | namesize  | name length including the NUL |
//! | check     | 0 |
//!
//! The loader has no symlink support so duplicates are hard links. The
//! first name of an inode carries the data and every later name is an
//! empty entry with the same `ino`. Because readers see the nlink of the
//! first entry before the later names exist, registering a link seeks back
//! and rewrites the nlink field of every header already written for that
//! inode. That is the reason the sink must be `Seek`; to target an append
//! only stream, write into a `Cursor<Vec<u8>>` and copy it out afterwards.
//!
//! The write position is tracked here rather than asked of the sink, so a
//! buffered sink only gets seeked (and flushed) when a link is patched.

use std::collections::{HashMap, HashSet};
use std::io::{self, Seek, SeekFrom, Write};

use log::debug;

use fwcore::buf::pad_len;

use crate::ArchiveError;

pub const CPIO_MAGIC: &[u8; 6] = b"070701";
pub const TRAILER: &str = "TRAILER!!!";
pub const HEADER_LEN: usize = 110;

const MODE_DIR: u32 = 0o040755;
const MODE_FILE: u32 = 0o100644;

// Offset of the nlink field from the end of the magic
const NLINK_FIELD: u64 = 4 * 8;

struct Inode {
    nlink: u32,
    // Stream offsets of every nlink field written for this inode
    nlink_offsets: Vec<u64>,
}

pub struct CpioWriter<W: Write + Seek> {
    inner: W,
    // Absolute stream position, read from the sink on first write
    pos: Option<u64>,
    prefix: Option<String>,
    dirs: HashSet<String>,
    next_inode: u32,
    inodes: HashMap<u32, Inode>,
    names: HashMap<String, u32>,
}

impl<W: Write + Seek> CpioWriter<W> {
    /// Every name added is placed below `prefix` when one is given.
    pub fn new(writer: W, prefix: Option<&str>) -> Self {
        CpioWriter {
            inner: writer,
            pos: None,
            prefix: prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            dirs: HashSet::new(),
            next_inode: 1,
            inodes: HashMap::new(),
            names: HashMap::new(),
        }
    }

    fn full_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.to_string(),
        }
    }

    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let size: u32 = data
            .len()
            .try_into()
            .map_err(|_| ArchiveError::TooLarge(name.to_string()))?;
        let name = self.full_name(name);

        self.make_dirs(&name)?;
        self.write_header(&name, MODE_FILE, size, None)?;
        self.put(data)?;
        self.align()?;
        Ok(())
    }

    /// Add `name` as a hard link to the previously added `target`.
    pub fn add_link(&mut self, name: &str, target: &str) -> Result<(), ArchiveError> {
        let name = self.full_name(name);
        let target = self.full_name(target);

        self.make_dirs(&name)?;
        self.write_header(&name, MODE_FILE, 0, Some(&target))
    }

    /// Write the trailer and hand back the sink.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        self.write_header(TRAILER, MODE_FILE, 0, None)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn make_dirs(&mut self, name: &str) -> Result<(), ArchiveError> {
        let mut path = String::new();
        let parts: Vec<&str> = name.split('/').collect();

        for part in &parts[..parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(part);

            if !self.dirs.contains(&path) {
                self.write_header(&path, MODE_DIR, 0, None)?;
                self.dirs.insert(path.clone());
            }
        }
        Ok(())
    }

    fn position(&mut self) -> io::Result<u64> {
        match self.pos {
            Some(pos) => Ok(pos),
            None => {
                let pos = self.inner.stream_position()?;
                self.pos = Some(pos);
                Ok(pos)
            }
        }
    }

    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        let pos = self.position()?;
        self.inner.write_all(bytes)?;
        self.pos = Some(pos + bytes.len() as u64);
        Ok(())
    }

    fn align(&mut self) -> Result<(), ArchiveError> {
        let pad = pad_len(self.position()?, 4);
        if pad != 0 {
            self.put(&[0u8; 4][..pad])?;
        }
        Ok(())
    }

    fn write_header(
        &mut self,
        name: &str,
        mode: u32,
        size: u32,
        target: Option<&str>,
    ) -> Result<(), ArchiveError> {
        let ino = match target {
            Some(target) => {
                let ino = *self
                    .names
                    .get(target)
                    .ok_or_else(|| ArchiveError::UnknownTarget(target.to_string()))?;
                let inode = self
                    .inodes
                    .get_mut(&ino)
                    .ok_or_else(|| ArchiveError::UnknownTarget(target.to_string()))?;
                inode.nlink += 1;

                debug!("cpio: {} -> ino {} nlink {}", name, ino, inode.nlink);
                let here = match self.pos {
                    Some(pos) => pos,
                    None => self.inner.stream_position()?,
                };
                patch_nlink(&mut self.inner, inode, here)?;
                ino
            }
            None => {
                let ino = self.next_inode;
                self.next_inode += 1;
                self.inodes.insert(
                    ino,
                    Inode {
                        nlink: 1,
                        nlink_offsets: Vec::new(),
                    },
                );
                ino
            }
        };
        self.names.insert(name.to_string(), ino);

        self.align()?;
        self.put(CPIO_MAGIC)?;

        let nlink_off = self.position()? + NLINK_FIELD;
        let nlink = match self.inodes.get_mut(&ino) {
            Some(inode) => {
                inode.nlink_offsets.push(nlink_off);
                inode.nlink
            }
            None => return Err(ArchiveError::UnknownTarget(name.to_string())),
        };

        let namesize = name.len() as u32 + 1;
        let fields: [u32; 13] = [
            ino,
            mode,
            0, // uid
            0, // gid
            nlink,
            0, // mtime
            size,
            0, // dev major
            0, // dev minor
            0, // rdev major
            0, // rdev minor
            namesize,
            0, // check
        ];
        let mut hdr = String::with_capacity(HEADER_LEN - CPIO_MAGIC.len());
        for field in fields {
            hdr.push_str(&format!("{:08x}", field));
        }
        self.put(hdr.as_bytes())?;
        self.put(name.as_bytes())?;
        self.put(&[0])?;

        self.align()
    }
}

// Rewrite the nlink field of every header of `inode` then return to `here`
fn patch_nlink<W: Write + Seek>(
    inner: &mut W,
    inode: &Inode,
    here: u64,
) -> Result<(), ArchiveError> {
    let value = format!("{:08x}", inode.nlink);

    for off in &inode.nlink_offsets {
        inner.seek(SeekFrom::Start(*off))?;
        inner.write_all(value.as_bytes())?;
    }
    inner.seek(SeekFrom::Start(here))?;
    Ok(())
}


#[cfg(test)]
mod test_cpio_writer {
    use super::test_util::parse;
    use super::*;
    use std::io::Cursor;

    fn header(fields: [u32; 13], name: &str) -> Vec<u8> {
        let mut out = b"070701".to_vec();
        for f in fields {
            out.extend_from_slice(format!("{:08x}", f).as_bytes());
        }
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn exact_bytes_single_file() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), None);
        cpio.add_file("a", b"xyz").unwrap();
        let out = cpio.finish().unwrap().into_inner();

        let mut expect = header([1, 0o100644, 0, 0, 1, 0, 3, 0, 0, 0, 0, 2, 0], "a");
        // 110 + 2 is already aligned
        assert_eq!(expect.len(), 112);
        expect.extend_from_slice(b"xyz\0");
        expect.extend(header([2, 0o100644, 0, 0, 1, 0, 0, 0, 0, 0, 0, 11, 0], "TRAILER!!!"));
        expect.extend_from_slice(&[0, 0, 0]);

        assert_eq!(out.len(), 240);
        assert_eq!(out, expect);
        assert_eq!(&out[..14], b"07070100000001");
    }

    #[test]
    fn header_then_padding() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), None);
        cpio.add_file("ab", b"").unwrap();
        let out = cpio.finish().unwrap().into_inner();

        // 110 + "ab\0" = 113, padded to 116 before the trailer
        assert_eq!(&out[110..113], b"ab\0");
        assert_eq!(&out[113..116], &[0, 0, 0]);
        assert_eq!(&out[116..122], b"070701");
    }

    #[test]
    fn directories_once() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), Some("vendorfw"));
        cpio.add_file("brcm/a.bin", b"1").unwrap();
        cpio.add_file("brcm/b.bin", b"22").unwrap();
        cpio.add_file("apple/c.bin", b"333").unwrap();
        let out = cpio.finish().unwrap().into_inner();

        let names: Vec<String> = parse(&out).into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec![
                "vendorfw",
                "vendorfw/brcm",
                "vendorfw/brcm/a.bin",
                "vendorfw/brcm/b.bin",
                "vendorfw/apple",
                "vendorfw/apple/c.bin",
                "TRAILER!!!",
            ]
        );
    }

    #[test]
    fn modes_and_inodes() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), Some("vendorfw"));
        cpio.add_file("a.bin", b"data").unwrap();
        let entries = parse(&cpio.finish().unwrap().into_inner());

        assert_eq!(entries[0].mode, 0o040755);
        assert_eq!(entries[1].mode, 0o100644);
        assert_eq!(entries[1].data, b"data");
        let inos: Vec<u32> = entries.iter().map(|e| e.ino).collect();
        assert_eq!(inos, vec![1, 2, 3]);
    }

    #[test]
    fn nlink_back_patch() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), None);
        cpio.add_file("a", b"same").unwrap();
        cpio.add_file("other", b"different").unwrap();
        cpio.add_link("b", "a").unwrap();
        cpio.add_link("c", "a").unwrap();
        let entries = parse(&cpio.finish().unwrap().into_inner());

        let a = &entries[0];
        assert_eq!(a.name, "a");
        assert_eq!(a.offset, 0);
        assert_eq!(a.nlink, 3);
        assert_eq!(a.data, b"same");

        let linked: Vec<&_> = entries.iter().filter(|e| e.ino == a.ino).collect();
        assert_eq!(linked.len(), 3);
        for e in &linked {
            assert_eq!(e.nlink, 3);
        }
        assert!(linked[1].data.is_empty());
        assert!(linked[2].data.is_empty());

        let other = &entries[1];
        assert_eq!(other.nlink, 1);
        assert_eq!(other.data, b"different");
    }

    #[test]
    fn link_to_link_shares_inode() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), None);
        cpio.add_file("a", b"x").unwrap();
        cpio.add_link("b", "a").unwrap();
        cpio.add_link("c", "b").unwrap();
        let entries = parse(&cpio.finish().unwrap().into_inner());

        assert!(entries[..3].iter().all(|e| e.ino == 1 && e.nlink == 3));
    }

    #[test]
    fn unknown_target() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), None);
        assert!(matches!(
            cpio.add_link("b", "a"),
            Err(ArchiveError::UnknownTarget(_))
        ));
    }

    #[test]
    fn seeks_back_to_the_end() {
        let mut cpio = CpioWriter::new(Cursor::new(Vec::new()), None);
        cpio.add_file("a", b"x").unwrap();
        cpio.add_link("b", "a").unwrap();
        cpio.add_file("c", b"y").unwrap();
        let out = cpio.finish().unwrap().into_inner();

        // Would fail on overlapping or truncated entries
        let names: Vec<String> = parse(&out).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b", "c", "TRAILER!!!"]);
    }

    // Cursor that counts how often it is seeked
    struct CountingSink {
        inner: Cursor<Vec<u8>>,
        seeks: usize,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for CountingSink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.seeks += 1;
            self.inner.seek(pos)
        }
    }

    #[test]
    fn seeks_only_to_patch_links() {
        let sink = CountingSink {
            inner: Cursor::new(Vec::new()),
            seeks: 0,
        };
        let mut cpio = CpioWriter::new(sink, Some("vendorfw"));
        cpio.add_file("brcm/a", b"x").unwrap();
        cpio.add_file("brcm/b", b"yy").unwrap();
        cpio.add_file("apple/c", b"zzz").unwrap();
        assert_eq!(cpio.inner.seeks, 1);

        // one nlink field to rewrite, then back to the end
        cpio.add_link("apple/d", "brcm/a").unwrap();
        assert_eq!(cpio.inner.seeks, 3);

        let sink = cpio.finish().unwrap();
        assert_eq!(sink.seeks, 3);

        let entries = parse(sink.inner.get_ref());
        let a = entries.iter().find(|e| e.name == "vendorfw/brcm/a").unwrap();
        assert_eq!(a.nlink, 2);
        assert_eq!(entries.last().unwrap().name, "TRAILER!!!");
    }

    #[test]
    fn alignment_follows_starting_offset() {
        let mut sink = Cursor::new(Vec::new());
        sink.write_all(b"abc").unwrap();

        let mut cpio = CpioWriter::new(sink, None);
        cpio.add_file("a", b"x").unwrap();
        let out = cpio.finish().unwrap().into_inner();

        assert_eq!(&out[..4], b"abc\0");
        assert_eq!(out.len() % 4, 0);
        let names: Vec<String> = parse(&out[4..]).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "TRAILER!!!"]);
    }
}
