//! IPK archives (UbiArt style)
//!
//! Big-endian layout:
//!
//! ```text
//! u32 magic (0x50EC12BA), u32 version, u32 platform, u32 base_offset, u32 file_count
//! entries: u32 size, u32 compressed_size, u64 timestamp, u64 offset (from base_offset),
//!          u32 name_len, name, u32 dir_len, dir, u32 crc32(path)
//! file data, zlib compressed when compressed_size != 0
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use super::{
    ArchiveData, ArchiveDataManager, ArchiveFileItem, ArchiveHandle, FileEntry, FilePacker,
    ReadSeek, WriteSeek, ensure_within, invalid, parent_of, to_u32,
};
use crate::error::{Error, Result};

const FORMAT: &str = "ipk";
/// IPK magic number
pub const MAGIC: u32 = 0x50EC_12BA;
/// Newest IPK version this manager reads and writes
pub const MAX_VERSION: u32 = 5;
const HEADER_SIZE: u64 = 20;
const ENTRY_FIXED: u64 = 36;

/// IPK archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpkHeader {
    pub version: u32,
    pub platform: u32,
}

/// An IPK file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpkEntry {
    pub path: String,
    /// Absolute offset in the archive file
    pub offset: u64,
    pub size: u64,
    /// Zero when stored raw
    pub compressed_size: u64,
    pub compressed: bool,
    pub timestamp: u64,
}

impl IpkEntry {
    #[must_use]
    pub fn stored_size(&self) -> u64 {
        if self.compressed {
            self.compressed_size
        } else {
            self.size
        }
    }
}

/// Path hash stored with every IPK entry
#[must_use]
pub fn path_crc(path: &str) -> u32 {
    crc32fast::hash(path.to_uppercase().as_bytes())
}

fn read_string(input: &mut dyn ReadSeek) -> Result<String> {
    let len = input.read_u32::<BigEndian>()? as usize;
    if len > 4096 {
        return Err(invalid(FORMAT, format!("name length {len} is implausible")));
    }
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| invalid(FORMAT, "name is not valid UTF-8"))
}

fn write_string(output: &mut dyn WriteSeek, value: &str) -> Result<()> {
    output.write_u32::<BigEndian>(to_u32(FORMAT, value.len() as u64)?)?;
    output.write_all(value.as_bytes())?;
    Ok(())
}

fn ipk_entry(entry: &FileEntry) -> Result<&IpkEntry> {
    match entry {
        FileEntry::Ipk(e) => Ok(e),
        _ => Err(invalid(FORMAT, format!("{} is not an IPK entry", entry.path()))),
    }
}

/// Manager for IPK archives
#[derive(Debug, Default, Clone, Copy)]
pub struct IpkManager;

impl ArchiveDataManager for IpkManager {
    fn id(&self) -> &'static str {
        FORMAT
    }

    fn load_archive(&self, input: &mut dyn ReadSeek) -> Result<ArchiveHandle> {
        let magic = input.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(invalid(FORMAT, format!("bad magic {magic:#010x}")));
        }
        let version = input.read_u32::<BigEndian>()?;
        if version > MAX_VERSION {
            return Err(Error::UnsupportedFormatVersion {
                kind: "ipk archive",
                found: u64::from(version),
                supported: u64::from(MAX_VERSION),
            });
        }
        let platform = input.read_u32::<BigEndian>()?;
        Ok(ArchiveHandle::Ipk(IpkHeader { version, platform }))
    }

    fn load_archive_data(
        &self,
        _handle: &ArchiveHandle,
        input: &mut dyn ReadSeek,
    ) -> Result<ArchiveData> {
        let archive_len = input.seek(SeekFrom::End(0))?;
        input.seek(SeekFrom::Start(12))?;
        let base_offset = u64::from(input.read_u32::<BigEndian>()?);
        let count = input.read_u32::<BigEndian>()?;

        let mut entries = Vec::with_capacity((count as usize).min(65536));
        for _ in 0..count {
            let size = u64::from(input.read_u32::<BigEndian>()?);
            let compressed_size = u64::from(input.read_u32::<BigEndian>()?);
            let timestamp = input.read_u64::<BigEndian>()?;
            let offset = base_offset
                .checked_add(input.read_u64::<BigEndian>()?)
                .ok_or_else(|| invalid(FORMAT, "file offset overflows"))?;
            let name = read_string(input)?;
            let dir = read_string(input)?;
            let crc = input.read_u32::<BigEndian>()?;

            let path = if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            };
            if crc != path_crc(&path) {
                tracing::warn!("IPK path hash mismatch for {path}");
            }

            let entry = IpkEntry {
                path,
                offset,
                size,
                compressed_size,
                compressed: compressed_size != 0,
                timestamp,
            };
            ensure_within(FORMAT, &entry.path, entry.offset, entry.stored_size(), archive_len)?;
            entries.push(FileEntry::Ipk(entry));
        }

        Ok(ArchiveData::from_entries(entries))
    }

    fn decode_file(&self, input: &mut dyn Read, output: &mut dyn Write, entry: &FileEntry) -> Result<()> {
        if ipk_entry(entry)?.compressed {
            io::copy(&mut ZlibDecoder::new(input), output)?;
        } else {
            io::copy(input, output)?;
        }
        Ok(())
    }

    fn encode_file(&self, input: &mut dyn Read, output: &mut dyn Write, entry: &FileEntry) -> Result<()> {
        if ipk_entry(entry)?.compressed {
            let mut encoder = ZlibEncoder::new(output, Compression::default());
            io::copy(input, &mut encoder)?;
            encoder.finish()?;
        } else {
            io::copy(input, output)?;
        }
        Ok(())
    }

    fn create_archive(&self) -> ArchiveHandle {
        ArchiveHandle::Ipk(IpkHeader {
            version: MAX_VERSION,
            platform: 0,
        })
    }

    fn new_entry(&self, path: &str, template: Option<&FileEntry>) -> Result<FileEntry> {
        let (compressed, timestamp) = match template {
            Some(template) => {
                let template = ipk_entry(template)?;
                (template.compressed, template.timestamp)
            }
            None => (true, 0),
        };
        Ok(FileEntry::Ipk(IpkEntry {
            path: path.to_string(),
            offset: 0,
            size: 0,
            compressed_size: 0,
            compressed,
            timestamp,
        }))
    }

    fn write_archive(
        &self,
        handle: &ArchiveHandle,
        output: &mut dyn WriteSeek,
        files: Vec<ArchiveFileItem<'_>>,
        packer: &mut FilePacker<'_>,
    ) -> Result<Vec<FileEntry>> {
        let header = match handle {
            ArchiveHandle::Ipk(h) => *h,
            _ => return Err(invalid(FORMAT, "handle belongs to another format")),
        };

        let base_offset = HEADER_SIZE
            + files
                .iter()
                .map(|item| ENTRY_FIXED + item.path.len() as u64 - u64::from(!parent_of(&item.path).is_empty()))
                .sum::<u64>();

        output.seek(SeekFrom::Start(0))?;
        io::copy(&mut io::repeat(0).take(base_offset), output)?;

        let mut entries = Vec::with_capacity(files.len());
        for item in files {
            entries.push(packer.pack(self, output, item)?);
        }
        let end = output.stream_position()?;

        output.seek(SeekFrom::Start(0))?;
        output.write_u32::<BigEndian>(MAGIC)?;
        output.write_u32::<BigEndian>(header.version)?;
        output.write_u32::<BigEndian>(header.platform)?;
        output.write_u32::<BigEndian>(to_u32(FORMAT, base_offset)?)?;
        output.write_u32::<BigEndian>(to_u32(FORMAT, entries.len() as u64)?)?;

        for file in &entries {
            let ipk = ipk_entry(file)?;
            let dir = parent_of(&ipk.path);
            let name = if dir.is_empty() {
                ipk.path.as_str()
            } else {
                &ipk.path[dir.len() + 1..]
            };
            output.write_u32::<BigEndian>(to_u32(FORMAT, ipk.size)?)?;
            output.write_u32::<BigEndian>(to_u32(FORMAT, ipk.compressed_size)?)?;
            output.write_u64::<BigEndian>(ipk.timestamp)?;
            output.write_u64::<BigEndian>(ipk.offset - base_offset)?;
            write_string(output, name)?;
            write_string(output, dir)?;
            output.write_u32::<BigEndian>(path_crc(&ipk.path))?;
        }

        output.seek(SeekFrom::Start(end))?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveFileSource, load};
    use crate::progress::{CancellationToken, no_progress};
    use std::io::Cursor;

    #[test]
    fn test_compressed_entries() {
        let content = vec![b'x'; 4096];
        let expected = content.clone();
        let cancel = CancellationToken::new();
        let mut packer = FilePacker::new(None, &cancel, &no_progress, 2);
        let items = vec![
            ArchiveFileItem {
                path: "world/map.isc".to_string(),
                source: ArchiveFileSource::Added(Box::new(move || Ok(content))),
                entry: None,
            },
            ArchiveFileItem {
                path: "root.txt".to_string(),
                source: ArchiveFileSource::Added(Box::new(|| Ok(b"root".to_vec()))),
                entry: None,
            },
        ];
        let mut output = Cursor::new(Vec::new());
        let entries = IpkManager
            .write_archive(&IpkManager.create_archive(), &mut output, items, &mut packer)
            .unwrap();
        assert!(entries[0].stored_size() < 4096);
        assert_eq!(entries[0].size(), 4096);

        let mut input = Cursor::new(output.into_inner());
        let (handle, data) = load(&IpkManager, &mut input).unwrap();
        assert_eq!(handle, IpkManager.create_archive());
        assert_eq!(data.files().cloned().collect::<Vec<_>>(), entries);

        let map = data.files().next().unwrap();
        assert_eq!(IpkManager.read_file(&mut input, map).unwrap(), expected);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        bytes.extend_from_slice(&9u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            IpkManager.load_archive(&mut Cursor::new(bytes)),
            Err(Error::UnsupportedFormatVersion { found: 9, .. })
        ));
    }

    #[test]
    fn test_malformed_tables_are_errors() {
        // header: magic, version, platform, base_offset, count; entry: size, compressed size
        let mut bytes = Vec::new();
        for field in [MAGIC, MAX_VERSION, 0, u32::MAX, 1, 1, 0] {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            load(&IpkManager, &mut Cursor::new(bytes.clone())),
            Err(Error::InvalidArchive { .. })
        ));

        // Table cut short inside the first entry
        bytes.truncate(26);
        assert!(load(&IpkManager, &mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_replaced_entry_keeps_template_settings() {
        let template = FileEntry::Ipk(IpkEntry {
            path: "a.bin".to_string(),
            offset: 40,
            size: 3,
            compressed_size: 0,
            compressed: false,
            timestamp: 77,
        });
        let entry = IpkManager.new_entry("a.bin", Some(&template)).unwrap();
        let FileEntry::Ipk(entry) = entry else {
            panic!("expected IPK entry");
        };
        assert!(!entry.compressed);
        assert_eq!(entry.timestamp, 77);
    }
}
