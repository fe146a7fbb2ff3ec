//! EA BIG archives
//!
//! ```text
//! [u8; 4] magic ("BIGF" or "BIG4"), u32 LE archive size
//! u32 BE file count, u32 BE header size
//! entries: u32 BE offset, u32 BE size, null-terminated name (backslash separated)
//! file data (raw)
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::{
    ArchiveData, ArchiveDataManager, ArchiveFileItem, ArchiveHandle, FileEntry, FilePacker,
    ReadSeek, WriteSeek, ensure_within, invalid, to_u32,
};
use crate::error::Result;

const FORMAT: &str = "big";
const MAGIC_BIGF: [u8; 4] = *b"BIGF";
const MAGIC_BIG4: [u8; 4] = *b"BIG4";
const HEADER_SIZE: u64 = 16;

/// BIG archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigHeader {
    pub magic: [u8; 4],
}

/// A BIG file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BigEntry {
    pub path: String,
    pub offset: u64,
    pub size: u64,
}

fn disk_name(path: &str) -> String {
    path.replace('/', "\\")
}

fn read_cstring(input: &mut dyn ReadSeek) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        match input.read_u8()? {
            0 => break,
            b => bytes.push(b),
        }
        if bytes.len() > 4096 {
            return Err(invalid(FORMAT, "unterminated file name"));
        }
    }
    String::from_utf8(bytes).map_err(|_| invalid(FORMAT, "name is not valid UTF-8"))
}

/// Manager for BIG archives
#[derive(Debug, Default, Clone, Copy)]
pub struct BigManager;

impl ArchiveDataManager for BigManager {
    fn id(&self) -> &'static str {
        FORMAT
    }

    fn load_archive(&self, input: &mut dyn ReadSeek) -> Result<ArchiveHandle> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != MAGIC_BIGF && magic != MAGIC_BIG4 {
            return Err(invalid(FORMAT, format!("bad magic {magic:02x?}")));
        }
        Ok(ArchiveHandle::Big(BigHeader { magic }))
    }

    fn load_archive_data(
        &self,
        _handle: &ArchiveHandle,
        input: &mut dyn ReadSeek,
    ) -> Result<ArchiveData> {
        let archive_len = input.seek(SeekFrom::End(0))?;
        input.seek(SeekFrom::Start(8))?;
        let count = input.read_u32::<BigEndian>()?;
        let _header_size = input.read_u32::<BigEndian>()?;

        let mut entries = Vec::with_capacity((count as usize).min(65536));
        for _ in 0..count {
            let offset = u64::from(input.read_u32::<BigEndian>()?);
            let size = u64::from(input.read_u32::<BigEndian>()?);
            let path = read_cstring(input)?.replace('\\', "/");
            ensure_within(FORMAT, &path, offset, size, archive_len)?;
            entries.push(FileEntry::Big(BigEntry { path, offset, size }));
        }

        Ok(ArchiveData::from_entries(entries))
    }

    fn decode_file(&self, input: &mut dyn Read, output: &mut dyn Write, _entry: &FileEntry) -> Result<()> {
        io::copy(input, output)?;
        Ok(())
    }

    fn encode_file(&self, input: &mut dyn Read, output: &mut dyn Write, _entry: &FileEntry) -> Result<()> {
        io::copy(input, output)?;
        Ok(())
    }

    fn create_archive(&self) -> ArchiveHandle {
        ArchiveHandle::Big(BigHeader { magic: MAGIC_BIGF })
    }

    fn new_entry(&self, path: &str, _template: Option<&FileEntry>) -> Result<FileEntry> {
        Ok(FileEntry::Big(BigEntry {
            path: path.to_string(),
            offset: 0,
            size: 0,
        }))
    }

    fn write_archive(
        &self,
        handle: &ArchiveHandle,
        output: &mut dyn WriteSeek,
        files: Vec<ArchiveFileItem<'_>>,
        packer: &mut FilePacker<'_>,
    ) -> Result<Vec<FileEntry>> {
        let magic = match handle {
            ArchiveHandle::Big(h) => h.magic,
            _ => return Err(invalid(FORMAT, "handle belongs to another format")),
        };

        let header_size = HEADER_SIZE
            + files
                .iter()
                .map(|item| 8 + item.path.len() as u64 + 1)
                .sum::<u64>();

        output.seek(SeekFrom::Start(0))?;
        io::copy(&mut io::repeat(0).take(header_size), output)?;

        let mut entries = Vec::with_capacity(files.len());
        for item in files {
            entries.push(packer.pack(self, output, item)?);
        }
        let end = output.stream_position()?;

        output.seek(SeekFrom::Start(0))?;
        output.write_all(&magic)?;
        output.write_u32::<LittleEndian>(to_u32(FORMAT, end)?)?;
        output.write_u32::<BigEndian>(to_u32(FORMAT, entries.len() as u64)?)?;
        output.write_u32::<BigEndian>(to_u32(FORMAT, header_size)?)?;
        for file in &entries {
            output.write_u32::<BigEndian>(to_u32(FORMAT, file.offset())?)?;
            output.write_u32::<BigEndian>(to_u32(FORMAT, file.stored_size())?)?;
            output.write_all(disk_name(file.path()).as_bytes())?;
            output.write_u8(0)?;
        }

        output.seek(SeekFrom::Start(end))?;
        Ok(entries)
    }
}
