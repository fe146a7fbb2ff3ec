//! CNT archives
//!
//! Little-endian layout:
//!
//! ```text
//! u32 directory_count, u32 file_count, u8 xor_names, u8 name_key
//! directories: u32 len, name bytes
//! files: u32 directory_index, u32 name_len, name bytes, [u8; 4] key, u32 offset, u32 size
//! file data
//! ```
//!
//! Names are XOR'd with `name_key` when `xor_names` is set. File data is XOR'd with
//! the entry's 4-byte key, which is derived from the file's offset, so a file that
//! moves must be re-encoded.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::{
    ArchiveData, ArchiveDataManager, ArchiveFileItem, ArchiveHandle, FileEntry, FilePacker,
    ReadSeek, WriteSeek, ensure_within, invalid, parent_of, to_u32,
};
use crate::error::Result;

const FORMAT: &str = "cnt";
const DEFAULT_NAME_KEY: u8 = 0x5A;
const HEADER_SIZE: u64 = 10;
const FILE_RECORD_FIXED: u64 = 20;
const MAX_NAME_LEN: usize = 4096;

/// CNT archive header settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CntHeader {
    pub xor_names: bool,
    pub name_key: u8,
}

/// A CNT file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CntEntry {
    pub path: String,
    pub offset: u64,
    pub size: u64,
    pub key: [u8; 4],
}

impl CntEntry {
    /// Relocate the entry, deriving a fresh key when the offset changes
    pub fn move_to(&mut self, offset: u64) {
        if offset != self.offset {
            self.offset = offset;
            self.key = key_for_offset(offset);
        }
    }
}

/// XOR key for file data stored at `offset`
#[must_use]
pub fn key_for_offset(offset: u64) -> [u8; 4] {
    let mixed = (offset as u32).wrapping_mul(0x9E37_79B1) ^ 0xA5C3_5A3C;
    mixed.to_le_bytes()
}

fn xor_in_place(data: &mut [u8], key: [u8; 4], start: usize) {
    if key == [0; 4] {
        return;
    }
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(start + i) % 4];
    }
}

fn xor_stream(input: &mut dyn Read, output: &mut dyn Write, key: [u8; 4]) -> Result<()> {
    let mut buffer = [0u8; 8192];
    let mut position = 0usize;
    loop {
        let read = input.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        xor_in_place(&mut buffer[..read], key, position);
        output.write_all(&buffer[..read])?;
        position = (position + read) % 4;
    }
    Ok(())
}

fn read_name(input: &mut dyn ReadSeek, header: &CntHeader) -> Result<String> {
    let len = input.read_u32::<LittleEndian>()? as usize;
    if len > MAX_NAME_LEN {
        return Err(invalid(FORMAT, format!("name length {len} is implausible")));
    }
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    if header.xor_names {
        for byte in &mut bytes {
            *byte ^= header.name_key;
        }
    }
    String::from_utf8(bytes).map_err(|_| invalid(FORMAT, "name is not valid UTF-8"))
}

fn write_name(output: &mut dyn WriteSeek, header: &CntHeader, name: &str) -> Result<()> {
    output.write_u32::<LittleEndian>(to_u32(FORMAT, name.len() as u64)?)?;
    let mut bytes = name.as_bytes().to_vec();
    if header.xor_names {
        for byte in &mut bytes {
            *byte ^= header.name_key;
        }
    }
    output.write_all(&bytes)?;
    Ok(())
}

fn header(handle: &ArchiveHandle) -> Result<&CntHeader> {
    match handle {
        ArchiveHandle::Cnt(h) => Ok(h),
        _ => Err(invalid(FORMAT, "handle belongs to another format")),
    }
}

fn entry(entry: &FileEntry) -> Result<&CntEntry> {
    match entry {
        FileEntry::Cnt(e) => Ok(e),
        _ => Err(invalid(FORMAT, format!("{} is not a CNT entry", entry.path()))),
    }
}

fn split_path(path: &str) -> (&str, &str) {
    let dir = parent_of(path);
    let name = if dir.is_empty() {
        path
    } else {
        &path[dir.len() + 1..]
    };
    (dir, name)
}

/// Manager for CNT archives
#[derive(Debug, Default, Clone, Copy)]
pub struct CntManager;

impl ArchiveDataManager for CntManager {
    fn id(&self) -> &'static str {
        FORMAT
    }

    fn load_archive(&self, input: &mut dyn ReadSeek) -> Result<ArchiveHandle> {
        input.seek(SeekFrom::Start(8))?;
        let xor_names = match input.read_u8()? {
            0 => false,
            1 => true,
            other => return Err(invalid(FORMAT, format!("bad name flag {other}"))),
        };
        let name_key = input.read_u8()?;
        Ok(ArchiveHandle::Cnt(CntHeader {
            xor_names,
            name_key,
        }))
    }

    fn load_archive_data(
        &self,
        handle: &ArchiveHandle,
        input: &mut dyn ReadSeek,
    ) -> Result<ArchiveData> {
        let header = header(handle)?;
        let archive_len = input.seek(SeekFrom::End(0))?;
        input.seek(SeekFrom::Start(0))?;

        let dir_count = input.read_u32::<LittleEndian>()? as usize;
        let file_count = input.read_u32::<LittleEndian>()? as usize;
        input.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut directories = Vec::with_capacity(dir_count.min(4096));
        for _ in 0..dir_count {
            directories.push(read_name(input, header)?);
        }

        let mut entries = Vec::with_capacity(file_count.min(65536));
        for _ in 0..file_count {
            let dir_index = input.read_u32::<LittleEndian>()? as usize;
            let name = read_name(input, header)?;
            let mut key = [0u8; 4];
            input.read_exact(&mut key)?;
            let offset = u64::from(input.read_u32::<LittleEndian>()?);
            let size = u64::from(input.read_u32::<LittleEndian>()?);

            let dir = directories
                .get(dir_index)
                .ok_or_else(|| invalid(FORMAT, format!("{name} has bad directory index {dir_index}")))?;
            ensure_within(FORMAT, &name, offset, size, archive_len)?;

            let path = if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            };
            entries.push(FileEntry::Cnt(CntEntry {
                path,
                offset,
                size,
                key,
            }));
        }

        Ok(ArchiveData::from_entries(entries))
    }

    fn decode_file(&self, input: &mut dyn Read, output: &mut dyn Write, file: &FileEntry) -> Result<()> {
        xor_stream(input, output, entry(file)?.key)
    }

    fn encode_file(&self, input: &mut dyn Read, output: &mut dyn Write, file: &FileEntry) -> Result<()> {
        xor_stream(input, output, entry(file)?.key)
    }

    fn create_archive(&self) -> ArchiveHandle {
        ArchiveHandle::Cnt(CntHeader {
            xor_names: true,
            name_key: DEFAULT_NAME_KEY,
        })
    }

    fn new_entry(&self, path: &str, _template: Option<&FileEntry>) -> Result<FileEntry> {
        Ok(FileEntry::Cnt(CntEntry {
            path: path.to_string(),
            offset: 0,
            size: 0,
            key: key_for_offset(0),
        }))
    }

    fn reencodes_on_move(&self) -> bool {
        true
    }

    fn write_archive(
        &self,
        handle: &ArchiveHandle,
        output: &mut dyn WriteSeek,
        files: Vec<ArchiveFileItem<'_>>,
        packer: &mut FilePacker<'_>,
    ) -> Result<Vec<FileEntry>> {
        let header = *header(handle)?;

        let mut directories: IndexSet<&str> = IndexSet::new();
        for item in &files {
            directories.insert(parent_of(&item.path));
        }
        let directories: Vec<String> = directories.into_iter().map(str::to_string).collect();

        let table_size: u64 = directories.iter().map(|d| 4 + d.len() as u64).sum::<u64>()
            + files
                .iter()
                .map(|item| FILE_RECORD_FIXED + split_path(&item.path).1.len() as u64)
                .sum::<u64>();

        // Reserve header and tables, then pack data behind them
        let data_start = HEADER_SIZE + table_size;
        output.seek(SeekFrom::Start(0))?;
        std::io::copy(&mut std::io::repeat(0).take(data_start), output)?;

        let mut entries = Vec::with_capacity(files.len());
        for item in files {
            entries.push(packer.pack(self, output, item)?);
        }
        let end = output.stream_position()?;

        output.seek(SeekFrom::Start(0))?;
        output.write_u32::<LittleEndian>(to_u32(FORMAT, directories.len() as u64)?)?;
        output.write_u32::<LittleEndian>(to_u32(FORMAT, entries.len() as u64)?)?;
        output.write_u8(u8::from(header.xor_names))?;
        output.write_u8(header.name_key)?;

        for dir in &directories {
            write_name(output, &header, dir)?;
        }

        for file in &entries {
            let cnt = entry(file)?;
            let (dir, name) = split_path(&cnt.path);
            let dir_index = directories.iter().position(|d| d == dir).unwrap_or_default();
            output.write_u32::<LittleEndian>(to_u32(FORMAT, dir_index as u64)?)?;
            write_name(output, &header, name)?;
            output.write_all(&cnt.key)?;
            output.write_u32::<LittleEndian>(to_u32(FORMAT, cnt.offset)?)?;
            output.write_u32::<LittleEndian>(to_u32(FORMAT, cnt.size)?)?;
        }

        output.seek(SeekFrom::Start(end))?;
        Ok(entries)
    }
}
