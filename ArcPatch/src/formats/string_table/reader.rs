//! String table parsing

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::{LocaleSection, LocalizedText, STRING_TABLE_SIGNATURE, STRING_TABLE_VERSION, StringTable};
use crate::error::{Error, Result};

/// Parse a string table from bytes
///
/// # Errors
///
/// Returns [`Error::InvalidStringTable`] for a bad signature or truncated data, and
/// [`Error::UnsupportedFormatVersion`] for tables newer than this library reads.
pub fn parse_string_table(data: &[u8]) -> Result<StringTable> {
    let mut cursor = Cursor::new(data);

    let signature = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    if signature != STRING_TABLE_SIGNATURE {
        return Err(Error::InvalidStringTable(format!(
            "bad signature {signature:#010x}"
        )));
    }

    let version = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    if version > STRING_TABLE_VERSION {
        return Err(Error::UnsupportedFormatVersion {
            kind: "string table",
            found: u64::from(version),
            supported: u64::from(STRING_TABLE_VERSION),
        });
    }

    let locale_count = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    let mut sections = Vec::with_capacity(usize::from(locale_count));

    for _ in 0..locale_count {
        let locale_id = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let length = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;

        let start = cursor.position() as usize;
        let raw = data
            .get(start..start + length)
            .ok_or_else(|| Error::InvalidStringTable(format!("locale {locale_id} is truncated")))?;
        cursor.set_position((start + length) as u64);

        sections.push(LocaleSection {
            locale_id,
            entries: parse_section(raw)?,
            raw: Some(raw.to_vec()),
        });
    }

    let trailing = data[cursor.position() as usize..].to_vec();

    Ok(StringTable {
        version,
        sections,
        trailing,
    })
}

fn parse_section(raw: &[u8]) -> Result<Vec<LocalizedText>> {
    let mut cursor = Cursor::new(raw);
    let count = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;

    let mut entries = Vec::with_capacity(count.min(raw.len() / 8));
    for _ in 0..count {
        let key_len = usize::from(cursor.read_u16::<LittleEndian>().map_err(truncated)?);
        let key = read_utf8(&mut cursor, key_len)?;
        let version = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let text_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let text = read_utf8(&mut cursor, text_len)?;
        entries.push(LocalizedText { key, version, text });
    }

    if (cursor.position() as usize) != raw.len() {
        return Err(Error::InvalidStringTable(
            "section length does not match its entries".to_string(),
        ));
    }
    Ok(entries)
}

fn read_utf8(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<String> {
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if len > remaining {
        return Err(truncated(std::io::ErrorKind::UnexpectedEof.into()));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(truncated)?;
    String::from_utf8(bytes).map_err(|_| Error::InvalidStringTable("text is not valid UTF-8".to_string()))
}

fn truncated(err: std::io::Error) -> Error {
    Error::InvalidStringTable(format!("truncated data: {err}"))
}
