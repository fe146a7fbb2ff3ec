//! String table serialization

use byteorder::{LittleEndian, WriteBytesExt};

use super::{LocaleSection, STRING_TABLE_SIGNATURE, StringTable};
use crate::error::{Error, Result};

/// Serialize a string table. Unmodified sections are copied from their original bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidStringTable`] if a key, text or section exceeds its
/// length field.
pub fn write_string_table(table: &StringTable) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    output.write_u32::<LittleEndian>(STRING_TABLE_SIGNATURE)?;
    output.write_u16::<LittleEndian>(table.version)?;
    output.write_u16::<LittleEndian>(
        u16::try_from(table.sections.len()).map_err(|_| too_large("locale count"))?,
    )?;

    for section in &table.sections {
        let bytes = match &section.raw {
            Some(raw) => raw.clone(),
            None => serialize_section(section)?,
        };
        output.write_u32::<LittleEndian>(section.locale_id)?;
        output.write_u32::<LittleEndian>(
            u32::try_from(bytes.len()).map_err(|_| too_large("section"))?,
        )?;
        output.extend_from_slice(&bytes);
    }

    output.extend_from_slice(&table.trailing);
    Ok(output)
}

fn serialize_section(section: &LocaleSection) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes.write_u32::<LittleEndian>(
        u32::try_from(section.entries.len()).map_err(|_| too_large("entry count"))?,
    )?;
    for entry in &section.entries {
        bytes.write_u16::<LittleEndian>(
            u16::try_from(entry.key.len()).map_err(|_| too_large(&entry.key))?,
        )?;
        bytes.extend_from_slice(entry.key.as_bytes());
        bytes.write_u16::<LittleEndian>(entry.version)?;
        bytes.write_u32::<LittleEndian>(
            u32::try_from(entry.text.len()).map_err(|_| too_large(&entry.key))?,
        )?;
        bytes.extend_from_slice(entry.text.as_bytes());
    }
    Ok(bytes)
}

fn too_large(what: &str) -> Error {
    Error::InvalidStringTable(format!("{what} is too large"))
}
