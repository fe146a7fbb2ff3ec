//! Localization string tables
//!
//! A string table holds one section per locale. Sections the engine does not touch
//! are written back byte-for-byte, so merging strings into one locale leaves every
//! other locale and any trailing data identical.
//!
//! ```text
//! u32 signature ("LTBL"), u16 version, u16 locale_count
//! per locale: u32 locale_id, u32 section_length, section bytes
//! section: u32 entry_count, entries (u16 key_len, key, u16 version, u32 text_len, text)
//! trailing bytes
//! ```

mod reader;
mod writer;

pub use reader::parse_string_table;
pub use writer::write_string_table;

/// "LTBL" signature (little-endian)
pub const STRING_TABLE_SIGNATURE: u32 = 0x4C42_544C;

/// Newest string table version
pub const STRING_TABLE_VERSION: u16 = 1;

/// A single localized text entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedText {
    pub key: String,
    pub version: u16,
    pub text: String,
}

/// All entries of one locale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleSection {
    pub locale_id: u32,
    pub entries: Vec<LocalizedText>,
    /// Section bytes as read, kept while the section is unmodified
    raw: Option<Vec<u8>>,
}

impl LocaleSection {
    #[must_use]
    pub fn new(locale_id: u32) -> Self {
        Self {
            locale_id,
            entries: Vec::new(),
            raw: None,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&LocalizedText> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Add or update an entry. Returns `true` if the section changed.
    ///
    /// An updated entry's version is bumped; new entries start at version 1.
    pub fn set(&mut self, key: impl Into<String>, text: impl Into<String>) -> bool {
        let key = key.into();
        let text = text.into();

        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            if entry.text == text {
                return false;
            }
            entry.text = text;
            entry.version = entry.version.wrapping_add(1);
        } else {
            self.entries.push(LocalizedText {
                key,
                version: 1,
                text,
            });
        }
        self.raw = None;
        true
    }

    /// Whether the section will be re-serialized on write
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.raw.is_none()
    }
}

/// A parsed string table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTable {
    pub version: u16,
    pub sections: Vec<LocaleSection>,
    /// Bytes following the last section
    pub trailing: Vec<u8>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STRING_TABLE_VERSION,
            sections: Vec::new(),
            trailing: Vec::new(),
        }
    }

    #[must_use]
    pub fn section(&self, locale_id: u32) -> Option<&LocaleSection> {
        self.sections.iter().find(|s| s.locale_id == locale_id)
    }

    /// Section for `locale_id`, appended if the table has none
    pub fn section_mut(&mut self, locale_id: u32) -> &mut LocaleSection {
        let index = match self.sections.iter().position(|s| s.locale_id == locale_id) {
            Some(index) => index,
            None => {
                self.sections.push(LocaleSection::new(locale_id));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    /// Merge key/text pairs into a locale. Returns the number of entries changed.
    pub fn merge<I, K, V>(&mut self, locale_id: u32, strings: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let section = self.section_mut(locale_id);
        strings
            .into_iter()
            .map(|(key, text)| section.set(key, text))
            .filter(|changed| *changed)
            .count()
    }
}
