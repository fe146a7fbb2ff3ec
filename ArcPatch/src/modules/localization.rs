//! Localization module: merge key=value strings into a game's string table
//!
//! ```text
//! localization/
//!   localization.json   { "target": "<game path of the string table>",
//!                         "locales": { "english": 1, "french": 2 } }
//!   english.txt         key=value per line, '#' starts a comment, "\n" is a newline
//! ```

use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{FilePatch, ModModule, ModuleContext};
use crate::error::{Error, Result};
use crate::formats::string_table::{parse_string_table, write_string_table};

const MODULE_ID: &str = "localization";
const CONFIG_FILE: &str = "localization.json";

/// Contents of `localization.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizationConfig {
    /// Game path of the string table to edit
    #[serde(default)]
    pub target: String,
    /// Locale file name (without `.txt`) to locale id
    #[serde(default)]
    pub locales: IndexMap<String, u32>,
}

/// Strings for one locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleStrings {
    pub locale_id: u32,
    pub strings: IndexMap<String, String>,
}

/// Payload stored in a patch for one string table edit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationPayload {
    pub locales: Vec<LocaleStrings>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidModuleData {
        module: MODULE_ID.to_string(),
        message: message.into(),
    }
}

/// Parse a `key=value` locale file
pub(crate) fn parse_locale_file(content: &str) -> Result<IndexMap<String, String>> {
    let mut strings = IndexMap::new();
    for (number, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = trimmed
            .split_once('=')
            .ok_or_else(|| invalid(format!("line {} has no '='", number + 1)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(invalid(format!("line {} has an empty key", number + 1)));
        }
        strings.insert(key.to_string(), value.trim().replace("\\n", "\n"));
    }
    Ok(strings)
}

/// Patches a string table with per-locale strings
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalizationModule;

impl ModModule for LocalizationModule {
    fn id(&self) -> &'static str {
        MODULE_ID
    }

    fn description(&self) -> &'static str {
        "Merge translated strings into a game string table"
    }

    fn setup_module_folder(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        let config = path.join(CONFIG_FILE);
        if !config.exists() {
            std::fs::write(
                config,
                serde_json::to_vec_pretty(&LocalizationConfig::default())?,
            )?;
        }
        Ok(())
    }

    fn patched_files(&self, ctx: &ModuleContext<'_>, path: &Path) -> Result<Vec<FilePatch>> {
        let config_path = path.join(CONFIG_FILE);
        if !config_path.is_file() {
            return Ok(Vec::new());
        }

        let config: LocalizationConfig = serde_json::from_slice(&std::fs::read(&config_path)?)?;
        if config.target.trim().is_empty() {
            if !config.locales.is_empty() {
                return Err(invalid("locales are listed but no target is set"));
            }
            return Ok(Vec::new());
        }

        let mut payload = LocalizationPayload::default();
        for (name, locale_id) in &config.locales {
            let file = path.join(format!("{name}.txt"));
            if !file.is_file() {
                tracing::warn!("Locale file {} is missing, skipping", file.display());
                continue;
            }
            let strings = parse_locale_file(&std::fs::read_to_string(&file)?)?;
            if !strings.is_empty() {
                payload.locales.push(LocaleStrings {
                    locale_id: *locale_id,
                    strings,
                });
            }
        }

        if payload.locales.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![FilePatch {
            target: ctx.resolve(&config.target),
            module: MODULE_ID.to_string(),
            payload: serde_json::to_vec(&payload)?,
        }])
    }

    fn apply_patch(&self, payload: &[u8], input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
        let payload: LocalizationPayload = serde_json::from_slice(payload)?;

        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        let mut table = parse_string_table(&data)?;

        let mut changed = 0;
        for locale in payload.locales {
            changed += table.merge(locale.locale_id, locale.strings);
        }
        tracing::debug!("Merged {} localized string(s)", changed);

        output.write_all(&write_string_table(&table)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::string_table::StringTable;
    use crate::manifest::PatchManifest;
    use tempfile::TempDir;

    #[test]
    fn test_parse_locale_file() {
        let strings = parse_locale_file("# title\nmenu.start = Start game\n\nmsg=Line one\\nLine two\n").unwrap();
        assert_eq!(strings["menu.start"], "Start game");
        assert_eq!(strings["msg"], "Line one\nLine two");
        assert!(parse_locale_file("no separator").is_err());
    }

    #[test]
    fn test_patch_roundtrip_through_table() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join(MODULE_ID);
        LocalizationModule.setup_module_folder(&folder).unwrap();

        let config = LocalizationConfig {
            target: "data/strings.tbl".to_string(),
            locales: IndexMap::from([("french".to_string(), 2)]),
        };
        std::fs::write(folder.join(CONFIG_FILE), serde_json::to_vec(&config).unwrap()).unwrap();
        std::fs::write(folder.join("french.txt"), "menu.start=Lancer\n").unwrap();

        let manifest = PatchManifest::new("fr");
        let ctx = ModuleContext::new(&manifest, &[]);
        let patches = LocalizationModule.patched_files(&ctx, &folder).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].target.key(), "files/data/strings.tbl");

        let mut table = StringTable::new();
        table.merge(1, [("menu.start", "Start")]);
        let original = write_string_table(&table).unwrap();

        let mut patched = Vec::new();
        LocalizationModule
            .apply_patch(&patches[0].payload, &mut original.as_slice(), &mut patched)
            .unwrap();

        let result = parse_string_table(&patched).unwrap();
        assert_eq!(result.section(1).unwrap().get("menu.start").unwrap().text, "Start");
        assert_eq!(result.section(2).unwrap().get("menu.start").unwrap().text, "Lancer");
    }

    #[test]
    fn test_scaffold_produces_no_patches() {
        let temp = TempDir::new().unwrap();
        LocalizationModule.setup_module_folder(temp.path()).unwrap();
        let manifest = PatchManifest::new("p");
        let ctx = ModuleContext::new(&manifest, &[]);
        assert!(LocalizationModule.patched_files(&ctx, temp.path()).unwrap().is_empty());
    }
}
