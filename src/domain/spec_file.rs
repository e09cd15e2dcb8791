//! Line grammar for environment specification files.
//!
//! Only three line shapes are recognised; everything else is ignored so the
//! files may carry any other environment-file syntax:
//!
//! ```text
//! <runtime>=X.Y[.Z]             runtime version      (python=3.11)
//! <name>==<version>             pinned package       (numpy==1.26.4)
//! <channel>::<name>=<version>   channel-qualified    (pytorch::pytorch=2.5.1)
//! ```
//!
//! Leading whitespace, a YAML list marker (`- `) and trailing `#` comments are
//! stripped before matching. Channel-qualified names are remapped from their
//! distribution name to the identity they are queried under.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::bom::{BomBuilder, BomEntry, BomKind};
use super::error::DomainError;

static PINNED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)==([A-Za-z0-9][A-Za-z0-9.+_-]*)$")
        .expect("pinned-package pattern is valid")
});

static CHANNEL_PINNED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([A-Za-z0-9][A-Za-z0-9._-]*)::([A-Za-z0-9][A-Za-z0-9._-]*)=([A-Za-z0-9][A-Za-z0-9.+_-]*)$",
    )
    .expect("channel-pinned pattern is valid")
});

static RUNTIME_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("runtime version pattern is valid"));

/// Distribution names that are queried under a different import identity.
pub const BUILTIN_REMAP: &[(&str, &str)] = &[
    ("pytorch", "torch"),
    ("pillow", "PIL"),
    ("pyyaml", "yaml"),
    ("pywin32", "win32api"),
];

/// Distribution → import-identity table used for channel-qualified lines.
#[derive(Debug, Clone)]
pub struct ImportRemap {
    table: BTreeMap<String, String>,
}

impl ImportRemap {
    /// Built-in table extended (and overridden) by `extra`.
    pub fn with_overrides(extra: &BTreeMap<String, String>) -> Self {
        let mut table: BTreeMap<String, String> = BUILTIN_REMAP
            .iter()
            .map(|(d, i)| ((*d).to_string(), (*i).to_string()))
            .collect();
        for (dist, import) in extra {
            table.insert(dist.to_lowercase(), import.clone());
        }
        Self { table }
    }

    pub fn import_name<'a>(&'a self, distribution: &'a str) -> &'a str {
        self.table
            .get(&distribution.to_lowercase())
            .map(String::as_str)
            .unwrap_or(distribution)
    }
}

impl Default for ImportRemap {
    fn default() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }
}

/// A recognised line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecLine {
    Runtime { version: String },
    Pinned { name: String, version: String },
    ChannelPinned {
        channel: String,
        name: String,
        version: String,
    },
}

/// Strip list markers, comments and whitespace from a raw line.
fn normalize(raw: &str) -> &str {
    let without_comment = match raw.find('#') {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    let trimmed = without_comment.trim();
    trimmed
        .strip_prefix('-')
        .map(str::trim_start)
        .unwrap_or(trimmed)
        .trim_matches(|c| c == '"' || c == '\'')
}

/// Classify a single line, or `None` if it is not one of the known shapes.
pub fn classify_line(raw: &str, runtime: &str) -> Option<SpecLine> {
    let line = normalize(raw);
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = CHANNEL_PINNED.captures(line) {
        return Some(SpecLine::ChannelPinned {
            channel: caps[1].to_string(),
            name: caps[2].to_string(),
            version: caps[3].to_string(),
        });
    }

    if let Some(caps) = PINNED.captures(line) {
        return Some(SpecLine::Pinned {
            name: caps[1].to_string(),
            version: caps[2].to_string(),
        });
    }

    let (name, version) = line.split_once('=')?;
    if name == runtime && RUNTIME_VERSION.is_match(version) {
        return Some(SpecLine::Runtime {
            version: version.to_string(),
        });
    }

    None
}

/// Parse the full text of a specification file into BOM entries.
///
/// Pure: never touches the filesystem or runs tools. Fails with
/// `MissingDependency` when no runtime version line is present.
pub fn parse_spec(text: &str, runtime: &str, remap: &ImportRemap) -> Result<BomBuilder, DomainError> {
    let mut builder = BomBuilder::new();
    let mut saw_runtime = false;

    for raw in text.lines() {
        match classify_line(raw, runtime) {
            Some(SpecLine::Runtime { version }) => {
                saw_runtime = true;
                builder.upsert_parsed(BomEntry::parsed(runtime, BomKind::RuntimeVersion, version));
            }
            Some(SpecLine::Pinned { name, version }) => {
                builder.upsert_parsed(BomEntry::parsed(
                    name.clone(),
                    BomKind::LanguagePackage {
                        distribution: name,
                        channel: None,
                    },
                    version,
                ));
            }
            Some(SpecLine::ChannelPinned {
                channel,
                name,
                version,
            }) => {
                let import = remap.import_name(&name).to_string();
                builder.upsert_parsed(BomEntry::parsed(
                    import,
                    BomKind::LanguagePackage {
                        distribution: name,
                        channel: Some(channel),
                    },
                    version,
                ));
            }
            None => {}
        }
    }

    if !saw_runtime {
        return Err(DomainError::MissingDependency {
            what: format!("{} version declaration", runtime),
            hint: format!("add a `{}=X.Y` line to the specification file", runtime),
        });
    }

    Ok(builder)
}
