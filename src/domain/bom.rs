use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::error::DomainError;

/// Expected value of a system package declared without a version pin.
pub const SYSTEM_PACKAGE_PRESENT: &str = "installed";

/// What kind of component a BOM entry describes.
///
/// Each variant has exactly one verification rule in the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BomKind {
    /// The language runtime version of the environment.
    RuntimeVersion,
    /// A pinned package inside the environment.
    ///
    /// The entry name is the import identity; `distribution` is what the
    /// package manager installs.
    LanguagePackage {
        distribution: String,
        channel: Option<String>,
    },
    /// An OS package.
    SystemPackage,
    /// A variable persisted in the environment manager.
    EnvVar,
    /// A directory that must exist.
    Directory,
    /// A rendered file that must exist.
    GeneratedFile,
}

impl BomKind {
    /// Short label used in tables and logs.
    pub fn label(&self) -> &'static str {
        match self {
            BomKind::RuntimeVersion => "runtime-version",
            BomKind::LanguagePackage { .. } => "language-package",
            BomKind::SystemPackage => "system-package",
            BomKind::EnvVar => "env-var",
            BomKind::Directory => "directory",
            BomKind::GeneratedFile => "generated-file",
        }
    }
}

impl fmt::Display for BomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BomSource {
    /// Declared in the installer configuration.
    Declared,
    /// Extracted from the environment specification file.
    Parsed,
}

/// One required component and its exact expected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BomEntry {
    pub name: String,
    pub kind: BomKind,
    pub expected: String,
    pub critical: bool,
    pub note: String,
    pub source: BomSource,
}

impl BomEntry {
    pub fn declared(
        name: impl Into<String>,
        kind: BomKind,
        expected: impl Into<String>,
        critical: bool,
        note: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            expected: expected.into(),
            critical,
            note: note.into(),
            source: BomSource::Declared,
        }
    }

    pub fn parsed(name: impl Into<String>, kind: BomKind, expected: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            expected: expected.into(),
            critical: true,
            note: String::new(),
            source: BomSource::Parsed,
        }
    }
}

/// Accumulates entries while a BOM is being assembled.
///
/// Parsed entries follow last-declaration-wins; declared entries must be
/// unique against everything already present.
#[derive(Debug, Default)]
pub struct BomBuilder {
    entries: Vec<BomEntry>,
    index: HashMap<String, usize>,
}

impl BomBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry produced by the spec-file parser.
    pub fn upsert_parsed(&mut self, entry: BomEntry) {
        match self.index.get(&entry.name) {
            Some(&pos) => {
                debug!(
                    component = %entry.name,
                    previous = %self.entries[pos].expected,
                    replacement = %entry.expected,
                    "Later declaration overrides earlier one"
                );
                self.entries[pos] = entry;
            }
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Insert an entry that must not collide with any existing key.
    pub fn insert_unique(&mut self, entry: BomEntry) -> Result<(), DomainError> {
        if let Some(&pos) = self.index.get(&entry.name) {
            return Err(DomainError::Config(format!(
                "BOM component '{}' declared twice ({} and {})",
                entry.name, self.entries[pos].kind, entry.kind
            )));
        }
        self.index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Add every parsed entry from `other`, keeping uniqueness against
    /// the entries already in this builder.
    pub fn merge_unique(&mut self, other: BomBuilder) -> Result<(), DomainError> {
        for entry in other.entries {
            self.insert_unique(entry)?;
        }
        Ok(())
    }

    pub fn build(self) -> Bom {
        Bom {
            entries: self.entries,
            index: self.index,
        }
    }
}

/// The immutable bill of materials for one run.
#[derive(Debug, Clone, Default)]
pub struct Bom {
    entries: Vec<BomEntry>,
    index: HashMap<String, usize>,
}

impl Bom {
    pub fn get(&self, name: &str) -> Option<&BomEntry> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }

    pub fn entries(&self) -> &[BomEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The runtime-version entry, if one was parsed.
    pub fn runtime(&self) -> Option<&BomEntry> {
        self.entries
            .iter()
            .find(|e| matches!(e.kind, BomKind::RuntimeVersion))
    }
}
