use std::path::{Path, PathBuf};

/// Structural kind of a text asset
///
/// The kind decides how the markup scanner treats the content of an asset.
/// Any file whose extension maps to neither kind is a binary asset and is
/// copied into the output archive unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Tag-structured hypertext (`.xhtml`, `.html`, `.htm`)
    ///
    /// The content of `script` and `style` elements is never rewritten.
    Markup,

    /// XML-like descriptor with plain text in tags (`.xml`, `.opf`, `.ncx`)
    Descriptor,
}

impl AssetKind {
    /// Determines the asset kind from the file extension, case-insensitively
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_string_lossy().to_lowercase();

        match extension.as_str() {
            "xhtml" | "html" | "htm" => Some(AssetKind::Markup),
            "xml" | "opf" | "ncx" => Some(AssetKind::Descriptor),
            _ => None,
        }
    }

    /// Whether raw-text elements (`script`, `style`) must be skipped
    pub fn tracks_raw_text(&self) -> bool {
        matches!(self, AssetKind::Markup)
    }
}

/// Result of rewriting the text nodes of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// No eligible text node was changed by the converter
    Unchanged,

    /// At least one text node was substituted; holds the new content
    Changed(String),
}

/// Processing status of a single text asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetStatus {
    Unchanged,
    Changed,

    /// Processing failed and the original bytes were restored
    Failed(String),
}

/// Record of one text asset processed during a run
#[derive(Debug, Clone)]
pub struct AssetRecord {
    /// Path relative to the archive root, with forward slashes
    pub path: String,

    /// Name of the encoding used to decode the asset, if it got that far
    pub encoding: Option<&'static str>,

    pub status: AssetStatus,
}

/// Outcome of a structure validation pass over the working tree
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StructureReport {
    /// The `mimetype` file was missing and will be written before packaging
    pub mimetype_missing: bool,

    /// Path of the package document referenced by `container.xml`
    pub package_document: Option<String>,

    /// The `META-INF/` directory was missing and has been created
    pub meta_inf_created: bool,

    /// Descriptor files written by the validator, relative to the root
    pub synthesized: Vec<String>,

    /// Why validation failed, if it did; the run continues regardless
    pub problem: Option<String>,
}

/// Run-scoped record of a conversion
///
/// The report is owned by the pipeline for the duration of one run and
/// handed to the caller once the output archive has been verified.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub source: PathBuf,
    pub output: PathBuf,

    /// The backup path, if backups are enabled
    pub backup: Option<PathBuf>,

    /// Whether the backup was created by this run (false if it already existed)
    pub backup_created: bool,

    /// What validation found and repaired, including why it failed if it did
    pub structure: StructureReport,

    /// One record per text asset, in processing order
    pub assets: Vec<AssetRecord>,

    /// Number of entries written to the output archive
    pub entries_written: usize,
}

impl ConversionReport {
    pub fn processed(&self) -> usize {
        self.assets.len()
    }

    pub fn changed(&self) -> usize {
        self.count(|status| matches!(status, AssetStatus::Changed))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, AssetStatus::Failed(_)))
    }

    pub fn structure_valid(&self) -> bool {
        self.structure.problem.is_none()
    }

    fn count(&self, predicate: impl Fn(&AssetStatus) -> bool) -> usize {
        self.assets
            .iter()
            .filter(|record| predicate(&record.status))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use crate::types::AssetKind;

    #[test]
    fn test_asset_kind_from_path() {
        assert_eq!(
            AssetKind::from_path("OEBPS/ch01.xhtml"),
            Some(AssetKind::Markup)
        );
        assert_eq!(AssetKind::from_path("index.HTM"), Some(AssetKind::Markup));
        assert_eq!(
            AssetKind::from_path("OEBPS/content.opf"),
            Some(AssetKind::Descriptor)
        );
        assert_eq!(AssetKind::from_path("toc.ncx"), Some(AssetKind::Descriptor));
        assert_eq!(AssetKind::from_path("images/cover.jpg"), None);
        assert_eq!(AssetKind::from_path("styles/main.css"), None);
        assert_eq!(AssetKind::from_path("mimetype"), None);
    }
}
