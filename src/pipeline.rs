//! Conversion Pipeline
//!
//! Ties the stages of a conversion together. One call to
//! [EpubConverter::convert_epub] runs, in order:
//!
//! 1. a one-time backup of the source next to it
//! 2. extraction into a scoped temporary directory
//! 3. structure validation and repair (failures are logged, not fatal)
//! 4. rewriting of every text asset (failures are logged per asset)
//! 5. mimetype normalization
//! 6. packaging and verification, with a bounded number of attempts
//!
//! The source archive is never modified. The output file only appears once
//! a verified archive has been written, and the temporary directory is
//! removed when the call returns, whatever its outcome.
//!
//! ## Example
//! ```rust, no_run
//! # use epub_t2s::{error::ConvertError, pipeline::{ConvertOptions, EpubConverter}};
//! # use epub_t2s::convert::TraditionalToSimplified;
//! # fn main() -> Result<(), ConvertError> {
//! let mut options = ConvertOptions::default();
//! options.output("out/book.epub").packaging_attempts(3);
//!
//! let converter = EpubConverter::with_options(TraditionalToSimplified, options);
//! let report = converter.convert_epub("book.epub")?;
//! println!("{} of {} text files changed", report.changed(), report.processed());
//! # Ok(())
//! # }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{error, info, warn};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::{
    archive::extract_archive,
    convert::{Converter, TraditionalToSimplified},
    encoding::DEFAULT_CONFIDENCE_THRESHOLD,
    error::ConvertError,
    package::{package_epub, verify_package},
    rewrite::rewrite_asset,
    types::{AssetKind, AssetRecord, AssetStatus, ConversionReport, StructureReport},
    utils::{EPUB_MIMETYPE, MIMETYPE_FILE, entry_name, is_os_artifact, sibling_with_suffix},
    validate::repair_structure,
};

/// Options of a conversion run
///
/// All setters return `&mut Self` so that they can be chained.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    output: Option<PathBuf>,
    backup_suffix: String,
    output_suffix: String,
    confidence_threshold: f32,
    packaging_attempts: usize,
    create_backup: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            output: None,
            backup_suffix: "_backup".to_string(),
            output_suffix: "_simplified".to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            packaging_attempts: 1,
            create_backup: true,
        }
    }
}

impl ConvertOptions {
    /// Sets an explicit output path
    ///
    /// Without it, the output is written next to the source with the output
    /// suffix inserted before the extension.
    pub fn output<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn backup_suffix(&mut self, suffix: &str) -> &mut Self {
        self.backup_suffix = suffix.to_string();
        self
    }

    pub fn output_suffix(&mut self, suffix: &str) -> &mut Self {
        self.output_suffix = suffix.to_string();
        self
    }

    /// Sets the confidence a detected encoding needs to be used instead of UTF-8
    pub fn confidence_threshold(&mut self, threshold: f32) -> &mut Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Sets how many times packaging is attempted, at least once
    pub fn packaging_attempts(&mut self, attempts: usize) -> &mut Self {
        self.packaging_attempts = attempts.max(1);
        self
    }

    pub fn create_backup(&mut self, create_backup: bool) -> &mut Self {
        self.create_backup = create_backup;
        self
    }
}

/// EPUB converter
///
/// Applies a [Converter] to the text of an EPUB file and writes the result
/// as a new, well-formed archive.
#[derive(Debug)]
pub struct EpubConverter<C: Converter> {
    converter: C,
    options: ConvertOptions,
}

impl<C: Converter> EpubConverter<C> {
    /// Creates a converter with default options
    pub fn new(converter: C) -> Self {
        Self::with_options(converter, ConvertOptions::default())
    }

    pub fn with_options(converter: C, options: ConvertOptions) -> Self {
        Self { converter, options }
    }

    pub fn options_mut(&mut self) -> &mut ConvertOptions {
        &mut self.options
    }

    /// Converts an EPUB file
    ///
    /// ## Parameters
    /// - `source`: Path of the EPUB file to convert; it is never modified
    ///
    /// ## Return
    /// - `Ok(ConversionReport)`: The output was written and verified
    /// - `Err(ConvertError)`: The run was aborted; no output file was written
    pub fn convert_epub<P: AsRef<Path>>(&self, source: P) -> Result<ConversionReport, ConvertError> {
        let source = source.as_ref();
        if !source.is_file() {
            return Err(ConvertError::SourceNotFound {
                path: source.display().to_string(),
            });
        }

        let output = match &self.options.output {
            Some(output) => output.clone(),
            None => sibling_with_suffix(source, &self.options.output_suffix),
        };
        let backup = self
            .options
            .create_backup
            .then(|| sibling_with_suffix(source, &self.options.backup_suffix));

        let overwrites_backup = backup
            .as_ref()
            .is_some_and(|backup| same_location(&output, backup));
        if same_location(&output, source) || overwrites_backup {
            return Err(ConvertError::InvalidOutputPath {
                path: output.display().to_string(),
            });
        }

        let backup_created = match &backup {
            Some(backup) => create_backup(source, backup)?,
            None => false,
        };

        info!("Converting \"{}\"", source.display());

        let temp_dir = tempfile::Builder::new().prefix("epub-t2s-").tempdir()?;
        let root = temp_dir.path();

        let extracted = extract_archive(source, root)?;
        info!("Extracted {} files", extracted);

        let mut structure = StructureReport::default();
        if let Err(err) = repair_structure(root, &mut structure) {
            warn!("{}, continuing anyway", err);
            structure.problem = Some(err.to_string());
        }
        log_structure(&structure);

        let assets = self.rewrite_assets(root)?;

        fs::write(root.join(MIMETYPE_FILE), EPUB_MIMETYPE)?;

        let entries_written = self.package(root, &output)?;

        let report = ConversionReport {
            source: source.to_path_buf(),
            output,
            backup,
            backup_created,
            structure,
            assets,
            entries_written,
        };

        info!(
            "Wrote \"{}\" with {} entries; {} text files processed, {} changed, {} failed",
            report.output.display(),
            report.entries_written,
            report.processed(),
            report.changed(),
            report.failed()
        );

        Ok(report)
    }

    /// Rewrites every text asset of the working tree, in a sorted walk
    ///
    /// Failures of single assets are recorded and logged, never returned.
    fn rewrite_assets(&self, root: &Path) -> Result<Vec<AssetRecord>, ConvertError> {
        let mut records = Vec::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(kind) = AssetKind::from_path(entry.path()) else {
                continue;
            };
            let Some(path) = entry_name(root, entry.path()) else {
                continue;
            };
            if is_os_artifact(&path) {
                continue;
            }

            let threshold = self.options.confidence_threshold;
            let record = match rewrite_asset(entry.path(), kind, &self.converter, threshold) {
                Ok(result) => {
                    info!(
                        "{} \"{}\" ({})",
                        if result.changed { "Converted" } else { "Unchanged" },
                        path,
                        result.encoding.name()
                    );

                    AssetRecord {
                        path,
                        encoding: Some(result.encoding.name()),
                        status: if result.changed {
                            AssetStatus::Changed
                        } else {
                            AssetStatus::Unchanged
                        },
                    }
                }
                Err(err) => {
                    error!("{}", err);

                    AssetRecord {
                        path,
                        encoding: None,
                        status: AssetStatus::Failed(err.to_string()),
                    }
                }
            };

            records.push(record);
        }

        Ok(records)
    }

    /// Packages the working tree, retrying up to the configured number of attempts
    fn package(&self, root: &Path, output: &Path) -> Result<usize, ConvertError> {
        let attempts = self.options.packaging_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match package_to(root, output) {
                Ok(count) => return Ok(count),
                Err(err) => {
                    warn!("Packaging attempt {}/{} failed: {}", attempt, attempts, err);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ConvertError::PackagingFailed {
            reason: "no packaging attempt was made".to_string(),
        }))
    }
}

/// Converts an EPUB file from Traditional to Simplified Chinese with default options
///
/// The output is written next to the source as `<name>_simplified.epub`,
/// and a backup `<name>_backup.epub` is created once.
pub fn convert_epub<P: AsRef<Path>>(source: P) -> Result<ConversionReport, ConvertError> {
    EpubConverter::new(TraditionalToSimplified).convert_epub(source)
}

/// Copies the source to the backup path unless a backup already exists
fn create_backup(source: &Path, backup: &Path) -> Result<bool, ConvertError> {
    if backup.exists() {
        info!("Backup \"{}\" already exists", backup.display());
        return Ok(false);
    }

    fs::copy(source, backup)?;
    info!("Created backup \"{}\"", backup.display());
    Ok(true)
}

/// Writes a verified archive to `output`
///
/// The archive is assembled in a temporary file next to the output and only
/// moved into place once it passed verification.
fn package_to(root: &Path, output: &Path) -> Result<usize, ConvertError> {
    let directory = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !directory.exists() {
        fs::create_dir_all(directory)?;
    }

    let temp_file = NamedTempFile::new_in(directory)?;
    let count = package_epub(root, temp_file.as_file())?;
    verify_package(temp_file.path())?;

    temp_file
        .persist(output)
        .map_err(|err| ConvertError::IOError { source: err.error })?;

    Ok(count)
}

fn log_structure(structure: &StructureReport) {
    if structure.mimetype_missing {
        info!("The mimetype file will be added");
    }
    if structure.meta_inf_created {
        info!("Created the missing META-INF directory");
    }
    for path in &structure.synthesized {
        info!("Added missing \"{}\"", path);
    }
    if let Some(package_document) = &structure.package_document {
        info!("Package document: \"{}\"", package_document);
    }
}

/// Checks whether two paths name the same file, whether or not they exist
fn same_location(left: &Path, right: &Path) -> bool {
    match (resolve(left), resolve(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(path) = fs::canonicalize(path) {
        return Some(path);
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some(fs::canonicalize(parent).ok()?.join(path.file_name()?))
}
