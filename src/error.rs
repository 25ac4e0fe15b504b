//! Error Type Definition Module
//!
//! This module defines the errors that may be encountered while converting
//! an EPUB file. All of them are wrapped in the [ConvertError] enumeration.
//!
//! Not every error aborts a run. The pipeline decides how far each one
//! escalates:
//!
//! - [ConvertError::ArchiveCorrupt] and [ConvertError::PackagingFailed] are fatal
//! - [ConvertError::StructureInvalid] is logged and the run continues
//! - [ConvertError::AssetProcessingFailed] is logged, the asset is restored
//!   and the run continues

use thiserror::Error;

/// Types of errors that can occur during EPUB conversion
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Unreadable source archive
    ///
    /// The source file could not be opened as a ZIP container,
    /// or one of its entries could not be read.
    #[error("Archive corrupt: {source}")]
    ArchiveCorrupt { source: zip::result::ZipError },

    /// Per-asset processing failure
    ///
    /// Decoding, rewriting or writing back a single text asset failed.
    /// The original bytes of the asset have been restored.
    #[error("Asset processing failed: \"{path}\": {reason}")]
    AssetProcessingFailed { path: String, reason: String },

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// Output path error
    ///
    /// The requested output path would overwrite the source archive or its backup.
    #[error("Invalid output path: \"{path}\" would overwrite the source or its backup.")]
    InvalidOutputPath { path: String },

    /// Packaging failure
    ///
    /// The produced archive is empty, unreadable, or its first entry
    /// is not an uncompressed `mimetype`.
    #[error("Packaging failed: {reason}")]
    PackagingFailed { reason: String },

    /// QuickXml error
    ///
    /// This error occurs when reading or writing XML with the QuickXml library.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },

    /// The source file does not exist or is not a regular file
    #[error("Source not found: \"{path}\" does not exist or is not a file.")]
    SourceNotFound { path: String },

    /// Missing or unresolvable descriptor files
    ///
    /// `META-INF/container.xml` is missing and cannot be synthesized,
    /// or it does not point at an existing package document.
    #[error("Structure invalid: {reason}")]
    StructureInvalid { reason: String },

    /// WalkDir error
    ///
    /// This error occurs when using the WalkDir library to traverse the working tree.
    #[error("WalkDir error: {source}")]
    WalkDirError { source: walkdir::Error },
}

impl From<zip::result::ZipError> for ConvertError {
    fn from(value: zip::result::ZipError) -> Self {
        ConvertError::ArchiveCorrupt { source: value }
    }
}

impl From<quick_xml::Error> for ConvertError {
    fn from(value: quick_xml::Error) -> Self {
        ConvertError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(value: std::io::Error) -> Self {
        ConvertError::IOError { source: value }
    }
}

impl From<walkdir::Error> for ConvertError {
    fn from(value: walkdir::Error) -> Self {
        ConvertError::WalkDirError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for ConvertError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::AssetProcessingFailed {
                    path: l_path,
                    reason: l_reason,
                },
                Self::AssetProcessingFailed {
                    path: r_path,
                    reason: r_reason,
                },
            ) => l_path == r_path && l_reason == r_reason,
            (Self::InvalidOutputPath { path: l_path }, Self::InvalidOutputPath { path: r_path }) => {
                l_path == r_path
            }
            (
                Self::PackagingFailed { reason: l_reason },
                Self::PackagingFailed { reason: r_reason },
            ) => l_reason == r_reason,
            (Self::SourceNotFound { path: l_path }, Self::SourceNotFound { path: r_path }) => {
                l_path == r_path
            }
            (
                Self::StructureInvalid { reason: l_reason },
                Self::StructureInvalid { reason: r_reason },
            ) => l_reason == r_reason,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ConvertError;

    #[test]
    fn test_zip_error_is_archive_corrupt() {
        let err = ConvertError::from(zip::result::ZipError::InvalidArchive("bad".into()));
        assert!(matches!(err, ConvertError::ArchiveCorrupt { .. }));
        assert!(err.to_string().starts_with("Archive corrupt:"));
    }

    #[test]
    fn test_error_messages() {
        let err = ConvertError::StructureInvalid {
            reason: "no package document found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Structure invalid: no package document found"
        );

        let err = ConvertError::AssetProcessingFailed {
            path: "OEBPS/ch1.xhtml".to_string(),
            reason: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Asset processing failed: \"OEBPS/ch1.xhtml\": disk full"
        );
    }
}
