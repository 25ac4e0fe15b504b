//! Structure Validator
//!
//! Checks the extracted working tree for the files every EPUB reader relies
//! on, and repairs what can be repaired without guessing:
//!
//! - a missing `mimetype` is only flagged, the pipeline rewrites it anyway
//! - a missing `META-INF/` directory is created
//! - a missing `META-INF/container.xml` is synthesized from the first package
//!   document (`*.opf`) found in the tree
//!
//! A container descriptor that exists but cannot be resolved to an existing
//! package document is reported as [ConvertError::StructureInvalid].

use std::{fs, io::Cursor, path::Path};

use log::{info, warn};
use quick_xml::{
    NsReader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use walkdir::WalkDir;

use crate::{
    error::ConvertError,
    types::StructureReport,
    utils::{
        CONTAINER_PATH, EPUB_MIMETYPE, META_INF_DIR, MIMETYPE_FILE, entry_name,
        remove_leading_slash,
    },
};

const CONTAINER_NAMESPACE: &str = "urn:oasis:names:tc:opendocument:xmlns:container";
const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Validates and repairs the structure of an extracted EPUB
///
/// ## Parameters
/// - `root`: The root of the extracted working tree
///
/// ## Return
/// - `Ok(StructureReport)`: The tree references an existing package document
/// - `Err(ConvertError)`: The package document could not be located, or
///   repairing the tree failed
pub fn validate_structure<P: AsRef<Path>>(root: P) -> Result<StructureReport, ConvertError> {
    let mut report = StructureReport::default();
    repair_structure(root, &mut report)?;
    Ok(report)
}

/// Validates and repairs the structure of an extracted EPUB, recording into `report`
///
/// Everything found or repaired before an error is kept in `report`, so a
/// caller that continues after a failure still knows what was done.
pub fn repair_structure<P: AsRef<Path>>(
    root: P,
    report: &mut StructureReport,
) -> Result<(), ConvertError> {
    let root = root.as_ref();

    let mimetype_path = root.join(MIMETYPE_FILE);
    if mimetype_path.is_file() {
        let content = fs::read(&mimetype_path)?;
        if content.trim_ascii() != EPUB_MIMETYPE.as_bytes() {
            warn!(
                "Unexpected mimetype content \"{}\", it will be replaced",
                String::from_utf8_lossy(&content)
            );
        }
    } else {
        warn!("The mimetype file is missing");
        report.mimetype_missing = true;
    }

    let meta_inf = root.join(META_INF_DIR);
    if !meta_inf.is_dir() {
        warn!("The {} directory is missing, creating it", META_INF_DIR);
        fs::create_dir_all(&meta_inf)?;
        report.meta_inf_created = true;
    }

    let container_path = root.join(CONTAINER_PATH);
    if !container_path.is_file() {
        let package_document =
            find_package_document(root)?.ok_or_else(|| ConvertError::StructureInvalid {
                reason: format!("{} is missing and no package document was found", CONTAINER_PATH),
            })?;

        fs::write(&container_path, make_container_xml(&package_document)?)?;
        info!(
            "Synthesized {} pointing at \"{}\"",
            CONTAINER_PATH, package_document
        );

        report.synthesized.push(CONTAINER_PATH.to_string());
        report.package_document = Some(package_document);
        return Ok(());
    }

    let data = fs::read(&container_path)?;
    let package_document = parse_container(&String::from_utf8_lossy(&data))?;

    if !root.join(remove_leading_slash(&package_document)).is_file() {
        return Err(ConvertError::StructureInvalid {
            reason: format!("package document \"{}\" does not exist", package_document),
        });
    }

    report.package_document = Some(package_document);
    Ok(())
}

/// Extracts the `full-path` of the first `rootfile` element
///
/// Missing elements or attributes and malformed XML are all reported as
/// [ConvertError::StructureInvalid].
pub fn parse_container(content: &str) -> Result<String, ConvertError> {
    let mut reader = NsReader::from_str(content);
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| ConvertError::StructureInvalid {
                reason: format!("malformed {}: {}", CONTAINER_PATH, err),
            })?;

        match event {
            Event::Start(ref element) | Event::Empty(ref element)
                if element.local_name().as_ref() == b"rootfile" =>
            {
                let full_path = element
                    .attributes()
                    .flatten()
                    .find(|attr| attr.key.local_name().as_ref() == b"full-path")
                    .map(|attr| String::from_utf8_lossy(&attr.value).trim().to_string())
                    .filter(|path| !path.is_empty());

                return full_path.ok_or_else(|| ConvertError::StructureInvalid {
                    reason: "rootfile element has no full-path attribute".to_string(),
                });
            }

            Event::Eof => {
                return Err(ConvertError::StructureInvalid {
                    reason: format!("{} has no rootfile element", CONTAINER_PATH),
                });
            }

            _ => {}
        }

        buf.clear();
    }
}

/// Finds the first `*.opf` file in a deterministic walk of the tree
fn find_package_document(root: &Path) -> Result<Option<String>, ConvertError> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let is_opf = entry
            .path()
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("opf"));

        if is_opf {
            return Ok(entry_name(root, entry.path()));
        }
    }

    Ok(None)
}

/// Creates a minimal `container.xml` with a single rootfile
fn make_container_xml(package_document: &str) -> Result<Vec<u8>, ConvertError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer.write_event(Event::Start(BytesStart::new("container").with_attributes([
        ("version", "1.0"),
        ("xmlns", CONTAINER_NAMESPACE),
    ])))?;
    writer.write_event(Event::Start(BytesStart::new("rootfiles")))?;
    writer.write_event(Event::Empty(BytesStart::new("rootfile").with_attributes([
        ("full-path", package_document),
        ("media-type", PACKAGE_MEDIA_TYPE),
    ])))?;
    writer.write_event(Event::End(BytesEnd::new("rootfiles")))?;
    writer.write_event(Event::End(BytesEnd::new("container")))?;

    Ok(writer.into_inner().into_inner())
}
