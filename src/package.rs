//! Archive Packager
//!
//! Writes a working tree back into a container archive that readers accept:
//! the `mimetype` entry comes first and is stored uncompressed, the
//! `META-INF/` descriptors are stored as well, and everything else is
//! deflated. Files are added in a sorted walk so the output is deterministic,
//! and every entry carries the modification time of the file it came from.

use std::{
    fs::{self, File},
    io::{Read, Seek, Write},
    path::Path,
};

use chrono::{Datelike, Local, Timelike};
use log::debug;
use walkdir::WalkDir;
use zip::{
    CompressionMethod, DateTime, ZipArchive, ZipWriter, result::ZipError,
    write::SimpleFileOptions,
};

use crate::{
    error::ConvertError,
    utils::{EPUB_MIMETYPE, META_INF_DIR, MIMETYPE_FILE, entry_name, is_os_artifact},
};

/// Packages the tree below `root` into `writer`
///
/// The `mimetype` file of the tree is ignored; the entry is always written
/// with the canonical content. Platform metadata files are left out and no
/// directory entries are written.
///
/// ## Return
/// - `Ok(usize)`: The number of entries written, `mimetype` included
/// - `Err(ConvertError)`: The tree could not be read or the archive could
///   not be written
pub fn package_epub<P, W>(root: P, writer: W) -> Result<usize, ConvertError>
where
    P: AsRef<Path>,
    W: Write + Seek,
{
    let root = root.as_ref();
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut zip = ZipWriter::new(writer);

    let mimetype_options = with_modification_time(stored, &root.join(MIMETYPE_FILE));
    zip.start_file(MIMETYPE_FILE, mimetype_options)
        .map_err(packaging_error)?;
    zip.write_all(EPUB_MIMETYPE.as_bytes())?;
    let mut count = 1;

    let meta_inf_prefix = format!("{}/", META_INF_DIR);

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(target_path) = entry_name(root, entry.path()) else {
            continue;
        };

        if target_path == MIMETYPE_FILE {
            continue;
        }

        if is_os_artifact(&target_path) {
            debug!("Leaving out platform metadata \"{}\"", target_path);
            continue;
        }

        let options = if target_path.starts_with(&meta_inf_prefix) {
            stored
        } else {
            deflated
        };
        let options = with_modification_time(options, entry.path());

        let data = fs::read(entry.path())?;
        zip.start_file(target_path, options)
            .map_err(packaging_error)?;
        zip.write_all(&data)?;
        count += 1;
    }

    let mut writer = zip.finish().map_err(packaging_error)?;
    writer.flush()?;

    Ok(count)
}

/// Checks that a written archive is readable by EPUB readers
///
/// The archive must reopen, be non-empty and start with an uncompressed
/// `mimetype` entry holding exactly `application/epub+zip`.
pub fn verify_package<P: AsRef<Path>>(path: P) -> Result<(), ConvertError> {
    let path = path.as_ref();

    if fs::metadata(path)?.len() == 0 {
        return Err(ConvertError::PackagingFailed {
            reason: "the archive is empty".to_string(),
        });
    }

    let mut archive = ZipArchive::new(File::open(path)?).map_err(packaging_error)?;
    if archive.len() == 0 {
        return Err(ConvertError::PackagingFailed {
            reason: "the archive has no entries".to_string(),
        });
    }

    let mut first = archive.by_index(0).map_err(packaging_error)?;
    if first.name() != MIMETYPE_FILE {
        return Err(ConvertError::PackagingFailed {
            reason: format!("the first entry is \"{}\" instead of mimetype", first.name()),
        });
    }

    if first.compression() != CompressionMethod::Stored {
        return Err(ConvertError::PackagingFailed {
            reason: format!("the mimetype entry is compressed with {}", first.compression()),
        });
    }

    let mut content = Vec::new();
    first
        .read_to_end(&mut content)
        .map_err(|err| packaging_error(ZipError::Io(err)))?;

    if content != EPUB_MIMETYPE.as_bytes() {
        return Err(ConvertError::PackagingFailed {
            reason: format!(
                "unexpected mimetype content \"{}\"",
                String::from_utf8_lossy(&content)
            ),
        });
    }

    Ok(())
}

/// Stamps `options` with the modification time of `path`
///
/// Times a ZIP timestamp cannot hold, before 1980 or after 2107, leave the
/// format's default in place.
fn with_modification_time(options: SimpleFileOptions, path: &Path) -> SimpleFileOptions {
    match modification_time(path) {
        Some(time) => options.last_modified_time(time),
        None => options,
    }
}

fn modification_time(path: &Path) -> Option<DateTime> {
    let modified = fs::metadata(path).and_then(|metadata| metadata.modified()).ok()?;
    let local = chrono::DateTime::<Local>::from(modified);

    DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn packaging_error(err: ZipError) -> ConvertError {
    ConvertError::PackagingFailed {
        reason: err.to_string(),
    }
}
