//! Archive Extractor
//!
//! Unpacks a container archive into a working directory. Every entry is read
//! completely before it is written, so a corrupt entry aborts the extraction
//! with [ConvertError::ArchiveCorrupt] instead of leaving a truncated file.

use std::{
    cmp::min,
    fs::{self, File},
    io::Read,
    path::Path,
};

use log::{debug, warn};
use zip::{CompressionMethod, ZipArchive, result::ZipError};

use crate::error::ConvertError;

/// Upper bound for buffer space reserved from an entry's declared size
const PREALLOCATION_LIMIT: u64 = 1 << 20;

/// Extracts every entry of `source` below `dest`
///
/// Entries whose names would escape `dest` are skipped with a warning.
/// EPUB only permits Stored and Deflated entries; other compression methods
/// are reported but still extracted when they can be read.
///
/// ## Return
/// - `Ok(usize)`: The number of files written
/// - `Err(ConvertError)`: The source is not a readable archive, or the
///   destination could not be written
pub fn extract_archive<P, Q>(source: P, dest: Q) -> Result<usize, ConvertError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let dest = dest.as_ref();
    let mut archive = ZipArchive::new(File::open(source.as_ref())?)?;
    let mut count = 0;

    for index in 0..archive.len() {
        let compression = archive.by_index_raw(index)?.compression();
        let mut entry = archive.by_index(index)?;

        if !matches!(
            compression,
            CompressionMethod::Stored | CompressionMethod::Deflated
        ) {
            warn!(
                "Entry \"{}\" uses unsupported compression method {}",
                entry.name(),
                compression
            );
        }

        let Some(relative_path) = entry.enclosed_name() else {
            warn!("Skipping entry with unsafe name \"{}\"", entry.name());
            continue;
        };
        let output_path = dest.join(relative_path);

        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
            continue;
        }

        // The declared size is untrusted, the buffer grows with the actual data
        let mut data = Vec::with_capacity(min(entry.size(), PREALLOCATION_LIMIT) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|err| ConvertError::ArchiveCorrupt {
                source: ZipError::Io(err),
            })?;

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&output_path, &data)?;

        debug!("Extracted \"{}\" ({} bytes)", entry.name(), data.len());
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        io::Write,
        path::{Path, PathBuf},
    };

    use tempfile::TempDir;
    use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

    use crate::{archive::extract_archive, error::ConvertError};

    fn create_test_zip(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let zip_path = dir.join(name);
        let mut writer = ZipWriter::new(fs::File::create(&zip_path).unwrap());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (entry_name, content) in files {
            writer.start_file(entry_name.to_string(), options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        zip_path
    }

    #[test]
    fn test_extract_archive() {
        let dir = TempDir::new().unwrap();
        let zip_path = create_test_zip(
            dir.path(),
            "book.epub",
            &[
                ("mimetype", b"application/epub+zip"),
                ("META-INF/container.xml", b"<container/>"),
                ("OEBPS/text/ch1.xhtml", "<p>第一章</p>".as_bytes()),
            ],
        );

        let dest = dir.path().join("work");
        let count = extract_archive(&zip_path, &dest).unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            fs::read_to_string(dest.join("mimetype")).unwrap(),
            "application/epub+zip"
        );
        assert_eq!(
            fs::read_to_string(dest.join("OEBPS/text/ch1.xhtml")).unwrap(),
            "<p>第一章</p>"
        );
    }

    #[test]
    fn test_directory_entries_are_created() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("book.epub");

        let mut writer = ZipWriter::new(fs::File::create(&zip_path).unwrap());
        writer
            .add_directory("OEBPS/images/", SimpleFileOptions::default())
            .unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("work");
        assert_eq!(extract_archive(&zip_path, &dest).unwrap(), 0);
        assert!(dest.join("OEBPS/images").is_dir());
    }

    #[test]
    fn test_oversized_declared_entry_size() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("book.epub");

        let mut writer = ZipWriter::new(fs::File::create(&zip_path).unwrap());
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true);
        writer.start_file("mimetype", options).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        // Rewrite every ZIP64 extended field so the entry claims a huge uncompressed size
        let mut data = fs::read(&zip_path).unwrap();
        let declared = 5u64.to_le_bytes();
        let mut patched = 0;
        for offset in 0..data.len().saturating_sub(12) {
            if data[offset] == 0x01
                && data[offset + 1] == 0x00
                && data[offset + 3] == 0x00
                && data[offset + 4..offset + 12] == declared
            {
                data[offset + 4..offset + 12].copy_from_slice(&0x7FFF_FFFF_FFFF_FFFFu64.to_le_bytes());
                patched += 1;
            }
        }
        assert!(patched > 0);
        fs::write(&zip_path, &data).unwrap();

        let result = extract_archive(&zip_path, dir.path().join("work"));
        assert!(matches!(
            result,
            Ok(_) | Err(ConvertError::ArchiveCorrupt { .. })
        ));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.epub");
        fs::write(&path, b"this is not a zip archive").unwrap();

        let result = extract_archive(&path, dir.path().join("work"));
        assert!(matches!(result, Err(ConvertError::ArchiveCorrupt { .. })));
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = extract_archive(dir.path().join("missing.epub"), dir.path().join("work"));
        assert!(matches!(result, Err(ConvertError::IOError { .. })));
    }
}
