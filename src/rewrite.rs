//! Text Rewriter
//!
//! Replaces the human-readable text nodes of a markup document with their
//! converted form. Every markup token (tags, attribute values, comments,
//! CDATA, declarations, processing instructions and the content of
//! `script`/`style` elements) is copied byte for byte.
//!
//! Runs made only of whitespace, digits and punctuation are never handed to
//! the converter, so numeric identifiers and layout artifacts stay intact.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use encoding_rs::Encoding;
use log::warn;
use tempfile::NamedTempFile;

use crate::{
    convert::Converter,
    encoding,
    error::ConvertError,
    markup::{MarkupScanner, Segment},
    types::{AssetKind, RewriteOutcome},
};

/// Result of rewriting one text asset on disk
#[derive(Debug, Clone, Copy)]
pub struct RewrittenAsset {
    /// Encoding used to decode (and, if changed, re-encode) the asset
    pub encoding: &'static Encoding,

    pub changed: bool,
}

/// Rewrites the text nodes of a decoded document
///
/// Returns [RewriteOutcome::Unchanged] when the converter left every eligible
/// run as it was; no new content is produced in that case.
pub fn rewrite_text<C>(content: &str, kind: AssetKind, converter: &C) -> RewriteOutcome
where
    C: Converter + ?Sized,
{
    let mut output = String::with_capacity(content.len());
    let mut changed = false;

    for segment in MarkupScanner::new(content, kind.tracks_raw_text()) {
        match segment {
            Segment::Markup(markup) => output.push_str(markup),
            Segment::Text(text) if is_convertible(text) => {
                let converted = converter.convert(text);
                if converted != text {
                    changed = true;
                    output.push_str(&converted);
                } else {
                    output.push_str(text);
                }
            }
            Segment::Text(text) => output.push_str(text),
        }
    }

    if changed {
        RewriteOutcome::Changed(output)
    } else {
        RewriteOutcome::Unchanged
    }
}

/// Rewrites a text asset in place
///
/// The file is decoded with the best-effort encoding resolver and written back
/// in the same encoding only if something changed. The new content replaces
/// the file in a single rename, so if anything fails the original bytes are
/// still in place and [ConvertError::AssetProcessingFailed] is returned.
pub fn rewrite_asset<P, C>(
    path: P,
    kind: AssetKind,
    converter: &C,
    threshold: f32,
) -> Result<RewrittenAsset, ConvertError>
where
    P: AsRef<Path>,
    C: Converter + ?Sized,
{
    let path = path.as_ref();
    let original = fs::read(path).map_err(|err| asset_error(path, err))?;

    let decoded = encoding::decode(&original, threshold);
    if decoded.had_errors {
        warn!(
            "Malformed {} sequences in \"{}\" were replaced while decoding",
            decoded.encoding.name(),
            path.display()
        );
    }

    let content = match rewrite_text(&decoded.text, kind, converter) {
        RewriteOutcome::Unchanged => {
            return Ok(RewrittenAsset {
                encoding: decoded.encoding,
                changed: false,
            });
        }
        RewriteOutcome::Changed(content) => content,
    };

    replace_contents(path, &decoded.encode(&content)).map_err(|err| asset_error(path, err))?;

    Ok(RewrittenAsset {
        encoding: decoded.encoding,
        changed: true,
    })
}

/// Replaces the contents of `path` without ever truncating the original
///
/// The new bytes are written to a temporary file in the same directory,
/// which is then renamed over `path`.
fn replace_contents(path: &Path, data: &[u8]) -> io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp_file = NamedTempFile::new_in(directory)?;
    temp_file.write_all(data)?;
    temp_file.flush()?;

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp_file.path(), metadata.permissions())?;
    }

    temp_file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Checks whether a text run contains anything worth converting
///
/// Runs made up entirely of whitespace, digits and punctuation are skipped.
pub fn is_convertible(text: &str) -> bool {
    !text
        .chars()
        .all(|c| c.is_whitespace() || c.is_ascii_digit() || is_punctuation(c))
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        // General Punctuation
        || ('\u{2000}'..='\u{206F}').contains(&c)
        // CJK Symbols and Punctuation
        || ('\u{3000}'..='\u{303F}').contains(&c)
        // Full-width forms of ASCII punctuation
        || ('\u{FF01}'..='\u{FF0F}').contains(&c)
        || ('\u{FF1A}'..='\u{FF20}').contains(&c)
        || ('\u{FF3B}'..='\u{FF40}').contains(&c)
        || ('\u{FF5B}'..='\u{FF65}').contains(&c)
}

fn asset_error<E: std::fmt::Display>(path: &Path, err: E) -> ConvertError {
    ConvertError::AssetProcessingFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use encoding_rs::{BIG5, UTF_8};
    use tempfile::TempDir;

    use crate::{
        error::ConvertError,
        rewrite::{is_convertible, replace_contents, rewrite_asset, rewrite_text},
        types::{AssetKind, RewriteOutcome},
    };

    fn simplify(text: &str) -> String {
        text.replace('體', "体")
            .replace('書', "书")
            .replace('這', "这")
            .replace('說', "说")
    }

    fn identity(text: &str) -> String {
        text.to_string()
    }

    #[test]
    fn test_is_convertible() {
        assert!(is_convertible("繁體"));
        assert!(is_convertible("Chapter 1"));
        assert!(!is_convertible("  \n\t"));
        assert!(!is_convertible("1.2.3, 45: 6!"));
        assert!(!is_convertible("「」，。……——"));
        assert!(!is_convertible(""));
    }

    #[test]
    fn test_only_text_nodes_are_converted() {
        let content = "<p title=\"說書\" data-x='體'>這本書</p>";
        assert_eq!(
            rewrite_text(content, AssetKind::Markup, &simplify),
            RewriteOutcome::Changed("<p title=\"說書\" data-x='體'>这本书</p>".to_string())
        );
    }

    #[test]
    fn test_declaration_and_doctype_are_preserved() {
        let content = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
                       <!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" \"書.dtd\">\n\
                       <html><head><title>說書</title></head><body><p>這</p></body></html>";
        let expected = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
                        <!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" \"書.dtd\">\n\
                        <html><head><title>说书</title></head><body><p>这</p></body></html>";

        assert_eq!(
            rewrite_text(content, AssetKind::Markup, &simplify),
            RewriteOutcome::Changed(expected.to_string())
        );
    }

    #[test]
    fn test_script_and_style_are_untouched() {
        let content = "<head><style>p::after { content: \"體\"; }</style>\
                       <script>var t = '<i>書</i>';</script></head><body>書</body>";
        let expected = "<head><style>p::after { content: \"體\"; }</style>\
                        <script>var t = '<i>書</i>';</script></head><body>书</body>";

        assert_eq!(
            rewrite_text(content, AssetKind::Markup, &simplify),
            RewriteOutcome::Changed(expected.to_string())
        );
    }

    #[test]
    fn test_descriptor_text_is_converted() {
        let content = "<package><metadata><dc:title>說書</dc:title>\
                       <meta name=\"cover\" content=\"書\"/></metadata></package>";
        let expected = "<package><metadata><dc:title>说书</dc:title>\
                        <meta name=\"cover\" content=\"書\"/></metadata></package>";

        assert_eq!(
            rewrite_text(content, AssetKind::Descriptor, &simplify),
            RewriteOutcome::Changed(expected.to_string())
        );
    }

    #[test]
    fn test_numeric_runs_are_skipped() {
        let converter = |text: &str| format!("[{}]", text);
        let content = "<td>12.5</td><td> 3, 4 </td><td>是</td>";

        assert_eq!(
            rewrite_text(content, AssetKind::Markup, &converter),
            RewriteOutcome::Changed("<td>12.5</td><td> 3, 4 </td><td>[是]</td>".to_string())
        );
    }

    #[test]
    fn test_identity_converter_is_unchanged() {
        let content = "<html><body><p>這本書</p></body></html>";
        assert_eq!(
            rewrite_text(content, AssetKind::Markup, &identity),
            RewriteOutcome::Unchanged
        );
    }

    #[test]
    fn test_rewrite_asset_writes_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ch1.xhtml");
        fs::write(&path, "<p>這本書</p>").unwrap();

        let result = rewrite_asset(&path, AssetKind::Markup, &simplify, 0.7).unwrap();
        assert!(result.changed);
        assert_eq!(result.encoding, UTF_8);
        assert_eq!(fs::read_to_string(&path).unwrap(), "<p>这本书</p>");
    }

    #[test]
    fn test_rewrite_asset_keeps_bytes_when_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ch1.xhtml");
        let data = b"\xEF\xBB\xBF<p>\xE9\x80\x99</p>\r\n".to_vec();
        fs::write(&path, &data).unwrap();

        let result = rewrite_asset(&path, AssetKind::Markup, &identity, 0.7).unwrap();
        assert!(!result.changed);
        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_rewrite_asset_preserves_legacy_encoding() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("toc.ncx");

        let mut data = b"<?xml version=\"1.0\" encoding=\"big5\"?><text>".to_vec();
        data.extend_from_slice(&BIG5.encode("這本書").0);
        data.extend_from_slice(b"</text>");
        fs::write(&path, &data).unwrap();

        let result = rewrite_asset(&path, AssetKind::Descriptor, &simplify, 0.7).unwrap();
        assert!(result.changed);
        assert_eq!(result.encoding, BIG5);

        let mut expected = b"<?xml version=\"1.0\" encoding=\"big5\"?><text>".to_vec();
        expected.extend_from_slice(&BIG5.encode("这本书").0);
        expected.extend_from_slice(b"</text>");
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn test_replace_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ch1.xhtml");
        fs::write(&path, "<p>舊</p>").unwrap();

        replace_contents(&path, "<p>新</p>".as_bytes()).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "<p>新</p>");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_replace_keeps_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("OEBPS");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("ch1.xhtml"), "<p>這</p>").unwrap();

        assert!(replace_contents(&target, b"<p>x</p>").is_err());

        assert!(target.is_dir());
        assert_eq!(
            fs::read_to_string(target.join("ch1.xhtml")).unwrap(),
            "<p>這</p>"
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_asset_in_read_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let text_dir = dir.path().join("text");
        fs::create_dir(&text_dir).unwrap();
        let path = text_dir.join("ch1.xhtml");
        fs::write(&path, "<p>這本書</p>").unwrap();
        fs::set_permissions(&text_dir, fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users may still create files in a read-only directory
        let writable = fs::File::create(text_dir.join("writable")).is_ok();
        if !writable {
            let result = rewrite_asset(&path, AssetKind::Markup, &simplify, 0.7);
            assert!(matches!(
                result,
                Err(ConvertError::AssetProcessingFailed { .. })
            ));
            assert_eq!(fs::read_to_string(&path).unwrap(), "<p>這本書</p>");
        }

        fs::set_permissions(&text_dir, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_rewrite_asset_unreadable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.xhtml");

        let result = rewrite_asset(&path, AssetKind::Markup, &simplify, 0.7);
        assert!(matches!(
            result,
            Err(ConvertError::AssetProcessingFailed { .. })
        ));
    }
}
