//! Encoding Resolver
//!
//! Best-effort character encoding detection for the text assets of an EPUB.
//! Detection never fails: every input produces an encoding and a confidence
//! score, and decoding is always lossy, so malformed byte sequences end up as
//! replacement characters instead of errors.
//!
//! The detection order is:
//! 1. Byte order mark
//! 2. Valid UTF-8
//! 3. Charset declared in the XML declaration or an HTML `meta` element
//! 4. Legacy Chinese encodings (Big5, GBK/GB18030), told apart statistically

use std::cmp::min;

use chardetng::EncodingDetector;
use encoding_rs::{BIG5, Encoding, GB18030, GBK, UTF_8, UTF_16BE, UTF_16LE};
use log::debug;

/// Confidence required before a detected encoding is trusted over UTF-8
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Number of leading bytes searched for a charset declaration
const SNIFF_LIMIT: usize = 1024;

/// Where a detected encoding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    ByteOrderMark,
    Utf8,
    Declared,
    Guessed,
    Fallback,
}

/// A best-guess encoding with its confidence score in `0.0..=1.0`
#[derive(Debug, Clone, Copy)]
pub struct DetectedEncoding {
    pub encoding: &'static Encoding,
    pub confidence: f32,
    pub source: DetectionSource,
}

/// Lossily decoded text together with what is needed to encode it back
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,

    /// The encoding actually used for decoding
    pub encoding: &'static Encoding,

    /// Whether the raw bytes started with a byte order mark
    pub bom: bool,

    /// Whether malformed sequences were replaced while decoding
    pub had_errors: bool,
}

impl DecodedText {
    /// Encodes `text` with the same encoding and byte order mark as the original bytes
    pub fn encode(&self, text: &str) -> Vec<u8> {
        encode(text, self.encoding, self.bom)
    }
}

/// Inspects raw bytes and guesses their character encoding
pub fn detect(bytes: &[u8]) -> DetectedEncoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return DetectedEncoding {
            encoding,
            confidence: 1.0,
            source: DetectionSource::ByteOrderMark,
        };
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DetectedEncoding {
            encoding: UTF_8,
            confidence: if text.is_ascii() { 1.0 } else { 0.99 },
            source: DetectionSource::Utf8,
        };
    }

    if let Some(encoding) = declared_encoding(bytes) {
        let clean = encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .is_some();

        return DetectedEncoding {
            encoding,
            confidence: if clean { 0.9 } else { 0.4 },
            source: DetectionSource::Declared,
        };
    }

    guess_legacy_chinese(bytes)
}

/// Guesses between the legacy Chinese encodings
///
/// Nearly every valid Big5 byte sequence is also valid GB18030, so clean
/// decoding alone cannot tell them apart. The statistical detector decides
/// when its guess decodes cleanly; otherwise the first clean candidate is
/// used with a low confidence.
fn guess_legacy_chinese(bytes: &[u8]) -> DetectedEncoding {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, false);

    let decodes_cleanly = |encoding: &'static Encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .is_some()
    };

    if [BIG5, GBK, GB18030].contains(&guess) && decodes_cleanly(guess) {
        return DetectedEncoding {
            encoding: guess,
            confidence: 0.8,
            source: DetectionSource::Guessed,
        };
    }

    let clean = [BIG5, GB18030]
        .into_iter()
        .filter(|&encoding| decodes_cleanly(encoding))
        .collect::<Vec<_>>();

    match clean.as_slice() {
        [] => DetectedEncoding {
            encoding: UTF_8,
            confidence: 0.0,
            source: DetectionSource::Fallback,
        },
        [encoding] => DetectedEncoding {
            encoding: *encoding,
            confidence: 0.8,
            source: DetectionSource::Guessed,
        },
        [encoding, ..] => DetectedEncoding {
            encoding: *encoding,
            confidence: 0.5,
            source: DetectionSource::Guessed,
        },
    }
}

/// Decodes raw bytes into text, never failing
///
/// The detected encoding is used only when its confidence is above
/// `threshold`; otherwise the bytes are decoded as UTF-8. A byte order mark
/// is always honoured and stripped from the returned text.
pub fn decode(bytes: &[u8], threshold: f32) -> DecodedText {
    let detected = detect(bytes);

    let (encoding, bom_length) = match Encoding::for_bom(bytes) {
        Some((encoding, length)) => (encoding, length),
        None if detected.confidence > threshold => (detected.encoding, 0),
        None => (UTF_8, 0),
    };

    debug!(
        "detected {} ({:?}, confidence {:.2}), decoding as {}",
        detected.encoding.name(),
        detected.source,
        detected.confidence,
        encoding.name()
    );

    let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_length..]);

    DecodedText {
        text: text.into_owned(),
        encoding,
        bom: bom_length > 0,
        had_errors,
    }
}

/// Encodes text with the given encoding, optionally prefixed with a byte order mark
///
/// UTF-16 is encoded by hand since `encoding_rs` only produces ASCII-compatible
/// output. Characters that cannot be represented in a legacy encoding are
/// written as numeric character references.
pub fn encode(text: &str, encoding: &'static Encoding, bom: bool) -> Vec<u8> {
    if encoding == UTF_16LE || encoding == UTF_16BE {
        let big_endian = encoding == UTF_16BE;
        let mut data = Vec::with_capacity(text.len() * 2 + 2);

        if bom {
            let mark: [u8; 2] = if big_endian { [0xFE, 0xFF] } else { [0xFF, 0xFE] };
            data.extend_from_slice(&mark);
        }

        for unit in text.encode_utf16() {
            let bytes = if big_endian {
                unit.to_be_bytes()
            } else {
                unit.to_le_bytes()
            };
            data.extend_from_slice(&bytes);
        }

        return data;
    }

    let (encoded, _, _) = encoding.encode(text);

    let mut data = Vec::with_capacity(encoded.len() + 3);
    if bom && encoding == UTF_8 {
        data.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    }
    data.extend_from_slice(&encoded);
    data
}

/// Finds a charset declared in the head of the document
///
/// Looks for the `encoding` pseudo-attribute of an XML declaration first,
/// then for any `charset=` as used by `<meta charset>` and `http-equiv` metas.
/// Labels that are not ASCII-compatible cannot have been sniffed from ASCII
/// text and are ignored.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(&bytes[..min(SNIFF_LIMIT, bytes.len())]).to_lowercase();

    let declaration = head
        .find("<?xml")
        .and_then(|start| head[start..].find("?>").map(|end| &head[start..start + end]))
        .and_then(|declaration| pseudo_attribute(declaration, "encoding"));

    let label = declaration.or_else(|| pseudo_attribute(&head, "charset"))?;
    let encoding = Encoding::for_label(label.as_bytes())?;

    if encoding.is_ascii_compatible() {
        Some(encoding)
    } else {
        None
    }
}

/// Reads the value following `key` and `=`, with or without quotes
fn pseudo_attribute<'a>(haystack: &'a str, key: &str) -> Option<&'a str> {
    let mut offset = 0;

    while let Some(position) = haystack[offset..].find(key) {
        let rest = haystack[offset + position + key.len()..].trim_start();
        offset += position + key.len();

        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start().trim_start_matches(['"', '\'']);

        let end = rest
            .find(|c: char| c == '"' || c == '\'' || c == ';' || c == '>' || c.is_whitespace())
            .unwrap_or(rest.len());

        if end > 0 {
            return Some(&rest[..end]);
        }
    }

    None
}
