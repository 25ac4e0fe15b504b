//! Markup Scanner
//!
//! A forgiving, tag-aware tokenizer that splits a markup document into
//! markup tokens and text nodes. It does not build a tree and never fails:
//! anything that does not look like a markup token is treated as text, and
//! an unterminated comment or CDATA section swallows the rest of the input.
//!
//! Concatenating every [Segment] yielded by [MarkupScanner] reproduces the
//! input exactly, which is what allows the rewriter to substitute text nodes
//! while leaving every other byte untouched.
//!
//! ## Recognized markup tokens
//! - Comments `<!-- ... -->` and CDATA sections `<![CDATA[ ... ]]>`
//! - Processing instructions, including the XML declaration `<?xml ... ?>`
//! - Declarations such as `<!DOCTYPE ...>`, with internal subsets
//! - Start, end and self-closing tags; `>` inside quoted attribute values
//!   does not end the tag
//!
//! When raw-text tracking is enabled, the content of `script` and `style`
//! elements is yielded as a single markup segment up to the matching end tag.

/// Elements whose content is never human-readable text
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// A slice of a document as seen by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Markup copied verbatim, including the raw content of `script`/`style`
    Markup(&'a str),

    /// A text node, i.e. a maximal run between two markup tokens
    Text(&'a str),
}

/// Iterator over the [Segment]s of a markup document
pub struct MarkupScanner<'a> {
    content: &'a str,
    position: usize,

    /// Whether `script`/`style` content is treated as markup
    track_raw_text: bool,

    /// Name (as written) of the raw-text element whose content comes next
    raw_text_element: Option<&'a str>,
}

impl<'a> MarkupScanner<'a> {
    pub fn new(content: &'a str, track_raw_text: bool) -> Self {
        Self {
            content,
            position: 0,
            track_raw_text,
            raw_text_element: None,
        }
    }
}

impl<'a> Iterator for MarkupScanner<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.content.len() {
            return None;
        }

        let rest = &self.content[self.position..];

        if let Some(element) = self.raw_text_element.take() {
            let length = find_end_tag(rest, element).unwrap_or(rest.len());
            if length > 0 {
                self.position += length;
                return Some(Segment::Markup(&rest[..length]));
            }
        }

        if let Some(length) = markup_length(rest) {
            let token = &rest[..length];
            self.position += length;

            if self.track_raw_text {
                self.raw_text_element = raw_text_element(token);
            }

            return Some(Segment::Markup(token));
        }

        let length = text_length(rest);
        self.position += length;
        Some(Segment::Text(&rest[..length]))
    }
}

/// Returns the length of the markup token at the start of `rest`, if any
fn markup_length(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    if bytes.first() != Some(&b'<') {
        return None;
    }

    if rest.starts_with("<!--") {
        return Some(terminated_length(rest, 4, "-->"));
    }

    if rest.starts_with("<![CDATA[") {
        return Some(terminated_length(rest, 9, "]]>"));
    }

    match bytes.get(1) {
        Some(b'?') => rest[2..].find("?>").map(|end| end + 4),
        Some(b'!') if bytes.get(2).is_some_and(u8::is_ascii_alphabetic) => {
            declaration_length(bytes)
        }
        Some(b'/') if bytes.get(2).is_some_and(u8::is_ascii_alphabetic) => tag_length(bytes),
        Some(byte) if byte.is_ascii_alphabetic() => tag_length(bytes),
        _ => None,
    }
}

/// Length of a token ending with `terminator`, or the whole input if it never ends
fn terminated_length(rest: &str, start: usize, terminator: &str) -> usize {
    match rest[start..].find(terminator) {
        Some(end) => start + end + terminator.len(),
        None => rest.len(),
    }
}

/// Scans a start or end tag up to its closing `>`
///
/// Quotes only open an attribute value right after `=`, so a stray
/// apostrophe elsewhere in a malformed tag does not swallow the document.
fn tag_length(bytes: &[u8]) -> Option<usize> {
    let mut quote = None;
    let mut expect_value = false;

    for (index, &byte) in bytes.iter().enumerate().skip(1) {
        match quote {
            Some(open) => {
                if byte == open {
                    quote = None;
                }
            }
            None => match byte {
                b'>' => return Some(index + 1),
                b'=' => expect_value = true,
                b'"' | b'\'' if expect_value => {
                    quote = Some(byte);
                    expect_value = false;
                }
                b' ' | b'\t' | b'\n' | b'\r' | b'\x0C' => {}
                _ => expect_value = false,
            },
        }
    }

    None
}

/// Scans a `<!...>` declaration, skipping over quoted literals and `[...]` subsets
fn declaration_length(bytes: &[u8]) -> Option<usize> {
    let mut quote = None;
    let mut depth = 0usize;

    for (index, &byte) in bytes.iter().enumerate().skip(2) {
        match quote {
            Some(open) => {
                if byte == open {
                    quote = None;
                }
            }
            None => match byte {
                b'"' | b'\'' => quote = Some(byte),
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'>' if depth == 0 => return Some(index + 1),
                _ => {}
            },
        }
    }

    None
}

/// Length of the text node at the start of `rest`
///
/// A `<` that does not open a markup token is part of the text.
fn text_length(rest: &str) -> usize {
    let mut offset = usize::from(rest.starts_with('<'));

    while let Some(position) = rest[offset..].find('<') {
        let candidate = offset + position;
        if markup_length(&rest[candidate..]).is_some() {
            return candidate;
        }
        offset = candidate + 1;
    }

    rest.len()
}

/// Returns the element name if `token` opens a `script` or `style` element
fn raw_text_element(token: &str) -> Option<&str> {
    let inner = token.strip_prefix('<')?;
    if inner.starts_with(['/', '!', '?']) || token.ends_with("/>") {
        return None;
    }

    let name_length = inner
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(inner.len());
    let name = &inner[..name_length];
    let local_name = name.rsplit(':').next().unwrap_or(name);

    RAW_TEXT_ELEMENTS
        .iter()
        .any(|element| local_name.eq_ignore_ascii_case(element))
        .then_some(name)
}

/// Finds the offset of the end tag closing `element`, case-insensitively
fn find_end_tag(rest: &str, element: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let mut offset = 0;

    while let Some(position) = rest[offset..].find("</") {
        let start = offset + position;
        let name_start = start + 2;
        let name_end = name_start + element.len();

        let matches_name = bytes
            .get(name_start..name_end)
            .is_some_and(|name| name.eq_ignore_ascii_case(element.as_bytes()));
        let delimited = bytes
            .get(name_end)
            .is_none_or(|&byte| byte == b'>' || byte == b'/' || byte.is_ascii_whitespace());

        if matches_name && delimited {
            return Some(start);
        }
        offset = name_start;
    }

    None
}

#[cfg(test)]
mod tests {
    use crate::markup::{MarkupScanner, Segment};

    fn scan(content: &str, track_raw_text: bool) -> Vec<Segment<'_>> {
        MarkupScanner::new(content, track_raw_text).collect()
    }

    fn texts(content: &str, track_raw_text: bool) -> Vec<&str> {
        scan(content, track_raw_text)
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Text(text) => Some(text),
                Segment::Markup(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_segments_reassemble_input() {
        let content = "<?xml version=\"1.0\"?>\n<!DOCTYPE html>\n<html><body><p class=\"a\">文字</p>\
                       <!-- 註解 --><br/>尾<![CDATA[資料]]></body></html>";
        let rebuilt = scan(content, true)
            .into_iter()
            .map(|segment| match segment {
                Segment::Markup(markup) => markup,
                Segment::Text(text) => text,
            })
            .collect::<String>();

        assert_eq!(rebuilt, content);
    }

    #[test]
    fn test_simple_document() {
        assert_eq!(
            scan("<p>你好</p>", false),
            vec![
                Segment::Markup("<p>"),
                Segment::Text("你好"),
                Segment::Markup("</p>"),
            ]
        );
    }

    #[test]
    fn test_quoted_attribute_with_angle_bracket() {
        assert_eq!(
            texts("<a title=\"a > b\" href='x'>連結</a>", false),
            vec!["連結"]
        );
    }

    #[test]
    fn test_stray_apostrophe_in_tag() {
        assert_eq!(texts("<p class=don't>文字</p>", false), vec!["文字"]);
    }

    #[test]
    fn test_comment_cdata_and_processing_instruction() {
        assert_eq!(
            scan("<?xml version=\"1.0\"?><!-- <p>x</p> --><![CDATA[<b>]]>", false),
            vec![
                Segment::Markup("<?xml version=\"1.0\"?>"),
                Segment::Markup("<!-- <p>x</p> -->"),
                Segment::Markup("<![CDATA[<b>]]>"),
            ]
        );
    }

    #[test]
    fn test_doctype_with_internal_subset() {
        let content = "<!DOCTYPE html [ <!ENTITY nbsp \"&#160;\"> ]><p>文</p>";
        assert_eq!(
            scan(content, false)[0],
            Segment::Markup("<!DOCTYPE html [ <!ENTITY nbsp \"&#160;\"> ]>")
        );
        assert_eq!(texts(content, false), vec!["文"]);
    }

    #[test]
    fn test_stray_less_than_is_text() {
        assert_eq!(texts("<p>1 < 2 且 3 <= 4</p>", false), vec!["1 < 2 且 3 <= 4"]);
    }

    #[test]
    fn test_unterminated_tag_is_text() {
        assert_eq!(texts("<p>文字</p><div", false), vec!["文字", "<div"]);
    }

    #[test]
    fn test_script_and_style_are_raw_text() {
        let content = "<script type=\"text/javascript\">var s = \"<b>繁體</b>\";</script>\
                       <STYLE>p:before { content: \"體\" }</STYLE><p>正文</p>";

        assert_eq!(texts(content, true), vec!["正文"]);
        assert_eq!(
            scan(content, true)[1],
            Segment::Markup("var s = \"<b>繁體</b>\";")
        );

        // Without tracking, script content is scanned like any other text
        assert!(texts(content, false).contains(&"繁體"));
    }

    #[test]
    fn test_self_closing_script_does_not_start_raw_text() {
        assert_eq!(
            texts("<script src=\"a.js\"/><p>內文</p>", true),
            vec!["內文"]
        );
    }

    #[test]
    fn test_empty_script_element() {
        assert_eq!(
            scan("<script></script>文", true),
            vec![
                Segment::Markup("<script>"),
                Segment::Markup("</script>"),
                Segment::Text("文"),
            ]
        );
    }

    #[test]
    fn test_unclosed_script_swallows_rest() {
        assert!(texts("<script>var a = 1;<p>文</p>", true).is_empty());
    }
}
