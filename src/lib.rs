//! EPUB Traditional to Simplified Chinese converter
//!
//! A Rust library for converting the text of EPUB eBook files from
//! Traditional to Simplified Chinese while leaving their structure intact.
//!
//! Only human-readable text nodes of the markup documents and descriptors are
//! rewritten. Tags, attributes, comments, declarations and the content of
//! `script` and `style` elements are copied byte for byte, binary resources
//! are not touched, and the result is repackaged the way EPUB readers expect
//! it: an uncompressed `mimetype` entry first, followed by the rest of the
//! container.
//!
//! ## Features
//!
//! - Best-effort encoding detection with UTF-8, UTF-16, Big5 and GB18030 support.
//! - Repair of missing `mimetype` and `META-INF/container.xml` files.
//! - Pluggable conversion through the [Converter] trait.
//! - A one-time backup of the source, which itself is never modified.
//!
//! ## Quick Start
//!
//! ```rust, no_run
//! # use epub_t2s::convert_epub;
//! # fn main() -> Result<(), epub_t2s::error::ConvertError> {
//! // Writes book_simplified.epub and book_backup.epub next to the source
//! let report = convert_epub("path/to/book.epub")?;
//!
//! println!("Output: {}", report.output.display());
//! println!("Changed: {}/{}", report.changed(), report.processed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `cli` (default): Builds the `epub-t2s` command line tool. The library
//!   itself only logs through the `log` facade and never installs a logger.

pub(crate) mod utils;

pub mod archive;
pub mod convert;
pub mod encoding;
pub mod error;
pub mod markup;
pub mod package;
pub mod pipeline;
pub mod rewrite;
pub mod types;
pub mod validate;

pub use convert::{Converter, TraditionalToSimplified};
pub use pipeline::{ConvertOptions, EpubConverter, convert_epub};
