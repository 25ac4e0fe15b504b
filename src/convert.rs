//! Script conversion
//!
//! The character mapping itself is not implemented here. A [Converter] is a
//! deterministic, total mapping from one text span to another; the rewriter
//! only decides *which* spans are handed to it.

use zhconv::{Variant, zhconv};

/// A deterministic text-to-text conversion
///
/// Implementations must be total (never fail) and free of side effects.
/// Any `Fn(&str) -> String` closure is a converter, which is convenient for
/// custom tables and tests.
pub trait Converter {
    fn convert(&self, text: &str) -> String;
}

impl<F> Converter for F
where
    F: Fn(&str) -> String,
{
    fn convert(&self, text: &str) -> String {
        self(text)
    }
}

/// Traditional Chinese to Simplified Chinese, script only
///
/// Backed by the `zhconv` conversion tables. Regional vocabulary is left
/// alone, only characters are mapped to their simplified forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraditionalToSimplified;

impl Converter for TraditionalToSimplified {
    fn convert(&self, text: &str) -> String {
        zhconv(text, Variant::ZhHans)
    }
}
