//! SVG minification.
//!
//! The document is parsed into a `usvg` tree and written back without
//! indentation, comments or editor metadata. Text elements are kept as text.

use super::{Codec, CodecError, CodecHandler, CodecOptions};
use resvg::usvg::{self, fontdb};
use std::sync::{Arc, OnceLock};

/// Decimal places kept for path coordinates.
const COORDINATES_PRECISION: u8 = 3;

/// Decimal places kept for transform matrices.
const TRANSFORMS_PRECISION: u8 = 5;

pub(crate) struct SvgHandler {
    fonts: OnceLock<Arc<fontdb::Database>>,
}

impl SvgHandler {
    pub(crate) fn new() -> Self {
        Self {
            fonts: OnceLock::new(),
        }
    }

    /// System fonts, loaded on first use. usvg drops text it cannot lay out.
    fn fonts(&self) -> Arc<fontdb::Database> {
        self.fonts
            .get_or_init(|| {
                let mut db = fontdb::Database::new();
                db.load_system_fonts();
                tracing::debug!(faces = db.len(), "Loaded system fonts for SVG text");
                Arc::new(db)
            })
            .clone()
    }
}

impl CodecHandler for SvgHandler {
    fn codec(&self) -> Codec {
        Codec::Svg
    }

    fn encode(&self, input: &[u8], _options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        let options = usvg::Options {
            fontdb: self.fonts(),
            ..usvg::Options::default()
        };
        let minified = minify(input, &options)?;

        // Text the tree could not keep would vanish from the picture.
        if let Ok(original) = std::str::from_utf8(input)
            && text_elements(&minified) < text_elements(original)
        {
            tracing::warn!("SVG text cannot be preserved without matching fonts, keeping original");
            return Ok(input.to_vec());
        }
        Ok(minified.into_bytes())
    }
}

fn minify(input: &[u8], options: &usvg::Options) -> Result<String, CodecError> {
    let tree = usvg::Tree::from_data(input, options)?;
    Ok(tree.to_string(&usvg::WriteOptions {
        indent: usvg::Indent::None,
        attributes_indent: usvg::Indent::None,
        preserve_text: true,
        coordinates_precision: COORDINATES_PRECISION,
        transforms_precision: TRANSFORMS_PRECISION,
        ..usvg::WriteOptions::default()
    }))
}

fn text_elements(svg: &str) -> usize {
    roxmltree::Document::parse(svg)
        .map(|doc| {
            doc.descendants()
                .filter(|n| n.tag_name().name() == "text")
                .count()
        })
        .unwrap_or(0)
}
