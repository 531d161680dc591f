//! Drawing face boxes and name labels onto the uploaded image.

use crate::types::PixelRect;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Label for a face that matched no reference.
pub const UNKNOWN_LABEL: &str = "Unknown";

const BOX_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LABEL_STRIP_HEIGHT: u32 = 35;
const LABEL_TEXT_INSET: u32 = 6;
const LABEL_TEXT_SCALE: f32 = 24.0;

/// Fonts tried, in order, when no font path is configured.
const FONT_SEARCH_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid font file {0}")]
    InvalidFont(PathBuf),
}

/// Draws a box and a filled name strip for each face.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Annotator that draws boxes and strips but no text.
    pub fn without_text() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self { font: Some(font) }
    }

    /// Load the label font.
    ///
    /// An explicit `path` must load. Without one, the common system font
    /// locations are searched; if none is usable, labels are drawn without text.
    pub fn load(path: Option<&Path>) -> Result<Self, AnnotateError> {
        if let Some(path) = path {
            let font = read_font(path)?;
            tracing::info!(path = %path.display(), "label font loaded");
            return Ok(Self::with_font(font));
        }

        for candidate in FONT_SEARCH_PATHS.iter().map(Path::new) {
            if !candidate.exists() {
                continue;
            }
            match read_font(candidate) {
                Ok(font) => {
                    tracing::info!(path = %candidate.display(), "label font loaded");
                    return Ok(Self::with_font(font));
                }
                Err(e) => tracing::debug!(error = %e, "skipping font candidate"),
            }
        }

        tracing::warn!("no label font found; face labels will be drawn without text");
        Ok(Self::without_text())
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Outline `rect` and draw the `label` strip along its bottom edge.
    ///
    /// Draws straight into `image`; successive calls accumulate.
    pub fn draw(&self, image: &mut RgbImage, rect: PixelRect, label: &str) {
        let (left, top) = (rect.left as i32, rect.top as i32);

        for inset in 0..BOX_THICKNESS {
            let (w, h) = (rect.width(), rect.height());
            if w <= 2 * inset || h <= 2 * inset {
                break;
            }
            let at = Rect::at(left + inset as i32, top + inset as i32).of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(image, at, BOX_COLOUR);
        }

        let strip_top = rect.bottom.saturating_sub(LABEL_STRIP_HEIGHT);
        let strip = Rect::at(left, strip_top as i32).of_size(rect.width(), rect.bottom - strip_top + 1);
        draw_filled_rect_mut(image, strip, BOX_COLOUR);

        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                TEXT_COLOUR,
                left + LABEL_TEXT_INSET as i32,
                (strip_top + LABEL_TEXT_INSET) as i32,
                PxScale::from(LABEL_TEXT_SCALE),
                font,
                label,
            );
        }
    }
}

fn read_font(path: &Path) -> Result<FontVec, AnnotateError> {
    let bytes = std::fs::read(path).map_err(|source| AnnotateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| AnnotateError::InvalidFont(path.to_path_buf()))
}
