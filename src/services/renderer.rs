//! QR image rendering.
//!
//! The pipeline only depends on the [`Renderer`] trait; [`QrRenderer`] is the
//! production implementation built on `qrcode` for the module matrix and
//! `image`/`imageproc` for rasterisation and the optional text label.

use crate::models::image_config::{ColorModel, ImageConfig};
use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, GrayImage, ImageError, Luma};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use qrcode::{Color, QrCode};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Largest width or height of a rendered image, in pixels.
pub const MAX_IMAGE_SIDE: u32 = 8192;

/// Largest label font size, in pixels.
pub const MAX_FONT_SIZE: f32 = 512.0;

const BLACK: Luma<u8> = Luma([0]);
const WHITE: Luma<u8> = Luma([255]);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("work item `{id}` has no usable file name")]
    InvalidItem { id: String },
    #[error("cannot encode `{payload}` as QR: {reason}")]
    Encode { payload: String, reason: String },
    #[error("writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("image settings rejected: {reason}")]
    InvalidConfig { reason: String },
    #[error("render task aborted: {0}")]
    Task(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// What to draw for one work item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderJob {
    /// Data encoded in the code.
    pub payload: String,
    /// Text printed in the bottom margin.
    pub label: String,
    /// Output file name inside the target directory.
    pub file_name: String,
}

/// Produces one image file per job. Implementations are blocking and are
/// driven from `spawn_blocking`.
pub trait Renderer: Send + Sync {
    fn render(&self, job: &RenderJob, config: &ImageConfig, dir: &Path) -> RenderResult<PathBuf>;
}

#[derive(Default)]
pub struct QrRenderer {
    font_dir: Option<PathBuf>,
    fonts: Mutex<HashMap<String, Option<Arc<FontVec>>>>,
}

impl QrRenderer {
    /// `font_dir` is searched for `<textFontName>.ttf`. Without it labels are
    /// not drawn and the bottom margin stays blank.
    pub fn new(font_dir: Option<PathBuf>) -> Self {
        Self {
            font_dir,
            fonts: Mutex::new(HashMap::new()),
        }
    }

    fn font(&self, name: &str) -> Option<Arc<FontVec>> {
        let dir = self.font_dir.as_ref()?;
        let mut cache = match self.fonts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache
            .entry(name.to_string())
            .or_insert_with(|| {
                let path = dir.join(format!("{}.ttf", name));
                match std::fs::read(&path) {
                    Ok(bytes) => match FontVec::try_from_vec(bytes) {
                        Ok(font) => Some(Arc::new(font)),
                        Err(err) => {
                            warn!(font = %path.display(), "invalid font file: {}", err);
                            None
                        }
                    },
                    Err(err) => {
                        warn!(font = %path.display(), "font not available: {}", err);
                        None
                    }
                }
            })
            .clone()
    }

    fn draw(
        &self,
        code: &QrCode,
        label: &str,
        config: &ImageConfig,
        layout: Layout,
    ) -> GrayImage {
        let Layout {
            modules,
            block,
            quiet,
            border,
            qr_side,
            width,
            height,
        } = layout;

        let mut canvas = GrayImage::from_pixel(width, height, WHITE);

        if border > 0 {
            for (x, y, w, h) in [
                (0, 0, width, border),
                (0, height - border, width, border),
                (0, 0, border, height),
                (width - border, 0, border, height),
            ] {
                draw_filled_rect_mut(&mut canvas, Rect::at(x as i32, y as i32).of_size(w, h), BLACK);
            }
        }

        let origin = border + quiet;
        for (index, color) in code.to_colors().into_iter().enumerate() {
            if color != Color::Dark {
                continue;
            }
            let col = index as u32 % modules;
            let row = index as u32 / modules;
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at((origin + col * block) as i32, (origin + row * block) as i32)
                    .of_size(block, block),
                BLACK,
            );
        }

        if config.qr_code_margin_bottom > 0 && !label.is_empty() {
            match self.font(&config.text_font_name) {
                Some(font) => {
                    let band_top = border + qr_side;
                    draw_label(&mut canvas, font.as_ref(), label, config, band_top);
                }
                None => debug!(label, "no font loaded, label skipped"),
            }
        }

        canvas
    }
}

/// Pixel geometry of one rendered image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
    modules: u32,
    block: u32,
    quiet: u32,
    border: u32,
    qr_side: u32,
    width: u32,
    height: u32,
}

impl Layout {
    /// Fails when any side would exceed [`MAX_IMAGE_SIDE`] or the font is
    /// larger than [`MAX_FONT_SIZE`].
    fn compute(modules: u32, config: &ImageConfig) -> RenderResult<Self> {
        let too_large = || RenderError::InvalidConfig {
            reason: format!("image would exceed {} pixels per side", MAX_IMAGE_SIDE),
        };
        let font_size = config.text_font_size;
        if !font_size.is_finite() || font_size > MAX_FONT_SIZE {
            return Err(RenderError::InvalidConfig {
                reason: format!("text font size {} out of range", font_size),
            });
        }
        if !config.text_character_spacing.is_finite() {
            return Err(RenderError::InvalidConfig {
                reason: "text character spacing is not a number".into(),
            });
        }

        let block = config.pixels_per_block.max(1);
        let border = config.image_border_size;
        let quiet = config.qr_code_margin.checked_mul(block).ok_or_else(too_large)?;
        let qr_side = modules
            .checked_mul(block)
            .and_then(|side| side.checked_add(quiet.checked_mul(2)?))
            .ok_or_else(too_large)?;
        let frame = border.checked_mul(2).ok_or_else(too_large)?;
        let width = qr_side.checked_add(frame).ok_or_else(too_large)?;
        let height = width
            .checked_add(config.qr_code_margin_bottom)
            .ok_or_else(too_large)?;
        if width > MAX_IMAGE_SIDE || height > MAX_IMAGE_SIDE {
            return Err(too_large());
        }

        Ok(Self {
            modules,
            block,
            quiet,
            border,
            qr_side,
            width,
            height,
        })
    }
}

/// Draw `label` centred in the band below the code, one glyph at a time so
/// the configured character spacing is honoured.
fn draw_label(canvas: &mut GrayImage, font: &FontVec, label: &str, config: &ImageConfig, band_top: u32) {
    let scale = PxScale::from(config.text_font_size.max(1.0));
    let spacing = config.text_font_size * config.text_character_spacing;

    let glyphs: Vec<(String, u32, u32)> = label
        .chars()
        .map(|c| {
            let s = c.to_string();
            let (w, h) = text_size(scale, font, &s);
            (s, w, h)
        })
        .collect();

    let total = glyphs.iter().map(|(_, w, _)| *w as f32).sum::<f32>()
        + spacing * glyphs.len().saturating_sub(1) as f32;
    let line_height = glyphs.iter().map(|(_, _, h)| *h).max().unwrap_or(0);

    let mut x = (canvas.width() as f32 - total) / 2.0;
    let y = band_top as i32 + (config.qr_code_margin_bottom as i32 - line_height as i32) / 2;
    for (glyph, w, _) in &glyphs {
        draw_text_mut(canvas, BLACK, x.round() as i32, y, scale, font, glyph);
        x += *w as f32 + spacing;
    }
}

impl Renderer for QrRenderer {
    fn render(&self, job: &RenderJob, config: &ImageConfig, dir: &Path) -> RenderResult<PathBuf> {
        let code = QrCode::with_error_correction_level(
            job.payload.as_bytes(),
            config.error_correction_level.into(),
        )
        .map_err(|err| RenderError::Encode {
            payload: job.payload.clone(),
            reason: err.to_string(),
        })?;

        let layout = Layout::compute(code.width() as u32, config)?;
        let canvas = self.draw(&code, &job.label, config, layout);
        let image = match config.colour_model {
            ColorModel::Grayscale => DynamicImage::ImageLuma8(canvas),
            ColorModel::Rgb => DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(canvas).to_rgb8()),
        };

        let path = dir.join(&job.file_name);
        image
            .save_with_format(&path, config.image_format.into())
            .map_err(|source| RenderError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(file = %path.display(), "rendered qr image");
        Ok(path)
    }
}
