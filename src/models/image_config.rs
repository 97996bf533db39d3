//! Rendering parameters for generated QR images.
//!
//! Events carry an [`ImageConfigOverrides`] where every field is optional.
//! It is resolved once against the process-wide [`ImageConfig`] defaults so
//! the renderer only ever sees fully-typed values.

use serde::{Deserialize, Serialize};

/// QR error-correction level.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCorrection {
    #[serde(alias = "l")]
    L,
    #[serde(alias = "m")]
    M,
    #[serde(alias = "q")]
    Q,
    #[serde(alias = "h")]
    H,
}

impl From<ErrorCorrection> for qrcode::EcLevel {
    fn from(level: ErrorCorrection) -> Self {
        match level {
            ErrorCorrection::L => qrcode::EcLevel::L,
            ErrorCorrection::M => qrcode::EcLevel::M,
            ErrorCorrection::Q => qrcode::EcLevel::Q,
            ErrorCorrection::H => qrcode::EcLevel::H,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorModel {
    #[serde(alias = "GRAYSCALE", alias = "grayscale", alias = "Greyscale")]
    Grayscale,
    #[serde(rename = "RGB", alias = "rgb", alias = "Rgb")]
    Rgb,
}

/// Output image encoding.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    #[serde(rename = "png", alias = "PNG")]
    Png,
    #[serde(rename = "jpg", alias = "jpeg", alias = "JPG", alias = "JPEG")]
    Jpg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
        }
    }
}

impl From<ImageFormat> for image::ImageFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpg => image::ImageFormat::Jpeg,
        }
    }
}

/// Fully resolved rendering configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub error_correction_level: ErrorCorrection,

    /// Edge length of one QR module, in pixels.
    pub pixels_per_block: u32,

    /// Quiet zone around the code, in modules.
    pub qr_code_margin: u32,

    /// Pixels reserved under the code for the text label.
    pub qr_code_margin_bottom: u32,

    /// Width of the solid frame drawn around the whole image, in pixels.
    pub image_border_size: u32,

    /// Font file stem looked up in the renderer's font directory.
    pub text_font_name: String,

    /// Label height in pixels.
    pub text_font_size: f32,

    /// Extra space between label characters, as a fraction of the font size.
    pub text_character_spacing: f32,

    pub colour_model: ColorModel,
    pub image_format: ImageFormat,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            error_correction_level: ErrorCorrection::H,
            pixels_per_block: 2,
            qr_code_margin: 3,
            qr_code_margin_bottom: 18,
            image_border_size: 1,
            text_font_name: "Verdana".into(),
            text_font_size: 11.0,
            text_character_spacing: 0.1,
            colour_model: ColorModel::Grayscale,
            image_format: ImageFormat::Png,
        }
    }
}

/// Partial configuration as supplied by an event or a defaults file.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageConfigOverrides {
    pub error_correction_level: Option<ErrorCorrection>,
    pub pixels_per_block: Option<u32>,
    pub qr_code_margin: Option<u32>,
    pub qr_code_margin_bottom: Option<u32>,
    pub image_border_size: Option<u32>,
    pub text_font_name: Option<String>,
    pub text_font_size: Option<f32>,
    pub text_character_spacing: Option<f32>,
    pub colour_model: Option<ColorModel>,
    pub image_format: Option<ImageFormat>,
}

impl ImageConfig {
    /// Apply `overrides` on top of `self`. `format` wins over any format in
    /// the overrides.
    pub fn resolve(&self, overrides: &ImageConfigOverrides, format: Option<ImageFormat>) -> Self {
        Self {
            error_correction_level: overrides
                .error_correction_level
                .unwrap_or(self.error_correction_level),
            pixels_per_block: overrides
                .pixels_per_block
                .unwrap_or(self.pixels_per_block)
                .max(1),
            qr_code_margin: overrides.qr_code_margin.unwrap_or(self.qr_code_margin),
            qr_code_margin_bottom: overrides
                .qr_code_margin_bottom
                .unwrap_or(self.qr_code_margin_bottom),
            image_border_size: overrides
                .image_border_size
                .unwrap_or(self.image_border_size),
            text_font_name: overrides
                .text_font_name
                .clone()
                .unwrap_or_else(|| self.text_font_name.clone()),
            text_font_size: overrides.text_font_size.unwrap_or(self.text_font_size),
            text_character_spacing: overrides
                .text_character_spacing
                .unwrap_or(self.text_character_spacing),
            colour_model: overrides.colour_model.unwrap_or(self.colour_model),
            image_format: format
                .or(overrides.image_format)
                .unwrap_or(self.image_format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overrides_keep_defaults() {
        let defaults = ImageConfig::default();
        let resolved = defaults.resolve(&ImageConfigOverrides::default(), None);
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn overrides_replace_only_present_fields() {
        let overrides: ImageConfigOverrides = serde_json::from_str(
            r#"{ "errorCorrectionLevel": "m", "pixelsPerBlock": 5, "colourModel": "RGB" }"#,
        )
        .unwrap();

        let resolved = ImageConfig::default().resolve(&overrides, None);
        assert_eq!(resolved.error_correction_level, ErrorCorrection::M);
        assert_eq!(resolved.pixels_per_block, 5);
        assert_eq!(resolved.colour_model, ColorModel::Rgb);
        assert_eq!(resolved.qr_code_margin, 3);
        assert_eq!(resolved.text_font_name, "Verdana");
    }

    #[test]
    fn event_format_wins_over_config_format() {
        let overrides = ImageConfigOverrides {
            image_format: Some(ImageFormat::Png),
            ..ImageConfigOverrides::default()
        };
        let resolved = ImageConfig::default().resolve(&overrides, Some(ImageFormat::Jpg));
        assert_eq!(resolved.image_format, ImageFormat::Jpg);
    }

    #[test]
    fn zero_block_size_is_clamped() {
        let overrides = ImageConfigOverrides {
            pixels_per_block: Some(0),
            ..ImageConfigOverrides::default()
        };
        assert_eq!(
            ImageConfig::default().resolve(&overrides, None).pixels_per_block,
            1
        );
    }

    #[test]
    fn format_aliases() {
        let jpeg: ImageFormat = serde_json::from_str(r#""jpeg""#).unwrap();
        assert_eq!(jpeg, ImageFormat::Jpg);
        assert_eq!(jpeg.extension(), "jpg");
        assert!(serde_json::from_str::<ImageFormat>(r#""gif""#).is_err());
    }
}
