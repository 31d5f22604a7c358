//! Weather condition icons
//!
//! The phone maps an OpenWeatherMap condition code to an icon, scales it to
//! a small square, optionally desaturates it for the watch's ambient
//! display, and encodes it as PNG. The watch only checks that the bytes
//! decode before handing them to the display.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Icon families the watch face knows how to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IconKind {
    Storm,
    LightRain,
    Rain,
    Snow,
    Fog,
    Clear,
    LightClouds,
    Cloudy,
}

impl IconKind {
    /// Map a condition code to an icon. Unknown codes have no icon.
    pub fn for_condition(code: i32) -> Option<Self> {
        match code {
            200..=232 => Some(IconKind::Storm),
            300..=321 => Some(IconKind::LightRain),
            500..=504 => Some(IconKind::Rain),
            511 => Some(IconKind::Snow),
            520..=531 => Some(IconKind::Rain),
            600..=622 => Some(IconKind::Snow),
            701..=761 => Some(IconKind::Fog),
            781 => Some(IconKind::Storm),
            800 => Some(IconKind::Clear),
            801 => Some(IconKind::LightClouds),
            802..=804 => Some(IconKind::Cloudy),
            _ => None,
        }
    }

    /// Resource name, also the file stem used by [`DirectoryIconSource`]
    pub fn resource_name(&self) -> &'static str {
        match self {
            IconKind::Storm => "ic_storm",
            IconKind::LightRain => "ic_light_rain",
            IconKind::Rain => "ic_rain",
            IconKind::Snow => "ic_snow",
            IconKind::Fog => "ic_fog",
            IconKind::Clear => "ic_clear",
            IconKind::LightClouds => "ic_light_clouds",
            IconKind::Cloudy => "ic_cloudy",
        }
    }

    fn tint(&self) -> [u8; 3] {
        match self {
            IconKind::Storm => [96, 64, 160],
            IconKind::LightRain => [120, 170, 230],
            IconKind::Rain => [40, 100, 220],
            IconKind::Snow => [235, 240, 250],
            IconKind::Fog => [170, 170, 170],
            IconKind::Clear => [250, 200, 30],
            IconKind::LightClouds => [220, 220, 180],
            IconKind::Cloudy => [140, 150, 160],
        }
    }
}

/// Where full-size icon bitmaps come from
pub trait IconSource: Send + Sync {
    fn load(&self, kind: IconKind) -> SyncResult<DynamicImage>;
}

/// Loads `<dir>/<resource_name>.png`
#[derive(Debug, Clone)]
pub struct DirectoryIconSource {
    dir: PathBuf,
}

impl DirectoryIconSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl IconSource for DirectoryIconSource {
    fn load(&self, kind: IconKind) -> SyncResult<DynamicImage> {
        let path = self.dir.join(format!("{}.png", kind.resource_name()));
        image::open(&path)
            .map_err(|e| SyncError::Image(format!("Failed to load {}: {}", path.display(), e)))
    }
}

/// Draws a tinted disc per icon kind. Needs no assets on disk.
#[derive(Debug, Clone, Copy)]
pub struct GeneratedIconSource {
    size: u32,
}

impl GeneratedIconSource {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }
}

impl Default for GeneratedIconSource {
    fn default() -> Self {
        Self::new(96)
    }
}

impl IconSource for GeneratedIconSource {
    fn load(&self, kind: IconKind) -> SyncResult<DynamicImage> {
        let [r, g, b] = kind.tint();
        let center = self.size as f32 / 2.0;
        let radius = center * 0.8;
        let buffer = ImageBuffer::from_fn(self.size, self.size, |x, y| {
            let dx = x as f32 + 0.5 - center;
            let dy = y as f32 + 0.5 - center;
            if dx * dx + dy * dy <= radius * radius {
                Rgba([r, g, b, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        Ok(DynamicImage::ImageRgba8(buffer))
    }
}

/// Scales, optionally desaturates, and PNG-encodes icons for transfer
#[derive(Debug, Clone, Copy)]
pub struct IconRenderer {
    size: u32,
    greyscale: bool,
}

impl IconRenderer {
    pub fn new(size: u32, greyscale: bool) -> Self {
        Self { size, greyscale }
    }

    /// Render the icon for `condition_code`.
    ///
    /// Returns `Ok(None)` when the code has no icon.
    pub fn render(
        &self,
        source: &dyn IconSource,
        condition_code: i32,
    ) -> SyncResult<Option<Vec<u8>>> {
        let Some(kind) = IconKind::for_condition(condition_code) else {
            debug!(condition_code, "No icon for condition");
            return Ok(None);
        };
        let original = source.load(kind)?;
        self.render_image(&original).map(Some)
    }

    /// Scale and encode an already loaded image.
    pub fn render_image(&self, original: &DynamicImage) -> SyncResult<Vec<u8>> {
        let mut scaled = original.resize_exact(self.size, self.size, FilterType::Triangle);
        if self.greyscale {
            scaled = scaled.grayscale();
        }

        let mut out = Cursor::new(Vec::new());
        scaled.write_to(&mut out, ImageFormat::Png)?;
        let png = out.into_inner();
        debug!(size = self.size, greyscale = self.greyscale, bytes = png.len(), "Rendered icon");
        Ok(png)
    }
}

/// An icon received by the watch that decoded as a valid PNG
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedIcon {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Check that `bytes` are a decodable PNG and report its dimensions.
pub fn decode_icon(bytes: &[u8]) -> SyncResult<DecodedIcon> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok(DecodedIcon {
        width: image.width(),
        height: image.height(),
        png: bytes.to_vec(),
    })
}
