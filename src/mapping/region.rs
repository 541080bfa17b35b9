//! Conversion of normalized Picasa rectangles into digiKam face regions.
//!
//! Picasa's rectangle is relative to the pixels as stored on disk. digiKam
//! stores absolute pixels in the orientation the photo is displayed in, so
//! the EXIF orientation has to be applied first.

use serde::Serialize;
use std::fmt;

use crate::picasa::Rect64;

/// Face rectangle in digiKam's convention (display pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FaceRegion {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl FaceRegion {
    /// Convert a normalized rectangle given the stored pixel size and the
    /// EXIF orientation code.
    pub fn from_rect(rect: &Rect64, width: i64, height: i64, orientation: i64) -> Result<Self, String> {
        let Rect64 { left, top, right, bottom } = *rect;

        let (width, height, x1, x2, y1, y2) = match orientation {
            0 | 1 => (width, height, left, right, top, bottom),
            // 180°
            3 => (width, height, 1.0 - right, 1.0 - left, 1.0 - bottom, 1.0 - top),
            // 90° clockwise, display swaps the axes
            6 => (height, width, 1.0 - bottom, 1.0 - top, left, right),
            // 270° clockwise
            8 => (height, width, top, bottom, 1.0 - right, 1.0 - left),
            other => return Err(format!("unsupported EXIF orientation {other}")),
        };

        let (w, h) = (width as f64, height as f64);
        Ok(Self {
            x: (w * x1) as i64,
            y: (h * y1) as i64,
            width: (w * (x2 - x1)) as i64,
            height: (h * (y2 - y1)) as i64,
        })
    }

    /// Value of digiKam's `tagRegion` image tag property.
    pub fn to_digikam_xml(&self) -> String {
        format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}"/>"#,
            self.x, self.y, self.width, self.height
        )
    }
}

impl fmt::Display for FaceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}
