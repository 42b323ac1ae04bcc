//! Occlusion regions and pixel rectangles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of regions a user may draw on one clip.
pub const MAX_REGIONS: usize = 5;

/// Float tolerance for the `x + width <= 1` checks.
const EDGE_EPSILON: f64 = 1e-9;

/// Errors raised when constructing or collecting regions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegionError {
    #[error("Region coordinate is not a finite number")]
    NotFinite,

    #[error("Region has non-positive size: {width}x{height}")]
    EmptyRegion { width: f64, height: f64 },

    #[error("Region out of bounds: {axis} spans {start}..{end}, must stay within 0..1")]
    OutOfBounds {
        axis: &'static str,
        start: f64,
        end: f64,
    },

    #[error("Region limit reached ({0} regions)")]
    LimitReached(usize),
}

/// A user-drawn occlusion rectangle, normalized to the frame it was drawn on.
///
/// Fields are fractions of the frame width/height so the same region
/// applies at any resolution. Construction validates the bounds; a
/// `Region` that exists is always inside the unit square.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawRegion")]
pub struct Region {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Deserialize, JsonSchema)]
struct RawRegion {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl TryFrom<RawRegion> for Region {
    type Error = RegionError;

    fn try_from(raw: RawRegion) -> Result<Self, Self::Error> {
        Region::new(raw.x, raw.y, raw.width, raw.height)
    }
}

impl Region {
    /// Create a region, rejecting anything outside the unit square.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Result<Self, RegionError> {
        let region = Self {
            x,
            y,
            width,
            height,
        };
        region.validate()?;
        Ok(region)
    }

    /// Re-check the region invariant.
    pub fn validate(&self) -> Result<(), RegionError> {
        if ![self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(RegionError::NotFinite);
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(RegionError::EmptyRegion {
                width: self.width,
                height: self.height,
            });
        }
        check_axis("x", self.x, self.width)?;
        check_axis("y", self.y, self.height)?;
        Ok(())
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }
}

fn check_axis(axis: &'static str, start: f64, len: f64) -> Result<(), RegionError> {
    let end = start + len;
    if start < 0.0 || end > 1.0 + EDGE_EPSILON {
        return Err(RegionError::OutOfBounds { axis, start, end });
    }
    Ok(())
}

/// Ordered, capped collection of regions in draw order.
///
/// Only the most recently drawn region can be removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RegionList {
    regions: Vec<Region>,
    #[serde(default = "default_capacity")]
    capacity: usize,
}

fn default_capacity() -> usize {
    MAX_REGIONS
}

impl Default for RegionList {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionList {
    /// Create an empty list with the default cap.
    pub fn new() -> Self {
        Self::with_capacity(MAX_REGIONS)
    }

    /// Create an empty list with a custom cap.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            regions: Vec::new(),
            capacity,
        }
    }

    /// Append a region, failing once the cap is reached.
    pub fn push(&mut self, region: Region) -> Result<(), RegionError> {
        if self.regions.len() >= self.capacity {
            return Err(RegionError::LimitReached(self.capacity));
        }
        self.regions.push(region);
        Ok(())
    }

    /// Remove the most recently drawn region.
    pub fn undo_last(&mut self) -> Option<Region> {
        self.regions.pop()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn as_slice(&self) -> &[Region] {
        &self.regions
    }
}

impl<'a> IntoIterator for &'a RegionList {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height (0 for a degenerate frame).
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }
}

/// A rectangle in output pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Reflect horizontally inside a frame of `frame_width` pixels.
    ///
    /// Applying it twice returns the original rectangle.
    pub fn mirrored(&self, frame_width: u32) -> Self {
        Self {
            x: frame_width.saturating_sub(self.x + self.width),
            ..*self
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether the rectangle fits inside `frame`.
    pub fn fits_within(&self, frame: FrameSize) -> bool {
        self.right() <= frame.width && self.bottom() <= frame.height
    }
}
