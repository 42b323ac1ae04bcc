//! Mapping between normalized regions and pixel rectangles.
//!
//! Regions are stored normalized to the frame they were drawn on, so the
//! same values resolve at preview and at output resolution. Mirroring is a
//! property of the output transform chain: it is applied here, at resolve
//! time, and never baked into the stored region.

use eyetest_models::{FrameSize, PixelRect, Region, RegionError};

/// Round half-up, the single rounding rule used for every coordinate.
fn round_half_up(value: f64) -> u32 {
    let rounded = (value + 0.5).floor();
    if rounded <= 0.0 {
        0
    } else if rounded >= u32::MAX as f64 {
        u32::MAX
    } else {
        rounded as u32
    }
}

/// Resolve a region to pixel units of an `output_width` x `output_height` frame.
///
/// With `mirrored` the rectangle is reflected horizontally so it lands on
/// the same content after the frame has been flipped. The result always
/// lies within the frame.
pub fn to_output_pixels(
    region: &Region,
    output_width: u32,
    output_height: u32,
    mirrored: bool,
) -> Result<PixelRect, RegionError> {
    region.validate()?;

    let (x, width) = span(region.x(), region.width(), output_width);
    let (y, height) = span(region.y(), region.height(), output_height);

    let rect = PixelRect::new(x, y, width, height);
    Ok(if mirrored {
        rect.mirrored(output_width)
    } else {
        rect
    })
}

/// Map a normalized `start`/`len` pair onto `extent` pixels.
///
/// A non-empty extent always yields at least one pixel; a span that rounds
/// to nothing is pulled back inside the frame instead.
fn span(start: f64, len: f64, extent: u32) -> (u32, u32) {
    let scale = extent as f64;
    let start_px = round_half_up(start * scale).min(extent);
    let len_px = round_half_up(len * scale).min(extent - start_px);
    if len_px == 0 && extent > 0 {
        (start_px.min(extent - 1), 1)
    } else {
        (start_px, len_px)
    }
}

/// Convenience wrapper taking a [`FrameSize`].
pub fn resolve(region: &Region, frame: FrameSize, mirrored: bool) -> Result<PixelRect, RegionError> {
    to_output_pixels(region, frame.width, frame.height, mirrored)
}

/// Normalize a pixel rectangle back into a region of `frame`.
pub fn normalize(rect: PixelRect, frame: FrameSize) -> Result<Region, RegionError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(RegionError::EmptyRegion {
            width: frame.width as f64,
            height: frame.height as f64,
        });
    }
    Region::new(
        rect.x as f64 / frame.width as f64,
        rect.y as f64 / frame.height as f64,
        rect.width as f64 / frame.width as f64,
        rect.height as f64 / frame.height as f64,
    )
}

/// Area inside a preview view where the video is actually displayed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Compute the letterboxed video area of a `view_width` x `view_height` view.
///
/// The video is scaled to fit while keeping `video_aspect`, and centered.
pub fn letterbox(view_width: f64, view_height: f64, video_aspect: f64) -> ViewportRect {
    if view_height <= 0.0 || video_aspect <= 0.0 {
        return ViewportRect {
            x: 0.0,
            y: 0.0,
            width: view_width.max(0.0),
            height: view_height.max(0.0),
        };
    }

    let view_aspect = view_width / view_height;
    if view_aspect > video_aspect {
        // Pillarbox: bars left and right
        let width = view_height * video_aspect;
        ViewportRect {
            x: (view_width - width) / 2.0,
            y: 0.0,
            width,
            height: view_height,
        }
    } else {
        // Letterbox: bars top and bottom
        let height = view_width / video_aspect;
        ViewportRect {
            x: 0.0,
            y: (view_height - height) / 2.0,
            width: view_width,
            height,
        }
    }
}

/// Minimum normalized size of a region drawn in a preview.
const MIN_DRAWN_FRACTION: f64 = 0.01;

/// Turn a rectangle dragged in preview-view pixels into a normalized region.
///
/// `drag` is in view coordinates (x, y, width, height); the part outside the
/// displayed video is clipped away. Rectangles that end up smaller than 1%
/// of the frame on either axis are grown to that minimum.
pub fn normalize_view_rect(
    drag: (f64, f64, f64, f64),
    view_width: f64,
    view_height: f64,
    video_aspect: f64,
) -> Result<Region, RegionError> {
    let video = letterbox(view_width, view_height, video_aspect);
    if video.width <= 0.0 || video.height <= 0.0 {
        return Err(RegionError::EmptyRegion {
            width: video.width,
            height: video.height,
        });
    }

    let (dx, dy, dw, dh) = drag;
    // Accept drags in any direction
    let (left, right) = (dx.min(dx + dw), dx.max(dx + dw));
    let (top, bottom) = (dy.min(dy + dh), dy.max(dy + dh));

    let x0 = ((left - video.x) / video.width).clamp(0.0, 1.0);
    let x1 = ((right - video.x) / video.width).clamp(0.0, 1.0);
    let y0 = ((top - video.y) / video.height).clamp(0.0, 1.0);
    let y1 = ((bottom - video.y) / video.height).clamp(0.0, 1.0);

    let width = (x1 - x0).max(MIN_DRAWN_FRACTION);
    let height = (y1 - y0).max(MIN_DRAWN_FRACTION);
    let x = x0.min(1.0 - width);
    let y = y0.min(1.0 - height);

    Region::new(x, y, width, height)
}
