//! Logo watermark placement.
//!
//! The logo is a second still-image input to the encoder. It is scaled to
//! a fixed height, faded with `colorchannelmixer` and overlaid at a corner
//! inset. Validation happens while the recipe is built, before any
//! process is spawned.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use eyetest_models::{ConfigError, Corner};

/// Check that the logo asset exists and can be read.
pub fn check_logo(path: &Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::LogoMissing(path.to_path_buf()));
    }

    let unreadable = |reason: String| ConfigError::LogoUnreadable {
        path: path.to_path_buf(),
        reason,
    };
    let mut file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut first = [0u8; 1];
    match file.read(&mut first) {
        Ok(0) => Err(unreadable("file is empty".to_string())),
        Ok(_) => {
            debug!(path = %path.display(), "Logo asset is readable");
            Ok(())
        }
        Err(e) => Err(unreadable(e.to_string())),
    }
}

/// Overlay coordinates for a logo anchored at `corner` with `margin` pixels inset.
///
/// Uses the overlay filter's `W`/`H` (main) and `w`/`h` (logo) variables.
pub fn overlay_position(corner: Corner, margin: u32) -> (String, String) {
    let near = margin.to_string();
    match corner {
        Corner::TopLeft => (near.clone(), near),
        Corner::TopRight => (format!("W-w-{margin}"), near),
        Corner::BottomLeft => (near, format!("H-h-{margin}")),
        Corner::BottomRight => (format!("W-w-{margin}"), format!("H-h-{margin}")),
    }
}

/// Filter chain preparing the logo input: scale to `height`, apply opacity.
pub fn logo_chain(height: u32, opacity: f64) -> String {
    if opacity < 1.0 {
        format!(
            "scale=-1:{},format=rgba,colorchannelmixer=aa={:.2}",
            height, opacity
        )
    } else {
        // Full opacity - no alpha scaling needed
        format!("scale=-1:{},format=rgba", height)
    }
}

/// Overlay filter compositing the prepared logo onto the main stream.
pub fn overlay_filter(corner: Corner, margin: u32) -> String {
    let (x, y) = overlay_position(corner, margin);
    format!("overlay={}:{}:format=auto", x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_corner_is_bottom_left() {
        assert_eq!(
            overlay_filter(Corner::default(), 20),
            "overlay=20:H-h-20:format=auto"
        );
        assert_eq!(
            overlay_position(Corner::TopRight, 10),
            ("W-w-10".to_string(), "10".to_string())
        );
    }

    #[test]
    fn test_logo_chain_opacity() {
        assert_eq!(
            logo_chain(100, 0.8),
            "scale=-1:100,format=rgba,colorchannelmixer=aa=0.80"
        );
        assert!(!logo_chain(100, 1.0).contains("colorchannelmixer"));
    }

    #[test]
    fn test_check_logo() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("logo.jpg");
        assert!(matches!(check_logo(&missing), Err(ConfigError::LogoMissing(_))));

        std::fs::write(&missing, b"").unwrap();
        assert!(matches!(
            check_logo(&missing),
            Err(ConfigError::LogoUnreadable { .. })
        ));

        std::fs::write(&missing, b"\xff\xd8\xff").unwrap();
        assert!(check_logo(&missing).is_ok());

        // A directory is not a logo
        assert!(check_logo(dir.path()).is_err());
    }
}
