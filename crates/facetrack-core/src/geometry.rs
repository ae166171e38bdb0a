//! Sensor-space to display-space coordinate mapping.
//!
//! The camera sensor and the view rarely share an aspect ratio. The view is
//! filled edge to edge ("aspect fill"), so the sensor image is cropped
//! symmetrically along the axis that overflows and scaled along both.

use crate::types::Bounds;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("invalid dimensions: frame {frame_width}x{frame_height}, view {view_width}x{view_height}")]
    InvalidDimensions {
        frame_width: f32,
        frame_height: f32,
        view_width: f32,
        view_height: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Width and height of a frame or a view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f32,
    pub height: f32,
}

impl Dimensions {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Precomputed crop offsets and scale ratios for one frame/view size pair.
///
/// Build a new mapper whenever either size changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    frame: Dimensions,
    view: Dimensions,
    offset_x: f32,
    offset_y: f32,
    width_ratio: f32,
    height_ratio: f32,
}

impl CoordinateMapper {
    pub fn new(frame: Dimensions, view: Dimensions) -> Result<Self, GeometryError> {
        if !frame.is_valid() || !view.is_valid() {
            return Err(GeometryError::InvalidDimensions {
                frame_width: frame.width,
                frame_height: frame.height,
                view_width: view.width,
                view_height: view.height,
            });
        }

        let frame_aspect = frame.width / frame.height;
        let view_aspect = view.width / view.height;

        let (offset_x, offset_y, width_ratio, height_ratio) = if frame_aspect < view_aspect {
            // View is relatively wider: keep full width, crop top and bottom.
            let width_ratio = view.width / frame.width;
            let cropped_height = frame.width / view_aspect;
            let offset_y = (frame.height - cropped_height) / 2.0;
            (0.0, offset_y, width_ratio, view.height / cropped_height)
        } else {
            // View is relatively taller: keep full height, crop left and right.
            let height_ratio = view.height / frame.height;
            let cropped_width = view_aspect * frame.height;
            let offset_x = (frame.width - cropped_width) / 2.0;
            (offset_x, 0.0, view.width / cropped_width, height_ratio)
        };

        Ok(Self {
            frame,
            view,
            offset_x,
            offset_y,
            width_ratio,
            height_ratio,
        })
    }

    /// True if this mapper was built for exactly this size pair.
    pub fn matches(&self, frame: Dimensions, view: Dimensions) -> bool {
        self.frame == frame && self.view == view
    }

    pub fn offset(&self) -> (f32, f32) {
        (self.offset_x, self.offset_y)
    }

    pub fn ratios(&self) -> (f32, f32) {
        (self.width_ratio, self.height_ratio)
    }

    pub fn adjust_point(&self, p: Point) -> Point {
        Point {
            x: (p.x - self.offset_x) * self.width_ratio,
            y: (p.y - self.offset_y) * self.height_ratio,
        }
    }

    pub fn adjust_size(&self, s: Size) -> Size {
        Size {
            width: s.width * self.width_ratio,
            height: s.height * self.height_ratio,
        }
    }

    /// Display-space origin and size of a sensor-space box.
    pub fn adjust_bounds(&self, b: &Bounds) -> (Point, Size) {
        (
            self.adjust_point(Point::new(b.left, b.top)),
            self.adjust_size(Size::new(b.width, b.height)),
        )
    }

    /// Inverse of [`adjust_point`](Self::adjust_point).
    pub fn to_sensor_point(&self, p: Point) -> Point {
        Point {
            x: p.x / self.width_ratio + self.offset_x,
            y: p.y / self.height_ratio + self.offset_y,
        }
    }

    /// Inverse of [`adjust_size`](Self::adjust_size).
    pub fn to_sensor_size(&self, s: Size) -> Size {
        Size {
            width: s.width / self.width_ratio,
            height: s.height / self.height_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_landscape_frame_portrait_view_crops_width() {
        let m = CoordinateMapper::new(Dimensions::new(1920.0, 1080.0), Dimensions::new(1080.0, 1920.0))
            .unwrap();
        let (ox, oy) = m.offset();
        assert!(ox > 0.0);
        assert_eq!(oy, 0.0);
        // cropped width = 0.5625 * 1080 = 607.5 → offset (1920 - 607.5) / 2
        assert!(close(ox, 656.25), "offset_x = {ox}");
        let (wr, hr) = m.ratios();
        assert!(close(hr, 1920.0 / 1080.0));
        assert!(close(wr, 1080.0 / 607.5));
    }

    #[test]
    fn test_portrait_frame_landscape_view_crops_height() {
        let m = CoordinateMapper::new(Dimensions::new(1080.0, 1920.0), Dimensions::new(1920.0, 1080.0))
            .unwrap();
        let (ox, oy) = m.offset();
        assert_eq!(ox, 0.0);
        assert!(oy > 0.0);
        // cropped height = 1080 / (16/9) = 607.5
        assert!(close(oy, (1920.0 - 607.5) / 2.0));
    }

    #[test]
    fn test_same_aspect_is_pure_scale() {
        let m = CoordinateMapper::new(Dimensions::new(1280.0, 720.0), Dimensions::new(640.0, 360.0))
            .unwrap();
        assert_eq!(m.offset(), (0.0, 0.0));
        let p = m.adjust_point(Point::new(100.0, 50.0));
        assert!(close(p.x, 50.0) && close(p.y, 25.0));
        let s = m.adjust_size(Size::new(200.0, 100.0));
        assert!(close(s.width, 100.0) && close(s.height, 50.0));
    }

    #[test]
    fn test_corner_round_trip() {
        let pairs = [
            ((1920.0, 1080.0), (1080.0, 1920.0)),
            ((1080.0, 1920.0), (390.0, 844.0)),
            ((640.0, 480.0), (1024.0, 768.0)),
            ((480.0, 640.0), (1000.0, 300.0)),
        ];
        for ((fw, fh), (vw, vh)) in pairs {
            let m = CoordinateMapper::new(Dimensions::new(fw, fh), Dimensions::new(vw, vh)).unwrap();
            for corner in [
                Point::new(0.0, 0.0),
                Point::new(fw, 0.0),
                Point::new(0.0, fh),
                Point::new(fw, fh),
            ] {
                let back = m.to_sensor_point(m.adjust_point(corner));
                assert!(
                    (back.x - corner.x).abs() < 1e-2 && (back.y - corner.y).abs() < 1e-2,
                    "{fw}x{fh} -> {vw}x{vh}: {corner:?} came back as {back:?}"
                );
            }
            let s = Size::new(fw, fh);
            let back = m.to_sensor_size(m.adjust_size(s));
            assert!((back.width - fw).abs() < 1e-2 && (back.height - fh).abs() < 1e-2);
        }
    }

    #[test]
    fn test_visible_region_fills_view() {
        // The uncropped centre strip of the frame maps exactly onto the view.
        let m = CoordinateMapper::new(Dimensions::new(1920.0, 1080.0), Dimensions::new(1080.0, 1920.0))
            .unwrap();
        let (ox, _) = m.offset();
        let tl = m.adjust_point(Point::new(ox, 0.0));
        let br = m.adjust_point(Point::new(1920.0 - ox, 1080.0));
        assert!(close(tl.x, 0.0) && close(tl.y, 0.0));
        assert!(close(br.x, 1080.0) && close(br.y, 1920.0));
    }

    #[test]
    fn test_adjust_bounds() {
        let m = CoordinateMapper::new(Dimensions::new(200.0, 100.0), Dimensions::new(100.0, 50.0))
            .unwrap();
        let (p, s) = m.adjust_bounds(&Bounds { top: 10.0, left: 20.0, width: 40.0, height: 30.0 });
        assert!(close(p.x, 10.0) && close(p.y, 5.0));
        assert!(close(s.width, 20.0) && close(s.height, 15.0));
    }

    #[test]
    fn test_invalid_dimensions() {
        for (frame, view) in [
            (Dimensions::new(0.0, 1080.0), Dimensions::new(1080.0, 1920.0)),
            (Dimensions::new(1920.0, 1080.0), Dimensions::new(1080.0, 0.0)),
            (Dimensions::new(-1.0, 1080.0), Dimensions::new(1080.0, 1920.0)),
            (Dimensions::new(f32::NAN, 1080.0), Dimensions::new(1080.0, 1920.0)),
        ] {
            assert!(matches!(
                CoordinateMapper::new(frame, view),
                Err(GeometryError::InvalidDimensions { .. })
            ));
        }
    }

    #[test]
    fn test_matches_size_pair() {
        let frame = Dimensions::new(1920.0, 1080.0);
        let view = Dimensions::new(1080.0, 1920.0);
        let m = CoordinateMapper::new(frame, view).unwrap();
        assert!(m.matches(frame, view));
        assert!(!m.matches(frame, Dimensions::new(1920.0, 1080.0)));
    }
}
