//! Sensor-image to preview-space conversion for detected faces.
//!
//! Faces are emitted for a front-facing camera, so the preview is a mirror
//! image of the sensor frame. Conversion happens in two steps that mirror
//! how results leave the detector: [`serialize_face`] scales into preview
//! pixels, then [`mirror_face_x`] flips about the preview's vertical axis.
//! Both steps mirror the roll angle, so roll comes out unchanged (mod 360)
//! while yaw is mirrored once. Consumers rely on those angles.

use crate::error::{FacecamError, FacecamResult};
use crate::face::{Bounds, DetectedFace, Point, RawFace, Size};
use crate::shapes::PointF32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> FacecamResult<Rotation> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            d => Err(FacecamError::Rotation(d)),
        }
    }

    /// Image axes are swapped relative to the display.
    pub fn is_sideways(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Dimensions needed to map one frame's detections onto the preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    pub image_width: u32,
    pub image_height: u32,
    pub rotation: Rotation,
    pub preview_width: f64,
    pub preview_height: f64,
}

impl FrameGeometry {
    pub fn new(
        image_width: u32,
        image_height: u32,
        rotation: Rotation,
        preview_width: f64,
        preview_height: f64,
    ) -> FacecamResult<FrameGeometry> {
        if image_width == 0 || image_height == 0 {
            return Err(FacecamError::Geometry(format!(
                "image size {image_width}x{image_height} must be non-zero"
            )));
        }
        if !(preview_width > 0. && preview_height > 0.) {
            return Err(FacecamError::Geometry(format!(
                "preview size {preview_width}x{preview_height} must be positive"
            )));
        }

        Ok(FrameGeometry {
            image_width,
            image_height,
            rotation,
            preview_width,
            preview_height,
        })
    }

    /// Preview size over image size, per axis, after accounting for rotation.
    pub fn scale_factors(&self) -> (f64, f64) {
        let (w, h) = self.oriented_image_size();
        (self.preview_width / w, self.preview_height / h)
    }

    /// Width of the space being mirrored, in image pixels.
    pub fn source_width(&self) -> f64 {
        self.oriented_image_size().0
    }

    fn oriented_image_size(&self) -> (f64, f64) {
        let w = self.image_width as f64;
        let h = self.image_height as f64;
        if self.rotation.is_sideways() {
            (h, w)
        } else {
            (w, h)
        }
    }
}

/// Full conversion of one raw detection into mirrored preview space.
pub fn normalize(raw: &RawFace, geometry: &FrameGeometry) -> DetectedFace {
    let (scale_x, scale_y) = geometry.scale_factors();
    let face = serialize_face(raw, scale_x, scale_y);
    mirror_face_x(face, geometry.source_width(), scale_x)
}

/// Scales a raw detection into preview pixels and mirrors its roll.
pub fn serialize_face(raw: &RawFace, scale_x: f64, scale_y: f64) -> DetectedFace {
    let b = &raw.bounding_box;
    let bounds = Bounds {
        origin: Point::new(b.left() as f64 * scale_x, b.top() as f64 * scale_y),
        size: Size {
            width: (b.right() - b.left()) as f64 * scale_x,
            height: (b.bottom() - b.top()) as f64 * scale_y,
        },
    };

    let face = DetectedFace {
        tracking_id: raw.tracking_id,
        roll_angle: raw.roll_degrees as f64,
        yaw_angle: raw.yaw_degrees as f64,
        smiling_probability: probability(raw.smiling_probability),
        left_eye_open_probability: probability(raw.left_eye_open_probability),
        right_eye_open_probability: probability(raw.right_eye_open_probability),
        landmarks: raw
            .landmarks
            .iter()
            .map(|(landmark, p)| (*landmark, scale_point(p, scale_x, scale_y)))
            .collect(),
        bounds,
    };

    mirror_roll(face)
}

/// Flips a scaled face about the vertical axis of a container
/// `source_width * scale_x` wide.
pub fn mirror_face_x(mut face: DetectedFace, source_width: f64, scale_x: f64) -> DetectedFace {
    let container_width = source_width * scale_x;

    // the flipped origin lands on the box's old right edge
    let mirrored = mirror_x(face.bounds.origin, container_width);
    face.bounds.origin = translate_x(mirrored, -face.bounds.size.width);

    for p in face.landmarks.values_mut() {
        *p = mirror_x(*p, container_width);
    }

    mirror_yaw(mirror_roll(face))
}

pub fn mirror_angle(degrees: f64) -> f64 {
    (-degrees + 360.) % 360.
}

fn mirror_roll(mut face: DetectedFace) -> DetectedFace {
    face.roll_angle = mirror_angle(face.roll_angle);
    face
}

fn mirror_yaw(mut face: DetectedFace) -> DetectedFace {
    face.yaw_angle = mirror_angle(face.yaw_angle);
    face
}

fn mirror_x(p: Point, container_width: f64) -> Point {
    Point::new(-p.x + container_width, p.y)
}

fn translate_x(p: Point, dx: f64) -> Point {
    Point::new(p.x + dx, p.y)
}

fn scale_point(p: &PointF32, scale_x: f64, scale_y: f64) -> Point {
    Point::new(p.x as f64 * scale_x, p.y as f64 * scale_y)
}

fn probability(raw: Option<f32>) -> Option<f64> {
    raw.filter(|p| *p >= 0.).map(|p| p as f64)
}
