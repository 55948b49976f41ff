use serde::Serialize;

use crate::capture::CapturedPicture;
use crate::face::DetectedFace;

/// Events crossing to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum CameraEvent {
    #[serde(rename = "onCameraReady")]
    CameraReady,
    #[serde(rename = "onMountError")]
    MountError { message: String },
    #[serde(rename = "onFacesDetected")]
    FacesDetected { faces: Vec<DetectedFace>, target: i32 },
    #[serde(rename = "onFaceDetectionError")]
    FaceDetectionError { message: String },
    #[serde(rename = "onPictureSaved")]
    PictureSaved { id: i32, data: CapturedPicture },
}

impl CameraEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CameraEvent::CameraReady => "onCameraReady",
            CameraEvent::MountError { .. } => "onMountError",
            CameraEvent::FacesDetected { .. } => "onFacesDetected",
            CameraEvent::FaceDetectionError { .. } => "onFaceDetectionError",
            CameraEvent::PictureSaved { .. } => "onPictureSaved",
        }
    }

    /// Events with equal keys may be merged by a consumer that falls behind.
    /// Face events with a different face count never share a key.
    pub fn coalescing_key(&self) -> Option<i16> {
        match self {
            CameraEvent::FacesDetected { faces, .. } => {
                Some((faces.len() % i16::MAX as usize) as i16)
            }
            CameraEvent::PictureSaved { data, .. } => {
                Some((java_hash(&data.uri) % i16::MAX as i32) as i16)
            }
            _ => None,
        }
    }
}

// String hash as computed on the JVM side, so keys match across platforms
fn java_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}
