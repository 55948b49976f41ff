use std::collections::BTreeMap;

use serde::Serialize;

use crate::shapes::{PointF32, RectF32};

/// Named anatomical points a detector may report, in detector constant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Landmark {
    #[serde(rename = "bottomMouthPosition")]
    BottomMouth,
    #[serde(rename = "rightMouthPosition")]
    RightMouth,
    #[serde(rename = "leftMouthPosition")]
    LeftMouth,
    #[serde(rename = "leftCheekPosition")]
    LeftCheek,
    #[serde(rename = "rightEyePosition")]
    RightEye,
    #[serde(rename = "leftEyePosition")]
    LeftEye,
    #[serde(rename = "leftEarPosition")]
    LeftEar,
    #[serde(rename = "rightCheekPosition")]
    RightCheek,
    #[serde(rename = "rightEarPosition")]
    RightEar,
    #[serde(rename = "noseBasePosition")]
    NoseBase,
}

impl Landmark {
    pub const ALL: [Landmark; 10] = [
        Landmark::BottomMouth,
        Landmark::RightMouth,
        Landmark::LeftMouth,
        Landmark::LeftCheek,
        Landmark::RightEye,
        Landmark::LeftEye,
        Landmark::LeftEar,
        Landmark::RightCheek,
        Landmark::RightEar,
        Landmark::NoseBase,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Landmark::BottomMouth => "bottomMouthPosition",
            Landmark::RightMouth => "rightMouthPosition",
            Landmark::LeftMouth => "leftMouthPosition",
            Landmark::LeftCheek => "leftCheekPosition",
            Landmark::RightEye => "rightEyePosition",
            Landmark::LeftEye => "leftEyePosition",
            Landmark::LeftEar => "leftEarPosition",
            Landmark::RightCheek => "rightCheekPosition",
            Landmark::RightEar => "rightEarPosition",
            Landmark::NoseBase => "noseBasePosition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Point {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bounds {
    pub origin: Point,
    pub size: Size,
}

/// One face in preview (or, mid-pipeline, scaled sensor) coordinates.
///
/// Bounds and landmarks always share a coordinate space.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFace {
    #[serde(rename = "faceID", skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<i32>,
    pub roll_angle: f64,
    pub yaw_angle: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smiling_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_eye_open_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_eye_open_probability: Option<f64>,
    #[serde(flatten)]
    pub landmarks: BTreeMap<Landmark, Point>,
    pub bounds: Bounds,
}

/// Detector output for one face, in sensor-image pixels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFace {
    pub tracking_id: Option<i32>,
    pub bounding_box: RectF32,
    pub landmarks: BTreeMap<Landmark, PointF32>,
    pub roll_degrees: f32,
    pub yaw_degrees: f32,
    // negative means the classifier did not run
    pub smiling_probability: Option<f32>,
    pub left_eye_open_probability: Option<f32>,
    pub right_eye_open_probability: Option<f32>,
}

impl RawFace {
    pub fn new(bounding_box: RectF32) -> RawFace {
        RawFace {
            bounding_box,
            ..Default::default()
        }
    }

    pub fn with_landmark(mut self, landmark: Landmark, position: PointF32) -> RawFace {
        self.landmarks.insert(landmark, position);
        self
    }

    pub fn with_angles(mut self, roll_degrees: f32, yaw_degrees: f32) -> RawFace {
        self.roll_degrees = roll_degrees;
        self.yaw_degrees = yaw_degrees;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        let mut face = DetectedFace {
            tracking_id: Some(3),
            roll_angle: 10.,
            yaw_angle: 350.,
            smiling_probability: Some(0.5),
            ..Default::default()
        };
        face.landmarks.insert(Landmark::NoseBase, Point::new(1., 2.));
        face.bounds = Bounds {
            origin: Point::new(5., 6.),
            size: Size {
                width: 7.,
                height: 8.,
            },
        };

        let value = serde_json::to_value(&face).unwrap();
        assert_eq!(
            value,
            json!({
                "faceID": 3,
                "rollAngle": 10.0,
                "yawAngle": 350.0,
                "smilingProbability": 0.5,
                "noseBasePosition": {"x": 1.0, "y": 2.0},
                "bounds": {
                    "origin": {"x": 5.0, "y": 6.0},
                    "size": {"width": 7.0, "height": 8.0}
                }
            })
        );
    }

    #[test]
    fn test_landmark_keys_match_serde_names() {
        for landmark in Landmark::ALL {
            let value = serde_json::to_value(landmark).unwrap();
            assert_eq!(value, serde_json::Value::from(landmark.key()));
        }
    }
}
