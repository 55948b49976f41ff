use std::path::PathBuf;

use anyhow::{Error, Result};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::value::Tensor;
use tracing::{Level, debug, span, trace, warn};

use crate::face::{Landmark, RawFace};
use crate::settings::{ClassificationMode, DetectorMode, FaceDetectorSettings, LandmarkMode};
use crate::shapes::{PointF32, RectF32};
use anchors::gen_anchors;
use model::{Session, initialize_model};

mod anchors;
mod model;

/// Source of raw detections for a frame.
pub trait Detector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawFace>>;
}

/// Builds a detector for a given configuration. Called again whenever a
/// settings change cannot be applied to a live detector.
pub trait DetectorFactory: Send {
    fn build(&self, settings: &FaceDetectorSettings) -> Result<Box<dyn Detector>>;
}

impl<F> DetectorFactory for F
where
    F: Fn(&FaceDetectorSettings) -> Result<Box<dyn Detector>> + Send,
{
    fn build(&self, settings: &FaceDetectorSettings) -> Result<Box<dyn Detector>> {
        self(settings)
    }
}

const WIDTH: u32 = 128;
const HEIGHT: u32 = 128;
const VALUES_PER_ANCHOR: usize = 16;
const OVERLAP_PCT: f32 = 30.;

// keypoint order in the model output
const KEYPOINTS: [Option<Landmark>; 6] = [
    Some(Landmark::RightEye),
    Some(Landmark::LeftEye),
    Some(Landmark::NoseBase),
    None, // mouth center
    Some(Landmark::RightEar),
    Some(Landmark::LeftEar),
];

pub struct BlazeFaceFactory {
    pub model_path: PathBuf,
    pub threads: usize,
}

impl DetectorFactory for BlazeFaceFactory {
    fn build(&self, settings: &FaceDetectorSettings) -> Result<Box<dyn Detector>> {
        Ok(Box::new(BlazeFaceDetector::new(
            &self.model_path,
            self.threads,
            settings,
        )?))
    }
}

/*
BlazeFace short range model wrapper.

Model Input: 1x128x128x3 f32 image, -1 to 1
Model Output:
- 896 confidence logits (classificators)
- 896x16 regressors: box center offset, width and height relative to the
  anchor, then 6 keypoints (x, y) offsets
*/
pub struct BlazeFaceDetector {
    model: Session,
    decoder: Decoder,
}

impl BlazeFaceDetector {
    pub fn new(
        model_path: &std::path::Path,
        threads: usize,
        settings: &FaceDetectorSettings,
    ) -> Result<BlazeFaceDetector> {
        if settings.classification_mode == ClassificationMode::All {
            warn!("Classifications requested but BlazeFace has no classifier, skipping");
        }

        Ok(BlazeFaceDetector {
            model: initialize_model(model_path, threads)?,
            decoder: Decoder::new(settings),
        })
    }
}

impl Detector for BlazeFaceDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawFace>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let resized = imageops::resize(frame, WIDTH, HEIGHT, FilterType::Triangle);
        let input_arr =
            Array::from_shape_fn((1, HEIGHT as usize, WIDTH as usize, 3), |(_, y, x, c)| {
                resized.get_pixel(x as u32, y as u32)[c] as f32 / 127.5 - 1. // -1. - 1. range
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self.model.run(ort::inputs!["input" => input]?)?;
        let regressors: Vec<f32> = outputs["regressors"]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();
        let scores: Vec<f32> = outputs["classificators"]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();

        self.decoder
            .decode(&scores, &regressors, frame.width(), frame.height())
    }
}

/// Turns raw model outputs into faces in frame pixels.
struct Decoder {
    anchors: Vec<PointF32>,
    min_score: f32,
    min_face_size: f32,
    landmarks: bool,
}

impl Decoder {
    fn new(settings: &FaceDetectorSettings) -> Self {
        Self {
            anchors: gen_anchors(WIDTH, HEIGHT),
            min_score: match settings.mode {
                DetectorMode::Fast => 0.75,
                DetectorMode::Accurate => 0.5,
            },
            min_face_size: settings.min_face_size,
            landmarks: settings.landmark_mode == LandmarkMode::All,
        }
    }

    fn decode(
        &self,
        scores: &[f32],
        regressors: &[f32],
        input_width: u32,
        input_height: u32,
    ) -> Result<Vec<RawFace>> {
        if scores.len() != self.anchors.len()
            || regressors.len() != self.anchors.len() * VALUES_PER_ANCHOR
        {
            return Err(Error::msg(format!(
                "Unexpected model output sizes {} and {}",
                scores.len(),
                regressors.len()
            )));
        }

        let x_scale = input_width as f32 / WIDTH as f32;
        let y_scale = input_height as f32 / HEIGHT as f32;
        let min_width = self.min_face_size * input_width as f32;

        let mut results: Vec<(f32, RawFace)> = Vec::new();
        for ((score, res), anchor) in scores
            .iter()
            .zip(regressors.chunks_exact(VALUES_PER_ANCHOR))
            .zip(&self.anchors)
        {
            let score = sigmoid_stable(*score);
            if score < self.min_score {
                continue;
            }

            let bounds = RectF32::from_center(anchor.x + res[0], anchor.y + res[1], res[2], res[3])
                .scale(x_scale, y_scale);
            if bounds.w < min_width {
                trace!("Dropping small face {bounds:?}");
                continue;
            }

            let overlaps = |d: &RawFace| d.bounding_box.overlap_pct(&bounds) > OVERLAP_PCT;
            if results.iter().any(|(s, d)| *s > score && overlaps(d)) {
                continue;
            }
            results.retain(|(_, d)| !overlaps(d));

            let keypoint = |k: usize| {
                PointF32::new(
                    (anchor.x + res[4 + k * 2]) * x_scale,
                    (anchor.y + res[5 + k * 2]) * y_scale,
                )
            };

            let mut face = RawFace::new(bounds).with_angles(
                roll_degrees(keypoint(0), keypoint(1)),
                yaw_degrees(keypoint(2), keypoint(4), keypoint(5)),
            );
            if self.landmarks {
                for (k, landmark) in KEYPOINTS.iter().enumerate() {
                    if let Some(landmark) = landmark {
                        face.landmarks.insert(*landmark, keypoint(k));
                    }
                }
            }

            results.push((score, face));
        }

        debug!("Detected {} faces", results.len());

        Ok(results.into_iter().map(|(_, face)| face).collect())
    }
}

// Counterclockwise tilt of the eye line. The subject's right eye is on the
// image's left.
fn roll_degrees(right_eye: PointF32, left_eye: PointF32) -> f32 {
    -right_eye.theta_to(&left_eye).to_degrees()
}

// Nose offset from the midpoint between the ears, as an angle.
fn yaw_degrees(nose: PointF32, right_ear: PointF32, left_ear: PointF32) -> f32 {
    let half_span = (left_ear.x - right_ear.x) / 2.;
    if half_span.abs() < f32::EPSILON {
        return 0.;
    }

    let mid = right_ear.midpoint(&left_ear);
    ((nose.x - mid.x) / half_span).clamp(-1., 1.).asin().to_degrees()
}

fn sigmoid_stable(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        x.exp() / (1. + x.exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(hits: &[(usize, [f32; VALUES_PER_ANCHOR], f32)]) -> (Vec<f32>, Vec<f32>) {
        let mut scores = vec![-10.; anchors::NUM_ANCHORS];
        let mut regressors = vec![0.; anchors::NUM_ANCHORS * VALUES_PER_ANCHOR];
        for (idx, res, logit) in hits {
            scores[*idx] = *logit;
            regressors[idx * VALUES_PER_ANCHOR..(idx + 1) * VALUES_PER_ANCHOR]
                .copy_from_slice(res);
        }
        (scores, regressors)
    }

    fn level_face() -> [f32; VALUES_PER_ANCHOR] {
        // box 40x40 on the anchor, eyes level, nose centered between ears
        [
            0., 0., 40., 40., -8., -5., 8., -5., 0., 2., 0., 10., -18., 0., 18., 0.,
        ]
    }

    fn settings(landmarks: LandmarkMode) -> FaceDetectorSettings {
        FaceDetectorSettings {
            landmark_mode: landmarks,
            min_face_size: 0.,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_single_face() {
        let decoder = Decoder::new(&settings(LandmarkMode::All));
        // anchor 518 is centered on (24, 8)
        let (scores, regressors) = outputs(&[(518, level_face(), 5.)]);

        let faces = decoder.decode(&scores, &regressors, 256, 128).unwrap();
        assert_eq!(faces.len(), 1);

        let face = &faces[0];
        assert_eq!(face.bounding_box, RectF32::new(8., -12., 80., 40.));
        assert_eq!(face.landmarks.len(), 5);
        assert_eq!(face.landmarks[&Landmark::RightEye], PointF32::new(32., 3.));
        assert_eq!(face.landmarks[&Landmark::NoseBase], PointF32::new(48., 10.));
        assert!(!face.landmarks.contains_key(&Landmark::BottomMouth));
        assert!(face.roll_degrees.abs() < 1e-4);
        assert!(face.yaw_degrees.abs() < 1e-4);
        assert_eq!(face.smiling_probability, None);
    }

    #[test]
    fn test_landmarks_only_when_requested() {
        let decoder = Decoder::new(&settings(LandmarkMode::None));
        let (scores, regressors) = outputs(&[(518, level_face(), 5.)]);

        let faces = decoder.decode(&scores, &regressors, 128, 128).unwrap();
        assert!(faces[0].landmarks.is_empty());
    }

    #[test]
    fn test_overlapping_boxes_keep_best() {
        let decoder = Decoder::new(&settings(LandmarkMode::None));
        // anchors 512..518 share one cell
        let (scores, regressors) = outputs(&[
            (512, level_face(), 2.),
            (513, level_face(), 6.),
            (700, level_face(), 3.),
        ]);

        let faces = decoder.decode(&scores, &regressors, 128, 128).unwrap();
        assert_eq!(faces.len(), 2);
    }

    #[test]
    fn test_best_box_replaces_every_overlap() {
        let decoder = Decoder::new(&settings(LandmarkMode::None));
        let shifted = |dx: f32| {
            let mut res = level_face();
            res[0] = dx;
            res
        };
        // anchors 512..518 are centered on (8, 8). The two outer boxes barely
        // touch each other but both overlap the middle one.
        let (scores, regressors) = outputs(&[
            (512, shifted(-14.), 2.),
            (513, shifted(14.), 3.),
            (514, shifted(0.), 6.),
        ]);

        let faces = decoder.decode(&scores, &regressors, 128, 128).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bounding_box, RectF32::new(-12., -12., 40., 40.));
    }

    #[test]
    fn test_low_scores_and_small_faces_dropped() {
        let (scores, regressors) = outputs(&[(518, level_face(), 0.5)]);
        let decoder = Decoder::new(&settings(LandmarkMode::None));
        // sigmoid(0.5) ~ 0.62 is under the fast threshold
        assert!(decoder.decode(&scores, &regressors, 128, 128).unwrap().is_empty());

        let accurate = Decoder::new(&FaceDetectorSettings {
            mode: DetectorMode::Accurate,
            min_face_size: 0.,
            ..Default::default()
        });
        assert_eq!(accurate.decode(&scores, &regressors, 128, 128).unwrap().len(), 1);

        // 40px wide face in a 128px frame is under 0.5 of the width
        let picky = Decoder::new(&FaceDetectorSettings {
            mode: DetectorMode::Accurate,
            min_face_size: 0.5,
            ..Default::default()
        });
        assert!(picky.decode(&scores, &regressors, 128, 128).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_output_shape() {
        let decoder = Decoder::new(&settings(LandmarkMode::None));
        assert!(decoder.decode(&[0.; 10], &[0.; 160], 128, 128).is_err());
    }

    #[test]
    fn test_pose_angles() {
        // left eye higher on screen: head tilted counterclockwise
        let roll = roll_degrees(PointF32::new(0., 10.), PointF32::new(10., 0.));
        assert!((roll - 45.).abs() < 1e-4);

        let yaw = yaw_degrees(
            PointF32::new(10., 0.),
            PointF32::new(-20., 0.),
            PointF32::new(20., 0.),
        );
        assert!((yaw - 30.).abs() < 1e-3);
        assert_eq!(
            yaw_degrees(PointF32::default(), PointF32::default(), PointF32::default()),
            0.
        );
    }

    #[test]
    fn test_closure_factory() {
        struct Nothing;
        impl Detector for Nothing {
            fn detect(&mut self, _: &RgbImage) -> Result<Vec<RawFace>> {
                Ok(Vec::new())
            }
        }

        let factory = |_: &FaceDetectorSettings| -> Result<Box<dyn Detector>> { Ok(Box::new(Nothing)) };
        let mut detector = factory.build(&FaceDetectorSettings::default()).unwrap();
        assert!(detector.detect(&RgbImage::new(4, 4)).unwrap().is_empty());
    }
}
