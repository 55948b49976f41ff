use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{FacecamError, FacecamResult};

const MODE_KEY: &str = "mode";
const DETECT_LANDMARKS_KEY: &str = "detectLandmarks";
const TRACKING_KEY: &str = "tracking";
const RUN_CLASSIFICATIONS_KEY: &str = "runClassifications";
const MIN_INTERVAL_MILLIS_KEY: &str = "minDetectionInterval";

pub const DEFAULT_MIN_FACE_SIZE: f32 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorMode {
    #[default]
    Fast,
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LandmarkMode {
    #[default]
    None,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassificationMode {
    #[default]
    None,
    All,
}

impl DetectorMode {
    fn from_wire(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::Fast),
            2 => Some(Self::Accurate),
            _ => None,
        }
    }
}

impl LandmarkMode {
    fn from_wire(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::None),
            2 => Some(Self::All),
            _ => None,
        }
    }
}

impl ClassificationMode {
    fn from_wire(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::None),
            2 => Some(Self::All),
            _ => None,
        }
    }
}

/// Detector configuration. Changing any field other than the interval
/// requires a new detector instance.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetectorSettings {
    pub mode: DetectorMode,
    pub landmark_mode: LandmarkMode,
    pub classification_mode: ClassificationMode,
    pub tracking: bool,
    pub min_detection_interval: Duration,
    /// Smallest face reported, as a fraction of image width.
    pub min_face_size: f32,
}

impl Default for FaceDetectorSettings {
    fn default() -> Self {
        Self {
            mode: DetectorMode::default(),
            landmark_mode: LandmarkMode::default(),
            classification_mode: ClassificationMode::default(),
            tracking: false,
            min_detection_interval: Duration::ZERO,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    Unchanged,
    /// Only the cadence changed, the live detector stays.
    Reconfigure,
    RebuildDetector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsUpdate {
    pub settings: FaceDetectorSettings,
    pub action: SettingsAction,
}

impl FaceDetectorSettings {
    pub fn from_json_str(input: &str) -> FacecamResult<FaceDetectorSettings> {
        match serde_json::from_str::<Value>(input)? {
            Value::Object(values) => Ok(Self::default().with_values(&values).settings),
            _ => Err(FacecamError::SettingsShape),
        }
    }

    /// Applies a flat key/value settings object on top of `self`.
    ///
    /// Unknown keys are ignored, as are recognized keys holding a value of
    /// the wrong type; those keep their current setting.
    pub fn with_values(&self, values: &Map<String, Value>) -> SettingsUpdate {
        let mut next = self.clone();

        if let Some(v) = read(values, MODE_KEY, |v| wire_int(v).and_then(DetectorMode::from_wire)) {
            next.mode = v;
        }
        if let Some(v) = read(values, DETECT_LANDMARKS_KEY, |v| {
            wire_int(v).and_then(LandmarkMode::from_wire)
        }) {
            next.landmark_mode = v;
        }
        if let Some(v) = read(values, TRACKING_KEY, Value::as_bool) {
            next.tracking = v;
        }
        if let Some(v) = read(values, RUN_CLASSIFICATIONS_KEY, |v| {
            wire_int(v).and_then(ClassificationMode::from_wire)
        }) {
            next.classification_mode = v;
        }
        if let Some(v) = read(values, MIN_INTERVAL_MILLIS_KEY, |v| {
            wire_int(v)
                .and_then(|ms| u64::try_from(ms).ok())
                .map(Duration::from_millis)
        }) {
            next.min_detection_interval = v;
        }

        let action = self.diff(&next);
        debug!("Settings update: {action:?}");

        SettingsUpdate {
            settings: next,
            action,
        }
    }

    pub fn diff(&self, next: &FaceDetectorSettings) -> SettingsAction {
        if self.requires_rebuild(next) {
            SettingsAction::RebuildDetector
        } else if self.min_detection_interval != next.min_detection_interval {
            SettingsAction::Reconfigure
        } else {
            SettingsAction::Unchanged
        }
    }

    fn requires_rebuild(&self, next: &FaceDetectorSettings) -> bool {
        self.mode != next.mode
            || self.landmark_mode != next.landmark_mode
            || self.classification_mode != next.classification_mode
            || self.tracking != next.tracking
            || self.min_face_size != next.min_face_size
    }
}

fn read<T>(values: &Map<String, Value>, key: &str, parse: impl Fn(&Value) -> Option<T>) -> Option<T> {
    let value = values.get(key)?;
    let parsed = parse(value);
    if parsed.is_none() {
        warn!("Ignoring invalid value for {key}: {value}");
    }
    parsed
}

// JS numbers arrive as floats, truncated like any numeric prop
fn wire_int(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}
