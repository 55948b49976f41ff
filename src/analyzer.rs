//! Frame analysis: hands camera frames to the detector, at most one at a
//! time, and turns detections into `FacesDetected` events.
//!
//! Frames that arrive while a detection is in flight, or before the
//! minimum detection interval has passed, are dropped on the spot rather
//! than queued. The worker only ever sees the newest frame that got
//! through the gate.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use flume::{Receiver, Sender, TrySendError};
use image::{RgbImage, imageops};
use serde_json::{Map, Value};
use tracing::{Level, debug, error, span, trace, warn};

use crate::cadence::{CadenceGate, DetectionPermit, Skip};
use crate::events::CameraEvent;
use crate::face::DetectedFace;
use crate::normalize::{FrameGeometry, Rotation, normalize};
use crate::pipeline::{Detector, DetectorFactory};
use crate::settings::{FaceDetectorSettings, SettingsAction};
use crate::tracker::FaceTracker;

#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Clockwise rotation that turns `image` upright.
    pub rotation: Rotation,
    pub preview_width: f64,
    pub preview_height: f64,
}

impl Frame {
    /// The image turned upright, the way the preview shows it.
    pub fn upright(&self) -> Cow<'_, RgbImage> {
        match self.rotation {
            Rotation::Deg0 => Cow::Borrowed(&self.image),
            Rotation::Deg90 => Cow::Owned(imageops::rotate90(&self.image)),
            Rotation::Deg180 => Cow::Owned(imageops::rotate180(&self.image)),
            Rotation::Deg270 => Cow::Owned(imageops::rotate270(&self.image)),
        }
    }

    pub fn geometry(&self) -> Result<FrameGeometry> {
        Ok(FrameGeometry::new(
            self.image.width(),
            self.image.height(),
            self.rotation,
            self.preview_width,
            self.preview_height,
        )?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Dispatched,
    Busy,
    TooSoon,
    Closed,
}

enum Control {
    Rebuild(FaceDetectorSettings),
}

pub struct FaceAnalyzer {
    settings: FaceDetectorSettings,
    gate: Arc<CadenceGate>,
    detect_faces: Arc<AtomicBool>,
    frames: Option<Sender<(Frame, DetectionPermit)>>,
    control: Sender<Control>,
    worker: Option<JoinHandle<()>>,
}

impl FaceAnalyzer {
    pub fn spawn(
        settings: FaceDetectorSettings,
        factory: impl DetectorFactory + 'static,
        events: Sender<CameraEvent>,
        target: i32,
    ) -> Result<FaceAnalyzer> {
        let gate = Arc::new(CadenceGate::new(settings.min_detection_interval));
        let detect_faces = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = flume::bounded(1);
        let (control_tx, control_rx) = flume::unbounded();

        let mut worker = Worker {
            settings: settings.clone(),
            factory: Box::new(factory),
            detector: None,
            tracker: FaceTracker::new(),
            detect_faces: Arc::clone(&detect_faces),
            events,
            target,
        };
        let handle = thread::Builder::new()
            .name("face-analyzer".into())
            .spawn(move || worker.run(frames_rx, control_rx))?;

        Ok(FaceAnalyzer {
            settings,
            gate,
            detect_faces,
            frames: Some(frames_tx),
            control: control_tx,
            worker: Some(handle),
        })
    }

    pub fn analyze(&self, frame: Frame) -> FrameOutcome {
        let Some(frames) = &self.frames else {
            return FrameOutcome::Closed;
        };

        let permit = match self.gate.try_acquire() {
            Ok(permit) => permit,
            Err(Skip::Busy) => {
                trace!("Detection in flight, dropping frame");
                return FrameOutcome::Busy;
            }
            Err(Skip::TooSoon) => {
                trace!("Min detection interval not reached, dropping frame");
                return FrameOutcome::TooSoon;
            }
        };

        match frames.try_send((frame, permit)) {
            Ok(_) => FrameOutcome::Dispatched,
            Err(TrySendError::Full(_)) => FrameOutcome::Busy,
            Err(TrySendError::Disconnected(_)) => FrameOutcome::Closed,
        }
    }

    pub fn update_settings(&mut self, values: &Map<String, Value>) -> SettingsAction {
        let update = self.settings.with_values(values);
        match update.action {
            SettingsAction::Unchanged => {}
            SettingsAction::Reconfigure => {
                self.gate
                    .set_min_interval(update.settings.min_detection_interval);
            }
            SettingsAction::RebuildDetector => {
                self.gate
                    .set_min_interval(update.settings.min_detection_interval);
                if self
                    .control
                    .send(Control::Rebuild(update.settings.clone()))
                    .is_err()
                {
                    warn!("Analyzer worker gone, settings not applied");
                }
            }
        }

        self.settings = update.settings;
        update.action
    }

    /// While disabled, frames are still analyzed but no faces are emitted.
    pub fn set_detect_faces(&self, enabled: bool) {
        self.detect_faces.store(enabled, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }
}

impl Drop for FaceAnalyzer {
    fn drop(&mut self) {
        drop(self.frames.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Face analyzer worker panicked");
            }
        }
    }
}

struct Worker {
    settings: FaceDetectorSettings,
    factory: Box<dyn DetectorFactory>,
    detector: Option<Box<dyn Detector>>,
    tracker: FaceTracker,
    detect_faces: Arc<AtomicBool>,
    events: Sender<CameraEvent>,
    target: i32,
}

impl Worker {
    fn run(
        &mut self,
        frames: Receiver<(Frame, DetectionPermit)>,
        control: Receiver<Control>,
    ) {
        while let Ok((frame, permit)) = frames.recv() {
            for msg in control.try_iter() {
                match msg {
                    Control::Rebuild(settings) => {
                        debug!("Detector settings changed, rebuilding");
                        self.settings = settings;
                        self.detector = None;
                        self.tracker.reset();
                    }
                }
            }

            self.process(frame);
            drop(permit);
        }
        debug!("Frame channel closed, analyzer stopping");
    }

    fn process(&mut self, frame: Frame) {
        let span = span!(Level::DEBUG, "analyze_frame");
        let _guard = span.enter();

        match self.detect(&frame) {
            Ok(faces) => {
                if self.detect_faces.load(Ordering::Acquire) {
                    self.emit(CameraEvent::FacesDetected {
                        faces,
                        target: self.target,
                    });
                }
            }
            Err(e) => {
                warn!("Face detection failed: {e:?}");
                self.emit(CameraEvent::FaceDetectionError {
                    message: e.to_string(),
                });
            }
        }
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>> {
        let geometry = frame.geometry()?;

        let detector = match self.detector.take() {
            Some(detector) => detector,
            None => self.factory.build(&self.settings)?,
        };
        let mut raw = self.detector.insert(detector).detect(&frame.upright())?;

        if self.settings.tracking {
            self.tracker.assign(&mut raw);
        } else {
            raw.iter_mut().for_each(|f| f.tracking_id = None);
        }

        trace!("Normalizing {} faces with {geometry:?}", raw.len());
        Ok(raw.iter().map(|f| normalize(f, &geometry)).collect())
    }

    fn emit(&self, event: CameraEvent) {
        if self.events.send(event).is_err() {
            debug!("No event listener, dropping event");
        }
    }
}
