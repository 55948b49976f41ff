use anyhow::{Error, Result};
use flume::Sender;
use image::RgbImage;
use nokhwa::{
    Camera, nokhwa_initialize,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
};
use tracing::{Level, debug, error, span};

use crate::events::CameraEvent;

const MOUNT_ERROR: &str =
    "Camera component could not be rendered - is there any other instance running?";

pub struct CameraSession {
    camera: Camera,
}

impl CameraSession {
    /// Opens `index`, or the last camera found, and reports the outcome on
    /// `events`.
    pub fn open(index: Option<u32>, fps: u32, events: &Sender<CameraEvent>) -> Result<Self> {
        match Self::open_stream(index, fps) {
            Ok(session) => {
                let _ = events.send(CameraEvent::CameraReady);
                Ok(session)
            }
            Err(e) => {
                error!("Failed to open camera: {e:?}");
                let _ = events.send(CameraEvent::MountError {
                    message: MOUNT_ERROR.to_string(),
                });
                Err(e)
            }
        }
    }

    fn open_stream(index: Option<u32>, fps: u32) -> Result<Self> {
        nokhwa_initialize(|granted| {
            debug!("User said {}", granted);
        });

        let index = match index {
            Some(i) => CameraIndex::Index(i),
            None => {
                let cameras = query(ApiBackend::Auto)?;
                cameras
                    .iter()
                    .for_each(|cam| debug!("Found camera: {:?}", cam));
                cameras
                    .last()
                    .ok_or_else(|| Error::msg("No camera found"))?
                    .index()
                    .clone()
            }
        };

        let mut camera = Camera::new(
            index,
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        )?;
        camera.set_frame_rate(fps)?;
        camera.open_stream()?;

        Ok(Self { camera })
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let span = span!(Level::DEBUG, "get_frame");
        let _guard = span.enter();

        let buffer = self.camera.frame()?;
        Ok(buffer.decode_image::<RgbFormat>()?)
    }

    pub fn resolution(&self) -> (u32, u32) {
        let resolution = self.camera.resolution();
        (resolution.width(), resolution.height())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            error!("Failed to stop camera stream {e:?}");
        }
    }
}
