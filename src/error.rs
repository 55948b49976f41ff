use std::io;
use std::path::PathBuf;

use image::ImageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacecamError {
    #[error("invalid frame geometry: {0}")]
    Geometry(String),

    #[error("unsupported rotation {0}, expected one of 0, 90, 180, 270")]
    Rotation(u32),

    #[error("failed to parse detector settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("detector settings must be a JSON object")]
    SettingsShape,

    #[error("failed to write picture {path}: {source}")]
    PictureWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode picture: {0}")]
    PictureEncode(#[from] ImageError),

    #[error("failed to capture image")]
    ImageCaptureFailed,

    #[error("camera unmounted during taking photo process")]
    CameraUnmounted,
}

pub type FacecamResult<T> = Result<T, FacecamError>;
