use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flume::{Receiver, Sender};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, span, warn};

use crate::error::{FacecamError, FacecamResult};
use crate::events::CameraEvent;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PictureOptions {
    /// 0 compresses the most, 1 keeps the most detail.
    pub quality: f64,
    pub base64: bool,
    /// Accepted for compatibility, metadata is not written.
    pub exif: bool,
    pub skip_processing: bool,
    /// Resolve right away and deliver the picture as an event.
    pub fast_mode: bool,
    pub id: Option<i32>,
    pub max_downsampling: u32,
}

impl Default for PictureOptions {
    fn default() -> Self {
        Self {
            quality: 1.,
            base64: false,
            exif: false,
            skip_processing: false,
            fast_mode: false,
            id: None,
            max_downsampling: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedPicture {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
}

/// `None` when the picture will arrive later as a `PictureSaved` event.
pub type PictureResult = FacecamResult<Option<CapturedPicture>>;

/// Outstanding picture requests, keyed by request id. An entry is removed
/// the first time its result is delivered.
#[derive(Debug, Default)]
pub struct PictureRequests {
    pending: Mutex<HashMap<i32, Sender<PictureResult>>>,
    next_id: Mutex<i32>,
}

impl PictureRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (i32, Receiver<PictureResult>) {
        let (tx, rx) = flume::bounded(1);
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next = next.wrapping_add(1);
            *next
        };
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        (id, rx)
    }

    /// Returns false when `id` is unknown or was already resolved.
    pub fn resolve(&self, id: i32, result: PictureResult) -> bool {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);

        match entry {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!("Picture request {id} was abandoned");
                }
                true
            }
            None => false,
        }
    }

    /// Fails every outstanding request, returning how many there were.
    pub fn reject_all(&self) -> usize {
        let pending: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();

        for (id, tx) in &pending {
            if tx.send(Err(FacecamError::CameraUnmounted)).is_err() {
                debug!("Picture request {id} was abandoned");
            }
        }
        pending.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Takes pictures from camera frames and reports them back either through
/// the request's receiver or, in fast mode, as an event.
pub struct PictureCapture {
    cache_dir: PathBuf,
    requests: Arc<PictureRequests>,
    events: Sender<CameraEvent>,
}

impl PictureCapture {
    pub fn new(cache_dir: PathBuf, events: Sender<CameraEvent>) -> Self {
        Self {
            cache_dir,
            requests: Arc::new(PictureRequests::new()),
            events,
        }
    }

    pub fn requests(&self) -> &PictureRequests {
        &self.requests
    }

    pub fn take_picture(&self, frame: RgbImage, options: PictureOptions) -> Receiver<PictureResult> {
        let (id, rx) = self.requests.register();
        let requests = Arc::clone(&self.requests);
        let events = self.events.clone();
        let cache_dir = self.cache_dir.clone();

        if options.fast_mode {
            requests.resolve(id, Ok(None));
        }

        thread::spawn(move || {
            let result = save_picture(&frame, &options, &cache_dir);
            if !options.fast_mode {
                requests.resolve(id, result.map(Some));
                return;
            }

            match result {
                Ok(data) => {
                    let event = CameraEvent::PictureSaved {
                        id: options.id.unwrap_or(id),
                        data,
                    };
                    if events.send(event).is_err() {
                        warn!("Picture {id} saved with no event listener");
                    }
                }
                Err(e) => warn!("Failed to save picture {id}: {e:?}"),
            }
        });

        rx
    }
}

impl Drop for PictureCapture {
    fn drop(&mut self) {
        let rejected = self.requests.reject_all();
        if rejected > 0 {
            warn!("Camera closed with {rejected} pictures pending");
        }
    }
}

static PICTURE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn save_picture(
    frame: &RgbImage,
    options: &PictureOptions,
    cache_dir: &Path,
) -> FacecamResult<CapturedPicture> {
    let span = span!(Level::DEBUG, "save_picture");
    let _guard = span.enter();

    if frame.width() == 0 || frame.height() == 0 {
        return Err(FacecamError::ImageCaptureFailed);
    }

    let (img, quality) = if options.skip_processing {
        (frame.clone(), 100)
    } else {
        let factor = options.max_downsampling.max(1);
        let img = if factor > 1 {
            imageops::resize(
                frame,
                (frame.width() / factor).max(1),
                (frame.height() / factor).max(1),
                FilterType::Triangle,
            )
        } else {
            frame.clone()
        };
        // front camera frames are stored the way the preview shows them
        (imageops::flip_horizontal(&img), (options.quality.clamp(0., 1.) * 100.).round().max(1.) as u8)
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgb8,
    )?;

    let dir = cache_dir.join("Camera");
    fs::create_dir_all(&dir).map_err(|source| FacecamError::PictureWrite {
        path: dir.clone(),
        source,
    })?;
    let path = dir.join(picture_file_name());
    fs::write(&path, &bytes).map_err(|source| FacecamError::PictureWrite {
        path: path.clone(),
        source,
    })?;
    debug!("Wrote {} bytes to {path:?}", bytes.len());

    Ok(CapturedPicture {
        uri: format!("file://{}", path.display()),
        width: img.width(),
        height: img.height(),
        base64: options.base64.then(|| BASE64.encode(&bytes)),
    })
}

fn picture_file_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let n = PICTURE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos}-{n}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn frame() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| image::Rgb([x as u8 * 4, y as u8 * 5, 128]))
    }

    #[test]
    fn test_requests_resolve_once() {
        let requests = PictureRequests::new();
        let (a, rx_a) = requests.register();
        let (b, _rx_b) = requests.register();
        assert_eq!((a, b), (1, 2));
        assert_eq!(requests.pending(), 2);

        assert!(requests.resolve(a, Ok(None)));
        assert!(!requests.resolve(a, Ok(None)));
        assert!(!requests.resolve(99, Ok(None)));
        assert_eq!(requests.pending(), 1);
        assert!(matches!(rx_a.recv(), Ok(Ok(None))));
    }

    #[test]
    fn test_abandoned_request_still_removed() {
        let requests = PictureRequests::new();
        let (id, rx) = requests.register();
        drop(rx);
        assert!(requests.resolve(id, Err(FacecamError::CameraUnmounted)));
        assert_eq!(requests.pending(), 0);
    }

    #[test]
    fn test_drop_rejects_pending() {
        let dir = TempDir::new().unwrap();
        let (tx, _events) = flume::unbounded();
        let capture = PictureCapture::new(dir.path().to_path_buf(), tx);
        let (_, first) = capture.requests().register();
        let (_, second) = capture.requests().register();

        drop(capture);
        assert!(matches!(first.recv(), Ok(Err(FacecamError::CameraUnmounted))));
        assert!(matches!(second.recv(), Ok(Err(FacecamError::CameraUnmounted))));
    }

    #[test]
    fn test_empty_frame_fails() {
        let dir = TempDir::new().unwrap();
        let result = save_picture(&RgbImage::new(0, 0), &PictureOptions::default(), dir.path());
        assert!(matches!(result, Err(FacecamError::ImageCaptureFailed)));
    }

    #[test]
    fn test_save_picture() {
        let dir = TempDir::new().unwrap();
        let options = PictureOptions {
            base64: true,
            max_downsampling: 2,
            quality: 0.5,
            ..Default::default()
        };

        let picture = save_picture(&frame(), &options, dir.path()).unwrap();
        assert_eq!((picture.width, picture.height), (32, 24));
        let path = picture.uri.strip_prefix("file://").unwrap();
        assert!(Path::new(path).starts_with(dir.path().join("Camera")));

        let bytes = fs::read(path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(BASE64.decode(picture.base64.unwrap()).unwrap(), bytes);
    }

    #[test]
    fn test_skip_processing_keeps_size() {
        let dir = TempDir::new().unwrap();
        let options = PictureOptions {
            skip_processing: true,
            max_downsampling: 4,
            ..Default::default()
        };

        let picture = save_picture(&frame(), &options, dir.path()).unwrap();
        assert_eq!((picture.width, picture.height), (64, 48));
        assert!(picture.base64.is_none());
    }

    #[test]
    fn test_take_picture_resolves_request() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = flume::unbounded();
        let capture = PictureCapture::new(dir.path().to_path_buf(), tx);

        let rx = capture.take_picture(frame(), PictureOptions::default());
        let picture = rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(picture.width, 64);
        assert_eq!(capture.requests().pending(), 0);
    }

    #[test]
    fn test_fast_mode_delivers_event() {
        let dir = TempDir::new().unwrap();
        let (tx, events) = flume::unbounded();
        let capture = PictureCapture::new(dir.path().to_path_buf(), tx);

        let options = PictureOptions {
            fast_mode: true,
            id: Some(17),
            ..Default::default()
        };
        let rx = capture.take_picture(frame(), options);
        assert!(matches!(rx.recv(), Ok(Ok(None))));

        match events.recv_timeout(Duration::from_secs(10)).unwrap() {
            CameraEvent::PictureSaved { id, data } => {
                assert_eq!(id, 17);
                assert_eq!(data.height, 48);
            }
            e => panic!("unexpected event {e:?}"),
        }
    }

    #[test]
    fn test_options_from_json() {
        let options: PictureOptions =
            serde_json::from_str(r#"{"quality": 0.3, "fastMode": true, "id": 4}"#).unwrap();
        assert_eq!(options.quality, 0.3);
        assert!(options.fast_mode);
        assert_eq!(options.id, Some(4));
        assert_eq!(options.max_downsampling, 1);
    }
}
