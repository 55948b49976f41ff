#![warn(unused_extern_crates)]
use anyhow::{Error, Result};
use clap::Parser;
use facecam::analyzer::{FaceAnalyzer, Frame, FrameOutcome};
use facecam::camera::CameraSession;
use facecam::capture::{PictureCapture, PictureOptions};
use facecam::events::CameraEvent;
use facecam::face::RawFace;
use facecam::normalize::{Rotation, normalize};
use facecam::pipeline::{BlazeFaceFactory, DetectorFactory};
use facecam::settings::FaceDetectorSettings;
use flume::{Receiver, Sender};
use image::{Rgb, RgbImage};
use imageproc::drawing;
use num_cpus::get as get_cpu_count;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{Level, debug, error, info, span, trace};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Face detector settings, a JSON object
    #[arg(short, long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// BlazeFace short range ONNX model
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "./models/mediapipe_face_detection_short_range.onnx"
    )]
    model: PathBuf,

    /// Max threads for inference
    #[arg(short, long)]
    threads: Option<usize>,

    /// Camera index, defaults to the last camera found
    #[arg(short, long)]
    camera: Option<u32>,

    /// Target frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Preview size as WIDTHxHEIGHT, defaults to the frame size
    #[arg(short, long, value_parser = parse_size)]
    preview: Option<(f64, f64)>,

    /// Clockwise rotation that turns frames upright
    #[arg(short, long, default_value = "0", value_parser = parse_rotation)]
    rotation: Rotation,

    /// Stop after this many camera frames
    #[arg(long)]
    frames: Option<u64>,

    /// Take a picture once the camera is ready
    #[arg(long)]
    take_picture: bool,

    /// Where pictures are written
    #[arg(long, default_value = "./tmp")]
    cache_dir: PathBuf,

    /// Process single input frame, reading from input path
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write the input frame with detections drawn on it
    #[arg(short, long, requires = "input")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = CmdArgs::parse();

    let settings = match &args.settings {
        Some(path) => FaceDetectorSettings::from_json_str(&std::fs::read_to_string(path)?)?,
        None => FaceDetectorSettings::default(),
    };
    debug!("Detector settings: {settings:?}");

    let total_threads = get_cpu_count();
    let factory = BlazeFaceFactory {
        model_path: args.model.clone(),
        threads: args.threads.unwrap_or(total_threads).min(total_threads),
    };

    match args.input.clone() {
        Some(input) => process_image(input, &args, &settings, &factory),
        None => run_camera(&args, settings, factory),
    }
}

fn process_image(
    src: PathBuf,
    args: &CmdArgs,
    settings: &FaceDetectorSettings,
    factory: &BlazeFaceFactory,
) -> Result<()> {
    let image: RgbImage = image::open(src)?.into_rgb8();
    let (preview_width, preview_height) = preview_size(args, image.width(), image.height());
    let frame = Frame {
        image,
        rotation: args.rotation,
        preview_width,
        preview_height,
    };

    let start = Instant::now();
    let mut img = frame.upright().into_owned();
    let mut detector = factory.build(settings)?;
    let raw = detector.detect(&img)?;
    debug!("Took {:?}", start.elapsed());

    let geometry = frame.geometry()?;
    let event = CameraEvent::FacesDetected {
        faces: raw.iter().map(|f| normalize(f, &geometry)).collect(),
        target: 0,
    };
    println!("{}", serde_json::to_string(&event)?);

    if let Some(output) = &args.output {
        draw_faces(&mut img, &raw);
        img.save(output)?;
        info!("Result at {:?}", output);
    }

    Ok(())
}

fn draw_faces(img: &mut RgbImage, faces: &[RawFace]) {
    for face in faces {
        drawing::draw_hollow_rect_mut(img, face.bounding_box.into(), Rgb([255u8, 0u8, 0u8]));
        for p in face.landmarks.values() {
            drawing::draw_filled_circle_mut(
                img,
                (p.x.round() as i32, p.y.round() as i32),
                4,
                Rgb([0u8, 255u8, 0u8]),
            );
        }
    }
}

fn run_camera(
    args: &CmdArgs,
    settings: FaceDetectorSettings,
    factory: BlazeFaceFactory,
) -> Result<()> {
    let (events_tx, events_rx) = flume::unbounded();
    let printer = thread::spawn(move || print_events(events_rx, io::stdout()));

    let mut camera = match CameraSession::open(args.camera, args.fps, &events_tx) {
        Ok(camera) => camera,
        Err(e) => {
            // let the mount error reach stdout before exiting
            stop_printer(events_tx, printer)?;
            return Err(e);
        }
    };
    let (width, height) = camera.resolution();
    let (preview_width, preview_height) = preview_size(args, width, height);

    let analyzer = FaceAnalyzer::spawn(settings, factory, events_tx.clone(), 0)?;
    let capture = PictureCapture::new(args.cache_dir.clone(), events_tx);

    let mut frame_count = 0;
    loop {
        if args.frames.is_some_and(|max| frame_count >= max) {
            break;
        }
        frame_count += 1;

        let span = span!(Level::DEBUG, "frame_loop_iter");
        let _guard = span.enter();

        let image = match camera.frame() {
            Ok(image) => image,
            Err(e) => {
                error!("Failed to pull frame from webcam: {e:?}");
                break;
            }
        };

        if args.take_picture && frame_count == 1 {
            let result = capture.take_picture(image.clone(), PictureOptions::default());
            thread::spawn(move || match result.recv() {
                Ok(Ok(Some(picture))) => info!("Picture saved at {}", picture.uri),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => error!("Failed to take picture: {e:?}"),
                Err(e) => error!("Picture request dropped: {e:?}"),
            });
        }

        let outcome = analyzer.analyze(Frame {
            image,
            rotation: args.rotation,
            preview_width,
            preview_height,
        });
        trace!("Frame {frame_count}: {outcome:?}");
        if outcome == FrameOutcome::Closed {
            error!("Analyzer stopped");
            break;
        }
    }

    drop(analyzer);
    drop(capture);
    drop(camera);
    if printer.join().is_err() {
        return Err(Error::msg("Event printer panicked"));
    }

    Ok(())
}

// Without an explicit preview the frame is shown upright at its own size
fn preview_size(args: &CmdArgs, frame_width: u32, frame_height: u32) -> (f64, f64) {
    let (w, h) = match args.rotation.is_sideways() {
        true => (frame_height, frame_width),
        false => (frame_width, frame_height),
    };
    args.preview.unwrap_or((w as f64, h as f64))
}

fn print_events<W: Write>(events: Receiver<CameraEvent>, mut out: W) -> W {
    for event in events.iter() {
        let written = serde_json::to_string(&event)
            .map_err(Error::from)
            .and_then(|line| Ok(writeln!(out, "{line}")?));
        if let Err(e) = written {
            error!("Failed to print {}: {e:?}", event.name());
        }
    }
    out
}

// Closing the last sender lets the printer drain the queue and exit
fn stop_printer<W>(events: Sender<CameraEvent>, printer: JoinHandle<W>) -> Result<W> {
    drop(events);
    printer
        .join()
        .map_err(|_| Error::msg("Event printer panicked"))
}

fn parse_size(s: &str) -> Result<(f64, f64)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| Error::msg(format!("expected WIDTHxHEIGHT, got {s}")))?;
    let (w, h): (f64, f64) = (w.trim().parse()?, h.trim().parse()?);
    if w <= 0. || h <= 0. {
        return Err(Error::msg(format!("preview size {s} must be positive")));
    }
    Ok((w, h))
}

fn parse_rotation(s: &str) -> Result<Rotation> {
    Ok(Rotation::from_degrees(s.parse()?)?)
}
