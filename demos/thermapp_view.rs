//! ThermApp capture viewer
//!
//! Replays a raw ThermApp capture through the full image pipeline and shows the
//! tone-mapped output in a window.
//!
//! Controls:
//!   N/L/M/H:   Select NV / LO / MED / HI calibration set
//!   R:         Reset tone curve and temperature history
//!   Escape:    Quit
//!
//! Usage:
//!   cargo run --release --example thermapp_view -- \
//!       --file _captures/thermapp_0001.raw \
//!       --calibration ~/.thermapp/cal --highpass 1.5

use clap::Parser;
use minifb::{Key, KeyRepeat, Scale, Window, WindowOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thermapp::runtime::NoGainControl;
use thermapp::{
    CalSet, Calibration, FrameProcessor, FrameSource, LutConfig, ProcessorConfig, ReplaySource,
    Stream, VideoFrame, VideoSink, WorkError, WorkResult,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "ThermApp capture viewer")]
struct Args {
    /// Path to raw capture file
    #[arg(short, long)]
    file: PathBuf,

    /// Calibration root containing one directory per serial number
    #[arg(short, long)]
    calibration: Option<PathBuf>,

    /// High-pass smoothing ratio (0.25 to 5.0); omit to disable
    #[arg(long)]
    highpass: Option<f32>,

    /// Switch LO/MED/HI automatically on scene range
    #[arg(long)]
    auto_range: bool,

    /// Fraction of pixels clipped from each end of the histogram
    #[arg(long, default_value_t = 0.001)]
    clip: f32,

    /// Playback rate in frames per second
    #[arg(long, default_value_t = 8.7)]
    fps: f32,

    /// Restart at the first frame when the capture ends
    #[arg(short, long)]
    r#loop: bool,

    /// Window scale factor (1, 2 or 4)
    #[arg(long, default_value_t = 2)]
    scale: u8,
}

// ---------------------------------------------------------------------------
// Window sink
// ---------------------------------------------------------------------------

struct WindowSink {
    window: Window,
    framebuf: Vec<u32>,
}

impl WindowSink {
    fn new(width: usize, height: usize, scale: u8) -> Result<Self, minifb::Error> {
        let scale = match scale {
            1 => Scale::X1,
            4 => Scale::X4,
            _ => Scale::X2,
        };
        let mut window = Window::new(
            "ThermApp",
            width,
            height,
            WindowOptions {
                resize: false,
                scale,
                ..WindowOptions::default()
            },
        )?;
        window.set_target_fps(60);
        Ok(Self {
            window,
            framebuf: vec![0; width * height],
        })
    }

    fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    /// Keep the window responsive while no frame is ready
    fn idle(&mut self) {
        self.window.update();
    }
}

impl VideoSink for WindowSink {
    fn write_frame(&mut self, frame: &VideoFrame) -> WorkResult<()> {
        self.framebuf.resize(frame.width * frame.height, 0);
        for (dst, &grey) in self.framebuf.iter_mut().zip(&frame.data) {
            let g = grey as u32;
            *dst = (g << 16) | (g << 8) | g;
        }
        self.window
            .update_with_buffer(&self.framebuf, frame.width, frame.height)
            .map_err(|e| WorkError::NodeError(e.to_string()))
    }
}

fn key_set(window: &Window) -> Option<CalSet> {
    let keys = [
        (Key::N, CalSet::Nv),
        (Key::L, CalSet::Lo),
        (Key::M, CalSet::Med),
        (Key::H, CalSet::Hi),
    ];
    keys.into_iter()
        .find(|(key, _)| window.is_key_pressed(*key, KeyRepeat::No))
        .map(|(_, set)| set)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let interval = Duration::from_secs_f32(1.0 / args.fps.max(0.1));
    let mut source = ReplaySource::open(&args.file)?
        .with_looping(args.r#loop)
        .with_interval(interval);

    // The first frame identifies the camera
    let first = source.read_frame()?;
    info!("First frame: {}", first.header);

    let calibration = Calibration::open(args.calibration.as_deref(), &first.header);
    let config = ProcessorConfig::new()
        .with_highpass(args.highpass)
        .with_lut(LutConfig {
            clip_fraction: args.clip,
            ..LutConfig::default()
        })
        .with_auto_range(args.auto_range)
        .with_initial_set(if args.auto_range { CalSet::Med } else { CalSet::Nv })
        // A capture cannot be steered
        .with_gain_control(false);
    let mut processor = FrameProcessor::new(calibration, config)?;

    let geometry = *processor.calibration().geometry();
    let mut sink = WindowSink::new(geometry.image_w, geometry.image_h, args.scale)?;
    let mut video = VideoFrame::new(geometry.image_w, geometry.image_h);
    let mut gain = NoGainControl;

    if processor.process_into(&first, &mut gain, &mut video)? {
        sink.write_frame(&video)?;
    }

    let mut stream = Stream::spawn(source)?;
    let mut last_status = Instant::now();

    while sink.is_open() {
        if let Some(set) = key_set(&sink.window) {
            processor.select_set(set);
        }
        if sink.window.is_key_pressed(Key::R, KeyRepeat::No) {
            processor.reset();
        }

        let frame = match stream.recv_timeout(Duration::from_millis(20)) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                sink.idle();
                continue;
            }
            Err(WorkError::Shutdown) => {
                info!("Capture finished");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        match processor.process_into(&frame, &mut gain, &mut video) {
            Ok(true) => sink.write_frame(&video)?,
            Ok(false) => sink.idle(),
            Err(e) => warn!("Frame {} dropped: {}", frame.header.frame_count(), e),
        }
        stream.recycle(frame);

        if last_status.elapsed() >= Duration::from_secs(5) {
            let stats = processor.stats();
            let image = processor.corrected();
            info!(
                "set {} | {} in, {} out, {} skipped | scene {:.0}..{:.0} | thermistor {:.2} °C",
                processor.calibration().current_set(),
                stats.frames_in,
                stats.frames_out,
                stats.frames_skipped,
                image.min,
                image.max,
                processor.tracker().thermistor_celsius().unwrap_or(f32::NAN)
            );
            last_status = Instant::now();
        }
    }

    let stats = stream.join();
    info!(
        "Read {} frames ({} superseded), {} range switches",
        stats.frames_read,
        stats.frames_superseded,
        processor.range_switches()
    );
    Ok(())
}
