use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hivecount::{
    eval,
    sink::{FanOut, JsonLog, TextLog},
    vision::{self, VideoSource, Window},
    Config, Mode, Pipeline, Viewer,
};
use opencv::core::Mat;
use std::{fs, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hivecount", about = "Log bee visits to tube hive ports from video")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a video and write the event log
    Run(RunArgs),
    /// Score a text log against hand-annotated visits
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// YAML config; flags below override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Video file
    #[arg(long, value_name = "PATH")]
    video: Option<String>,
    /// The video has a clock overlay at --timestamp-rect
    #[arg(long)]
    timestamp: bool,
    #[arg(long, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"], allow_hyphen_values = true)]
    timestamp_rect: Option<Vec<i32>>,
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// Run motion detection every N frames
    #[arg(long)]
    detection_rate: Option<u64>,
    #[arg(long)]
    motion_threshold: Option<f64>,
    #[arg(long)]
    min_contour_area: Option<f64>,
    #[arg(long)]
    max_contour_area: Option<f64>,
    /// Frames a region is compared against before it counts as new (0 = off)
    #[arg(long)]
    contour_window_size: Option<usize>,
    #[arg(long)]
    buffer_frames: Option<u64>,
    #[arg(long)]
    max_distance_from_port: Option<f64>,
    #[arg(long)]
    max_trackers: Option<usize>,
    #[arg(long)]
    headless: bool,
    /// Text log, appended to
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,
    /// JSON lines log
    #[arg(long, value_name = "PATH")]
    log_json: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(video) = &self.video {
            config.video = video.clone();
        }
        if self.timestamp {
            config.timestamp = true;
        }
        if let Some(rect) = &self.timestamp_rect {
            let [x1, y1, x2, y2] = rect[..] else {
                bail!("--timestamp-rect takes four values");
            };
            config.timestamp_rect = Some([x1, y1, x2, y2]);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(rate) = self.detection_rate {
            config.detection_rate = rate;
        }
        if let Some(threshold) = self.motion_threshold {
            config.motion_threshold = threshold;
        }
        if let Some(area) = self.min_contour_area {
            config.min_contour_area = area;
        }
        if let Some(area) = self.max_contour_area {
            config.max_contour_area = area;
        }
        if let Some(size) = self.contour_window_size {
            config.contour_window_size = size;
        }
        if let Some(frames) = self.buffer_frames {
            config.buffer_frames = frames;
        }
        if let Some(distance) = self.max_distance_from_port {
            config.max_distance_from_port = distance;
        }
        if let Some(max) = self.max_trackers {
            config.max_trackers = max;
        }
        if self.headless {
            config.show = false;
        }
        if let Some(path) = &self.log {
            config.log = Some(path.clone());
        }
        if let Some(path) = &self.log_json {
            config.log_json = Some(path.clone());
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
struct EvalArgs {
    /// CSV with `Bee ID`, `Start Timestamp`, `End Timestamp` columns
    #[arg(long, value_name = "PATH")]
    truth: PathBuf,
    /// Text log written by `hivecount run`
    #[arg(long, value_name = "PATH")]
    log: PathBuf,
    /// Seconds of slack on either side of an annotated visit
    #[arg(long, default_value_t = 10)]
    buffer: u32,
    /// Count a capture as correct regardless of its port id
    #[arg(long)]
    no_check_id: bool,
}

fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hivecount=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Eval(args) => evaluate(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply(&mut config)?;
    config.validate()?;

    let mut source = VideoSource::open(&config.video)?;

    let mut sink = FanOut::new();
    if let Some(path) = &config.log {
        sink.push(Box::new(TextLog::open(path)?));
    }
    if let Some(path) = &config.log_json {
        sink.push(Box::new(JsonLog::create(path)?));
    }
    if sink.is_empty() {
        tracing::info!("No log file given; events go to the console only");
    }

    let mut window = if config.show {
        match Window::open("hivecount") {
            Ok(window) => Some(window),
            Err(err) => {
                tracing::warn!("{:#}. Running headless.", err);
                None
            }
        }
    } else {
        None
    };

    let mut pipeline = Pipeline::new(&config, vision::primitives(&config))?;
    let viewer = window.as_mut().map(|w| w as &mut dyn Viewer<Mat>);
    let summary = pipeline.run(&mut source, &mut sink, viewer)?;
    tracing::info!(
        "{} events over {} frames ({} detection frames)",
        summary.events,
        summary.frames,
        summary.detection_frames
    );
    Ok(())
}

fn evaluate(args: EvalArgs) -> Result<()> {
    let truth_text = fs::read_to_string(&args.truth)
        .with_context(|| format!("Failed to read {}", args.truth.display()))?;
    let log_text = fs::read_to_string(&args.log)
        .with_context(|| format!("Failed to read {}", args.log.display()))?;

    let truth = eval::read_ground_truth(&truth_text)?;
    let captured = eval::read_log(&log_text);
    if captured.is_empty() {
        tracing::warn!("No events with a readable timestamp in {}", args.log.display());
    }

    let score = eval::score(&captured, &truth, args.buffer, !args.no_check_id);
    println!("{}", score);
    Ok(())
}
