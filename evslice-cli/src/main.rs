//! Event-camera slicing CLI.
//!
//! Opens a recording (or the first live camera), slices the event stream and
//! prints per-slice statistics, renders the slices to frames, or both.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use evslice_core::display::spawn_stdin_keys;
use evslice_core::output::CsvWriter;
use evslice_core::pipeline::spawn_slicer;
use evslice_core::{
    source, Display, DisplayLoop, EventSlice, EventSource, FieldOrder, FrameGenerator,
    HeadlessDisplay, OutputError, Palette, SensorGeometry, SliceCondition, SliceError, Slicer,
    SlicerConfig, SnapshotDisplay, StatsTracker,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// What to do with each slice.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Print per-slice and total event statistics
    Stats,
    /// Render slices to frames and present them
    Display,
    /// Render frames and print statistics
    Both,
}

/// Event-camera stream slicer and live frame accumulator.
///
/// Reads events from a recording or a live camera, groups them into slices
/// and reports statistics or renders each slice as a frame.
#[derive(Parser, Debug)]
#[command(name = "evslice")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to input event file (.raw EVT 3.0 or .csv)
    ///
    /// If not specified, the first available live camera is used.
    #[arg(short, long, value_name = "PATH")]
    input_event_file: Option<PathBuf>,

    /// What to do with each slice
    #[arg(short, long, value_enum, default_value_t = Mode::Display)]
    mode: Mode,

    /// Slice duration in microseconds
    ///
    /// Combined with --slice-events, a slice closes on whichever comes first.
    #[arg(long, value_name = "US")]
    slice_us: Option<u64>,

    /// Maximum number of events per slice
    #[arg(long, value_name = "N")]
    slice_events: Option<usize>,

    /// Emit a slice for every time window, even without events
    #[arg(long)]
    emit_empty_ticks: bool,

    /// Frame colors: dark, light or gray
    #[arg(long, default_value = "dark")]
    palette: Palette,

    /// Save presented frames as PNG files in this directory
    ///
    /// Without it frames are rendered and discarded.
    #[arg(long, value_name = "DIR")]
    frames_dir: Option<PathBuf>,

    /// Do not read quit keys (q, Q or Escape followed by Enter) from stdin
    #[arg(long)]
    no_input: bool,

    /// Read and slice events on a separate producer thread
    #[arg(long)]
    threaded: bool,

    /// Slices buffered between the producer thread and the display
    #[arg(long, default_value_t = 8, value_name = "N")]
    queue_capacity: usize,

    /// Also write every sliced event to this CSV file
    #[arg(long, value_name = "PATH")]
    export_csv: Option<PathBuf>,

    /// Field order for CSV export.
    ///
    /// Format: comma-separated field names (x, y, p, t)
    #[arg(short, long, default_value = "x,y,p,t")]
    format: String,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn slice_condition(&self) -> SliceCondition {
        match (self.slice_us, self.slice_events) {
            (Some(delta_us), Some(events)) => SliceCondition::Mixed { delta_us, events },
            (None, Some(events)) => SliceCondition::ByCount { events },
            (Some(delta_us), None) => SliceCondition::ByTime { delta_us },
            (None, None) => SliceCondition::default(),
        }
    }
}

/// Per-slice work shared by all modes: statistics, CSV export, progress.
struct SliceObserver {
    stats: StatsTracker,
    report: bool,
    export: Option<CsvWriter<File>>,
    export_error: Option<OutputError>,
    progress: ProgressBar,
    slices: u64,
}

impl SliceObserver {
    fn observe(&mut self, slice: &EventSlice) {
        self.slices += 1;
        let snapshot = self.stats.update(slice);
        if self.report {
            self.progress.suspend(|| println!("{}", snapshot));
        }

        if let Some(writer) = self.export.as_mut() {
            if let Err(e) = writer.write_slice(slice) {
                // Stop exporting, report once the run ends
                self.export = None;
                self.export_error = Some(e);
            }
        }

        self.progress.set_message(format!(
            "{} slices, {} events",
            self.slices, snapshot.total_count
        ));
    }

    fn finish(mut self) -> Result<StatsTracker> {
        if let Some(e) = self.export_error.take() {
            return Err(e).context("Failed to write CSV export");
        }
        if let Some(writer) = self.export.as_mut() {
            writer.flush().context("Failed to write CSV export")?;
        }
        Ok(self.stats)
    }
}

fn run_display<D: Display>(
    display: D,
    palette: Palette,
    geometry: SensorGeometry,
    slices: impl Iterator<Item = Result<EventSlice, SliceError>>,
    observer: &mut SliceObserver,
) -> Result<()> {
    let mut display_loop = DisplayLoop::new(display, FrameGenerator::new(palette), geometry)
        .context("Failed to allocate frame")?;
    let reason = display_loop
        .run(slices, |slice| observer.observe(slice))
        .context("Display loop aborted")?;
    log::info!("Stopped: {:?} after {} frames", reason, display_loop.ticks());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let field_order = FieldOrder::from_str(&args.format)
        .context("Invalid field format. Use comma-separated: x,y,p,t")?;

    let source = source::open(args.input_event_file.as_deref())
        .context("Failed to open event source")?;
    let geometry = source.geometry();

    let config = SlicerConfig::new(args.slice_condition()).with_empty_ticks(args.emit_empty_ticks);
    let slicer = Slicer::new(source, config).context("Invalid slicing options")?;

    let slices: Box<dyn Iterator<Item = Result<EventSlice, SliceError>>> = if args.threaded {
        Box::new(
            spawn_slicer(slicer, args.queue_capacity).context("Failed to start producer thread")?,
        )
    } else {
        Box::new(slicer)
    };

    let export = args
        .export_csv
        .as_ref()
        .map(|path| CsvWriter::create(path, &geometry, field_order))
        .transpose()
        .context("Failed to create CSV export")?;

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("Slicing {} sensor...", geometry));
        pb
    };

    let mut observer = SliceObserver {
        stats: StatsTracker::new(),
        report: matches!(args.mode, Mode::Stats | Mode::Both),
        export,
        export_error: None,
        progress: progress.clone(),
        slices: 0,
    };

    let start_time = Instant::now();

    match args.mode {
        Mode::Stats => {
            for slice in slices {
                let slice = slice.context("Failed to read event slice")?;
                observer.observe(&slice);
            }
        }
        Mode::Display | Mode::Both => {
            let keys = if args.no_input {
                None
            } else {
                Some(spawn_stdin_keys().context("Failed to start key input")?)
            };

            match &args.frames_dir {
                Some(dir) => {
                    let mut display = SnapshotDisplay::new(dir)
                        .with_context(|| format!("Failed to prepare {:?}", dir))?;
                    if let Some(keys) = keys {
                        display = display.with_keys(keys);
                    }
                    run_display(display, args.palette, geometry, slices, &mut observer)?;
                }
                None => {
                    let mut display = HeadlessDisplay::new();
                    if let Some(keys) = keys {
                        display = display.with_keys(keys);
                    }
                    run_display(display, args.palette, geometry, slices, &mut observer)?;
                }
            }
        }
    }

    let slice_count = observer.slices;
    let stats = observer.finish()?;
    let elapsed = start_time.elapsed();

    progress.finish_with_message(format!(
        "Done! {} slices in {:.2}s (sensor: {})",
        slice_count,
        elapsed.as_secs_f64(),
        geometry
    ));

    if matches!(args.mode, Mode::Stats | Mode::Both) {
        println!("{}", stats.finalize());
    }

    Ok(())
}
