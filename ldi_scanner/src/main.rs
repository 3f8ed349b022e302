/*!
# LDI Scanner

Exposes PCB images onto photo-sensitive boards with a laser that a rotating
polygon mirror sweeps across the board, while a sled moves the board one step
per scan line. The PRU of the BeagleBone does the real-time part; this program
prepares the image and feeds it the scan lines.

## Usage

### Expose an image
```bash
ldi-scanner expose board.png
```

### Check size and timing without hardware
```bash
ldi-scanner plan board.png --dpi 1200 --json
```

### Try the whole pipeline without hardware
```bash
ldi-scanner expose --dry-run board.png
```

### Calibrate the laser dot size
```bash
ldi-scanner chart chart.pbm && ldi-scanner expose chart.pbm --dpi 1200
```
*/

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ldi_core::loader::{load_image, LoadedImage};
use ldi_core::{test_chart, DryRunSender, ExposureOutcome, ExposurePlan, LaserScanner, ScanLineSender};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

mod config;
mod gpio;
mod sled;

use config::AppConfig;
use sled::{DrySled, GpioSled, SledControl};

#[derive(Parser)]
#[command(name = "ldi-scanner")]
#[command(about = "Laser direct imaging of PCB images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path; defaults are used if it does not exist
    #[arg(short, long, default_value = "ldi-scanner.toml", global = true)]
    config: PathBuf,

    /// More logging, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Expose an image
    Expose {
        #[command(flatten)]
        image: ImageArgs,

        /// Send every scan line this often
        #[arg(short = 'x', long)]
        exposure_factor: Option<u32>,

        /// Simulate the PRU and the sled
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Keep the sled where it is; exposes the same line over and over
        #[arg(long)]
        no_sled: bool,

        /// Leave the sled at the end of the exposure
        #[arg(long)]
        no_return: bool,
    },

    /// Prepare an image and report size and timing
    Plan {
        #[command(flatten)]
        image: ImageArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Expose a mark per mirror facet to check facet timing
    Jitter {
        /// Marks per facet
        #[arg(short, long, default_value = "1000")]
        repeats: usize,
    },

    /// Write a thinning calibration chart as PBM
    Chart {
        /// Output PBM file
        output: PathBuf,

        /// Chart resolution
        #[arg(short, long, default_value = "1200")]
        dpi: f64,

        /// Width of the chart lines in mm
        #[arg(long, default_value = "0.2")]
        line_width: f64,

        /// Number of samples
        #[arg(long, default_value = "8")]
        count: usize,

        /// Laser diameter in mm the first sample is thinned for
        #[arg(long, default_value = "0.0")]
        start_diameter: f64,

        /// Laser diameter increase per sample in mm
        #[arg(long, default_value = "0.01")]
        step: f64,
    },

    /// Move the sled, negative values towards the back
    Sled {
        /// Distance in mm
        #[arg(allow_negative_numbers = true)]
        mm: f64,

        /// Only report what would happen
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "ldi-scanner.toml")]
        output: PathBuf,
    },
}

/// Image selection and preparation, shared by `expose` and `plan`
#[derive(Args, Debug)]
struct ImageArgs {
    /// PNG or binary PBM image
    image: PathBuf,

    /// Image resolution, overriding the one stored in the image
    #[arg(short, long)]
    dpi: Option<f64>,

    /// Gray level above which a PNG pixel is exposed
    #[arg(short, long)]
    threshold: Option<u8>,

    /// Expose the dark parts of the image
    #[arg(short, long)]
    invert: bool,

    /// Counter-clockwise quarter turns
    #[arg(short, long)]
    rotate: Option<u32>,

    /// Laser dot diameter in mm to thin for, both axes
    #[arg(long)]
    laser_dot: Option<f64>,

    /// Write the prepared scan image to this PBM file
    #[arg(long)]
    dump_pbm: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // Logging goes to stderr, stdout carries reports
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    debug!("ldi-scanner {} on ldi_core {}", env!("CARGO_PKG_VERSION"), ldi_core::VERSION);

    if let Commands::Config { output } = &cli.command {
        return generate_config_file(output);
    }
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Expose {
            image,
            exposure_factor,
            dry_run,
            no_sled,
            no_return,
        } => {
            let factor = exposure_factor.unwrap_or(config.exposure.exposure_factor);
            let return_sled = config.exposure.return_sled && !no_return && !no_sled;
            run_expose(&config, &image, factor, dry_run, !no_sled, return_sled)
        }
        Commands::Plan { image, json } => run_plan(&config, &image, json),
        Commands::Jitter { repeats } => run_jitter(&config, repeats),
        Commands::Chart {
            output,
            dpi,
            line_width,
            count,
            start_diameter,
            step,
        } => run_chart(&output, dpi, line_width, count, start_diameter, step),
        Commands::Sled { mm, dry_run } => {
            let mut sled = open_sled(&config, dry_run)?;
            let moved = sled.move_mm(mm);
            println!("✅ Sled moved {:.3}mm", moved);
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        debug!("Loading configuration from {}", path.display());
        AppConfig::load_from_file(path)
    } else {
        debug!("No configuration at {}, using defaults", path.display());
        Ok(AppConfig::default())
    }
}

/// PRU channel, or its simulation
fn open_sender(config: &AppConfig, dry_run: bool) -> Result<Box<dyn ScanLineSender>> {
    if dry_run {
        return Ok(Box::new(DryRunSender::new(config.machine.line_frequency_hz)));
    }
    let channel = ldi_core::channel::pru::open_channel(&config.hardware.uio_device, &config.hardware.pru_firmware)
        .context("Cannot start the PRU")?;
    Ok(Box::new(channel))
}

fn open_sled(config: &AppConfig, dry_run: bool) -> Result<Box<dyn SledControl>> {
    if dry_run {
        return Ok(Box::new(DrySled::new(config.machine.sled_mm_per_step)));
    }
    let sled = GpioSled::new(config.hardware.sled_step_frequency_hz, config.machine.sled_mm_per_step)
        .context("Cannot access the sled")?;
    Ok(Box::new(sled))
}

/// Load the image and give it to a new scanner
fn prepare_scanner(
    config: &AppConfig,
    args: &ImageArgs,
    sender: Box<dyn ScanLineSender>,
    exposure_factor: u32,
) -> Result<LaserScanner> {
    let threshold = args.threshold.unwrap_or(config.exposure.threshold);
    let invert = args.invert || config.exposure.invert;
    let LoadedImage { image, dpi } = load_image(&args.image, threshold, invert)
        .with_context(|| format!("Cannot load {}", args.image.display()))?;

    let dpi = args
        .dpi
        .or(dpi)
        .or(config.exposure.fallback_dpi)
        .with_context(|| format!("{} has no resolution, pass --dpi", args.image.display()))?;
    anyhow::ensure!(dpi.is_finite() && dpi > 0.0, "Resolution must be positive, got {dpi}");

    let mut scanner = LaserScanner::new(config.machine.clone(), sender, exposure_factor)?;
    scanner.set_orientation(args.rotate.unwrap_or(config.exposure.quarter_turns));
    if let Some(dot) = args.laser_dot {
        scanner.set_laser_dot_size(dot, dot);
    }
    scanner
        .set_image(image, 25.4 / dpi)
        .with_context(|| format!("Cannot prepare {}", args.image.display()))?;

    if let (Some(path), Some(scan_image)) = (&args.dump_pbm, scanner.scan_image()) {
        let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
        scan_image.write_pbm(BufWriter::new(file))?;
        info!("💾 Scan image written to {}", path.display());
    }
    Ok(scanner)
}

fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn print_plan(plan: &ExposurePlan) {
    println!("📐 Exposure area: {:.1}mm along the sled x {:.1}mm across", plan.sled_mm, plan.scan_mm);
    println!("🔍 Resolution: {:.0} dpi, {:.4}mm per pixel", plan.dpi, plan.mm_per_pixel);
    println!("🪜 Sled steps per pixel: {:.2}", plan.sled_steps_per_pixel);
    match plan.sampled_laser_dots_per_pixel {
        Some(sampled) => println!(
            "🔦 Laser dots per pixel: {:.2} worst case, {:.2} sampled",
            plan.laser_dots_per_pixel, sampled
        ),
        None => println!("🔦 Laser dots per pixel: {:.2} worst case", plan.laser_dots_per_pixel),
    }
    println!("📏 Laser dot: {:.4}mm, modulated at {:.0}kHz", plan.laser_dot_mm, plan.modulation_khz);
    println!(
        "✂️ Thinning: {} pixels along the scan, {} along the sled",
        plan.scan_thinning_radius, plan.sled_thinning_radius
    );
    println!(
        "⏱️ {} scan lines x{} exposure: {}",
        plan.scanlines,
        plan.exposure_factor,
        format_duration(plan.estimated_seconds)
    );
}

fn run_plan(config: &AppConfig, args: &ImageArgs, json: bool) -> Result<()> {
    let sender = Box::new(DryRunSender::with_line_period(Duration::ZERO));
    let scanner = prepare_scanner(config, args, sender, config.exposure.exposure_factor)?;
    let plan = scanner.plan().context("No exposure prepared")?;
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
    } else {
        print_plan(plan);
    }
    Ok(())
}

fn run_expose(
    config: &AppConfig,
    args: &ImageArgs,
    exposure_factor: u32,
    dry_run: bool,
    advance_sled: bool,
    return_sled: bool,
) -> Result<()> {
    let sender = open_sender(config, dry_run)?;
    let mut scanner = prepare_scanner(config, args, sender, exposure_factor)?;
    let estimate = scanner.estimated_time_seconds();
    let finish = chrono::Local::now() + chrono::Duration::milliseconds((estimate * 1000.0) as i64);
    println!(
        "🚀 Exposing {}, about {}, done at {}",
        args.image.display(),
        format_duration(estimate),
        finish.format("%H:%M:%S")
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, stopping exposure...");
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    let started = Instant::now();
    let mut last_percent = None;
    let outcome = scanner.scan_expose(advance_sled, |done, total| {
        let percent = done * 100 / total.max(1);
        if last_percent != Some(percent) {
            last_percent = Some(percent);
            eprint!("\r⏳ {done}/{total} scan lines ({percent}%)");
            let _ = std::io::stderr().flush();
        }
        running.load(Ordering::SeqCst)
    })?;
    eprintln!();
    scanner.shutdown()?;

    let exposed = match outcome {
        ExposureOutcome::Completed { scanlines } => {
            println!(
                "✅ Exposure done: {} scan lines in {}",
                scanlines,
                format_duration(started.elapsed().as_secs_f64())
            );
            scanlines
        }
        ExposureOutcome::Cancelled { at_scanline } => {
            warn!("Exposure stopped after {} scan lines", at_scanline);
            at_scanline
        }
    };

    if return_sled && exposed > 0 {
        let travel = exposed as f64 * config.machine.sled_mm_per_step;
        let mut sled = open_sled(config, dry_run)?;
        let moved = sled.move_mm(-travel);
        info!("↩️ Sled returned {:.2}mm of {:.2}mm", -moved, travel);
    }
    Ok(())
}

fn run_jitter(config: &AppConfig, repeats: usize) -> Result<()> {
    let sender = open_sender(config, false)?;
    let mut scanner = LaserScanner::new(config.machine.clone(), sender, 1)?;
    scanner.jitter_diagnostic(config.machine.mirror_faces as usize, repeats)?;
    scanner.shutdown()?;
    println!("✅ Jitter marks exposed, {} per facet", repeats);
    Ok(())
}

fn run_chart(output: &Path, dpi: f64, line_width: f64, count: usize, start_diameter: f64, step: f64) -> Result<()> {
    anyhow::ensure!(dpi.is_finite() && dpi > 0.0, "Resolution must be positive, got {dpi}");
    anyhow::ensure!(count > 0, "Chart needs at least one sample");
    let chart = test_chart::thinning_test_chart(25.4 / dpi, line_width, count, start_diameter, step);
    let file = File::create(output).with_context(|| format!("Cannot create {}", output.display()))?;
    chart.write_pbm(BufWriter::new(file))?;

    println!(
        "✅ Chart with {} samples for {:.3}mm to {:.3}mm laser dots written to {}",
        count,
        start_diameter,
        start_diameter + (count - 1) as f64 * step,
        output.display()
    );
    println!("   Expose it with: ldi-scanner expose {} --dpi {}", output.display(), dpi);
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: &Path) -> Result<()> {
    let config = AppConfig::default();
    config.save_to_file(output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to match the machine, then run:");
    println!("   ldi-scanner --config {} expose board.png", output_path.display());

    Ok(())
}
