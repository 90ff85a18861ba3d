mod config;
mod doctor;
mod input;
mod report;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use dim_core::{
    fov_from_known_target, mask_iou, measure, CancelToken, DepthFrame, MeasureRequest, RegionOfInterest,
};

use crate::config::{load_config, Config};
use crate::report::{build_report, ReportInputs};

#[derive(Debug, Parser)]
#[command(name = "dim", version, about = "Parcel dimensions from a depth frame and an ROI")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sanity-check the configuration file.
    Doctor,
    /// Measure the parcel inside an ROI.
    Measure(MeasureArgs),
    /// Field of view implied by a target of known size.
    CalibrateFov(CalibrateArgs),
}

#[derive(Debug, Args)]
struct MeasureArgs {
    /// 8-bit depth grid: grayscale image, or headerless .raw with --depth-size.
    #[arg(long)]
    depth: PathBuf,
    #[arg(long, value_parser = input::parse_size)]
    depth_size: Option<(u32, u32)>,
    /// RGB frame the ROI was drawn on (only its size is used).
    #[arg(long, conflicts_with = "rgb_size")]
    rgb: Option<PathBuf>,
    #[arg(long, value_parser = input::parse_size)]
    rgb_size: Option<(u32, u32)>,
    /// left,top,right,bottom in RGB pixels
    #[arg(long, value_parser = input::parse_roi, allow_hyphen_values = true)]
    roi: RegionOfInterest,
    /// Overrides [depth].scale_min for this frame.
    #[arg(long)]
    scale_min: Option<f64>,
    #[arg(long)]
    scale_max: Option<f64>,
    /// Write the selected component as a depth-grid PNG.
    #[arg(long)]
    mask_out: Option<PathBuf>,
    /// Ground-truth mask to score the segmentation against.
    #[arg(long)]
    gt_mask: Option<PathBuf>,
    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    /// Length of the target in image pixels.
    #[arg(long)]
    px_len: f64,
    #[arg(long)]
    known_mm: f64,
    /// Distance to the target.
    #[arg(long)]
    z_mm: f64,
    /// Image size along the same axis.
    #[arg(long)]
    image_px: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Measure(args) => measure_cmd(&cfg, args).await?,
        Command::CalibrateFov(args) => calibrate_fov(&args)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    let cal = cfg.calibration();
    doctor::check_lens("camera", &cal.lens)?;
    if let Some(lens) = &cal.depth_lens {
        doctor::check_lens("depth_camera", lens)?;
    }
    doctor::check_depth_range(&cfg.depth_scale(None, None))?;
    doctor::check_pipeline(&cfg.pipeline)?;
    if cal.optical_offset_mm.is_some() {
        info!("doctor: optical offset set, parallax correction enabled");
    }
    info!("doctor: OK");
    Ok(())
}

async fn measure_cmd(cfg: &Config, args: MeasureArgs) -> Result<()> {
    let grid = input::load_depth(&args.depth, args.depth_size)?;
    let depth_size = (grid.width, grid.height);
    let rgb_size = match (&args.rgb, args.rgb_size) {
        (Some(path), _) => input::rgb_dimensions(path)?,
        (None, Some(size)) => size,
        (None, None) => {
            warn!("measure: no --rgb/--rgb-size, assuming ROI is in depth-grid pixels");
            depth_size
        }
    };
    let raw_scale = cfg.depth_scale(args.scale_min, args.scale_max);
    let calibration = cfg.calibration();
    let pipeline = cfg.pipeline.clone();
    let roi = args.roi;

    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let data = grid.data;
    let mut task = tokio::task::spawn_blocking(move || {
        let depth = DepthFrame::new(depth_size.0, depth_size.1, &data, raw_scale)?;
        let req = MeasureRequest { depth, rgb_size, roi, calibration };
        let m = measure(&req, &pipeline, &worker_cancel)?;
        Ok::<_, dim_core::MeasureError>(m)
    });

    let outcome = tokio::select! {
        res = &mut task => res.context("measurement task failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("measure: interrupted, cancelling");
            cancel.cancel();
            task.await.context("measurement task failed")?
        }
    };
    let m = outcome.context("measurement failed")?;

    let iou = match &args.gt_mask {
        Some(path) => {
            let truth = input::load_truth_mask(path, depth_size.0, depth_size.1)?;
            let iou = mask_iou(&m.mask, &truth, depth_size.0, depth_size.1)?;
            info!(iou, "measure: mask scored against ground truth");
            Some(iou)
        }
        None => None,
    };

    if let Some(path) = &args.mask_out {
        let full = m.mask.to_full_grid(depth_size.0, depth_size.1);
        input::write_mask_png(path, &full, depth_size.0, depth_size.1)?;
        info!("measure: mask written to {}", path.display());
    }

    let inputs = ReportInputs {
        depth_size,
        raw_scale,
        rgb_size,
        roi,
        align_offset_px: calibration.align_offset_px,
        optical_offset_mm: calibration.optical_offset_mm,
        iou,
    };
    let ts_unix_ms = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let report = build_report(&m, &inputs, ts_unix_ms);

    info!(
        "measure: L={:.0} W={:.0} H={} mm conf={:.2}",
        m.dims.length_mm,
        m.dims.width_mm,
        m.dims.height_mm.map(|h| format!("{:.0}", h)).unwrap_or_else(|| "-".into()),
        m.dims.confidence
    );
    for note in &m.notes {
        warn!("measure: {}", note);
    }

    let json = serde_json::to_string_pretty(&report).context("serialize report")?;
    match &args.report_out {
        Some(path) => std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn calibrate_fov(args: &CalibrateArgs) -> Result<()> {
    let fov = fov_from_known_target(args.px_len, args.known_mm, args.z_mm, args.image_px)
        .context("target must span more than one pixel at a positive distance")?;
    println!("fov_deg={:.2}", fov);
    Ok(())
}
