//! Alignment check: draws every aligned region outline over a capture and
//! prints per-region pixel counts, so the extent and offsets can be tuned by eye.

use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use image::{Rgba, RgbaImage};
use log::warn;
use overcast_core::boundary;
use overcast_core::geo_transform::{align_region, pixel_transform};
use overcast_core::raster::burn;
use overcast_core::sinks::crop_capture;
use overcast_core::{Config, RegionAnalyzer};

const OUTLINE: Rgba<u8> = Rgba([255, 0, 0, 255]);

#[derive(Parser, Debug)]
#[command(name = "calibrate", about = "Overlay aligned region outlines on a capture")]
struct Args {
    /// JSON deployment config.
    #[arg(short, long, default_value = "overcast.json")]
    config: PathBuf,

    /// Capture to draw on.
    #[arg(short, long)]
    image: PathBuf,

    /// The image is an uncropped capture; apply the crop box first.
    #[arg(long)]
    full: bool,

    #[arg(short, long, default_value = "calibration.png")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let layer = boundary::load(&config.boundary_path, &config.district)?;

    let mut frame = image::open(&args.image)?.to_rgba8();
    if args.full {
        frame = crop_capture(&frame, &config.crop_box)?;
    }
    let (w, h) = frame.dimensions();
    if (w, h) != (config.extent.pixel_width, config.extent.pixel_height) {
        bail!(
            "frame is {w}x{h} but the extent is calibrated for {}x{}",
            config.extent.pixel_width,
            config.extent.pixel_height
        );
    }

    let map = pixel_transform(&config.extent);
    let analyzer = RegionAnalyzer::new(&config.extent, &config.alignment).with_visualization(false);
    let timestamp = Utc::now().with_timezone(&config.schedule.offset()?);
    let mut overlay: RgbaImage = frame.clone();

    println!("{:<28} {:>10} {:>10} {:>9}", "region", "pixels", "cloudy", "coverage");
    for region in layer.regions() {
        let aligned = match align_region(&region.name, &region.geometry, &config.extent, &config.alignment) {
            Ok(aligned) => aligned,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        let mask = burn(&aligned, &map, w as usize, h as usize);
        for (row, col) in mask.iter_inside() {
            if mask.is_edge(row, col) {
                overlay.put_pixel(col as u32, row as u32, OUTLINE);
            }
        }

        let analysis = analyzer.analyze_region(region, &frame, &layer.district, timestamp)?;
        println!(
            "{:<28} {:>10} {:>10} {:>9}",
            region.name, analysis.counts.total, analysis.counts.cloudy, analysis.record.cloud_percentage
        );
    }

    overlay.save(&args.output)?;
    println!("overlay written to {}", args.output.display());
    Ok(())
}
