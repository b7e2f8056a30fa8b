//! Render one equirectangular image through the fisheye filter and save
//! the result.
//!
//! Usage:
//!   cargo run --example still_frame -- pano.jpg fisheye.png \
//!       fov_degrees=180 pan_degrees=30 alpha_level=0

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use fisheye_core::{FrameBuffer, PixelFormat, Timestamp, VideoFilter};
use fisheye_render::{FilterOutput, FisheyeFilter, GpuConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (input_path, output_path) = match (args.next(), args.next()) {
        (Some(i), Some(o)) => (i, o),
        _ => bail!("usage: still_frame <input> <output> [key=value ...]"),
    };

    let mut settings = HashMap::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            bail!("malformed setting `{arg}`, expected key=value");
        };
        let value: f64 = value
            .parse()
            .with_context(|| format!("setting `{key}` is not a number"))?;
        settings.insert(key.to_string(), value);
    }

    let image = image::open(&input_path)
        .with_context(|| format!("opening {input_path}"))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let frame = FrameBuffer {
        data: image.into_raw(),
        width,
        height,
        format: PixelFormat::Rgba8,
    };

    let mut filter = FisheyeFilter::create(GpuConfig::default())?;
    tracing::info!("loaded {}", FisheyeFilter::manifest());
    filter.update_settings(&settings);

    match filter.render_frame(&frame, Timestamp::zero()) {
        FilterOutput::Transformed(output) => {
            let result = filter.read_back(&output)?;
            image::RgbaImage::from_raw(result.width, result.height, result.data)
                .context("repacking output pixels")?
                .save(&output_path)
                .with_context(|| format!("saving {output_path}"))?;
            println!("wrote {output_path} ({width}x{height})");
        }
        FilterOutput::PassThrough => bail!("filter served pass-through; no output written"),
    }

    Ok(())
}
