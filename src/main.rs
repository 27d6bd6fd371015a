use anyhow::Context;
use clap::Parser;
use rfcapture::cdp::CdpPage;
use rfcapture::{CaptureOptions, CaptureSession, OutputFormat, Progress, Size};
use std::path::PathBuf;

/// Capture a full web page, beyond the visible viewport, as one image.
#[derive(Parser, Debug)]
#[command(name = "rfcapture", version)]
struct Args {
    /// Page to capture
    url: String,

    /// Output image path
    #[arg(short, long, default_value = "capture.png")]
    output: PathBuf,

    /// JSON file with capture options; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Settle delay after each scroll, in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Also capture same-origin iframes on complex pages
    #[arg(long)]
    include_frames: bool,

    /// Compression quality in (0, 1]
    #[arg(long)]
    quality: Option<f32>,

    /// Encode as JPEG instead of PNG
    #[arg(long)]
    jpeg: bool,

    /// Viewport width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Viewport height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Log every capture step
    #[arg(short, long)]
    verbose: bool,

    /// Write capture metadata as JSON to this path
    #[arg(long)]
    metadata: Option<PathBuf>,
}

fn load_options(args: &Args) -> anyhow::Result<CaptureOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            CaptureOptions::from_json(&json)?
        }
        None => CaptureOptions::default(),
    };
    if let Some(ms) = args.settle_ms {
        options.settle_delay_ms = ms;
    }
    if let Some(q) = args.quality {
        options.quality = q;
    }
    if args.include_frames {
        options.include_frames = true;
    }
    if args.jpeg {
        options.format = OutputFormat::Jpeg;
    }
    options.verbose |= args.verbose;
    options.validate()?;
    Ok(options)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "rfcapture=info" } else { "rfcapture=warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let options = load_options(&args)?;
    let page = CdpPage::launch(&args.url, Size::new(args.width, args.height))?;

    let session = CaptureSession::new();
    let report = |p: Progress| {
        eprintln!("[{}] {}/{} ({:.0}%)", p.session_id, p.completed, p.total, p.fraction() * 100.0);
    };
    let result = session.capture_full_page(&page, &options, &report).await?;

    std::fs::write(&args.output, &result.raster.data)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    eprintln!(
        "Wrote {} ({}x{}, {} section(s))",
        args.output.display(),
        result.raster.width,
        result.raster.height,
        result.metadata.section_count
    );

    if let Some(path) = &args.metadata {
        let json = serde_json::to_string_pretty(&result.metadata)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    page.close()?;
    Ok(())
}
