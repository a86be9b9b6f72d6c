use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_client::ApiClient;
use rollcall_core::Identity;
use rollcall_hw::{capture_frame, Frame, PixelLayout, V4lBackend};
use std::path::PathBuf;

mod camera;
mod config;
mod enroll;
mod prompt;
mod session;
#[cfg(test)]
mod testing;
mod verdict;

use config::Config;

/// Frames with more than this share of near-black samples are reported as dark.
const DARK_THRESHOLD_PCT: f32 = 0.95;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-capture classroom attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture three face shots and register a new user
    Enroll {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// University seat number, for students
        #[arg(long)]
        usn: Option<String>,
        /// Write the accepted shots to this directory
        #[arg(long)]
        save_previews: Option<PathBuf>,
    },
    /// Photograph a classroom and mark recognized students present
    Session {
        /// Classroom id
        #[arg(short, long)]
        class: String,
        /// Submit this image file instead of using the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show today's attendance ratio and eligibility for a classroom
    Verdict {
        /// Classroom id
        #[arg(short, long)]
        class: String,
        /// Re-query on the configured poll interval until Ctrl-C
        #[arg(long)]
        watch: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Also check a reported attendance percentage against the minimum
        #[arg(long)]
        percentage: Option<u32>,
    },
    /// List video capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Save the captured frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Enroll {
            name,
            email,
            password,
            usn,
            save_previews,
        } => {
            let mut identity = Identity::new(name, email, password);
            if let Some(usn) = usn {
                identity = identity.with_student_id(usn);
            }
            enroll::run(&config, &api_client(&config)?, identity, save_previews).await?;
        }
        Commands::Session { class, image } => {
            session::run(&config, &api_client(&config)?, &class, image.as_deref()).await?;
        }
        Commands::Verdict {
            class,
            watch,
            json,
            percentage,
        } => {
            let options = verdict::Options {
                watch,
                json,
                percentage,
            };
            verdict::run(&config, &api_client(&config)?, &class, options).await?;
        }
        Commands::Devices => {
            let devices = V4lBackend::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { output } => run_diagnostics(&config, output).await?,
    }

    Ok(())
}

fn api_client(config: &Config) -> Result<ApiClient> {
    ApiClient::new(
        config.api_base.clone(),
        config.token.clone(),
        config.request_timeout(),
    )
    .context("creating API client")
}

async fn run_diagnostics(config: &Config, output: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics on {}...", config.camera_device);

    let manager = camera::manager(config);
    let Some(handle) = prompt::interruptible(camera::acquire_ready(&manager, config.ready_timeout())).await
    else {
        println!("Diagnostics cancelled.");
        return Ok(());
    };
    let mut handle = handle?;
    let still = capture_frame(&mut handle)?;
    handle.release();

    let luma = image::load_from_memory(still.bytes())
        .context("decoding captured frame")?
        .to_luma8();
    let frame = Frame {
        width: luma.width(),
        height: luma.height(),
        data: luma.into_raw(),
        layout: PixelLayout::Luma8,
        timestamp: std::time::Instant::now(),
        sequence: 0,
    };

    println!("  size:       {}x{}", still.width(), still.height());
    println!("  encoded:    {} bytes ({})", still.bytes().len(), still.mime_type());
    println!("  brightness: {:.1}", frame.avg_brightness());
    if frame.is_dark(DARK_THRESHOLD_PCT) {
        println!("  warning: frame is almost entirely dark; check lighting or lens cover");
    }

    if let Some(path) = output {
        std::fs::write(&path, still.bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        println!("  saved:      {}", path.display());
    }
    Ok(())
}
