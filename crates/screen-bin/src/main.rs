//! `screenctl`: command-line control for RS-485 projector screens and lifts.
//!
//! # Usage
//!
//! ```bash
//! screenctl /dev/ttyUSB0 --duration 10 down
//! screenctl /dev/ttyUSB0 --profile seemax --duration 25 up
//! screenctl /dev/ttyUSB0 stop
//! screenctl /dev/ttyUSB0 --address AABBCC program
//! screenctl /dev/ttyUSB0 --config living-room.toml --debug micro-down
//! ```
//!
//! `up` and `down` assume the screen starts at the opposite end, print the
//! estimated position while moving and return when the move has finished.
//! Ctrl-C stops the screen.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use screen_driver::shared_ports::close_port;
use screen_driver::{Address, Progress, ProfileKind, ScreenConfig, ScreenDriver};

#[derive(Parser, Debug)]
#[command(name = "screenctl")]
#[command(about = "Control XY Screens / SeeMax projector screens and lifts over RS-485", long_about = None)]
struct Cli {
    /// Serial port the RS-485 adapter is connected to (e.g. /dev/ttyUSB0)
    port: String,

    /// Device address as 6 hex characters (default: the profile's address)
    #[arg(long)]
    address: Option<String>,

    /// Protocol variant
    #[arg(long, value_enum)]
    profile: Option<ProfileArg>,

    /// Travel duration in seconds for up and down
    #[arg(long)]
    duration: Option<f64>,

    /// Screen configuration file (TOML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Commands {
    /// Retract the screen and wait until it is fully up
    Up,
    /// Extend the screen and wait until it is fully down
    Down,
    /// Stop the screen
    Stop,
    /// Program an address into a screen in learning mode
    Program {
        /// Address to program (default: --address)
        new_address: Option<String>,
    },
    /// Move up a single step
    MicroUp,
    /// Move down a single step
    MicroDown,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
enum ProfileArg {
    Xyscreens,
    Seemax,
}

impl From<ProfileArg> for ProfileKind {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Xyscreens => ProfileKind::XyScreens,
            ProfileArg::Seemax => ProfileKind::SeeMax,
        }
    }
}

/// Merge the config file (if any) with the command-line overrides.
fn build_config(cli: &Cli) -> Result<ScreenConfig> {
    let mut config = match &cli.config {
        Some(path) => ScreenConfig::load(path)?,
        None => ScreenConfig::default(),
    };

    config.port = Some(cli.port.clone());
    if let Some(profile) = cli.profile {
        config.profile = profile.into();
    }
    if let Some(address) = &cli.address {
        config.address = Some(address.clone());
    }
    if let Some(secs) = cli.duration {
        config.down_duration_secs = Some(secs);
        config.up_duration_secs = Some(secs);
    }

    config.validate().context("Invalid screen configuration")?;
    Ok(config)
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_progress(progress: &Progress) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(
        stdout,
        "\r{:<8} {:5.1}%",
        progress.status,
        progress.position * 100.0
    );
    let _ = stdout.flush();
}

/// Wait for the move to end, stopping the screen on Ctrl-C.
async fn wait_or_interrupt(screen: &ScreenDriver) -> Result<Progress> {
    tokio::select! {
        progress = screen.wait_idle() => Ok(progress),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted, stopping screen");
            Ok(screen.stop().await?)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let screen = ScreenDriver::open(&config)
        .await
        .with_context(|| format!("Failed to open screen on {}", cli.port))?;
    tracing::debug!(?screen, "Screen ready");

    match &cli.command {
        Commands::Up | Commands::Down => {
            let down = cli.command == Commands::Down;
            // Nothing is known about the screen, so assume it sits at the far end.
            screen.restore_position(if down { 0.0 } else { 1.0 })?;
            screen.on_progress(print_progress);

            if down {
                screen.move_down(None).await?;
            } else {
                screen.move_up(None).await?;
            }
            let progress = wait_or_interrupt(&screen).await?;
            println!();
            tracing::info!(position = progress.position, status = %progress.status, "Move finished");
        }
        Commands::Stop => {
            screen.stop().await?;
        }
        Commands::Program { new_address } => {
            let address = match new_address {
                Some(text) => text.parse::<Address>()?,
                None => screen.address(),
            };
            screen.program_address(address).await?;
            println!("Programmed address {}", address);
        }
        Commands::MicroUp => screen.micro_up().await?,
        Commands::MicroDown => screen.micro_down().await?,
    }

    screen.close().await?;
    close_port(&cli.port).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    run(cli).await
}
