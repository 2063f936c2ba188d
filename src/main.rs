use anyhow::{bail, Context, Result};
use clap::Parser;
use filmscan::{
    CameraController, CaptureLoop, Command, EventBus, EventFilter, EventReceiver, FilmGeometry,
    FormatId, KeyboardInputHandler, ScannerConfig, SimulatedRig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

const SIMULATED_SERIAL: &str = "SIMULATED";

#[derive(Parser, Debug)]
#[command(name = "filmscan")]
#[command(about = "Frame-by-frame film digitizer with perforation alignment")]
#[command(version)]
#[command(long_about = "Drives a camera and a printer-based film transport to photograph \
motion picture film one frame at a time. Frames are aligned on the film perforations seen \
in the camera live view, saved as numbered JPEGs, and their RAW sidecars are downloaded \
from the camera on request.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "filmscan.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Use the simulated camera and printer
    #[arg(long, help = "Run against a simulated camera and film transport")]
    simulate: bool,

    /// Film format digitized by the start key
    #[arg(short, long, default_value = "16mm", help = "Film format: 16mm or 35mm")]
    format: String,

    /// Start digitizing immediately
    #[arg(long, help = "Start digitizing as soon as the devices are ready")]
    autostart: bool,

    /// Disable the keyboard command surface
    #[arg(long, help = "Do not read operator keys from the terminal")]
    no_keyboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let mut config = ScannerConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate().context("Invalid configuration")?;

    let _log_guard = init_logging(&args, &config)?;
    info!("Starting filmscan v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let format: FormatId = args.format.parse()?;

    if !args.simulate {
        bail!(
            "No camera bridge is linked into this build; run with --simulate to use the \
             simulated camera and film transport"
        );
    }

    if config.camera.serial.trim().is_empty() {
        config.camera.serial = SIMULATED_SERIAL.to_string();
    }
    let rig = SimulatedRig::new(&config.camera.serial, FilmGeometry::for_format(format))?;

    let mut camera = CameraController::new(Box::new(rig.camera()), &config.camera);
    let handle = camera.discover().await?;
    info!("Using {} (serial {})", handle.model(), handle.serial());

    let event_bus = Arc::new(if args.debug {
        EventBus::with_debug_logging(config.system.event_bus_capacity)
    } else {
        EventBus::new(config.system.event_bus_capacity)
    });

    let mut console = EventReceiver::new(
        event_bus.subscribe(),
        EventFilter::Excluding(vec!["preview_ready", "state_changed"]),
        "console",
    );
    tokio::spawn(async move {
        while let Some(event) = console.recv().await {
            info!("{}", event.description());
        }
    });

    let capture = CaptureLoop::new(config, camera, Box::new(rig.printer()), Arc::clone(&event_bus));
    let cancel = CancellationToken::new();
    let (digitizer, task) = capture.spawn(cancel.clone());

    let keyboard = if args.no_keyboard {
        None
    } else {
        let keyboard = KeyboardInputHandler::new(digitizer.clone(), format);
        keyboard.start().await?;
        Some(keyboard)
    };

    if args.autostart {
        digitizer.start(format).await?;
    }

    let ctrl_c_digitizer = digitizer.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; exiting without downloading pending RAW files");
            if let Err(e) = ctrl_c_digitizer
                .send(Command::Shutdown {
                    download_pending: false,
                })
                .await
            {
                error!("Could not request shutdown: {}", e);
            }
        }
    });

    let outcome = task.await.context("Capture loop task panicked")?;

    if let Some(keyboard) = keyboard {
        keyboard.stop().await?;
    }
    cancel.cancel();

    outcome?;
    info!("filmscan stopped");
    Ok(())
}

fn init_logging(args: &Args, config: &ScannerConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("filmscan={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    // One log per reference code, next to the frames it describes
    let directory = config.capture.destination();
    let reference = match config.capture.reference_code.trim() {
        "" => "session",
        code => code,
    };
    let (file_layer, guard) = match std::fs::create_dir_all(&directory) {
        Ok(()) => {
            let appender =
                tracing_appender::rolling::never(&directory, format!("scanner_{}.log", reference));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!(
                "Warning: cannot create {} for the log file: {}",
                directory.display(),
                e
            );
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# filmscan configuration file");
    println!("# Every option with its default value; environment overrides use");
    println!("# FILMSCAN_<SECTION>__<KEY>, e.g. FILMSCAN_CAMERA__SERIAL");
    println!();
    println!("{}", toml::to_string_pretty(&ScannerConfig::default())?);
    Ok(())
}
