//! we2flash CLI - Command-line tool for flashing Himax WE2 boards.
//!
//! ## Features
//!
//! - Flash base firmware plus any number of AI models in one session
//! - Hold the ESP32 companion in reset on dual-chip boards
//! - Port listing and auto-detection
//! - Preamble packet inspection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use we2flash::{ModelDescriptor, XmodemVariant};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    if matches!(
        err.downcast_ref::<we2flash::Error>(),
        Some(we2flash::Error::Cancelled)
    ) {
        return 130;
    }
    1
}

/// we2flash - Flash Himax WE2 firmware and AI models over serial.
///
/// Environment variables:
///   WE2FLASH_PORT        - Himax serial port
///   WE2FLASH_COMPANION   - ESP32 companion serial port
///   WE2FLASH_BAUD        - Baud rate (default: 921600)
///   WE2FLASH_PROTOCOL    - Transfer protocol (xmodem, xmodem1k)
#[derive(Parser)]
#[command(name = "we2flash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/we2flash/we2flash")]
pub(crate) struct Cli {
    /// Himax serial port (auto-detected if not specified).
    #[arg(short, long, global = true, env = "WE2FLASH_PORT")]
    pub port: Option<String>,

    /// ESP32 companion serial port to hold in reset.
    #[arg(long, global = true, env = "WE2FLASH_COMPANION")]
    pub companion: Option<String>,

    /// Baud rate for the Himax port [default: 921600].
    #[arg(short, long, global = true, env = "WE2FLASH_BAUD")]
    pub baud: Option<u32>,

    /// Transfer protocol, which also fixes the preamble size [default: xmodem].
    #[arg(long, global = true, env = "WE2FLASH_PROTOCOL")]
    pub protocol: Option<Protocol>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Transfer protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Protocol {
    /// XMODEM, 128-byte blocks.
    Xmodem,
    /// XMODEM-1K, 1024-byte blocks.
    Xmodem1k,
}

impl From<Protocol> for XmodemVariant {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Xmodem => XmodemVariant::Xmodem,
            Protocol::Xmodem1k => XmodemVariant::Xmodem1k,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Flash base firmware and AI models.
    #[command(after_help = "Examples:\n  \
        we2flash flash firmware.img\n  \
        we2flash flash firmware.img -m face=face.tflite@0xB7B000\n  \
        we2flash -p /dev/ttyACM0 flash firmware.img --select face,pose")]
    Flash(FlashArgs),

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Print the preamble packet for a flash address.
    Preamble {
        /// Flash address (hex, e.g. 0xB7B000).
        #[arg(short, long, value_parser = parse_hex_arg)]
        address: u32,

        /// Offset within the address (hex).
        #[arg(short, long, default_value = "0x0", value_parser = parse_hex_arg)]
        offset: u32,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments of the `flash` command.
#[derive(clap::Args)]
pub(crate) struct FlashArgs {
    /// Base firmware image.
    pub firmware: PathBuf,

    /// Model to flash after the firmware (repeatable).
    #[arg(
        short,
        long = "model",
        value_name = "ID=FILE@ADDRESS[+OFFSET]",
        value_parser = parse_model_arg
    )]
    pub models: Vec<ModelDescriptor>,

    /// Model ids to flash, overriding the default selection.
    #[arg(short, long, value_delimiter = ',', value_name = "IDS")]
    pub select: Vec<String>,

    /// Do not hold the ESP32 companion in reset.
    #[arg(long)]
    pub no_reset_hold: bool,

    /// Seconds to wait for the bootloader menu.
    #[arg(long, value_name = "SECS")]
    pub handshake_timeout: Option<u64>,

    /// Seconds to wait for each reboot prompt.
    #[arg(long, value_name = "SECS")]
    pub prompt_timeout: Option<u64>,
}

/// Parse `ID=FILE@ADDRESS[+OFFSET]` into a model descriptor.
///
/// Models given on the command line are selected by default.
fn parse_model_arg(s: &str) -> Result<ModelDescriptor, String> {
    let invalid = || {
        format!("Invalid model '{s}'. Expected 'ID=FILE@ADDRESS[+OFFSET]' (e.g., 'face=face.tflite@0xB7B000')")
    };

    let (id, rest) = s
        .split_once('=')
        .ok_or_else(invalid)?;
    let (path, location) = rest
        .rsplit_once('@')
        .ok_or_else(invalid)?;
    if id.is_empty() || path.is_empty() {
        return Err(invalid());
    }

    let (address, offset) = location
        .split_once('+')
        .unwrap_or((location, "0x0"));
    parse_hex_arg(address)?;
    parse_hex_arg(offset)?;

    Ok(ModelDescriptor::new(id, path, address)
        .with_offset(offset)
        .default_selected(true))
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_arg(s: &str) -> Result<u32, String> {
    we2flash::image::parse_hex_u32(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "we2flash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Ctrl-C handler not installed: {e}");
    }
    we2flash::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&e))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash(args) => commands::flash::cmd_flash(cli, &config, args),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Preamble { address, offset } => {
            let variant = cli
                .protocol
                .map(XmodemVariant::from)
                .or(config.flash.protocol)
                .unwrap_or_default();
            commands::preamble::cmd_preamble(*address, *offset, variant);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_model_arg() {
        let model = parse_model_arg("face=models/face.tflite@0xB7B000").unwrap();
        assert_eq!(model.id, "face");
        assert_eq!(model.path, PathBuf::from("models/face.tflite"));
        assert_eq!(model.flash_address, "0xB7B000");
        assert_eq!(model.offset, "0x0");
        assert!(model.default);
    }

    #[test]
    fn test_parse_model_arg_with_offset() {
        let model = parse_model_arg("pose=pose@v2.tflite@0x400000+0x1000").unwrap();
        assert_eq!(model.path, PathBuf::from("pose@v2.tflite"));
        assert_eq!(model.flash_address, "0x400000");
        assert_eq!(model.offset, "0x1000");
    }

    #[test]
    fn test_parse_model_arg_invalid() {
        assert!(parse_model_arg("face.tflite@0x400000").is_err());
        assert!(parse_model_arg("face=face.tflite").is_err());
        assert!(parse_model_arg("=face.tflite@0x400000").is_err());
        assert!(parse_model_arg("face=face.tflite@0xZZ").is_err());
    }

    #[test]
    fn test_parse_hex_arg() {
        assert_eq!(parse_hex_arg("0xB7B000"), Ok(0xB7_B000));
        assert_eq!(parse_hex_arg("0x00_40_00_00"), Ok(0x40_0000));
        assert!(parse_hex_arg("").is_err());
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("bad".into()).into();
        assert_eq!(exit_code_for(&usage), 2);

        let cancelled: anyhow::Error = CliError::Cancelled("stop".into()).into();
        assert_eq!(exit_code_for(&cancelled), 130);

        let lib_cancelled = anyhow::Error::from(we2flash::Error::Cancelled).context("Flashing failed");
        assert_eq!(exit_code_for(&lib_cancelled), 130);

        let other = anyhow::Error::from(we2flash::Error::DeviceNotFound);
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn test_protocol_maps_to_variant() {
        assert_eq!(XmodemVariant::from(Protocol::Xmodem1k), XmodemVariant::Xmodem1k);
        assert_eq!(XmodemVariant::from(Protocol::Xmodem), XmodemVariant::Xmodem);
    }
}
