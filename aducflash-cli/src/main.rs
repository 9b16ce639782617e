//! aducflash CLI - Command-line serial downloader for ADuC702x microcontrollers.
//!
//! ## Features
//!
//! - Write Intel HEX images to flash, with optional mass erase and verify
//! - Verify flash contents against an image
//! - Start the user code once programming is done
//! - Serial port listing
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use aducflash::{Operation, OperationSet};
use commands::{completions, flash, info};
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors raised by the command-line layer itself.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Invalid invocation that clap could not catch.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Ctrl-C before the device was reached.
    #[error("Operation cancelled")]
    Cancelled,
}

/// aducflash - Serial downloader for the ADuC702x flash bootloader.
///
/// Environment variables:
///   ADUCFLASH_PORT - Default serial port (default: /dev/ttyS0)
///   ADUCFLASH_BAUD - Default baud rate (default: 9600)
#[derive(Parser)]
#[command(name = "aducflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "ADUCFLASH_PORT")]
    port: Option<String>,

    /// Baud rate (the bootloader autobauds; 9600 and 38400 are common).
    #[arg(short, long, global = true, env = "ADUCFLASH_BAUD")]
    baud: Option<u32>,

    /// Leave the bootloader running instead of starting the user code.
    #[arg(long, global = true)]
    no_run: bool,

    /// Give up on a bootloader reply after this many seconds.
    #[arg(long, global = true, value_name = "SECS")]
    response_timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Write an Intel HEX image to flash, then start it.
    Write {
        /// Path to the Intel HEX file.
        file: PathBuf,

        /// Mass erase the flash first.
        #[arg(long)]
        erase: bool,

        /// Verify every record after writing.
        #[arg(long)]
        verify: bool,
    },

    /// Verify flash against an Intel HEX image, then start the user code.
    Verify {
        /// Path to the Intel HEX file.
        file: PathBuf,

        /// Mass erase the flash first.
        #[arg(long)]
        erase: bool,
    },

    /// Mass erase the user flash.
    Erase,

    /// Show a summary of an Intel HEX file.
    Info {
        /// Path to the Intel HEX file.
        file: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Map a failure to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<CliError>() {
        return match e {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled => 130,
        };
    }
    match err.downcast_ref::<aducflash::Error>() {
        Some(aducflash::Error::Interrupted) => 130,
        Some(aducflash::Error::Config(_)) => 3,
        Some(
            aducflash::Error::Serial(_)
            | aducflash::Error::HandshakeTimeout(_)
            | aducflash::Error::HandshakeFailed(_),
        ) => 4,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

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
        "aducflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    aducflash::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
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
        Commands::Write {
            file,
            erase,
            verify,
        } => {
            let ops = flash::write_operations(cli, &config, *erase, *verify);
            flash::cmd_session(cli, &config, Some(file.as_path()), ops)
        },
        Commands::Verify { file, erase } => {
            let ops = flash::verify_operations(cli, &config, *erase);
            flash::cmd_session(cli, &config, Some(file.as_path()), ops)
        },
        Commands::Erase => {
            let ops = flash::with_run(cli, &config, OperationSet::empty().with(Operation::Erase));
            flash::cmd_session(cli, &config, None, ops)
        },
        Commands::Info { file, json } => info::cmd_info(file, *json),
        Commands::ListPorts { json } => info::cmd_list_ports(*json),
        Commands::Completions { shell } => completions::cmd_completions(*shell),
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_write() {
        let cli = Cli::try_parse_from([
            "aducflash",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "38400",
            "write",
            "firmware.hex",
            "--erase",
            "--verify",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(38400));
        match cli.command {
            Commands::Write {
                file,
                erase,
                verify,
            } => {
                assert_eq!(file, PathBuf::from("firmware.hex"));
                assert!(erase);
                assert!(verify);
            },
            _ => panic!("expected write"),
        }
    }

    #[test]
    fn test_cli_parse_write_requires_file() {
        assert!(Cli::try_parse_from(["aducflash", "write"]).is_err());
    }

    #[test]
    fn test_cli_parse_verify() {
        let cli = Cli::try_parse_from(["aducflash", "verify", "a.hex"]).unwrap();
        assert!(matches!(cli.command, Commands::Verify { erase: false, .. }));
    }

    #[test]
    fn test_cli_parse_verify_erase() {
        let cli = Cli::try_parse_from(["aducflash", "verify", "--erase", "a.hex"]).unwrap();
        assert!(matches!(cli.command, Commands::Verify { erase: true, .. }));
    }

    #[test]
    fn test_cli_parse_erase_no_run() {
        let cli = Cli::try_parse_from(["aducflash", "erase", "--no-run"]).unwrap();
        assert!(cli.no_run);
        assert!(matches!(cli.command, Commands::Erase));
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["aducflash", "info", "--json", "a.hex"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true, .. }));
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["aducflash", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["aducflash", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions {
                shell: Some(Shell::Zsh)
            }
        ));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "aducflash",
            "--response-timeout",
            "5",
            "-vv",
            "--quiet",
            "--config",
            "/tmp/aducflash.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.response_timeout, Some(5));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/aducflash.toml")));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["aducflash"]).is_err());
    }

    #[test]
    fn test_cli_invalid_baud() {
        assert!(Cli::try_parse_from(["aducflash", "--baud", "fast", "erase"]).is_err());
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::new(aducflash::Error::Interrupted);
        assert_eq!(exit_code(&err), 130);

        let err = anyhow::Error::new(aducflash::Error::HandshakeTimeout(
            std::time::Duration::from_secs(3),
        ))
        .context("connecting");
        assert_eq!(exit_code(&err), 4);

        let err = anyhow::Error::new(aducflash::Error::Nack(aducflash::Command::Write));
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::Error::new(CliError::Config("bad".to_string()));
        assert_eq!(exit_code(&err), 3);

        assert_eq!(exit_code(&CliError::Cancelled.into()), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
