//! Write, verify, and erase command implementations.

use std::path::Path;
use std::time::Duration;

use aducflash::{
    DEFAULT_BAUD, DEFAULT_PORT, FlashEvent, Flasher, HexFile, Operation, OperationSet,
    SerialConfig,
};
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

use crate::commands::info::summarize;
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled.into())
    } else {
        Ok(())
    }
}

/// Operations requested by a `write` invocation.
pub(crate) fn write_operations(cli: &Cli, config: &Config, erase: bool, verify: bool) -> OperationSet {
    let mut ops = OperationSet::empty().with(Operation::Write);
    if erase || config.flash.erase {
        ops.insert(Operation::Erase);
    }
    if verify || config.flash.verify {
        ops.insert(Operation::Verify);
    }
    with_run(cli, config, ops)
}

/// Operations requested by a `verify` invocation.
///
/// Only an explicit `--erase` adds Erase; `flash.erase` in the config is
/// about writing.
pub(crate) fn verify_operations(cli: &Cli, config: &Config, erase: bool) -> OperationSet {
    let mut ops = OperationSet::empty().with(Operation::Verify);
    if erase {
        ops.insert(Operation::Erase);
    }
    with_run(cli, config, ops)
}

/// Add Run unless it was switched off.
pub(crate) fn with_run(cli: &Cli, config: &Config, ops: OperationSet) -> OperationSet {
    if cli.no_run || config.flash.no_run {
        ops.without(Operation::Run)
    } else {
        ops.with(Operation::Run)
    }
}

/// Serial settings from the command line, the config files and the defaults.
pub(crate) fn serial_config(cli: &Cli, config: &Config) -> Result<SerialConfig> {
    let port = cli
        .port
        .clone()
        .or_else(|| {
            config
                .connection
                .serial
                .clone()
        })
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    if baud == 0 {
        return Err(CliError::Config("baud rate must be greater than zero".to_string()).into());
    }
    let timeout = cli
        .response_timeout
        .or(config.connection.response_timeout)
        .map(Duration::from_secs);

    Ok(SerialConfig::new(port, baud).with_response_timeout(timeout))
}

fn status(cli: &Cli, icon: &str, message: &str) {
    if !cli.quiet {
        eprintln!("{} {}", style(icon).cyan(), message);
    }
}

fn pass_bar(cli: &Cli, total: usize, op: Operation) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    pb.set_style(style);
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(format!("{op}"));
    pb
}

/// Run a session: connect, then erase/write/verify/run as requested.
pub(crate) fn cmd_session(
    cli: &Cli,
    config: &Config,
    file: Option<&Path>,
    ops: OperationSet,
) -> Result<()> {
    debug!("Requested operations: {ops}");

    // The image is checked in full before the device is touched
    let (mut hex, total) = match file {
        Some(path) if ops.needs_image() => {
            status(cli, "📦", &format!("Loading {}", path.display()));
            let summary = summarize(path)?;
            let hex = HexFile::open(path)
                .with_context(|| format!("Failed to open hex file {}", path.display()))?;
            (Some(hex), summary.data_records)
        },
        _ => (None, 0),
    };

    let serial = serial_config(cli, config)?;
    status(
        cli,
        "🔌",
        &format!("Using {} at {} baud", serial.port_name, serial.baud_rate),
    );

    let mut flasher = Flasher::open(&serial)
        .with_context(|| format!("Failed to open serial port {}", serial.port_name))?;
    ensure_not_interrupted()?;

    status(cli, "⏳", "Waiting for bootloader...");
    let id = flasher.connect()?;
    ensure_not_interrupted()?;
    if !cli.quiet {
        eprintln!("{} Connected: {}", style("✓").green(), style(id).bold());
    }

    let mut bar: Option<ProgressBar> = None;
    let result = flasher.execute(ops, hex.as_mut(), |event| match event {
        FlashEvent::EraseDone => status(cli, "🗑", "Flash erased"),
        FlashEvent::PassStarted(op) => bar = Some(pass_bar(cli, total, op)),
        FlashEvent::RecordSent { .. } => {
            if let Some(pb) = &bar {
                pb.inc(1);
            }
        },
        FlashEvent::RecordSkipped { .. } => {},
        FlashEvent::PassDone { operation, records } => {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
            if !cli.quiet {
                eprintln!(
                    "{} {} complete ({records} records)",
                    style("✓").green(),
                    capitalize(&operation.to_string())
                );
            }
        },
        FlashEvent::RunDone => status(cli, "🚀", "User code started"),
    });

    if let Some(pb) = bar.take() {
        pb.abandon();
    }
    result?;
    flasher.close()?;

    if !cli.quiet {
        eprintln!("\n{} Done", style("🎉").green().bold());
    }
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().collect::<String>() + chars.as_str())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_write_operations_default_includes_run() {
        let cli = cli(&["aducflash", "write", "fw.hex"]);
        let ops = write_operations(&cli, &Config::default(), false, false);
        assert!(ops.contains(Operation::Write));
        assert!(ops.contains(Operation::Run));
        assert!(!ops.contains(Operation::Erase));
        assert!(!ops.contains(Operation::Verify));
    }

    #[test]
    fn test_write_operations_flags() {
        let cli = cli(&["aducflash", "--no-run", "write", "fw.hex"]);
        let ops = write_operations(&cli, &Config::default(), true, true);
        assert_eq!(ops.to_string(), "erase+write+verify");
    }

    #[test]
    fn test_write_operations_from_config() {
        let cli = cli(&["aducflash", "write", "fw.hex"]);
        let mut config = Config::default();
        config.flash.verify = true;
        config.flash.no_run = true;
        let ops = write_operations(&cli, &config, false, false);
        assert_eq!(ops.to_string(), "write+verify");
    }

    #[test]
    fn test_verify_operations() {
        let cli = cli(&["aducflash", "verify", "fw.hex"]);
        let mut config = Config::default();
        config.flash.erase = true;
        assert_eq!(verify_operations(&cli, &config, false).to_string(), "verify+run");
        assert_eq!(
            verify_operations(&cli, &config, true).to_string(),
            "erase+verify+run"
        );
    }

    #[test]
    fn test_serial_config_defaults() {
        let cli = cli(&["aducflash", "erase"]);
        let serial = serial_config(&cli, &Config::default()).unwrap();
        assert_eq!(serial.port_name, DEFAULT_PORT);
        assert_eq!(serial.baud_rate, DEFAULT_BAUD);
        assert!(serial.response_timeout.is_none());
    }

    #[test]
    fn test_serial_config_precedence() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyS3".to_string());
        config.connection.baud = Some(9600);
        config.connection.response_timeout = Some(2);

        let cli = cli(&["aducflash", "-b", "38400", "erase"]);
        let serial = serial_config(&cli, &config).unwrap();
        assert_eq!(serial.port_name, "/dev/ttyS3");
        assert_eq!(serial.baud_rate, 38400);
        assert_eq!(serial.response_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_serial_config_rejects_zero_baud() {
        let cli = cli(&["aducflash", "-b", "0", "erase"]);
        let err = serial_config(&cli, &Config::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Config(_))));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("verify"), "Verify");
        assert_eq!(capitalize(""), "");
    }
}
