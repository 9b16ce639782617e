//! Hex file info and port listing command implementations.

use {
    aducflash::{HexFile, HexSummary, MAX_DATA_LEN, list_ports},
    anyhow::{Context, Result},
    console::style,
    std::path::Path,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = list_ports().context("Failed to enumerate serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports")
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }

    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(file: &Path, json: bool) -> Result<()> {
    let summary = summarize(file)?;

    if json {
        let info = serde_json::json!({
            "file": file.display().to_string(),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    eprintln!(
        "{} {}",
        style("📦").cyan(),
        style(file.display()).bold()
    );
    eprintln!("  Data records:    {}", summary.data_records);
    eprintln!("  Skipped records: {}", summary.skipped_records);
    eprintln!("  Data bytes:      {}", summary.data_bytes);
    match (summary.lowest_address, summary.highest_address) {
        (Some(low), Some(high)) => {
            eprintln!("  Address range:   0x{low:04X} - 0x{high:04X}");
        },
        _ => eprintln!("  Address range:   {}", style("empty").dim()),
    }

    Ok(())
}

/// Read the whole image once, rejecting it if any line is malformed or any
/// record would not fit in a packet.
pub(crate) fn summarize(file: &Path) -> Result<HexSummary> {
    let mut hex = HexFile::open(file)
        .with_context(|| format!("Failed to open hex file {}", file.display()))?;
    let summary = hex
        .summarize()
        .with_context(|| format!("Invalid hex file {}", file.display()))?;

    if summary.largest_record > MAX_DATA_LEN {
        return Err(aducflash::Error::RecordTooLong {
            len: summary.largest_record,
            max: MAX_DATA_LEN,
        })
        .with_context(|| format!("Invalid hex file {}", file.display()));
    }
    if summary.data_records == 0 {
        log::warn!("{} contains no data records", file.display());
    }
    log::debug!(
        "{}: {} data records, {} bytes",
        file.display(),
        summary.data_records,
        summary.data_bytes
    );

    Ok(summary)
}
