//! Port listing.

use anyhow::{Context, Result};
use console::style;
use we2flash::DetectedPort;
use we2flash::device::{self, DeviceKind};

use crate::use_fancy_output;

/// List serial ports, marking the Himax port and its companion.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = device::detect_ports();

    if json {
        println!("{}", ports_json(&detected)?);
        return Ok(());
    }

    if !use_fancy_output() {
        for line in device::format_port_list(&detected) {
            eprintln!("{line}");
        }
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let kind = match port.kind {
            DeviceKind::Himax => format!(" [{}]", style(port.kind.name()).yellow()),
            DeviceKind::Esp32Companion => format!(" [{}]", style(port.kind.name()).magenta()),
            DeviceKind::Unknown => String::new(),
        };
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
            "  {} {}{kind}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }

    // Show auto-detection result
    if let Some(main) = device::select_himax_port(&detected) {
        eprintln!(
            "\n{} Auto-detected Himax port: {}",
            style("→").green().bold(),
            style(&main.name).cyan().bold()
        );
        if let Some(companion) = device::companion_for(main, &detected) {
            eprintln!(
                "{} Companion: {}",
                style("→").green().bold(),
                style(&companion.name).cyan()
            );
        }
    }

    Ok(())
}

/// Render ports as a pretty JSON array.
fn ports_json(ports: &[DetectedPort]) -> Result<String> {
    serde_json::to_string_pretty(ports).context("Failed to serialize port list")
}
