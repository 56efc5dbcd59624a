//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use we2flash::device;
use we2flash::{
    FlashConfig, FlashOutcome, FlashRequest, FlashSession, ModelDescriptor, XmodemVariant,
    select_models,
};

use crate::config::Config;
use crate::{Cli, CliError, FlashArgs, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted by user".to_string()).into())
    } else {
        Ok(())
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, args: &FlashArgs) -> Result<()> {
    let models = resolve_models(config, args)?;
    let reset_hold = !args.no_reset_hold && config.flash.reset_hold.unwrap_or(true);

    let port = resolve_port(cli, config)?;
    let companion = if reset_hold {
        resolve_companion(cli, config, &port)
    } else {
        None
    };
    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!(
            "{} Flashing {} via {}",
            style("📦").cyan(),
            args.firmware.display(),
            style(&port).cyan()
        );
        for model in &models {
            eprintln!(
                "    {} {} @ {}",
                style("•").dim(),
                model.label(),
                model.flash_address
            );
        }
        match &companion {
            Some(name) => eprintln!(
                "{} Holding companion {} in reset",
                style("🔌").cyan(),
                style(name).cyan()
            ),
            None if reset_hold => eprintln!(
                "{} No companion port found, continuing without reset hold",
                style("⚠").yellow()
            ),
            None => {},
        }
        eprintln!(
            "{} Press RESET on the board if the bootloader menu does not appear",
            style("⏳").yellow()
        );
    }

    let mut request = FlashRequest::new(port, args.firmware.clone())
        .with_reset_hold(reset_hold)
        .with_models(models);
    if let Some(name) = companion {
        request = request.with_companion(name);
    }

    let session = FlashSession::new(session_config(cli, config, args));
    let pb = progress_bar(cli.quiet);
    let plain = !cli.quiet && !use_fancy_output();
    let mut last_message = String::new();

    let outcome = session.run(&request, &mut |_step, percent, message| {
        pb.set_position(u64::from(percent));
        if message != last_message {
            if plain {
                eprintln!("[{percent:3}%] {message}");
            }
            pb.set_message(message.to_string());
            last_message = message.to_string();
        }
    });

    if outcome.is_success() {
        pb.finish_with_message("Complete");
        if !cli.quiet {
            eprintln!("\n{} Flashing completed", style("🎉").green().bold());
        }
    } else {
        pb.abandon();
        if let FlashOutcome::Failed(err) = &outcome {
            if err.is_timeout() && !cli.quiet {
                eprintln!(
                    "{} Check the cable and press RESET on the board before retrying",
                    style("💡").yellow()
                );
            }
        }
    }

    outcome
        .into_result()
        .context("Flashing failed")?;
    ensure_not_interrupted()
}

/// Progress bar on stderr, hidden when quiet or not a TTY.
fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Himax port: flag or environment, then config file, then auto-detection.
fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = cli
        .port
        .clone()
        .or_else(|| config.connection.serial.clone())
    {
        return Ok(port);
    }

    let detected = device::auto_detect_port().context("Could not find the Himax port")?;
    Ok(detected.name)
}

/// Companion port: flag or environment, then config file, then pairing.
fn resolve_companion(cli: &Cli, config: &Config, port: &str) -> Option<String> {
    cli.companion
        .clone()
        .or_else(|| config.connection.companion.clone())
        .or_else(|| device::auto_detect_companion(port).map(|p| p.name))
}

/// Catalog from the config file plus `--model` entries, filtered by
/// `--select`.
fn resolve_models(config: &Config, args: &FlashArgs) -> Result<Vec<ModelDescriptor>> {
    let mut catalog = config
        .models
        .clone();
    for model in &args.models {
        match catalog
            .iter_mut()
            .find(|m| m.id == model.id)
        {
            Some(existing) => *existing = model.clone(),
            None => catalog.push(model.clone()),
        }
    }

    let unknown: Vec<&str> = args
        .select
        .iter()
        .filter(|id| !catalog.iter().any(|m| &m.id == *id))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(CliError::Usage(format!("Unknown model id: {}", unknown.join(", "))).into());
    }

    Ok(select_models(&catalog, &args.select)
        .into_iter()
        .cloned()
        .collect())
}

/// Session budgets: flags, then config file, then library defaults.
fn session_config(cli: &Cli, config: &Config, args: &FlashArgs) -> FlashConfig {
    let mut flash_config = FlashConfig::new();

    if let Some(baud) = cli.baud.or(config.connection.baud) {
        flash_config = flash_config.with_baud(baud);
    }
    if let Some(variant) = cli
        .protocol
        .map(XmodemVariant::from)
        .or(config.flash.protocol)
    {
        flash_config = flash_config.with_variant(variant);
    }
    if let Some(secs) = args
        .handshake_timeout
        .or(config.flash.handshake_timeout)
    {
        flash_config = flash_config.with_handshake_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args
        .prompt_timeout
        .or(config.flash.reboot_prompt_timeout)
    {
        flash_config = flash_config.with_reboot_prompt_timeout(Duration::from_secs(secs));
    }
    if let Some(retries) = config.flash.retries {
        flash_config = flash_config.with_retries(retries);
    }

    flash_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Commands;
    use clap::Parser;
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("we2flash").chain(args.iter().copied())).unwrap()
    }

    fn flash_args(cli: &Cli) -> &FlashArgs {
        match &cli.command {
            Commands::Flash(args) => args,
            _ => panic!("not a flash command"),
        }
    }

    fn catalog_config() -> Config {
        let mut config = Config::default();
        config.models = vec![
            ModelDescriptor::new("face", "face.tflite", "0xB7B000").required(true),
            ModelDescriptor::new("pose", "pose.tflite", "0xC00000").default_selected(true),
            ModelDescriptor::new("yolo", "yolo.tflite", "0xD00000"),
        ];
        config
    }

    fn ids(models: &[ModelDescriptor]) -> Vec<&str> {
        models.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_resolve_models_default_selection() {
        let cli = parse(&["flash", "fw.img"]);
        let models = resolve_models(&catalog_config(), flash_args(&cli)).unwrap();
        assert_eq!(ids(&models), ["face", "pose"]);
    }

    #[test]
    fn test_resolve_models_explicit_selection() {
        let cli = parse(&["flash", "fw.img", "--select", "yolo,face"]);
        let models = resolve_models(&catalog_config(), flash_args(&cli)).unwrap();
        // Catalog order, not selection order
        assert_eq!(ids(&models), ["face", "yolo"]);
    }

    #[test]
    fn test_resolve_models_command_line_entries() {
        let cli = parse(&[
            "flash",
            "fw.img",
            "-m",
            "pose=custom/pose.tflite@0xC00000",
            "-m",
            "hand=hand.tflite@0xE00000+0x100",
        ]);
        let models = resolve_models(&catalog_config(), flash_args(&cli)).unwrap();

        assert_eq!(ids(&models), ["face", "pose", "hand"]);
        assert_eq!(models[1].path, PathBuf::from("custom/pose.tflite"));
        assert_eq!(models[2].offset, "0x100");
    }

    #[test]
    fn test_resolve_models_unknown_id_is_usage_error() {
        let cli = parse(&["flash", "fw.img", "--select", "face,nope"]);
        let err = resolve_models(&catalog_config(), flash_args(&cli)).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_resolve_models_firmware_only() {
        let cli = parse(&["flash", "fw.img"]);
        let models = resolve_models(&Config::default(), flash_args(&cli)).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn test_session_config_defaults() {
        let cli = parse(&["flash", "fw.img"]);
        let flash_config = session_config(&cli, &Config::default(), flash_args(&cli));
        let defaults = FlashConfig::default();

        assert_eq!(flash_config.baud_rate, defaults.baud_rate);
        assert_eq!(flash_config.variant, XmodemVariant::Xmodem);
        assert_eq!(flash_config.handshake_timeout, defaults.handshake_timeout);
    }

    #[test]
    fn test_session_config_flags_override_file() {
        let mut config = Config::default();
        config.connection.baud = Some(460800);
        config.flash.protocol = Some(XmodemVariant::Xmodem);
        config.flash.handshake_timeout = Some(60);
        config.flash.reboot_prompt_timeout = Some(20);
        config.flash.retries = Some(4);

        let cli = parse(&[
            "--baud",
            "115200",
            "--protocol",
            "xmodem1k",
            "flash",
            "fw.img",
            "--handshake-timeout",
            "10",
        ]);
        let flash_config = session_config(&cli, &config, flash_args(&cli));

        assert_eq!(flash_config.baud_rate, 115200);
        assert_eq!(flash_config.variant, XmodemVariant::Xmodem1k);
        assert_eq!(flash_config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(flash_config.reboot_prompt_timeout, Duration::from_secs(20));
        assert_eq!(flash_config.xmodem_retries, 4);
    }

    #[test]
    fn test_resolve_port_prefers_flag() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyACM1".to_string());

        let cli = parse(&["-p", "/dev/ttyACM0", "flash", "fw.img"]);
        assert_eq!(resolve_port(&cli, &config).unwrap(), "/dev/ttyACM0");

        let cli = parse(&["flash", "fw.img"]);
        assert_eq!(resolve_port(&cli, &config).unwrap(), "/dev/ttyACM1");
    }

    #[test]
    fn test_resolve_companion_from_config() {
        let mut config = Config::default();
        config.connection.companion = Some("/dev/ttyUSB0".to_string());

        let cli = parse(&["flash", "fw.img"]);
        assert_eq!(
            resolve_companion(&cli, &config, "/dev/ttyACM0").as_deref(),
            Some("/dev/ttyUSB0")
        );
    }
}
