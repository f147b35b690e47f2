//! Subcommand handlers.

use std::error::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::args::{ConfigAction, SessionArgs};
use super::repl::{ReplCommand, HELP};
use crate::capture::FfmpegCaptureInitializer;
use crate::config::{default_path, Config};
use crate::devices::HostDeviceEnumerator;
use crate::permissions::HostPermissions;
use crate::platform::{Collaborators, DeviceEnumerator};
use crate::player::FfplayPlayerFactory;
use crate::session::WebcamSession;

pub type CommandResult = Result<(), Box<dyn Error>>;

/// Global flag for handling Ctrl+C while previewing
static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, shutting down...");
    })
}

/// Wire the host backends described by `config` into a session.
pub fn build_session(
    config: &Config,
    args: &SessionArgs,
) -> Result<WebcamSession, Box<dyn Error>> {
    let preview_resolution = config.preview.resolution()?;

    let collaborators = Collaborators {
        devices: Box::new(HostDeviceEnumerator::new(&config.tools.ffmpeg)),
        permissions: Box::new(
            HostPermissions::new(&config.tools.ffmpeg)
                .with_open_settings(config.permissions.open_settings),
        ),
        capture: Box::new(
            FfmpegCaptureInitializer::new(&config.tools.ffmpeg)
                .with_framerate(config.camera.framerate)
                .with_preview_resolution(preview_resolution),
        ),
        players: Box::new(
            FfplayPlayerFactory::new(&config.tools.ffplay)
                .with_window_title(&config.preview.window_title),
        ),
    };

    let real_time = config.preview.real_time && !args.no_real_time;
    Ok(WebcamSession::new(collaborators).with_real_time(real_time))
}

#[derive(Serialize)]
struct DeviceEntry<'a> {
    index: usize,
    id: &'a str,
    name: &'a str,
}

/// List available cameras and print them to stdout.
pub async fn list_devices(config: &Config, json: bool) -> CommandResult {
    let devices = HostDeviceEnumerator::new(&config.tools.ffmpeg)
        .find_video_capture_devices()
        .await?;

    if json {
        let entries: Vec<DeviceEntry> = devices
            .iter()
            .enumerate()
            .map(|(index, d)| DeviceEntry {
                index,
                id: &d.id,
                name: &d.name,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No cameras found.");
        println!();
        println!("Make sure your camera is connected and camera access is granted.");
    } else {
        println!("Available cameras:");
        for (index, device) in devices.iter().enumerate() {
            println!("  [{}] {}", index, device);
        }
        println!();
        println!("Use --device <index> to select a camera.");
    }
    Ok(())
}

/// Enumerate, capture and preview one device until Ctrl+C or until the
/// preview stops on its own.
pub async fn run_preview(config: &Config, args: &SessionArgs) -> CommandResult {
    setup_ctrlc_handler()?;

    let mut session = build_session(config, args)?;
    session.enumerate_devices().await?;
    session.select_device(Some(args.device.unwrap_or(config.camera.device)));
    session.start_capture().await?;
    session.start_preview()?;

    let mut status = session.subscribe_status();
    println!("{}", status.borrow_and_update().as_str());
    println!("Press Ctrl+C to stop.");

    while !CTRLC_RECEIVED.load(Ordering::SeqCst) {
        if status.has_changed().unwrap_or(false) {
            eprintln!("{}", status.borrow_and_update().as_str());
        }
        if !session.is_playing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    session.stop_preview()?;
    Ok(())
}

fn print_devices(session: &WebcamSession) {
    if session.devices().is_empty() {
        println!("  (no devices)");
        return;
    }
    for (index, device) in session.devices().iter().enumerate() {
        let marker = if session.selected_index() == Some(index) {
            "*"
        } else {
            " "
        };
        println!("{} [{}] {}", marker, index, device);
    }
}

fn print_session(session: &WebcamSession) {
    let actions = session.actions();
    println!("State:   {:?}", session.state());
    match session.selected_device() {
        Some(device) => println!("Device:  {}", device),
        None => println!("Device:  (none)"),
    }
    if let Some(source) = session.frame_source() {
        println!("Source:  {} ({:?}, {:?})", source.id, source.stream_type, source.kind);
    }
    println!(
        "Actions: capture={} preview={} stop={} reset={}",
        actions.start_capture, actions.start_preview, actions.stop_preview, actions.reset
    );
    println!("Status:  {}", session.status());
}

/// Drive a session one typed action at a time.
///
/// Session errors are already published as status lines, so they are shown
/// and the loop continues.
pub async fn run_interactive(config: &Config, args: &SessionArgs) -> CommandResult {
    let mut session = build_session(config, args)?;
    let mut status = session.subscribe_status();

    let _ = session.enumerate_devices().await;
    if let Some(device) = args.device {
        session.select_device(Some(device));
    }

    println!("{}", HELP);
    println!();
    print_devices(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if status.has_changed().unwrap_or(false) {
            println!("> {}", status.borrow_and_update().as_str());
        }

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match ReplCommand::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(message) => {
                        println!("{}", message);
                        continue;
                    }
                };

                if !command.is_enabled(&session.actions()) {
                    println!("'{}' is not available right now.", line.trim());
                    continue;
                }

                // Errors are already on the status channel
                match command {
                    ReplCommand::List => print_devices(&session),
                    ReplCommand::Select(index) => session.select_device(Some(index)),
                    ReplCommand::Capture => {
                        let _ = session.start_capture().await;
                    }
                    ReplCommand::Preview => {
                        let _ = session.start_preview();
                    }
                    ReplCommand::Stop => {
                        let _ = session.stop_preview();
                    }
                    ReplCommand::Reset => {
                        if session.reset().await.is_ok() {
                            print_devices(&session);
                        }
                    }
                    ReplCommand::Status => print_session(&session),
                    ReplCommand::Help => println!("{}", HELP),
                    ReplCommand::Quit => break,
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("> {}", status.borrow_and_update().as_str());
            }
        }
    }

    Ok(())
}

/// Handle config subcommand actions.
pub fn handle_config_action(
    action: ConfigAction,
    config: &Config,
    path: Option<&Path>,
) -> CommandResult {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_path);

    match action {
        ConfigAction::Show => {
            println!("Current configuration:");
            println!("  Camera device: {}", config.camera.device);
            println!("  Framerate: {}", config.camera.framerate);
            let resolution = config
                .preview
                .resolution
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("(native)");
            println!("  Preview resolution: {}", resolution);
            println!("  Window title: {}", config.preview.window_title);
            println!(
                "  Real-time playback: {}",
                if config.preview.real_time { "yes" } else { "no" }
            );
            println!(
                "  Open settings on denial: {}",
                if config.permissions.open_settings { "yes" } else { "no" }
            );
            println!("  ffmpeg: {}", config.tools.ffmpeg);
            println!("  ffplay: {}", config.tools.ffplay);
            println!();

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            Config::write_default(&config_path)?;
            println!("Created config file: {}", config_path.display());
        }
    }
    Ok(())
}
