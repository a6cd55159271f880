use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use sandbox_bridge_lib::sentinel::install_panic_hook;
use sandbox_bridge_lib::{init_logging, AppConfig, BridgeConfig, BridgeHost, HostDeps, PickMode, PickRequest, PickResult};

const USAGE: &str = "usage: sandbox-bridge [single|multi|dir|save|browse] [start-path]";
const FRAME: Duration = Duration::from_micros(16_667);

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let mode = match args.next() {
        None => PickMode::OpenFile,
        Some(token) => match PickMode::from_token(&token) {
            Some(mode) => mode,
            None => {
                eprintln!("{USAGE}");
                return ExitCode::from(2);
            }
        },
    };
    let start_path = args.next().unwrap_or_default();

    match run(mode, &start_path) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sandbox-bridge: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `$XDG_STATE_HOME/sandbox-bridge`, else `~/.local/state/sandbox-bridge`
fn data_dir() -> PathBuf {
    if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(state).join("sandbox-bridge");
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".local/state/sandbox-bridge"))
        .unwrap_or_else(|| std::env::temp_dir().join("sandbox-bridge-state"))
}

fn run(mode: PickMode, start_path: &str) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let app_config = AppConfig::open(&data_dir.join("config.sqlite"))?;
    let config = BridgeConfig::load(&app_config)?;
    let sink = init_logging(&data_dir.join("logs"), &config)?;

    let (deps, exit) = HostDeps::production(&config);
    let host = BridgeHost::setup(&config, deps)?;
    install_panic_hook(host.shared().clone());
    host.attach_console(&sink);

    let picker = host.picker().ok_or("file picker unavailable")?;
    let (tx, rx) = mpsc::channel();
    picker.pick(PickRequest::new(start_path, mode), move |result| {
        let _ = tx.send(result);
    })?;

    host.scheduler().schedule(
        "pick-wait",
        || tracing::debug!("Waiting for picker helper"),
        Duration::from_secs(5),
    );

    let mut last = Instant::now();
    let outcome = loop {
        std::thread::sleep(FRAME);
        let now = Instant::now();
        host.tick(now - last);
        last = now;

        if let Ok(result) = rx.try_recv() {
            break Some(result);
        }
        if exit.is_requested() {
            break None;
        }
    };

    host.shutdown();

    Ok(match outcome {
        Some(PickResult::Single(path)) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Some(PickResult::Multiple(paths)) => {
            for path in paths {
                println!("{}", path.display());
            }
            ExitCode::SUCCESS
        }
        Some(PickResult::Cancelled) => ExitCode::from(1),
        None => {
            tracing::warn!("Exiting before the pick completed");
            ExitCode::from(3)
        }
    })
}
