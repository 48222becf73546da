//! Cartridge bridge runner.
//!
//! Runs the console and cartridge headless for a number of frames, or as
//! a JSON-RPC server over stdio. Logs go to stderr; set `RUST_LOG` to
//! choose the level.

use std::path::PathBuf;
use std::process;

use emu_gbacart::{Machine, RunConfig, capture, demo, mcp::McpServer};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    image_path: Option<PathBuf>,
    headless: bool,
    mcp: bool,
    frames: u64,
    wait_power: bool,
    screenshot_path: Option<PathBuf>,
    audio_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        image_path: None,
        headless: false,
        mcp: false,
        frames: 60,
        wait_power: true,
        screenshot_path: None,
        audio_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--image" => {
                i += 1;
                cli.image_path = args.get(i).map(PathBuf::from);
            }
            "--headless" => {
                cli.headless = true;
            }
            "--mcp" => {
                cli.mcp = true;
            }
            "--frames" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.frames = s.parse().unwrap_or(60);
                }
            }
            "--no-wait-power" => {
                cli.wait_power = false;
            }
            "--screenshot" => {
                i += 1;
                cli.screenshot_path = args.get(i).map(PathBuf::from);
            }
            "--audio" => {
                i += 1;
                cli.audio_path = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => {
                eprintln!("Usage: emu-gbacart [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --image <file>       Program image [default: built-in demo]");
                eprintln!("  --headless           Run a fixed number of frames and exit");
                eprintln!("  --mcp                Run as JSON-RPC server over stdio");
                eprintln!("  --frames <n>         Frames in headless mode [default: 60]");
                eprintln!("  --no-wait-power      Start the bus without waiting for RD high");
                eprintln!("  --screenshot <file>  Save a PNG of the console screen (headless)");
                eprintln!("  --audio <file>       Save the played sound as WAV (headless)");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

// ---------------------------------------------------------------------------
// Headless mode
// ---------------------------------------------------------------------------

fn run_headless(cli: &CliArgs) {
    let mut machine = make_machine(cli);
    machine.run_frames(cli.frames);

    let cart = machine.slot().cart();
    eprintln!(
        "{} frames: {} presented, {} full resets, {} local faults, {} underruns",
        machine.frame(),
        machine.screen().frames(),
        cart.full_resets(),
        cart.local_faults(),
        cart.underruns(),
    );

    if let Some(ref path) = cli.screenshot_path {
        if let Err(e) = capture::save_screenshot(machine.screen(), path) {
            eprintln!("Screenshot error: {e}");
            process::exit(1);
        }
        eprintln!("Screenshot saved to {}", path.display());
    }

    if let Some(ref path) = cli.audio_path {
        let samples = machine.take_samples();
        if let Err(e) = capture::save_audio(&samples, demo::SAMPLE_RATE, path) {
            eprintln!("Audio error: {e}");
            process::exit(1);
        }
        eprintln!("{} samples saved to {}", samples.len(), path.display());
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn run_config(cli: &CliArgs) -> RunConfig {
    let mut config = RunConfig {
        wait_power: cli.wait_power,
        ..RunConfig::default()
    };
    if let Some(ref path) = cli.image_path {
        match std::fs::read(path) {
            Ok(d) => config.program = d,
            Err(e) => {
                eprintln!("Failed to read image {}: {e}", path.display());
                process::exit(1);
            }
        }
    }
    config
}

fn make_machine(cli: &CliArgs) -> Machine {
    match run_config(cli).build() {
        Ok(machine) => machine,
        Err(e) => {
            eprintln!("Failed to start: {e}");
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    if cli.mcp {
        let mut server = McpServer::new(RunConfig {
            wait_power: cli.wait_power,
            ..RunConfig::default()
        });
        if let Some(ref path) = cli.image_path {
            server.set_image_path(path.clone());
        }
        server.run();
        return;
    }

    if !cli.headless {
        eprintln!("No window in this build; running headless.");
    }
    run_headless(&cli);
}
