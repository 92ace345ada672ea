//! CLI application for controlling Milight bridges.
//!
//! Run with: cargo run --example milight_cli -- --help

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::time::Duration;
use milight_rs::{
    Bridge, BridgeConfig, BulbFamily, Light, ProtocolVersion, SessionState, discover_bridges,
};

#[derive(Parser)]
#[command(name = "milight-cli")]
#[command(about = "Control Milight / LimitlessLED bulbs from the command line", long_about = None)]
struct Cli {
    /// IP address of the bridge (not required for discover command)
    #[arg(short, long, global = true)]
    ip: Option<IpAddr>,

    /// Bridge id (MAC, 12 hex characters); without it the legacy protocol is used
    #[arg(long, global = true)]
    id: Option<String>,

    /// Protocol generation of the bridge: 2, 3 or 6
    #[arg(short, long, global = true, default_value = "6")]
    protocol: u8,

    /// Bulb family, e.g. v3-white, v3-rgbw, v6-rgb-cw-ww, v6-rgbw, v6-bridge-lamp
    #[arg(short, long, global = true, default_value = "v6-rgb-cw-ww")]
    family: BulbFamily,

    /// Zone 1-4, 0 addresses all zones
    #[arg(short, long, global = true, default_value = "0")]
    zone: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover all bridges on the network
    Discover {
        /// Discovery timeout in seconds (default: 3)
        #[arg(short, long, default_value = "3")]
        timeout: u64,
    },

    /// List the bulb families and zones of the bridge
    Bulbs,

    /// Turn the zone on
    On,

    /// Turn the zone off
    Off,

    /// Set brightness (0-100, 0 turns the zone off)
    Brightness {
        #[arg(value_parser = clap::value_parser!(i32).range(0..=100))]
        level: i32,
    },

    /// Set colour from a hue in degrees and a saturation in percent
    Color {
        #[arg(value_parser = clap::value_parser!(u16).range(0..360))]
        hue: u16,
        #[arg(default_value = "100")]
        saturation: i32,
    },

    /// Set colour temperature (0 cold - 100 warm)
    Temperature {
        #[arg(value_parser = clap::value_parser!(i32).range(0..=100))]
        value: i32,
    },

    /// Switch to the white LEDs
    White,

    /// Switch to night mode
    Night,

    /// Select an animation mode (1-9)
    Mode {
        #[arg(value_parser = clap::value_parser!(i32).range(1..=9))]
        mode: i32,
    },

    /// Pair the powered bulbs of the zone
    Link,

    /// Unpair the powered bulbs of the zone
    Unlink,

    /// Get detailed diagnostics
    Diagnostics,
}

async fn wait_for_session(bridge: &Bridge) {
    for _ in 0..30 {
        if bridge
            .session_state()
            .is_none_or(|state| state == SessionState::Valid)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    eprintln!("No session with the bridge, commands will be dropped");
}

async fn wait_for_queue(bridge: &Bridge) {
    while !bridge.queue().is_empty() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // the last frame leaves the queue just before it is sent
    tokio::time::sleep(bridge.queue().delay()).await;
}

fn run(light: &mut Light, command: Commands) -> Result<(), milight_rs::Error> {
    match command {
        Commands::On => light.set_power(true),
        Commands::Off => light.set_power(false),
        Commands::Brightness { level } => light.set_brightness(level),
        Commands::Color { hue, saturation } => light.set_hsb(hue as f32, Some(saturation), None),
        Commands::Temperature { value } => light.set_color_temperature(value),
        Commands::White => light.white_mode(),
        Commands::Night => light.night_mode(),
        Commands::Mode { mode } => light.set_led_mode(mode),
        Commands::Link => light.link(),
        Commands::Unlink => light.unlink(),
        Commands::Discover { .. } | Commands::Bulbs | Commands::Diagnostics => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Discover { timeout } = cli.command {
        println!("Discovering bridges on the network (timeout: {}s)...", timeout);

        match discover_bridges(Duration::from_secs(timeout)).await {
            Ok(bridges) => {
                if bridges.is_empty() {
                    println!("No bridges found on the network.");
                } else {
                    println!("\nFound {} bridge(s):", bridges.len());
                    for bridge in bridges {
                        println!(
                            "  IP: {:15}  ID: {}  Version: {}",
                            bridge.address.to_string(),
                            bridge.id,
                            bridge.version
                        );
                    }
                }
            }
            Err(e) => eprintln!("Error during discovery: {}", e),
        }
        return Ok(());
    }

    // All other commands require an IP address
    let ip = cli.ip.ok_or("IP address is required for this command. Use --ip <IP>")?;
    let protocol = ProtocolVersion::try_from(cli.protocol)?;
    let bridge = Bridge::connect(BridgeConfig::new(ip, cli.id.as_deref(), protocol)).await?;

    match cli.command {
        Commands::Bulbs => {
            println!("Bulbs of the {} bridge at {}:", bridge.version(), ip);
            for (family, zone) in bridge.available_bulbs() {
                println!("  {:16} zone {}", family.to_string(), zone);
            }
        }

        Commands::Diagnostics => {
            bridge.refresh();
            wait_for_session(&bridge).await;
            println!("\nDiagnostics:\n{}", serde_json::to_string_pretty(&bridge.diagnostics())?);
        }

        command => {
            wait_for_session(&bridge).await;
            let mut light = bridge.light(cli.family, cli.zone, None)?;
            match run(&mut light, command) {
                Ok(()) => {
                    wait_for_queue(&bridge).await;
                    println!("Sent to {} zone {}", light.family(), light.zone());
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    bridge.dispose().await;
    Ok(())
}
