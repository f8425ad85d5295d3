//! hidpp-onboard CLI: inspect HID++ mice and their onboard memory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hidpp_onboard_core::config::SessionConfig;
use hidpp_onboard_core::device::Session;
use hidpp_onboard_core::error::Error;
use hidpp_onboard_core::onboard::{OnboardStore, ROM_PAGE_BASE, USER_PAGE_BASE};
use hidpp_onboard_core::transport::HidTransport;
use hidpp_onboard_core::{crc, macros, profile, registers, safety};
use hidpp_onboard_core::{HIDPP_USAGE_PAGE, LOGITECH_VID};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

struct CliHidTransport {
    device: hidapi::HidDevice,
}

impl CliHidTransport {
    /// Open the HID++ collection of the first Logitech device found.
    fn open_first(api: &hidapi::HidApi, pid: Option<u16>) -> Result<Self> {
        let mut candidates: Vec<_> = api
            .device_list()
            .filter(|d| d.vendor_id() == LOGITECH_VID)
            .filter(|d| pid.map_or(true, |p| d.product_id() == p))
            .collect();
        // the HID++ vendor collection first; other interfaces reject long reports
        candidates.sort_by_key(|d| d.usage_page() != HIDPP_USAGE_PAGE);

        let info = candidates
            .first()
            .ok_or_else(|| anyhow::anyhow!("no Logitech HID device found"))?;
        info!(
            vid = format_args!("0x{:04X}", info.vendor_id()),
            pid = format_args!("0x{:04X}", info.product_id()),
            path = ?info.path(),
            "opening device"
        );
        let device = info.open_device(api).with_context(|| {
            format!(
                "open HID device (VID=0x{:04X} PID=0x{:04X})",
                info.vendor_id(),
                info.product_id()
            )
        })?;
        Ok(Self { device })
    }
}

impl HidTransport for CliHidTransport {
    fn write_report(&self, data: &[u8]) -> hidpp_onboard_core::error::Result<()> {
        self.device
            .write(data)
            .map_err(|e| Error::Transport(format!("write: {e}")))?;
        Ok(())
    }

    fn read_report(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> hidpp_onboard_core::error::Result<Option<usize>> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = self
            .device
            .read_timeout(buf, ms)
            .map_err(|e| Error::Transport(format!("read_timeout: {e}")))?;
        Ok((n > 0).then_some(n))
    }
}

#[derive(Parser)]
#[command(
    name = "hidpp-onboard",
    version,
    about = "Inspect Logitech HID++ mice and their onboard profiles"
)]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Session config file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only consider this product ID (hex, e.g. c539).
    #[arg(long, global = true, value_parser = parse_hex_u16)]
    pid: Option<u16>,

    /// Device index (0xFF wired, 1-6 behind a receiver).
    #[arg(long, global = true, value_parser = parse_hex_u8)]
    device_index: Option<u8>,

    /// Per-read timeout in milliseconds.
    #[arg(long, global = true)]
    read_timeout_ms: Option<u64>,

    /// Pause before the single retry after a timeout, in milliseconds.
    #[arg(long, global = true)]
    retry_delay_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected Logitech HID interfaces.
    ListDevices,
    /// Show protocol version and feature table.
    Info,
    /// Hex-dump one onboard memory page.
    DumpPage {
        /// Page number.
        #[arg(value_parser = parse_hex_u16)]
        page: u16,
        /// Read the factory (ROM) copy.
        #[arg(long)]
        rom: bool,
    },
    /// Show the profile directory.
    Directory,
    /// Decode one profile (0-based slot).
    Profile {
        index: u8,
    },
    /// Decode the macro at page/offset.
    Macro {
        #[arg(value_parser = parse_hex_u16)]
        page: u16,
        offset: usize,
    },
    /// Enable (or disable) a profile slot in the directory.
    EnableProfile {
        index: u8,
        #[arg(long)]
        disable: bool,
    },
    /// HID++ 1.0 battery status.
    Battery,
}

fn parse_hex_u16(s: &str) -> std::result::Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("{s}: {e}"))
}

fn parse_hex_u8(s: &str) -> std::result::Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("{s}: {e}"))
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn session_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_path(path)?,
        None => SessionConfig::default(),
    };
    if let Some(idx) = cli.device_index {
        config.device_index = idx;
    }
    if let Some(ms) = cli.read_timeout_ms {
        config.timing.read_timeout_ms = ms;
    }
    if let Some(ms) = cli.retry_delay_ms {
        config.timing.retry_delay_ms = ms;
    }
    debug!(?config, "session config");
    Ok(config)
}

fn open_session(cli: &Cli) -> Result<Session> {
    let config = session_config(cli)?;
    let api = hidapi::HidApi::new().context("hidapi init")?;
    let transport = CliHidTransport::open_first(&api, cli.pid)?;
    Ok(Session::open(Box::new(transport), &config)?)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn hex_dump(bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:04x}: {}", row * 16, hex.join(" "));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::ListDevices => {
            let api = hidapi::HidApi::new().context("hidapi init")?;
            let devices: Vec<_> = api
                .device_list()
                .filter(|d| d.vendor_id() == LOGITECH_VID)
                .collect();
            if devices.is_empty() {
                println!("No Logitech devices found.");
            }
            for dev in devices {
                println!(
                    "{} (VID: 0x{:04X}, PID: 0x{:04X}, usage page: 0x{:04X}, path: {:?})",
                    dev.product_string().unwrap_or("unknown"),
                    dev.vendor_id(),
                    dev.product_id(),
                    dev.usage_page(),
                    dev.path()
                );
            }
        }
        Commands::Info => {
            let session = open_session(&cli)?;
            let version = session.version();
            if cli.json {
                let features: Vec<_> = session.features().iter().collect();
                print_json(&serde_json::json!({
                    "protocol": version,
                    "features": features,
                }))?;
            } else {
                println!("HID++ {}.{}", version.major, version.minor);
                for f in session.features().iter() {
                    let mut flags = Vec::new();
                    if f.flags.obsolete() {
                        flags.push("obsolete");
                    }
                    if f.flags.hidden() {
                        flags.push("hidden");
                    }
                    if f.flags.engineering() {
                        flags.push("engineering");
                    }
                    println!(
                        "  [{:2}] 0x{:04X} v{} {:<24} {}",
                        f.index,
                        f.id,
                        f.version,
                        f.name().unwrap_or("?"),
                        flags.join(",")
                    );
                }
            }
        }
        Commands::DumpPage { page, rom } => {
            let session = open_session(&cli)?;
            let bytes = if session.version().has_features() {
                let base = if *rom { ROM_PAGE_BASE } else { USER_PAGE_BASE };
                OnboardStore::inspect(&session)?.read_page_raw(base | *page)?
            } else {
                let page = u8::try_from(*page).context("HID++ 1.0 pages are 8-bit")?;
                registers::read_page(&session, page)?
            };
            if cli.json {
                print_json(&bytes)?;
            } else {
                hex_dump(&bytes);
                match crc::page_crc(&bytes) {
                    Some((stored, computed)) if stored == computed => {
                        println!("crc: 0x{stored:04X} ok")
                    }
                    Some((stored, computed)) => {
                        println!("crc: stored 0x{stored:04X}, computed 0x{computed:04X} MISMATCH")
                    }
                    None => println!("crc: page too short"),
                }
            }
        }
        Commands::Directory => {
            let session = open_session(&cli)?;
            let mut store = OnboardStore::inspect(&session)?;
            let dir = store.directory()?;
            let current = store.current_profile()?;
            if cli.json {
                print_json(&dir)?;
            } else {
                for (i, entry) in dir.entries.iter().enumerate() {
                    let marker = if current == Some(i as u8) { "*" } else { " " };
                    println!(
                        "{marker}{i}: page 0x{:04X} {}",
                        entry.page,
                        if entry.enabled { "enabled" } else { "disabled" }
                    );
                }
            }
        }
        Commands::Profile { index } => {
            let session = open_session(&cli)?;
            let mut store = OnboardStore::inspect(&session)?;
            let loaded = profile::load_profile(&mut store, *index)?;
            let button_macros = profile::read_button_macros(&store, &loaded.profile)?;
            if cli.json {
                print_json(&serde_json::json!({
                    "profile": loaded,
                    "macros": button_macros,
                }))?;
            } else {
                let p = &loaded.profile;
                println!(
                    "Profile {} ({:?}, page 0x{:04X}, {})",
                    loaded.index,
                    loaded.source,
                    loaded.page,
                    if loaded.enabled { "enabled" } else { "disabled" }
                );
                println!("  Name: {}", p.name);
                println!("  Polling rate: {} Hz", p.report_rate);
                println!(
                    "  DPI: {:?} (default slot {}, shift slot {})",
                    p.dpi, p.default_dpi, p.switched_dpi
                );
                println!("  Colour: {:02x?}", p.color);
                for (i, binding) in p.buttons.iter().enumerate() {
                    println!("  Button {i}: {binding}");
                }
                for (i, binding) in p.alt_buttons.iter().enumerate() {
                    println!("  G-shift {i}: {binding}");
                }
                for (slot, items) in &button_macros {
                    let steps: Vec<String> = items.iter().map(ToString::to_string).collect();
                    println!("  Macro on button {slot}: {}", steps.join(", "));
                }
            }
        }
        Commands::Macro { page, offset } => {
            let session = open_session(&cli)?;
            let store = OnboardStore::inspect(&session)?;
            let items = macros::read_macro(&store, *page, *offset)?;
            if cli.json {
                print_json(&items)?;
            } else {
                for item in &items {
                    println!("{item}");
                }
            }
        }
        Commands::EnableProfile { index, disable } => {
            eprintln!("{}", safety::BRICKING_DISCLAIMER);
            let session = open_session(&cli)?;
            let mut store = OnboardStore::open(&session)?;
            store.set_enabled(*index, !disable)?;
            println!(
                "Profile {index} {}",
                if *disable { "disabled" } else { "enabled" }
            );
        }
        Commands::Battery => {
            let session = open_session(&cli)?;
            let battery = registers::get_battery_status(&session)?;
            if cli.json {
                print_json(&battery)?;
            } else {
                println!(
                    "Battery: level 0x{:02X}, {:?}, warning below {}%",
                    battery.level, battery.charge_state, battery.low_threshold_percent
                );
            }
        }
    }

    Ok(())
}
