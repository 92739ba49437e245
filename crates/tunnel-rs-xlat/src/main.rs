//! tunnel-rs-xlat
//!
//! Stateless NAT64 / CLAT / SIIT translator daemon working on a TUN interface
//! or on inherited file descriptors.

#[cfg(not(target_os = "linux"))]
compile_error!("tunnel-rs-xlat only supports Linux");

mod device;
mod privilege;
mod worker;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use device::{PacketChannel, TunDevice};
use tunnel_common::config::{load_config, IoMode, ResolvedConfig, XlatConfigBuilder};

#[derive(Parser)]
#[command(name = "tunnel-rs-xlat")]
#[command(version)]
#[command(about = "Stateless NAT64 / CLAT / SIIT packet translator")]
struct Args {
    /// Path to the configuration file (default: /etc/tunnel-xlat/tunnel-xlat.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of translator threads (0 = one per CPU)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// I/O mode: tun or inherited-fds
    #[arg(long, global = true)]
    io_mode: Option<String>,

    /// TUN interface name
    #[arg(long, global = true)]
    interface: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq, Debug)]
enum Command {
    /// Run the translator (default)
    Translate,
    /// Create the persistent TUN interface and exit
    Mktun,
    /// Remove the persistent TUN interface and exit
    Rmtun,
    /// Load and validate the configuration, then exit
    ValidateConfig,
    /// Print the resolved configuration
    PrintConfig,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let file_config = load_config(args.config.as_deref())?;
    let resolved = XlatConfigBuilder::new()
        .apply_defaults()
        .apply_config(&file_config)
        .apply_cli(args.threads, args.io_mode, args.interface)
        .build()?;

    match args.command.unwrap_or(Command::Translate) {
        Command::Translate => run_translator(resolved),
        Command::Mktun => set_tun_persistence(&resolved, true),
        Command::Rmtun => set_tun_persistence(&resolved, false),
        Command::ValidateConfig => {
            log::info!("Configuration is valid");
            print!("{}", resolved.to_toml()?);
            Ok(())
        }
        Command::PrintConfig => {
            print!("{}", resolved.to_toml()?);
            Ok(())
        }
    }
}

fn run_translator(resolved: ResolvedConfig) -> Result<()> {
    let channel = PacketChannel::open(&resolved.io)?;
    privilege::drop_privileges(&resolved.program)?;

    let translator = &resolved.translator;
    log::info!(
        "Translating in {} mode: prefix {}/96, translator {} / {}, router {} / {}",
        translator.mode,
        translator.prefix,
        translator.translator_ipv4,
        translator.translator_ipv6,
        translator.router_ipv4,
        translator.router_ipv6
    );

    worker::run_workers(
        Arc::new(resolved.translator),
        channel,
        resolved.program.translator_threads,
    )
}

fn set_tun_persistence(resolved: &ResolvedConfig, persist: bool) -> Result<()> {
    let IoMode::Tun(settings) = &resolved.io else {
        anyhow::bail!("mktun / rmtun require io mode 'tun'");
    };
    let device = TunDevice::open(settings)?;
    device
        .set_persist(persist)
        .context("Failed to change interface persistence")?;

    if persist {
        log::info!("Created persistent TUN interface {}", device.name());
    } else {
        log::info!("Removed persistent TUN interface {}", device.name());
    }
    Ok(())
}
