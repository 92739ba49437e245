//! Configuration file support for tunnel-xlat.
//!
//! Configuration structure:
//! - `[program]`: worker threads, chroot and privilege drop
//! - `[io]`: where packets come from (`tun` or `inherited-fds`)
//! - `[translator]`, `[router]`: addresses, prefix, MTUs and checksum policy
//!
//! Values are layered by [`XlatConfigBuilder`]: defaults, then the TOML file,
//! then CLI overrides. `build()` runs every validation and returns a
//! [`ResolvedConfig`]; any error there is fatal at startup.

use anyhow::{Context, Result};
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use tunnel_xlat::config::{
    DEFAULT_GENERATED_PACKET_TTL, DEFAULT_OUTBOUND_MTU, DEFAULT_PREFIX,
};
use tunnel_xlat::{AddressingMode, ChecksumChecks, TranslatorConfig};

// ============================================================================
// Configuration File Structures
// ============================================================================

/// Top-level TOML document.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct XlatFileConfig {
    #[serde(default)]
    pub program: ProgramSection,
    #[serde(default)]
    pub io: IoSection,
    #[serde(default)]
    pub translator: TranslatorSection,
    #[serde(default)]
    pub router: RouterSection,
}

/// `[program]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct ProgramSection {
    /// Number of worker threads; 0 means one per CPU.
    pub translator_threads: Option<usize>,
    /// Directory to chroot into after the I/O handles are open (empty = none)
    pub chroot_dir: Option<PathBuf>,
    /// User name or numeric uid to switch to (empty = keep)
    pub privilege_drop_user: Option<String>,
    /// Group name or numeric gid to switch to (empty = keep)
    pub privilege_drop_group: Option<String>,
}

/// `[io]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct IoSection {
    /// "tun" or "inherited-fds"
    pub mode: Option<String>,
    pub tun: Option<TunSection>,
    pub inherited_fds: Option<InheritedFdsSection>,
}

/// `[io.tun]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct TunSection {
    pub device_path: Option<PathBuf>,
    pub interface_name: Option<String>,
    /// Owner of a persistent interface created by `mktun`
    pub owner_user: Option<String>,
    pub owner_group: Option<String>,
}

/// `[io.inherited_fds]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct InheritedFdsSection {
    pub read_fd: Option<i32>,
    pub write_fd: Option<i32>,
}

/// `[translator]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct TranslatorSection {
    /// "nat64", "clat" or "siit"
    pub mode: Option<String>,
    /// /96 prefix, with or without the "/96" suffix
    pub prefix: Option<String>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub allow_translation_of_private_ips: Option<bool>,
    pub ipv4_outbound_mtu: Option<u16>,
    pub ipv6_outbound_mtu: Option<u16>,
    #[serde(rename = "6to4")]
    pub six_to_four: Option<DirectionSection>,
    #[serde(rename = "4to6")]
    pub four_to_six: Option<DirectionSection>,
    pub checksum: Option<ChecksumSection>,
}

/// `[translator.6to4]` / `[translator.4to6]` sections.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct DirectionSection {
    pub copy_dscp_and_ecn: Option<bool>,
}

/// `[translator.checksum]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct ChecksumSection {
    pub check_ipv4_header: Option<bool>,
    pub check_icmpv4: Option<bool>,
    pub check_icmpv6: Option<bool>,
    pub check_tcp: Option<bool>,
    pub check_udp: Option<bool>,
}

/// `[router]` section: source of translator-generated ICMP errors.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct RouterSection {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub generated_packet_ttl: Option<u8>,
}

// ============================================================================
// Resolved Configuration
// ============================================================================

/// Upper bound for `translator_threads`.
pub const MAX_TRANSLATOR_THREADS: usize = 256;

/// Default TUN clone device.
pub const DEFAULT_TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// A user or group resolved to its numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnixId {
    pub name: String,
    pub id: u32,
}

/// TUN interface settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunSettings {
    pub device_path: PathBuf,
    pub interface_name: String,
    pub owner_user: Option<UnixId>,
    pub owner_group: Option<UnixId>,
}

/// Where the daemon reads and writes packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum IoMode {
    Tun(TunSettings),
    InheritedFds { read_fd: i32, write_fd: i32 },
}

/// `[program]` settings after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramSettings {
    /// Always at least 1.
    pub translator_threads: usize,
    pub chroot_dir: Option<PathBuf>,
    pub privilege_drop_user: Option<UnixId>,
    pub privilege_drop_group: Option<UnixId>,
}

/// Fully resolved and validated configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub program: ProgramSettings,
    pub io: IoMode,
    pub translator: TranslatorConfig,
}

impl ResolvedConfig {
    /// Render the resolved configuration as TOML (for `print-config`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Parse the translation prefix. Accepts "64:ff9b::" or "64:ff9b::/96".
fn parse_prefix(value: &str) -> Result<Ipv6Addr> {
    if value.contains('/') {
        let net: Ipv6Net = value.parse().with_context(|| {
            format!("Invalid prefix '{}'. Expected format: 64:ff9b::/96", value)
        })?;
        if net.prefix_len() != 96 {
            anyhow::bail!(
                "Invalid prefix '{}': only /96 prefixes are supported",
                value
            );
        }
        Ok(net.addr())
    } else {
        value.parse().with_context(|| {
            format!("Invalid prefix '{}'. Expected format: 64:ff9b::", value)
        })
    }
}

fn parse_io_mode(value: &str) -> Result<&'static str> {
    match value {
        "tun" => Ok("tun"),
        "inherited-fds" => Ok("inherited-fds"),
        other => anyhow::bail!(
            "Invalid io mode '{}'. Expected 'tun' or 'inherited-fds'",
            other
        ),
    }
}

fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!(
            "TUN interface name is required.\n\
             Specify via CLI: --interface <NAME>\n\
             Or in config: [io.tun] interface_name = \"tundra\""
        );
    }
    if name.len() > MAX_INTERFACE_NAME_LEN || name.contains('/') || name.contains(char::is_whitespace) {
        anyhow::bail!(
            "Invalid interface name '{}' (at most {} characters, no '/' or whitespace)",
            name,
            MAX_INTERFACE_NAME_LEN
        );
    }
    Ok(())
}

/// Treat empty strings from the file as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Resolve a user name (or numeric uid) through the passwd database.
pub fn resolve_user(name: &str) -> Result<UnixId> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(UnixId { name: name.to_string(), id });
    }
    let user = nix::unistd::User::from_name(name)
        .with_context(|| format!("Failed to look up user '{}'", name))?
        .ok_or_else(|| anyhow::anyhow!("User '{}' does not exist", name))?;
    Ok(UnixId {
        name: name.to_string(),
        id: user.uid.as_raw(),
    })
}

/// Resolve a group name (or numeric gid) through the group database.
pub fn resolve_group(name: &str) -> Result<UnixId> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(UnixId { name: name.to_string(), id });
    }
    let group = nix::unistd::Group::from_name(name)
        .with_context(|| format!("Failed to look up group '{}'", name))?
        .ok_or_else(|| anyhow::anyhow!("Group '{}' does not exist", name))?;
    Ok(UnixId {
        name: name.to_string(),
        id: group.gid.as_raw(),
    })
}

/// Primary group of a resolved user, from its passwd entry.
pub fn resolve_primary_group(user: &UnixId) -> Result<UnixId> {
    let entry = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(user.id))
        .with_context(|| format!("Failed to look up uid {}", user.id))?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "User '{}' has no passwd entry, so its primary group is unknown. \
                 Set privilege_drop_group explicitly",
                user.name
            )
        })?;
    let name = nix::unistd::Group::from_gid(entry.gid)
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_else(|| entry.gid.to_string());
    Ok(UnixId {
        name,
        id: entry.gid.as_raw(),
    })
}

// ============================================================================
// Path Expansion
// ============================================================================

/// Expand tilde (~) in paths to the user's home directory.
///
/// - `~/...` expands to the user's home directory
/// - `~` alone expands to the home directory
/// - Other paths are returned unchanged
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

// ============================================================================
// Config Loading
// ============================================================================

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tunnel-xlat/tunnel-xlat.toml";

/// Load configuration from a TOML file.
fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load the configuration file from an explicit path, or from the default location.
///
/// - `path`: Some(path) loads from the specified path (tilde-expanded)
/// - `path`: None loads from [`DEFAULT_CONFIG_PATH`]
pub fn load_config(path: Option<&Path>) -> Result<XlatFileConfig> {
    let config_path = match path {
        Some(p) => expand_tilde(p),
        None => PathBuf::from(DEFAULT_CONFIG_PATH),
    };
    log::debug!("Loading configuration from {}", config_path.display());
    load_toml(&config_path)
}

// ============================================================================
// Config Builder
// ============================================================================

/// Builder for the daemon configuration with layered overrides.
///
/// Usage:
/// ```ignore
/// let config = XlatConfigBuilder::new()
///     .apply_defaults()
///     .apply_config(&file_config)
///     .apply_cli(threads, io_mode, interface)
///     .build()?;
/// ```
#[derive(Default)]
pub struct XlatConfigBuilder {
    translator_threads: Option<usize>,
    chroot_dir: Option<PathBuf>,
    privilege_drop_user: Option<String>,
    privilege_drop_group: Option<String>,

    io_mode: Option<String>,
    device_path: Option<PathBuf>,
    interface_name: Option<String>,
    owner_user: Option<String>,
    owner_group: Option<String>,
    read_fd: Option<i32>,
    write_fd: Option<i32>,

    mode: Option<String>,
    prefix: Option<String>,
    translator_ipv4: Option<Ipv4Addr>,
    translator_ipv6: Option<Ipv6Addr>,
    router_ipv4: Option<Ipv4Addr>,
    router_ipv6: Option<Ipv6Addr>,
    allow_translation_of_private_ips: Option<bool>,
    ipv4_outbound_mtu: Option<u16>,
    ipv6_outbound_mtu: Option<u16>,
    copy_dscp_and_ecn_6to4: Option<bool>,
    copy_dscp_and_ecn_4to6: Option<bool>,
    checksum: ChecksumChecks,
    generated_packet_ttl: Option<u8>,
}

impl XlatConfigBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply default values (lowest priority).
    pub fn apply_defaults(mut self) -> Self {
        self.translator_threads = Some(0);
        self.io_mode = Some("tun".to_string());
        self.device_path = Some(PathBuf::from(DEFAULT_TUN_DEVICE_PATH));
        self.mode = Some(AddressingMode::Nat64.to_string());
        self.prefix = Some(DEFAULT_PREFIX.to_string());
        self.allow_translation_of_private_ips = Some(false);
        self.ipv4_outbound_mtu = Some(DEFAULT_OUTBOUND_MTU);
        self.ipv6_outbound_mtu = Some(DEFAULT_OUTBOUND_MTU);
        self.copy_dscp_and_ecn_6to4 = Some(true);
        self.copy_dscp_and_ecn_4to6 = Some(true);
        self.checksum = ChecksumChecks::default();
        self.generated_packet_ttl = Some(DEFAULT_GENERATED_PACKET_TTL);
        self
    }

    /// Apply values from the TOML file (middle priority).
    pub fn apply_config(mut self, config: &XlatFileConfig) -> Self {
        let program = &config.program;
        if program.translator_threads.is_some() {
            self.translator_threads = program.translator_threads;
        }
        if let Some(dir) = program.chroot_dir.as_ref().filter(|d| !d.as_os_str().is_empty()) {
            self.chroot_dir = Some(expand_tilde(dir));
        }
        if let Some(user) = non_empty(program.privilege_drop_user.clone()) {
            self.privilege_drop_user = Some(user);
        }
        if let Some(group) = non_empty(program.privilege_drop_group.clone()) {
            self.privilege_drop_group = Some(group);
        }

        if let Some(mode) = non_empty(config.io.mode.clone()) {
            self.io_mode = Some(mode);
        }
        if let Some(tun) = &config.io.tun {
            if let Some(path) = tun.device_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
                self.device_path = Some(path.clone());
            }
            if let Some(name) = non_empty(tun.interface_name.clone()) {
                self.interface_name = Some(name);
            }
            if let Some(user) = non_empty(tun.owner_user.clone()) {
                self.owner_user = Some(user);
            }
            if let Some(group) = non_empty(tun.owner_group.clone()) {
                self.owner_group = Some(group);
            }
        }
        if let Some(fds) = &config.io.inherited_fds {
            if fds.read_fd.is_some() {
                self.read_fd = fds.read_fd;
            }
            if fds.write_fd.is_some() {
                self.write_fd = fds.write_fd;
            }
        }

        let translator = &config.translator;
        if let Some(mode) = non_empty(translator.mode.clone()) {
            self.mode = Some(mode);
        }
        if let Some(prefix) = non_empty(translator.prefix.clone()) {
            self.prefix = Some(prefix);
        }
        if translator.ipv4.is_some() {
            self.translator_ipv4 = translator.ipv4;
        }
        if translator.ipv6.is_some() {
            self.translator_ipv6 = translator.ipv6;
        }
        if translator.allow_translation_of_private_ips.is_some() {
            self.allow_translation_of_private_ips = translator.allow_translation_of_private_ips;
        }
        if translator.ipv4_outbound_mtu.is_some() {
            self.ipv4_outbound_mtu = translator.ipv4_outbound_mtu;
        }
        if translator.ipv6_outbound_mtu.is_some() {
            self.ipv6_outbound_mtu = translator.ipv6_outbound_mtu;
        }
        if let Some(copy) = translator.six_to_four.as_ref().and_then(|d| d.copy_dscp_and_ecn) {
            self.copy_dscp_and_ecn_6to4 = Some(copy);
        }
        if let Some(copy) = translator.four_to_six.as_ref().and_then(|d| d.copy_dscp_and_ecn) {
            self.copy_dscp_and_ecn_4to6 = Some(copy);
        }
        if let Some(checksum) = &translator.checksum {
            let flags = &mut self.checksum;
            flags.ipv4_header = checksum.check_ipv4_header.unwrap_or(flags.ipv4_header);
            flags.icmpv4 = checksum.check_icmpv4.unwrap_or(flags.icmpv4);
            flags.icmpv6 = checksum.check_icmpv6.unwrap_or(flags.icmpv6);
            flags.tcp = checksum.check_tcp.unwrap_or(flags.tcp);
            flags.udp = checksum.check_udp.unwrap_or(flags.udp);
        }

        let router = &config.router;
        if router.ipv4.is_some() {
            self.router_ipv4 = router.ipv4;
        }
        if router.ipv6.is_some() {
            self.router_ipv6 = router.ipv6;
        }
        if router.generated_packet_ttl.is_some() {
            self.generated_packet_ttl = router.generated_packet_ttl;
        }
        self
    }

    /// Apply CLI arguments (highest priority).
    /// Only non-None values override.
    pub fn apply_cli(
        mut self,
        translator_threads: Option<usize>,
        io_mode: Option<String>,
        interface_name: Option<String>,
    ) -> Self {
        if translator_threads.is_some() {
            self.translator_threads = translator_threads;
        }
        if io_mode.is_some() {
            self.io_mode = io_mode;
        }
        if interface_name.is_some() {
            self.interface_name = interface_name;
        }
        self
    }

    /// Build the final resolved configuration.
    pub fn build(self) -> Result<ResolvedConfig> {
        let program = self.build_program()?;
        let io = self.build_io()?;
        let translator = self.build_translator()?;
        Ok(ResolvedConfig {
            program,
            io,
            translator,
        })
    }

    fn build_program(&self) -> Result<ProgramSettings> {
        let threads = self.translator_threads.unwrap_or(0);
        if threads > MAX_TRANSLATOR_THREADS {
            anyhow::bail!(
                "[program] translator_threads {} is out of range. Valid range: 0-{}",
                threads,
                MAX_TRANSLATOR_THREADS
            );
        }
        let translator_threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_TRANSLATOR_THREADS)
        } else {
            threads
        };

        let privilege_drop_user = self
            .privilege_drop_user
            .as_deref()
            .map(resolve_user)
            .transpose()
            .context("[program] privilege_drop_user")?;
        // Without an explicit group the user's primary group replaces root's
        let privilege_drop_group = match self.privilege_drop_group.as_deref() {
            Some(group) => Some(resolve_group(group).context("[program] privilege_drop_group")?),
            None => privilege_drop_user
                .as_ref()
                .map(resolve_primary_group)
                .transpose()
                .context("[program] privilege_drop_user")?,
        };

        Ok(ProgramSettings {
            translator_threads,
            chroot_dir: self.chroot_dir.clone(),
            privilege_drop_user,
            privilege_drop_group,
        })
    }

    fn build_io(&self) -> Result<IoMode> {
        let mode = parse_io_mode(self.io_mode.as_deref().unwrap_or("tun"))?;
        if mode == "inherited-fds" {
            let (Some(read_fd), Some(write_fd)) = (self.read_fd, self.write_fd) else {
                anyhow::bail!(
                    "[io.inherited_fds] read_fd and write_fd are required in inherited-fds mode"
                );
            };
            if read_fd < 0 || write_fd < 0 {
                anyhow::bail!(
                    "[io.inherited_fds] file descriptors must not be negative (read_fd = {}, write_fd = {})",
                    read_fd,
                    write_fd
                );
            }
            return Ok(IoMode::InheritedFds { read_fd, write_fd });
        }

        let interface_name = self.interface_name.clone().unwrap_or_default();
        validate_interface_name(&interface_name)?;
        Ok(IoMode::Tun(TunSettings {
            device_path: self
                .device_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TUN_DEVICE_PATH)),
            interface_name,
            owner_user: self
                .owner_user
                .as_deref()
                .map(resolve_user)
                .transpose()
                .context("[io.tun] owner_user")?,
            owner_group: self
                .owner_group
                .as_deref()
                .map(resolve_group)
                .transpose()
                .context("[io.tun] owner_group")?,
        }))
    }

    fn build_translator(&self) -> Result<TranslatorConfig> {
        let mode: AddressingMode = self
            .mode
            .as_deref()
            .unwrap_or("nat64")
            .parse()
            .context("[translator] mode")?;
        let prefix = match self.prefix.as_deref() {
            Some(value) => parse_prefix(value)?,
            None => DEFAULT_PREFIX,
        };

        let translator_ipv4 = self
            .translator_ipv4
            .ok_or_else(|| anyhow::anyhow!("[translator] ipv4 is required"))?;
        let translator_ipv6 = self
            .translator_ipv6
            .ok_or_else(|| anyhow::anyhow!("[translator] ipv6 is required"))?;
        let router_ipv4 = self
            .router_ipv4
            .ok_or_else(|| anyhow::anyhow!("[router] ipv4 is required"))?;
        let router_ipv6 = self
            .router_ipv6
            .ok_or_else(|| anyhow::anyhow!("[router] ipv6 is required"))?;

        let mut config = TranslatorConfig::new(
            mode,
            prefix,
            translator_ipv4,
            translator_ipv6,
            router_ipv4,
            router_ipv6,
        );
        if let Some(allow) = self.allow_translation_of_private_ips {
            config.allow_translation_of_private_ips = allow;
        }
        if let Some(mtu) = self.ipv4_outbound_mtu {
            config.ipv4_outbound_mtu = mtu;
        }
        if let Some(mtu) = self.ipv6_outbound_mtu {
            config.ipv6_outbound_mtu = mtu;
        }
        if let Some(copy) = self.copy_dscp_and_ecn_6to4 {
            config.copy_dscp_and_ecn_6to4 = copy;
        }
        if let Some(copy) = self.copy_dscp_and_ecn_4to6 {
            config.copy_dscp_and_ecn_4to6 = copy;
        }
        config.checksum = self.checksum;
        if let Some(ttl) = self.generated_packet_ttl {
            config.generated_packet_ttl = ttl;
        }

        config.validate().context("Invalid translator configuration")?;
        Ok(config)
    }
}
