use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use squirrel_types::BackendKind;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    backend: BackendConfig,
    #[serde(default)]
    native: NativeConfig,
    #[serde(default)]
    fallback: FallbackConfig,
}

#[derive(Deserialize, Default)]
struct EngineConfig {
    sample_rate: Option<u32>,
    frame_rate_hz: Option<u32>,
}

#[derive(Deserialize, Default)]
struct BackendConfig {
    preferred: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct NativeConfig {
    transport: Option<String>,
    host_addr: Option<String>,
    bind_addr: Option<String>,
    batch: Option<bool>,
    handshake_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct FallbackConfig {
    output: Option<bool>,
    decode_queue: Option<usize>,
    asset_root: Option<PathBuf>,
}

/// How the native bridge reaches its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTransportKind {
    Osc,
    None,
}

pub struct Config {
    engine: EngineConfig,
    backend: BackendConfig,
    native: NativeConfig,
    fallback: FallbackConfig,
}

impl Config {
    /// Embedded defaults merged with the user's config file, if any.
    pub fn load() -> Self {
        let user = user_config_path().filter(|p| p.exists()).and_then(|p| read_user_file(&p));
        Self::from_layers(user)
    }

    /// Embedded defaults merged with an explicit file.
    pub fn load_from(path: &Path) -> Self {
        Self::from_layers(read_user_file(path))
    }

    /// Embedded defaults merged with a TOML string.
    pub fn from_toml(user: &str) -> Self {
        let parsed = match toml::from_str::<ConfigFile>(user) {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!(target: "config", "ignoring malformed config: {}", e);
                None
            }
        };
        Self::from_layers(parsed)
    }

    fn from_layers(user: Option<ConfigFile>) -> Self {
        let mut base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is invalid: {}", e);
            ConfigFile::default()
        });
        if let Some(user) = user {
            merge_engine(&mut base.engine, user.engine);
            merge_backend(&mut base.backend, user.backend);
            merge_native(&mut base.native, user.native);
            merge_fallback(&mut base.fallback, user.fallback);
        }
        Config { engine: base.engine, backend: base.backend, native: base.native, fallback: base.fallback }
    }

    /// Fallback mixer rate in Hz (clamped to 8000..=192000).
    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate.unwrap_or(48_000).clamp(8_000, 192_000)
    }

    /// Facade ticks per second (clamped to 1..=240).
    pub fn frame_rate_hz(&self) -> u32 {
        self.engine.frame_rate_hz.unwrap_or(60).clamp(1, 240)
    }

    /// Backend detection order. Unknown names are skipped with a warning.
    pub fn preferred_backends(&self) -> Vec<BackendKind> {
        let Some(names) = &self.backend.preferred else {
            return BackendKind::ALL.to_vec();
        };
        names
            .iter()
            .filter_map(|name| match name.parse::<BackendKind>() {
                Ok(kind) => Some(kind),
                Err(_) => {
                    log::warn!(target: "config", "unknown backend '{}' in preferred list", name);
                    None
                }
            })
            .collect()
    }

    pub fn native_transport(&self) -> NativeTransportKind {
        match self.native.transport.as_deref().map(str::to_lowercase).as_deref() {
            Some("none") | Some("off") => NativeTransportKind::None,
            Some("osc") | None => NativeTransportKind::Osc,
            Some(other) => {
                log::warn!(target: "config", "unknown native transport '{}', using osc", other);
                NativeTransportKind::Osc
            }
        }
    }

    pub fn host_addr(&self) -> String {
        self.native.host_addr.clone().unwrap_or_else(|| "127.0.0.1:57130".to_string())
    }

    pub fn bind_addr(&self) -> String {
        self.native.bind_addr.clone().unwrap_or_else(|| "127.0.0.1:0".to_string())
    }

    /// Whether the host speaks the envelope protocol.
    pub fn native_batch(&self) -> bool {
        self.native.batch.unwrap_or(true)
    }

    /// Wait for the host's hello reply when connecting (clamped to 0..=5000 ms).
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.native.handshake_ms.unwrap_or(250).min(5000))
    }

    pub fn fallback_output(&self) -> bool {
        self.fallback.output.unwrap_or(true)
    }

    /// Pending decode jobs before new ones are refused (clamped to 1..=1024).
    pub fn decode_queue(&self) -> usize {
        self.fallback.decode_queue.unwrap_or(64).clamp(1, 1024)
    }

    pub fn asset_root(&self) -> Option<PathBuf> {
        self.fallback.asset_root.clone()
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("squirrel").join("config.toml"))
}

fn read_user_file(path: &Path) -> Option<ConfigFile> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(user) => Some(user),
            Err(e) => {
                log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!(target: "config", "could not read config {}: {}", path.display(), e);
            None
        }
    }
}

fn merge_engine(base: &mut EngineConfig, user: EngineConfig) {
    if user.sample_rate.is_some() {
        base.sample_rate = user.sample_rate;
    }
    if user.frame_rate_hz.is_some() {
        base.frame_rate_hz = user.frame_rate_hz;
    }
}

fn merge_backend(base: &mut BackendConfig, user: BackendConfig) {
    if user.preferred.is_some() {
        base.preferred = user.preferred;
    }
}

fn merge_native(base: &mut NativeConfig, user: NativeConfig) {
    if user.transport.is_some() {
        base.transport = user.transport;
    }
    if user.host_addr.is_some() {
        base.host_addr = user.host_addr;
    }
    if user.bind_addr.is_some() {
        base.bind_addr = user.bind_addr;
    }
    if user.batch.is_some() {
        base.batch = user.batch;
    }
    if user.handshake_ms.is_some() {
        base.handshake_ms = user.handshake_ms;
    }
}

fn merge_fallback(base: &mut FallbackConfig, user: FallbackConfig) {
    if user.output.is_some() {
        base.output = user.output;
    }
    if user.decode_queue.is_some() {
        base.decode_queue = user.decode_queue;
    }
    if user.asset_root.is_some() {
        base.asset_root = user.asset_root;
    }
}
