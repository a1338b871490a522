use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::Jid, errors::Error, Result};

/// Typed configuration for the relay.
#[derive(Clone, Debug)]
pub struct Config {
    /// Operator destination: confirmations and captured media go here, never to the source chat.
    pub owner: Jid,
    pub detector: DetectorConfig,
    pub sidecar: SidecarConfig,
    pub queue_capacity: usize,
}

/// Tunables of the reply detector pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorConfig {
    pub command_prefix: String,
    pub enable_commands: Vec<String>,
    pub disable_commands: Vec<String>,
    pub status_commands: Vec<String>,

    pub download_timeout: Duration,

    // Size floors (bytes). Thumbnail heuristics, not protocol guarantees.
    pub min_media_bytes: usize,
    pub min_image_bytes: usize,
    pub min_video_bytes: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            command_prefix: ".".to_string(),
            enable_commands: vec!["onov".to_string()],
            disable_commands: vec!["offov".to_string()],
            status_commands: vec!["status".to_string(), "estado".to_string()],
            download_timeout: Duration::from_millis(15_000),
            min_media_bytes: 1024,
            min_image_bytes: 20 * 1024,
            min_video_bytes: 80 * 1024,
        }
    }
}

/// How to launch the messaging-client bridge process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("node"),
            args: vec!["bridge/index.js".to_string()],
            working_dir: None,
            request_timeout: Duration::from_millis(60_000),
        }
    }
}

impl Config {
    /// Load from the process environment (after an optional `.env` in the working dir).
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let owner = get("OVR_OWNER_JID").ok_or_else(|| {
            Error::Config("OVR_OWNER_JID environment variable is required".to_string())
        })?;
        let owner = Jid::new(owner.trim());

        let defaults = DetectorConfig::default();
        let detector = DetectorConfig {
            command_prefix: get("OVR_COMMAND_PREFIX")
                .map(|s| s.trim().to_string())
                .unwrap_or(defaults.command_prefix),
            enable_commands: get("OVR_ENABLE_COMMANDS")
                .map(parse_csv_lower)
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.enable_commands),
            disable_commands: get("OVR_DISABLE_COMMANDS")
                .map(parse_csv_lower)
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.disable_commands),
            status_commands: get("OVR_STATUS_COMMANDS")
                .map(parse_csv_lower)
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.status_commands),
            download_timeout: get("OVR_DOWNLOAD_TIMEOUT_MS")
                .and_then(parse_u64)
                .map(Duration::from_millis)
                .unwrap_or(defaults.download_timeout),
            min_media_bytes: get("OVR_MIN_MEDIA_BYTES")
                .and_then(parse_usize)
                .unwrap_or(defaults.min_media_bytes),
            min_image_bytes: get("OVR_MIN_IMAGE_BYTES")
                .and_then(parse_usize)
                .unwrap_or(defaults.min_image_bytes),
            min_video_bytes: get("OVR_MIN_VIDEO_BYTES")
                .and_then(parse_usize)
                .unwrap_or(defaults.min_video_bytes),
        };

        let sidecar_defaults = SidecarConfig::default();
        let sidecar = SidecarConfig {
            program: get("OVR_SIDECAR_PROGRAM")
                .map(PathBuf::from)
                .unwrap_or(sidecar_defaults.program),
            args: get("OVR_SIDECAR_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or(sidecar_defaults.args),
            working_dir: get("OVR_SIDECAR_DIR").map(PathBuf::from),
            request_timeout: get("OVR_REQUEST_TIMEOUT_MS")
                .and_then(parse_u64)
                .map(Duration::from_millis)
                .unwrap_or(sidecar_defaults.request_timeout),
        };

        let queue_capacity = get("OVR_QUEUE_CAPACITY")
            .and_then(parse_usize)
            .filter(|n| *n > 0)
            .unwrap_or(256);

        Ok(Self {
            owner,
            detector,
            sidecar,
            queue_capacity,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    apply_dotenv(
        &contents,
        |key| env::var_os(key).is_some(),
        |key, val| env::set_var(key, val),
    );
}

/// Feed `KEY=value` lines to `set`. Keys for which `is_set` holds are left alone.
fn apply_dotenv(contents: &str, is_set: impl Fn(&str) -> bool, mut set: impl FnMut(&str, &str)) {
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, val)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() || is_set(key) {
            continue;
        }
        set(key, unquote(val.trim()));
    }
}

fn unquote(val: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = val.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner;
        }
    }
    val
}

fn parse_u64(s: String) -> Option<u64> {
    s.trim().parse().ok()
}

fn parse_usize(s: String) -> Option<usize> {
    s.trim().parse().ok()
}

fn parse_csv_lower(v: String) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
