use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use immich_core::{ImmichClient, normalize_base_url};

use crate::sync::coordinator::{DEFAULT_RESCAN_DEBOUNCE, EngineSettings};
use crate::sync::download::DownloadOptions;
use crate::sync::error::SyncError;
use crate::sync::index::StatePaths;
use crate::sync::paths::FolderStructure;
use crate::sync::retry::{DEFAULT_ATTEMPTS, RetryPolicy};
use crate::sync::throttle::Throttle;
use crate::sync::transfer::DEFAULT_TRANSFER_TIMEOUT;
use crate::sync::upload::UploadOptions;

const DEFAULT_DOWNLOAD_DIR: &str = "Pictures/Immich";
const DEFAULT_DEVICE_ID: &str = "immich-syncd";
const DEFAULT_DOWNLOAD_INTERVAL_SECS: u64 = 3600;
const RETRY_UNIT: Duration = Duration::from_millis(200);

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    pub state_dir: PathBuf,
    pub device_id: String,
    pub download: DownloadOptions,
    pub upload: Option<UploadOptions>,
    pub watch_upload_dir: bool,
    pub rate_limit_mbps: f64,
    pub retry_attempts: u32,
    pub transfer_timeout: Duration,
    pub rescan_debounce: Duration,
    /// `None` disables the periodic pull in daemon mode.
    pub download_interval: Option<Duration>,
    pub manual_override: bool,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let default_state = StatePaths::default_root()?;
        Self::from_lookup(&home, default_state, &|name: &str| std::env::var(name).ok())
    }

    pub fn from_lookup(home: &Path, default_state: PathBuf, vars: Lookup<'_>) -> anyhow::Result<Self> {
        let server_url = read_string_env(vars, "IMMICH_SERVER_URL");
        let api_key = read_string_env(vars, "IMMICH_API_KEY");
        let state_dir = read_string_env(vars, "IMMICH_STATE_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or(default_state);
        let device_id = read_string_env(vars, "IMMICH_DEVICE_ID")
            .or_else(|| read_string_env(vars, "HOSTNAME").map(|host| format!("{DEFAULT_DEVICE_ID}-{host}")))
            .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());

        let download_dir = read_string_env(vars, "IMMICH_DOWNLOAD_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join(DEFAULT_DOWNLOAD_DIR));
        let folder_structure = match read_string_env(vars, "IMMICH_FOLDER_STRUCTURE") {
            Some(value) => FolderStructure::parse(&value)
                .with_context(|| format!("unknown IMMICH_FOLDER_STRUCTURE value: {value}"))?,
            None => FolderStructure::Flat,
        };
        let download = DownloadOptions {
            base_dir: download_dir,
            include_photos: read_bool_env(vars, "IMMICH_DOWNLOAD_PHOTOS", true),
            include_videos: read_bool_env(vars, "IMMICH_DOWNLOAD_VIDEOS", true),
            skip_trashed: read_bool_env(vars, "IMMICH_SKIP_TRASHED", true),
            album_ids: read_list_env(vars, "IMMICH_ALBUM_IDS"),
            organize_by_album: read_bool_env(vars, "IMMICH_ORGANIZE_BY_ALBUM", false),
            folder_structure,
            verify_checksums: read_bool_env(vars, "IMMICH_VERIFY_CHECKSUMS", false),
            write_sidecars: read_bool_env(vars, "IMMICH_WRITE_SIDECARS", false),
        };

        let upload = read_string_env(vars, "IMMICH_UPLOAD_DIR").map(|value| UploadOptions {
            watch_dir: expand_with_home(&value, home),
            include_photos: read_bool_env(vars, "IMMICH_UPLOAD_PHOTOS", true),
            include_videos: read_bool_env(vars, "IMMICH_UPLOAD_VIDEOS", true),
            include_subfolders: read_bool_env(vars, "IMMICH_UPLOAD_SUBFOLDERS", true),
            allowed_extensions: read_list_env(vars, "IMMICH_UPLOAD_ALLOWED_EXTENSIONS"),
            denied_extensions: read_list_env(vars, "IMMICH_UPLOAD_DENIED_EXTENSIONS"),
            server_duplicate_check: read_bool_env(vars, "IMMICH_SERVER_DUPLICATE_CHECK", false),
            device_id: device_id.clone(),
        });

        let download_interval = match read_u64_env(
            vars,
            "IMMICH_DOWNLOAD_INTERVAL_SECS",
            DEFAULT_DOWNLOAD_INTERVAL_SECS,
        ) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            server_url,
            api_key,
            state_dir,
            device_id,
            download,
            upload,
            watch_upload_dir: read_bool_env(vars, "IMMICH_WATCH_UPLOAD_DIR", true),
            rate_limit_mbps: read_f64_env(vars, "IMMICH_RATE_LIMIT_MBPS", 0.0),
            retry_attempts: read_u64_env(vars, "IMMICH_RETRY_ATTEMPTS", u64::from(DEFAULT_ATTEMPTS))
                .clamp(1, u64::from(u32::MAX)) as u32,
            transfer_timeout: Duration::from_secs(
                read_u64_env(
                    vars,
                    "IMMICH_TRANSFER_TIMEOUT_SECS",
                    DEFAULT_TRANSFER_TIMEOUT.as_secs(),
                )
                .max(1),
            ),
            rescan_debounce: Duration::from_millis(read_u64_env(
                vars,
                "IMMICH_RESCAN_DEBOUNCE_MS",
                DEFAULT_RESCAN_DEBOUNCE.as_millis() as u64,
            )),
            download_interval,
            manual_override: read_bool_env(vars, "IMMICH_MANUAL_OVERRIDE", false),
        })
    }

    /// Server URL and API key must both be present and well-formed.
    pub fn validate(&self) -> Result<(), SyncError> {
        let Some(server_url) = self.server_url.as_deref() else {
            return Err(SyncError::Configuration("IMMICH_SERVER_URL is not set".into()));
        };
        normalize_base_url(server_url)
            .map_err(|err| SyncError::Configuration(err.to_string()))?;
        if self.api_key.is_none() {
            return Err(SyncError::Configuration("IMMICH_API_KEY is not set".into()));
        }
        Ok(())
    }

    pub fn client(&self) -> Result<ImmichClient, SyncError> {
        self.validate()?;
        let (Some(server_url), Some(api_key)) = (&self.server_url, &self.api_key) else {
            return Err(SyncError::Configuration("server credentials are incomplete".into()));
        };
        Ok(ImmichClient::new(server_url, api_key.clone())?)
    }

    pub fn state_paths(&self) -> StatePaths {
        StatePaths::new(&self.state_dir)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            download: self.download.clone(),
            upload: self.upload.clone(),
            watch_upload_dir: self.watch_upload_dir,
            retry: RetryPolicy::new(self.retry_attempts, RETRY_UNIT),
            throttle: Throttle::new(self.rate_limit_mbps),
            transfer_timeout: self.transfer_timeout,
            rescan_debounce: self.rescan_debounce,
            manual_override: self.manual_override,
        }
    }
}

/// Expands a leading `~` and resolves relative paths against the working
/// directory, so ledger keys built from these folders are absolute.
fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    let path = if value == "~" {
        home.to_path_buf()
    } else if let Some(rest) = value.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(value)
    };
    if path.is_absolute() {
        return path;
    }
    std::path::absolute(&path).unwrap_or(path)
}

fn read_string_env(vars: Lookup<'_>, name: &str) -> Option<String> {
    vars(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(vars: Lookup<'_>, name: &str, default: u64) -> u64 {
    vars(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_f64_env(vars: Lookup<'_>, name: &str, default: f64) -> f64 {
    vars(name)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(default)
}

fn read_bool_env(vars: Lookup<'_>, name: &str, default: bool) -> bool {
    vars(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn read_list_env(vars: Lookup<'_>, name: &str) -> Vec<String> {
    vars(name)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<SyncConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(
            Path::new("/home/user"),
            PathBuf::from("/home/user/.local/share/immich-sync"),
            &|name: &str| vars.get(name).cloned(),
        )
    }

    #[test]
    fn expands_tilde_to_home() {
        let home = PathBuf::from("/tmp/home-user");
        assert_eq!(
            expand_with_home("~/Pictures/Immich", &home),
            PathBuf::from("/tmp/home-user/Pictures/Immich")
        );
        assert_eq!(expand_with_home("~", &home), home);
        assert_eq!(expand_with_home("/abs", &home), PathBuf::from("/abs"));
    }

    #[test]
    fn relative_upload_dir_becomes_absolute() {
        let config = config(&[("IMMICH_UPLOAD_DIR", "camera/inbox")]).unwrap();
        let watch_dir = config.upload.map(|upload| upload.watch_dir).unwrap();
        assert!(watch_dir.is_absolute());
        assert_eq!(watch_dir, std::env::current_dir().unwrap().join("camera/inbox"));
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.download.base_dir, PathBuf::from("/home/user/Pictures/Immich"));
        assert_eq!(config.download.folder_structure, FolderStructure::Flat);
        assert!(config.download.skip_trashed);
        assert!(config.upload.is_none());
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.transfer_timeout, Duration::from_secs(120));
        assert_eq!(config.rescan_debounce, Duration::from_secs(2));
        assert_eq!(config.download_interval, Some(Duration::from_secs(3600)));
        assert_eq!(config.device_id, "immich-syncd");
        assert!(matches!(config.validate(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn reads_upload_and_download_settings() {
        let config = config(&[
            ("IMMICH_SERVER_URL", "https://photos.example.com"),
            ("IMMICH_API_KEY", "secret"),
            ("IMMICH_UPLOAD_DIR", "~/Camera"),
            ("IMMICH_UPLOAD_SUBFOLDERS", "no"),
            ("IMMICH_UPLOAD_DENIED_EXTENSIONS", ".heic, dng ,"),
            ("IMMICH_ALBUM_IDS", "al1,al2"),
            ("IMMICH_FOLDER_STRUCTURE", "year-month"),
            ("IMMICH_DOWNLOAD_INTERVAL_SECS", "0"),
            ("IMMICH_RATE_LIMIT_MBPS", "2.5"),
            ("IMMICH_DEVICE_ID", "laptop"),
        ])
        .unwrap();

        let upload = config.upload.as_ref().unwrap();
        assert_eq!(upload.watch_dir, PathBuf::from("/home/user/Camera"));
        assert!(!upload.include_subfolders);
        assert_eq!(upload.denied_extensions, vec![".heic", "dng"]);
        assert_eq!(upload.device_id, "laptop");
        assert_eq!(config.download.album_ids, vec!["al1", "al2"]);
        assert_eq!(config.download.folder_structure, FolderStructure::YearMonth);
        assert_eq!(config.download_interval, None);
        assert!(config.validate().is_ok());

        let settings = config.engine_settings();
        assert_eq!(settings.throttle, Throttle::new(2.5));
        assert!(settings.watch_upload_dir);
    }

    #[test]
    fn rejects_unknown_folder_structure() {
        assert!(config(&[("IMMICH_FOLDER_STRUCTURE", "weekly")]).is_err());
    }

    #[test]
    fn validation_requires_api_key_and_valid_url() {
        let missing_key = config(&[("IMMICH_SERVER_URL", "https://x.com")]).unwrap();
        assert!(missing_key.validate().is_err());

        let bad_url = config(&[("IMMICH_SERVER_URL", "ftp://x"), ("IMMICH_API_KEY", "k")]).unwrap();
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn bool_and_number_parsing_fall_back_to_default() {
        let vars = |name: &str| match name {
            "FLAG" => Some("On".to_string()),
            "NUM" => Some("abc".to_string()),
            _ => None,
        };
        assert!(read_bool_env(&vars, "FLAG", false));
        assert!(read_bool_env(&vars, "NO_SUCH_BOOL_ENV_FOR_TEST", true));
        assert_eq!(read_u64_env(&vars, "NUM", 42), 42);
    }
}
