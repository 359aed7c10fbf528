use std::path::{Path, PathBuf};

use immich_core::AssetSummary;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

pub const SIDECAR_SUFFIX: &str = ".immich.json";
const UNNAMED_ALBUM: &str = "Album";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderStructure {
    #[default]
    Flat,
    Year,
    YearMonth,
}

impl FolderStructure {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flat" | "none" => Some(Self::Flat),
            "year" => Some(Self::Year),
            "year-month" | "year_month" | "yearmonth" => Some(Self::YearMonth),
            _ => None,
        }
    }
}

/// Replaces characters that are invalid in file names on common platforms
/// and trims surrounding whitespace and dots. Returns `None` if nothing is left.
pub fn sanitize_component(name: &str) -> Option<String> {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `"{id}-{name}"`, or the bare id when the original name is unusable.
pub fn asset_file_name(asset: &AssetSummary) -> String {
    let id = sanitize_component(&asset.id).unwrap_or_else(|| "asset".to_string());
    match asset
        .original_file_name
        .as_deref()
        .and_then(sanitize_component)
    {
        Some(name) => format!("{id}-{name}"),
        None => id,
    }
}

/// Date bucket for a creation timestamp, evaluated in UTC.
pub fn date_bucket(created: Option<&str>, structure: FolderStructure) -> Option<PathBuf> {
    if structure == FolderStructure::Flat {
        return None;
    }
    let created = OffsetDateTime::parse(created?, &Rfc3339)
        .ok()?
        .to_offset(UtcOffset::UTC);
    let year = format!("{:04}", created.year());
    match structure {
        FolderStructure::Flat => None,
        FolderStructure::Year => Some(PathBuf::from(year)),
        FolderStructure::YearMonth => {
            Some(PathBuf::from(year).join(format!("{:02}", u8::from(created.month()))))
        }
    }
}

pub fn destination_dir(
    base: &Path,
    asset: &AssetSummary,
    album: Option<&str>,
    structure: FolderStructure,
) -> PathBuf {
    let mut dir = base.to_path_buf();
    if let Some(album) = album {
        dir.push(sanitize_component(album).unwrap_or_else(|| UNNAMED_ALBUM.to_string()));
    }
    if let Some(bucket) = date_bucket(asset.created(), structure) {
        dir.push(bucket);
    }
    dir
}

pub fn destination_for(
    base: &Path,
    asset: &AssetSummary,
    album: Option<&str>,
    structure: FolderStructure,
) -> PathBuf {
    destination_dir(base, asset, album, structure).join(asset_file_name(asset))
}

pub fn sidecar_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    destination.with_file_name(name)
}
