//! Capture metadata: GPS position and creation time of a video.
//!
//! Tags are read with `exiftool -json -G` for real files, or taken from the
//! synthetic source parameters for `stub://` videos, then parsed by
//! `Metadata::from_tags`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

use super::file::{is_stub_path, SyntheticSpec};
use crate::error::LabelError;

pub const GPS_TAG: &str = "QuickTime:GPSCoordinates";
pub const CREATION_TAG: &str = "QuickTime:CreationDate";

/// Pattern of the creation date tag, e.g. `2020:01:02 03:04:05+02:00`.
const CREATION_PATTERN: &str = "%Y:%m:%d %H:%M:%S%z";
const RENDER_PATTERN: &str = "%a %b %d %Y %H:%M:%S UTC";

/// Per-video capture record, written once as `metadata.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub latitude: String,
    pub longitude: String,
    pub elevation: String,
    #[serde(rename = "creationtime")]
    pub creation_time: String,
}

/// Raw capture tags before parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureTags {
    pub gps: Option<String>,
    pub creation_date: Option<String>,
}

impl Metadata {
    pub fn from_tags(tags: &CaptureTags) -> Result<Self> {
        let gps = tags
            .gps
            .as_deref()
            .ok_or_else(|| metadata_error(format!("missing {}", GPS_TAG)))?;
        let created = tags
            .creation_date
            .as_deref()
            .ok_or_else(|| metadata_error(format!("missing {}", CREATION_TAG)))?;

        let fields: Vec<&str> = gps.split(',').map(str::trim).collect();
        let [latitude, longitude, elevation] = fields.as_slice() else {
            return Err(metadata_error(format!(
                "GPS coordinates must have 3 comma-separated fields, got {}: '{}'",
                fields.len(),
                gps
            )));
        };
        if fields.iter().any(|field| field.is_empty()) {
            return Err(metadata_error(format!("GPS coordinates have an empty field: '{}'", gps)));
        }

        Ok(Self {
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
            elevation: elevation.to_string(),
            creation_time: render_creation_time(created)?,
        })
    }
}

/// Parses a creation date tag and re-renders it in UTC.
pub fn render_creation_time(raw: &str) -> Result<String> {
    let parsed = DateTime::parse_from_str(raw.trim(), CREATION_PATTERN)
        .map_err(|e| metadata_error(format!("creation date '{}' is malformed: {}", raw, e)))?;
    Ok(parsed.with_timezone(&Utc).format(RENDER_PATTERN).to_string())
}

/// Capture tags for `path`: synthetic parameters for `stub://` paths,
/// otherwise the output of `exiftool`.
pub fn read_capture_tags(path: &str, exiftool: &str) -> Result<CaptureTags> {
    if is_stub_path(path) {
        let spec = SyntheticSpec::parse(path).map_err(|e| metadata_error(format!("{:#}", e)))?;
        return Ok(CaptureTags {
            gps: spec.gps,
            creation_date: spec.created,
        });
    }
    read_exiftool_tags(Path::new(path), exiftool)
}

fn read_exiftool_tags(path: &Path, exiftool: &str) -> Result<CaptureTags> {
    if !path.is_file() {
        return Err(metadata_error(format!("{} does not exist", path.display())));
    }
    let output = Command::new(exiftool)
        .arg("-json")
        .arg("-G")
        .arg(path)
        .output()
        .map_err(|e| metadata_error(format!("failed to run {}: {}", exiftool, e)))?;
    if !output.status.success() {
        return Err(metadata_error(format!(
            "{} exited with {} for {}",
            exiftool,
            output.status,
            path.display()
        )));
    }
    parse_exiftool_json(&output.stdout)
        .with_context(|| format!("read capture tags of {}", path.display()))
}

/// Extracts the capture tags from `exiftool -json -G` output.
pub fn parse_exiftool_json(raw: &[u8]) -> Result<CaptureTags> {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_slice(raw)
        .map_err(|e| metadata_error(format!("unreadable exiftool output: {}", e)))?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| metadata_error("exiftool returned no records".to_string()))?;
    let tag = |name: &str| {
        record.get(name).map(|value| match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    };
    Ok(CaptureTags {
        gps: tag(GPS_TAG),
        creation_date: tag(CREATION_TAG),
    })
}

fn metadata_error(message: String) -> anyhow::Error {
    LabelError::Metadata(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(gps: Option<&str>, created: Option<&str>) -> CaptureTags {
        CaptureTags {
            gps: gps.map(str::to_string),
            creation_date: created.map(str::to_string),
        }
    }

    fn is_metadata_error(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<LabelError>(), Some(LabelError::Metadata(_)))
    }

    #[test]
    fn parses_gps_and_normalizes_time_to_utc() -> Result<()> {
        let metadata = Metadata::from_tags(&tags(
            Some(" 37.7749 ,-122.4194,  16 m Above Sea Level "),
            Some("2020:01:02 03:04:05+0200"),
        ))?;
        assert_eq!(metadata.latitude, "37.7749");
        assert_eq!(metadata.longitude, "-122.4194");
        assert_eq!(metadata.elevation, "16 m Above Sea Level");
        assert_eq!(metadata.creation_time, "Thu Jan 02 2020 01:04:05 UTC");
        Ok(())
    }

    #[test]
    fn accepts_colon_offsets() -> Result<()> {
        assert_eq!(
            render_creation_time("2019:12:31 23:30:00-01:00")?,
            "Wed Jan 01 2020 00:30:00 UTC"
        );
        Ok(())
    }

    #[test]
    fn serializes_with_corpus_keys() -> Result<()> {
        let metadata = Metadata::from_tags(&tags(Some("1, 2, 3"), Some("2020:01:02 03:04:05+0000")))?;
        let value = serde_json::to_value(&metadata)?;
        assert_eq!(value["latitude"], "1");
        assert_eq!(value["elevation"], "3");
        assert_eq!(value["creationtime"], "Thu Jan 02 2020 03:04:05 UTC");
        Ok(())
    }

    #[test]
    fn rejects_missing_or_malformed_tags() {
        let cases = [
            tags(None, Some("2020:01:02 03:04:05+0000")),
            tags(Some("1, 2, 3"), None),
            tags(Some("1, 2"), Some("2020:01:02 03:04:05+0000")),
            tags(Some("1, 2, 3, 4"), Some("2020:01:02 03:04:05+0000")),
            tags(Some("1, , 3"), Some("2020:01:02 03:04:05+0000")),
            tags(Some("1, 2, 3"), Some("2020-01-02T03:04:05Z")),
            tags(Some("1, 2, 3"), Some("2020:01:02 03:04:05")),
        ];
        for case in &cases {
            let err = Metadata::from_tags(case).unwrap_err();
            assert!(is_metadata_error(&err), "{:?} -> {:?}", case, err);
        }
    }

    #[test]
    fn reads_tags_from_exiftool_json() -> Result<()> {
        let raw = br#"[{"SourceFile":"clip.mov",
            "QuickTime:GPSCoordinates":"37 deg 46' 29.64\" N, 122 deg 25' 9.84\" W, 16 m Above Sea Level",
            "QuickTime:CreationDate":"2020:01:02 03:04:05+02:00"}]"#;
        let tags = parse_exiftool_json(raw)?;
        let metadata = Metadata::from_tags(&tags)?;
        assert_eq!(metadata.latitude, "37 deg 46' 29.64\" N");
        assert_eq!(metadata.longitude, "122 deg 25' 9.84\" W");
        assert_eq!(metadata.creation_time, "Thu Jan 02 2020 01:04:05 UTC");

        let missing = parse_exiftool_json(br#"[{"SourceFile":"clip.mov"}]"#)?;
        assert_eq!(missing, CaptureTags::default());
        assert!(is_metadata_error(&parse_exiftool_json(b"[]").unwrap_err()));
        Ok(())
    }

    #[test]
    fn stub_paths_report_their_own_tags() -> Result<()> {
        let tags = read_capture_tags("stub://clip", "exiftool")?;
        assert!(Metadata::from_tags(&tags).is_ok());
        let cleared = read_capture_tags("stub://clip?gps=", "exiftool")?;
        assert!(cleared.gps.is_none());
        Ok(())
    }
}
