//! Recording file naming, media URIs and clip listing.
//!
//! Clip names encode their origin:
//! `<YYYY>_<MM>_<DD>-<HH>_<MM>_<SS>_<streamingName>_<disasterNumber>_<carNumber>_<sessionId>.<ext>`.
//! Retention tooling and the clip listing parse them back.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime};

pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";
const TIMESTAMP_LEN: usize = 19;
const DISPLAY_FORMAT: &str = "%Y년 %m월 %d일 %H시 %M분 %S초";

pub fn recording_name(
    at: DateTime<Local>,
    streaming_name: &str,
    disaster_number: &str,
    car_number: &str,
    session_id: &str,
    extension: &str,
) -> String {
    format!(
        "{}_{}_{}_{}_{}.{}",
        at.format(TIMESTAMP_FORMAT),
        streaming_name,
        disaster_number,
        car_number,
        session_id,
        extension
    )
}

/// `file://` URI of a clip inside the engine's recording directory.
pub fn recording_uri(directory: &str, name: &str) -> String {
    format!("file://{}/{}", directory.trim_end_matches('/'), name)
}

/// RTSP URI of a camera stream.
pub fn source_uri(ip: &str, port: u16, path: &str) -> String {
    if path.starts_with('/') {
        format!("rtsp://{}:{}{}", ip, port, path)
    } else {
        format!("rtsp://{}:{}/{}", ip, port, path)
    }
}

/// Fields recovered from a clip file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipName {
    pub recorded_at: NaiveDateTime,
    pub streaming_name: String,
    pub disaster_number: String,
    pub car_number: String,
    pub session_id: String,
    pub extension: String,
}

pub fn parse_clip_name(file_name: &str) -> Option<ClipName> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    let mut parts = stem.rsplitn(4, '_');
    let session_id = parts.next()?;
    let car_number = parts.next()?;
    let disaster_number = parts.next()?;
    let head = parts.next()?;

    let timestamp = head.get(..TIMESTAMP_LEN)?;
    if head.get(TIMESTAMP_LEN..TIMESTAMP_LEN + 1)? != "_" {
        return None;
    }
    let streaming_name = head.get(TIMESTAMP_LEN + 1..)?;
    let recorded_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

    if [streaming_name, disaster_number, car_number, session_id]
        .iter()
        .any(|s| s.is_empty())
    {
        return None;
    }
    Some(ClipName {
        recorded_at,
        streaming_name: streaming_name.to_string(),
        disaster_number: disaster_number.to_string(),
        car_number: car_number.to_string(),
        session_id: session_id.to_string(),
        extension: extension.to_string(),
    })
}

/// Human readable size with binary units, e.g. `1.5 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, UNITS[unit])
}

fn display_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(DISPLAY_FORMAT).to_string()
}

/// One entry of the clip listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipInfo {
    pub file_name: String,
    pub streaming_name: Option<String>,
    pub disaster_number: Option<String>,
    pub car_number: Option<String>,
    pub unique_number: Option<String>,
    pub creation_time: String,
    pub expiration_time: String,
    pub size: String,
    pub path: String,
    #[serde(skip)]
    pub created: SystemTime,
}

/// Creation time of a file, falling back to mtime where unsupported.
pub fn created_at(metadata: &std::fs::Metadata) -> SystemTime {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// List clips with `extension` in `directory`, newest first.
pub fn list_clips(directory: &Path, extension: &str, retention: Duration) -> std::io::Result<Vec<ClipInfo>> {
    let mut clips = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if Path::new(&file_name).extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let parsed = parse_clip_name(&file_name);
        let created = created_at(&metadata);
        clips.push(ClipInfo {
            streaming_name: parsed.as_ref().map(|p| p.streaming_name.clone()),
            disaster_number: parsed.as_ref().map(|p| p.disaster_number.clone()),
            car_number: parsed.as_ref().map(|p| p.car_number.clone()),
            unique_number: parsed.as_ref().map(|p| p.session_id.clone()),
            creation_time: display_time(created),
            expiration_time: display_time(created + retention),
            size: format_bytes(metadata.len()),
            path: format!("/recorders/{}", file_name),
            file_name,
            created,
        });
    }
    clips.sort_by(|a, b| b.created.cmp(&a.created));
    Ok(clips)
}

/// Delete one clip by bare file name.
pub fn delete_clip(directory: &Path, file_name: &str) -> std::io::Result<()> {
    let invalid = file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name == "."
        || file_name == "..";
    if invalid {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid clip name: {}", file_name),
        ));
    }
    std::fs::remove_file(directory.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recording_name_layout() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let name = recording_name(at, "car-01", "2024001", "12가3456", "abc-def", "webm");
        assert_eq!(name, "2024_03_09-07_05_01_car-01_2024001_12가3456_abc-def.webm");
    }

    #[test]
    fn test_uris() {
        assert_eq!(
            recording_uri("/recorders/", "clip.webm"),
            "file:///recorders/clip.webm"
        );
        assert_eq!(
            source_uri("10.0.0.7", 1935, "/live/cctv002.stream"),
            "rtsp://10.0.0.7:1935/live/cctv002.stream"
        );
        assert_eq!(source_uri("10.0.0.7", 554, "stream1"), "rtsp://10.0.0.7:554/stream1");
    }

    #[test]
    fn test_parse_clip_name_roundtrip() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let session = "4b0c7f9e-1f7a-4a55-9f55-0d6f0c3a2b11";
        let name = recording_name(at, "car_with_underscores", "D1", "C2", session, "webm");
        let parsed = parse_clip_name(&name).unwrap();
        assert_eq!(parsed.streaming_name, "car_with_underscores");
        assert_eq!(parsed.disaster_number, "D1");
        assert_eq!(parsed.car_number, "C2");
        assert_eq!(parsed.session_id, session);
        assert_eq!(parsed.extension, "webm");
        assert_eq!(parsed.recorded_at, at.naive_local());
    }

    #[test]
    fn test_parse_clip_name_rejects_foreign_files() {
        assert!(parse_clip_name("notes.txt").is_none());
        assert!(parse_clip_name("a_b_c_d.webm").is_none());
        assert!(parse_clip_name("2024_03_09-07_05_01__D_C_S.webm").is_none());
        assert!(parse_clip_name("no-extension").is_none());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 10_000), "5.01 MB");
    }

    #[test]
    fn test_list_and_delete_clips() {
        let dir = tempfile::tempdir().unwrap();
        let clip = "2024_03_09-07_05_01_car-01_D1_C2_abc.webm";
        std::fs::write(dir.path().join(clip), vec![0u8; 2048]).unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.webm")).unwrap();

        let clips = list_clips(dir.path(), "webm", Duration::from_secs(3600)).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].file_name, clip);
        assert_eq!(clips[0].streaming_name.as_deref(), Some("car-01"));
        assert_eq!(clips[0].unique_number.as_deref(), Some("abc"));
        assert_eq!(clips[0].size, "2 KB");
        assert_eq!(clips[0].path, format!("/recorders/{}", clip));

        let json = serde_json::to_value(&clips[0]).unwrap();
        assert!(json.get("fileName").is_some());
        assert!(json.get("expirationTime").is_some());

        assert!(delete_clip(dir.path(), "../etc/passwd").is_err());
        assert!(delete_clip(dir.path(), "").is_err());
        delete_clip(dir.path(), clip).unwrap();
        assert!(delete_clip(dir.path(), clip).is_err());
    }
}
