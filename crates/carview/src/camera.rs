//! Camera registry: maps a logical streaming name to the camera's address,
//! control credentials and firmware vendor.
//!
//! The orchestrator only reads from it. The HTTP `/rtsp-info` surface is
//! the sole writer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub type Result<T> = std::result::Result<T, CameraError>;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera not found: {0}")]
    NotFound(String),
    #[error("camera already registered: {0}")]
    Duplicate(String),
    #[error("invalid camera record: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Camera firmware family, stored as an integer code in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum VendorCode {
    Kedacom,
    Innodep,
    Seyeon,
    Code4,
    Code5,
    Unknown(i64),
}

impl From<i64> for VendorCode {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::Kedacom,
            2 => Self::Innodep,
            3 => Self::Seyeon,
            4 => Self::Code4,
            5 => Self::Code5,
            other => Self::Unknown(other),
        }
    }
}

impl From<VendorCode> for i64 {
    fn from(code: VendorCode) -> Self {
        match code {
            VendorCode::Kedacom => 1,
            VendorCode::Innodep => 2,
            VendorCode::Seyeon => 3,
            VendorCode::Code4 => 4,
            VendorCode::Code5 => 5,
            VendorCode::Unknown(other) => other,
        }
    }
}

impl Default for VendorCode {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl std::fmt::Display for VendorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

fn default_camera_type() -> String {
    "kedacom".to_string()
}

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub streaming_name: String,
    #[serde(default)]
    pub streaming_car_id: String,
    pub streaming_ip: String,
    #[serde(default)]
    pub streaming_id: String,
    #[serde(default)]
    pub streaming_password: String,
    #[serde(default = "default_camera_type")]
    pub camera_type: String,
    #[serde(default)]
    pub camera_code: VendorCode,
}

impl CameraRecord {
    pub fn validate(&self) -> Result<()> {
        if self.streaming_name.trim().is_empty() {
            return Err(CameraError::Invalid("streaming_name is empty".into()));
        }
        if self.streaming_ip.trim().is_empty() {
            return Err(CameraError::Invalid("streaming_ip is empty".into()));
        }
        if self.streaming_name.contains('/') {
            // ends up in recording file names
            return Err(CameraError::Invalid(format!(
                "streaming_name must not contain '/': {}",
                self.streaming_name
            )));
        }
        Ok(())
    }
}

/// Read/write access to camera records.
#[async_trait::async_trait]
pub trait CameraDirectory: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Option<CameraRecord>>;
    async fn list(&self) -> Result<Vec<CameraRecord>>;
    async fn insert(&self, record: CameraRecord) -> Result<()>;
    /// Replace the record stored under `before` (the key may change).
    async fn update(&self, before: &str, record: CameraRecord) -> Result<()>;
    async fn remove(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    cameras: Vec<CameraRecord>,
}

/// In-memory directory, optionally backed by a YAML file that is
/// rewritten on every mutation.
pub struct MemoryDirectory {
    records: RwLock<BTreeMap<String, CameraRecord>>,
    path: Option<PathBuf>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = CameraRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.streaming_name.clone(), r))
            .collect();
        Self {
            records: RwLock::new(map),
            path: None,
        }
    }

    /// Load from `path`. A missing file starts an empty registry that will be
    /// created on the first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let file: RegistryFile = serde_yaml::from_str(&contents)?;
            file.cameras
                .into_iter()
                .map(|r| (r.streaming_name.clone(), r))
                .collect()
        } else {
            log::info!("Camera registry {} not found, starting empty", path.display());
            BTreeMap::new()
        };
        log::info!("Loaded {} camera record(s)", records.len());
        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    fn persist(&self, records: &BTreeMap<String, CameraRecord>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = RegistryFile {
            cameras: records.values().cloned().collect(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, serde_yaml::to_string(&file)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CameraDirectory for MemoryDirectory {
    async fn lookup(&self, name: &str) -> Result<Option<CameraRecord>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<CameraRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn insert(&self, record: CameraRecord) -> Result<()> {
        record.validate()?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.streaming_name) {
            return Err(CameraError::Duplicate(record.streaming_name));
        }
        records.insert(record.streaming_name.clone(), record);
        self.persist(&records)
    }

    async fn update(&self, before: &str, record: CameraRecord) -> Result<()> {
        record.validate()?;
        let mut records = self.records.write().await;
        if !records.contains_key(before) {
            return Err(CameraError::NotFound(before.to_string()));
        }
        if record.streaming_name != before && records.contains_key(&record.streaming_name) {
            return Err(CameraError::Duplicate(record.streaming_name));
        }
        records.remove(before);
        records.insert(record.streaming_name.clone(), record);
        self.persist(&records)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if records.remove(name).is_none() {
            return Err(CameraError::NotFound(name.to_string()));
        }
        self.persist(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, code: i64) -> CameraRecord {
        CameraRecord {
            streaming_name: name.to_string(),
            streaming_car_id: "12가3456".to_string(),
            streaming_ip: "10.0.0.7".to_string(),
            streaming_id: "admin".to_string(),
            streaming_password: "1234".to_string(),
            camera_type: "kedacom".to_string(),
            camera_code: VendorCode::from(code),
        }
    }

    #[test]
    fn test_vendor_code_from_integer() {
        assert_eq!(VendorCode::from(1), VendorCode::Kedacom);
        assert_eq!(VendorCode::from(2), VendorCode::Innodep);
        assert_eq!(VendorCode::from(5), VendorCode::Code5);
        assert_eq!(VendorCode::from(42), VendorCode::Unknown(42));
        assert_eq!(i64::from(VendorCode::Unknown(42)), 42);
    }

    #[test]
    fn test_record_deserialize_defaults() {
        let json = r#"{"streaming_name":"car-01","streaming_ip":"10.0.0.7"}"#;
        let rec: CameraRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.camera_type, "kedacom");
        assert_eq!(rec.camera_code, VendorCode::Unknown(0));
        assert_eq!(
            serde_json::to_value(&rec).unwrap()["camera_code"],
            serde_json::json!(0)
        );
    }

    #[test]
    fn test_validate_rejects_path_separator() {
        assert!(record("car-01", 1).validate().is_ok());
        assert!(matches!(
            record("car/01", 1).validate(),
            Err(CameraError::Invalid(_))
        ));
        assert!(record("", 1).validate().is_err());
    }

    #[tokio::test]
    async fn test_insert_lookup_update_remove() {
        let dir = MemoryDirectory::new();
        dir.insert(record("car-01", 1)).await.unwrap();
        assert!(matches!(
            dir.insert(record("car-01", 2)).await,
            Err(CameraError::Duplicate(_))
        ));

        let found = dir.lookup("car-01").await.unwrap().unwrap();
        assert_eq!(found.camera_code, VendorCode::Kedacom);
        assert!(dir.lookup("car-99").await.unwrap().is_none());

        dir.update("car-01", record("car-02", 2)).await.unwrap();
        assert!(dir.lookup("car-01").await.unwrap().is_none());
        assert_eq!(
            dir.lookup("car-02").await.unwrap().unwrap().camera_code,
            VendorCode::Innodep
        );

        dir.remove("car-02").await.unwrap();
        assert!(matches!(
            dir.remove("car-02").await,
            Err(CameraError::NotFound(_))
        ));
        assert!(dir.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let dir = MemoryDirectory::new();
        let err = dir.update("ghost", record("ghost", 1)).await.unwrap_err();
        assert!(matches!(err, CameraError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_yaml_persistence_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cameras.yaml");

        let dir = MemoryDirectory::open(&path).unwrap();
        dir.insert(record("car-01", 1)).await.unwrap();
        dir.insert(record("car-02", 3)).await.unwrap();
        assert!(path.exists());

        let reopened = MemoryDirectory::open(&path).unwrap();
        let names: Vec<_> = reopened
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.streaming_name)
            .collect();
        assert_eq!(names, vec!["car-01", "car-02"]);
        assert_eq!(
            reopened.lookup("car-02").await.unwrap().unwrap().camera_code,
            VendorCode::Seyeon
        );
    }
}
