//! Evidence archive for a finished official measurement.
//!
//! Every run is packaged into a single zip holding the checkpoint
//! screenshots, the page snapshot, the raw CSV export (when the site offered
//! one) and a `metadata.json` manifest. The zip is assembled in a temporary
//! file next to its destination and renamed into place only once complete.

use std::{
    collections::HashSet,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use bandwatch_model::{ExtractedResult, MeasurementId, PageMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::artifacts::timestamped_name;

pub const MANIFEST_NAME: &str = "metadata.json";
pub const SCREENSHOT_DIR: &str = "screenshots";
pub const SOURCE: &str = "breitbandmessung.de";
const COMPRESSION_LEVEL: i64 = 9;
pub const DISCLAIMER: &str = "Diese Messung wurde automatisch durchgeführt und dient nur zur \
Dokumentation. Für rechtlich bindende Nachweise nach TKG verwenden Sie bitte die offizielle \
Desktop-App der Bundesnetzagentur mit 20 Messungen an 2 aufeinanderfolgenden Tagen.";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive input missing: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("archive I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("manifest encoding failed: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("archive task failed: {0}")]
    Task(String),
}

/// Measurement values as recorded in the manifest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestValues {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
}

impl From<ExtractedResult> for ManifestValues {
    fn from(value: ExtractedResult) -> Self {
        Self {
            download_mbps: value.download,
            upload_mbps: value.upload,
            latency_ms: value.latency,
        }
    }
}

/// `metadata.json` contents. `files` lists every entry in the archive,
/// including the manifest itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    pub export_id: MeasurementId,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub measurement: ManifestValues,
    pub page_metadata: PageMetadata,
    pub files: Vec<String>,
    pub disclaimer: String,
}

/// Inputs for one archive.
#[derive(Clone, Debug)]
pub struct ArchiveRequest {
    pub id: MeasurementId,
    pub screenshots: Vec<PathBuf>,
    pub export_file: Option<PathBuf>,
    pub snapshot_file: PathBuf,
    pub values: ExtractedResult,
    pub page_metadata: PageMetadata,
}

#[derive(Clone, Debug)]
pub struct ArchiveBuilder {
    output_dir: PathBuf,
}

impl ArchiveBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Build on the blocking pool.
    pub async fn build(&self, request: ArchiveRequest) -> Result<PathBuf, ArchiveError> {
        let builder = self.clone();
        tokio::task::spawn_blocking(move || builder.build_blocking(&request))
            .await
            .map_err(|err| ArchiveError::Task(err.to_string()))?
    }

    pub fn build_blocking(&self, request: &ArchiveRequest) -> Result<PathBuf, ArchiveError> {
        std::fs::create_dir_all(&self.output_dir)?;

        let entries = collect_entries(request)?;
        let mut files: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
        files.push(MANIFEST_NAME.to_string());

        let now = Utc::now();
        let manifest = ArchiveManifest {
            export_id: request.id,
            timestamp: now,
            source: SOURCE.to_string(),
            measurement: request.values.into(),
            page_metadata: request.page_metadata.clone(),
            files,
            disclaimer: DISCLAIMER.to_string(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

        let mut partial = tempfile::Builder::new()
            .prefix(".measurement_")
            .suffix(".zip.partial")
            .tempfile_in(&self.output_dir)?;

        {
            let mut zip = ZipWriter::new(partial.as_file_mut());
            for (name, source) in &entries {
                zip.start_file(name.as_str(), self.entry_options())?;
                let mut input = File::open(source)?;
                io::copy(&mut input, &mut zip)?;
                debug!(target: "measurement::archive", entry = %name, "added archive entry");
            }
            zip.start_file(MANIFEST_NAME, self.entry_options())?;
            zip.write_all(&manifest_bytes)?;
            zip.finish()?;
        }
        partial.as_file().sync_all()?;

        let final_path = self.output_dir.join(timestamped_name(
            &format!("measurement_{}", request.id),
            "zip",
            now,
        ));
        partial
            .persist(&final_path)
            .map_err(|err| ArchiveError::Io(err.error))?;

        info!(
            target: "measurement::archive",
            measurement_id = %request.id,
            path = %final_path.display(),
            entries = manifest.files.len(),
            "archive created"
        );
        Ok(final_path)
    }

    fn entry_options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(COMPRESSION_LEVEL))
            .unix_permissions(0o644)
    }
}

/// Archive entry names paired with their source files. Missing screenshots
/// and exports are skipped so the manifest only names what is packaged; a
/// missing snapshot is an error.
fn collect_entries(request: &ArchiveRequest) -> Result<Vec<(String, PathBuf)>, ArchiveError> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for shot in &request.screenshots {
        let Some(name) = base_name(shot) else {
            warn!(target: "measurement::archive", path = %shot.display(), "screenshot path has no file name");
            continue;
        };
        if !shot.is_file() {
            warn!(target: "measurement::archive", path = %shot.display(), "screenshot missing, not archived");
            continue;
        }
        let entry = format!("{SCREENSHOT_DIR}/{name}");
        if seen.insert(entry.clone()) {
            entries.push((entry, shot.clone()));
        }
    }

    if !request.snapshot_file.is_file() {
        return Err(ArchiveError::MissingInput {
            path: request.snapshot_file.clone(),
        });
    }
    let snapshot_name = base_name(&request.snapshot_file).ok_or_else(|| {
        ArchiveError::MissingInput {
            path: request.snapshot_file.clone(),
        }
    })?;
    if seen.insert(snapshot_name.clone()) {
        entries.push((snapshot_name, request.snapshot_file.clone()));
    }

    if let Some(export) = &request.export_file {
        match base_name(export) {
            Some(name) if export.is_file() => {
                if seen.insert(name.clone()) {
                    entries.push((name, export.clone()));
                }
            }
            _ => {
                warn!(target: "measurement::archive", path = %export.display(), "export file missing, not archived");
            }
        }
    }

    Ok(entries)
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| name != MANIFEST_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeSet, io::Read};
    use tempfile::TempDir;
    use zip::ZipArchive;

    struct Fixture {
        _dir: TempDir,
        inputs: PathBuf,
        output: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let inputs = dir.path().join("inputs");
        let output = dir.path().join("zips");
        std::fs::create_dir_all(&inputs).unwrap();
        Fixture {
            _dir: dir,
            inputs,
            output,
        }
    }

    fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn request(fx: &Fixture, with_export: bool) -> ArchiveRequest {
        let screenshots = vec![
            write(&fx.inputs, "01_initial_page.png", b"png-1"),
            write(&fx.inputs, "05_measurement_result.png", b"png-5"),
        ];
        let export_file = with_export.then(|| {
            write(
                &fx.inputs,
                "messung.csv",
                b"\"Download\";\"Upload\"\n\"100,5\";\"40\"\n",
            )
        });
        ArchiveRequest {
            id: MeasurementId::new(),
            screenshots,
            export_file,
            snapshot_file: write(&fx.inputs, "page.html", b"<html></html>"),
            values: ExtractedResult {
                download: Some(100.5),
                upload: Some(40.0),
                latency: None,
            },
            page_metadata: PageMetadata {
                date: Some("22.01.2026".into()),
                time: Some("10:15".into()),
                test_id: None,
            },
        }
    }

    fn read_archive(path: &Path) -> (BTreeSet<String>, ArchiveManifest) {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let names: BTreeSet<String> = archive.file_names().map(str::to_string).collect();
        let mut raw = String::new();
        archive
            .by_name(MANIFEST_NAME)
            .unwrap()
            .read_to_string(&mut raw)
            .unwrap();
        (names, serde_json::from_str(&raw).unwrap())
    }

    #[test]
    fn manifest_lists_exactly_the_packaged_files() {
        let fx = fixture();
        let request = request(&fx, true);
        let path = ArchiveBuilder::new(&fx.output).build_blocking(&request).unwrap();

        let (names, manifest) = read_archive(&path);
        let declared: BTreeSet<String> = manifest.files.iter().cloned().collect();
        assert_eq!(names, declared);
        assert!(names.contains("screenshots/01_initial_page.png"));
        assert!(names.contains("messung.csv"));
        assert!(names.contains("page.html"));
        assert_eq!(manifest.export_id, request.id);
        assert_eq!(manifest.measurement.download_mbps, Some(100.5));
        assert_eq!(manifest.disclaimer, DISCLAIMER);
    }

    #[test]
    fn builds_without_export() {
        let fx = fixture();
        let path = ArchiveBuilder::new(&fx.output)
            .build_blocking(&request(&fx, false))
            .unwrap();

        let (names, manifest) = read_archive(&path);
        assert_eq!(names.len(), 4);
        assert!(!names.iter().any(|name| name.ends_with(".csv")));
        assert_eq!(manifest.files.len(), 4);
    }

    #[test]
    fn missing_screenshot_is_left_out_of_manifest() {
        let fx = fixture();
        let mut request = request(&fx, false);
        request.screenshots.push(fx.inputs.join("never_written.png"));

        let path = ArchiveBuilder::new(&fx.output).build_blocking(&request).unwrap();
        let (names, manifest) = read_archive(&path);
        assert!(!names.contains("screenshots/never_written.png"));
        assert_eq!(names, manifest.files.iter().cloned().collect());
    }

    #[test]
    fn missing_snapshot_fails_without_leaving_files() {
        let fx = fixture();
        let mut request = request(&fx, true);
        request.snapshot_file = fx.inputs.join("absent.html");

        let err = ArchiveBuilder::new(&fx.output)
            .build_blocking(&request)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::MissingInput { .. }));
        let leftovers = std::fs::read_dir(&fx.output).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn async_build_runs_on_blocking_pool() {
        let fx = fixture();
        let path = ArchiveBuilder::new(&fx.output)
            .build(request(&fx, true))
            .await
            .unwrap();
        assert!(path.is_file());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("zip"));
    }
}
