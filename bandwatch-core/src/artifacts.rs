//! Filesystem layout for per-run artifacts.

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Where screenshots, raw exports/snapshots and finished archives go.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDirs {
    pub screenshots: PathBuf,
    pub data: PathBuf,
    pub archives: PathBuf,
}

impl ArtifactDirs {
    /// Conventional layout below a single export root.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            screenshots: root.join("screenshots"),
            data: root.join("data"),
            archives: root.join("zips"),
        }
    }

    pub fn ensure(&self) -> io::Result<()> {
        for dir in [&self.screenshots, &self.data, &self.archives] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub async fn ensure_async(&self) -> io::Result<()> {
        for dir in [&self.screenshots, &self.data, &self.archives] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// `<prefix>_<timestamp>.<extension>` with a filesystem-safe timestamp.
pub fn timestamped_name(prefix: &str, extension: &str, at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{prefix}_{stamp}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamped_name_has_no_colons_or_dots_in_stamp() {
        let at = Utc.with_ymd_and_hms(2026, 1, 22, 10, 15, 3).unwrap();
        assert_eq!(
            timestamped_name("01_initial_page", "png", at),
            "01_initial_page_2026-01-22T10-15-03-000Z.png"
        );
    }

    #[test]
    fn layout_nests_under_root() {
        let dirs = ArtifactDirs::under("/var/lib/bandwatch");
        assert_eq!(dirs.archives, PathBuf::from("/var/lib/bandwatch/zips"));
        assert_eq!(dirs.screenshots, PathBuf::from("/var/lib/bandwatch/screenshots"));
    }
}
