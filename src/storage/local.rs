//! Local filesystem backend.
//!
//! Layout under `savedir`:
//!
//! ```text
//! savedir/
//!   240309/
//!     box/143005.250.jpg     (motion rectangles drawn in)
//!     nobox/143005.250.jpg   (clean frame)
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;

use crate::config::LocalSettings;
use crate::storage::{Backend, UploadShot};

pub struct LocalFolderBackend {
    savedir: PathBuf,
}

impl LocalFolderBackend {
    pub fn new(settings: &LocalSettings) -> Self {
        Self {
            savedir: settings.savedir.clone(),
        }
    }

    fn day_root(&self, shot: &UploadShot) -> PathBuf {
        self.savedir.join(shot.day_dir())
    }
}

impl Backend for LocalFolderBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn check(&self) -> bool {
        self.savedir.is_dir()
    }

    fn configure(&mut self) -> Result<()> {
        fs::create_dir_all(&self.savedir)
            .with_context(|| format!("failed to create {}", self.savedir.display()))?;
        Ok(())
    }

    fn upload(&mut self, shot: &UploadShot) -> Result<()> {
        let root = self.day_root(shot);
        let boxed_dir = root.join("box");
        let clean_dir = root.join("nobox");
        fs::create_dir_all(&boxed_dir)
            .with_context(|| format!("failed to create {}", boxed_dir.display()))?;
        fs::create_dir_all(&clean_dir)
            .with_context(|| format!("failed to create {}", clean_dir.display()))?;

        let name = format!("{}.jpg", shot.file_stem());
        let boxed_path = boxed_dir.join(&name);
        let clean_path = clean_dir.join(&name);
        fs::write(&boxed_path, &shot.boxed_jpeg)
            .with_context(|| format!("failed to write {}", boxed_path.display()))?;
        fs::write(&clean_path, &shot.jpeg)
            .with_context(|| format!("failed to write {}", clean_path.display()))?;
        debug!("saved {} and boxed copy", clean_path.display());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CaptureStamp;
    use chrono::{TimeZone, Utc};

    fn shot() -> UploadShot {
        UploadShot {
            camera_id: "t/cam".to_string(),
            captured_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap(),
            stamp: CaptureStamp(1),
            jpeg: vec![1, 2, 3],
            boxed_jpeg: vec![4, 5, 6],
            regions: Vec::new(),
        }
    }

    #[test]
    fn upload_writes_boxed_and_clean_copies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut backend = LocalFolderBackend {
            savedir: dir.path().to_path_buf(),
        };
        backend.configure().expect("configure");
        backend.upload(&shot()).expect("upload");

        let boxed = dir.path().join("240309/box/143005.000.jpg");
        let clean = dir.path().join("240309/nobox/143005.000.jpg");
        assert_eq!(fs::read(boxed).unwrap(), vec![4, 5, 6]);
        assert_eq!(fs::read(clean).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn check_reflects_directory_presence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = LocalFolderBackend {
            savedir: dir.path().join("nope"),
        };
        assert!(!missing.check());
        let mut present = LocalFolderBackend {
            savedir: dir.path().join("yes"),
        };
        present.configure().expect("configure");
        assert!(present.check());
    }
}
