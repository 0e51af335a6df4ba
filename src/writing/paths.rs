use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{Error, Result};

/// Where one writing occasion puts its files: a run directory plus the
/// shared `YYYYMMDD_runNNNN` filename stem. `path("chan3", "ljh")` yields
/// `<dir>/YYYYMMDD_runNNNN_chan3.ljh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    directory: PathBuf,
    stem: String,
}

impl FilenamePattern {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self, name: &str, ext: &str) -> PathBuf {
        self.directory.join(format!("{}_{}.{}", self.stem, name, ext))
    }

    /// The display form clients see in the WRITING status message.
    pub fn display(&self) -> String {
        self.directory
            .join(format!("{}_%s.%s", self.stem))
            .to_string_lossy()
            .into_owned()
    }
}

/// Allocates `base/YYYYMMDD/NNNN/` with the smallest unused 4-digit run
/// number for today, creating the directories.
pub fn make_directory(base: &str) -> Result<FilenamePattern> {
    if base.is_empty() {
        return Err(Error::config("writing base path is empty"));
    }
    let today = Local::now().format("%Y%m%d").to_string();
    let today_dir = Path::new(base).join(&today);
    fs::create_dir_all(&today_dir)?;
    for run in 0..10_000 {
        let run_dir = today_dir.join(format!("{run:04}"));
        if !run_dir.exists() {
            fs::create_dir_all(&run_dir)?;
            return Ok(FilenamePattern {
                directory: run_dir,
                stem: format!("{today}_run{run:04}"),
            });
        }
    }
    Err(Error::config(format!(
        "out of 4-digit run numbers for today in {}",
        today_dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn allocates_sequential_run_numbers() {
        let base = TempDir::new().unwrap();
        let base_str = base.path().to_str().unwrap();

        let first = make_directory(base_str).unwrap();
        let second = make_directory(base_str).unwrap();
        assert!(first.directory().ends_with("0000"));
        assert!(second.directory().ends_with("0001"));
        assert!(first.directory().exists());

        let file = first.path("chan0", "ljh");
        let name = file.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&Local::now().format("%Y%m%d").to_string()));
        assert!(name.ends_with("_run0000_chan0.ljh"));
    }

    #[test]
    fn empty_base_is_rejected() {
        assert!(make_directory("").is_err());
    }
}
