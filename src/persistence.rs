use std::fs;
use std::path::{Path, PathBuf};

use crate::suite::SuiteSummary;

pub fn default_report_path(root: &Path) -> PathBuf {
    root.join(".playheal").join("last-run.json")
}

pub fn save_report(path: &Path, summary: &SuiteSummary) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    let text = serde_json::to_string_pretty(summary).map_err(|e| e.to_string())?;
    fs::write(path, text).map_err(|e| e.to_string())
}
