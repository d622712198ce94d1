use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::record::ImageRecord;

const FILE_PREFIX: &str = "civitai_generation_data_";

/// `civitai_generation_data_2024-05-01T10-20-30.json`: the UTC ISO-8601
/// instant with `:` and `.` turned into `-`, cut at whole seconds.
pub fn file_name(at: DateTime<Utc>) -> String {
    format!("{}{}.json", FILE_PREFIX, at.format("%Y-%m-%dT%H-%M-%S"))
}

/// Pretty-printed JSON array, two-space indent.
pub fn to_json(records: &[ImageRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Write the export file into `dir` and return its path.
pub fn write(dir: &Path, records: &[ImageRecord], at: DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
    let path = dir.join(file_name(at));
    fs::write(&path, to_json(records)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;

    fn record(id: &str) -> ImageRecord {
        ImageRecord {
            image_id: id.to_string(),
            url: format!("https://civitai.com/images/{}", id),
            resources_used: Vec::new(),
            tags: vec!["portrait".into()],
            collected_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap(),
        }
    }

    #[test]
    fn file_name_pattern() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(678);
        assert_eq!(file_name(at), "civitai_generation_data_2024-01-02T03-04-05.json");

        let re = Regex::new(r"^civitai_generation_data_\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}\.json$").unwrap();
        assert!(re.is_match(&file_name(Utc::now())));
    }

    #[test]
    fn writes_pretty_array() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap();
        let path = write(dir.path(), &[record("1"), record("2")], at).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "civitai_generation_data_2024-05-01T10-20-30.json"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n  {\n    \"imageId\": \"1\""));

        let parsed: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1]["imageId"], "2");
    }
}
