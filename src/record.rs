use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A model, LoRA or checkpoint referenced by a generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsed {
    pub name: String,
    /// Badge label such as "Checkpoint" or "LoRA"; empty when not shown.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
}

/// Everything collected from one image detail page. `image_id` is the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub image_id: String,
    pub url: String,
    #[serde(default)]
    pub resources_used: Vec<ResourceUsed>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_storage_field_names() {
        let record = ImageRecord {
            image_id: "42".into(),
            url: "https://civitai.com/images/42".into(),
            resources_used: vec![ResourceUsed {
                name: "Pony Diffusion".into(),
                kind: "Checkpoint".into(),
                version: "v6".into(),
            }],
            tags: vec!["character".into()],
            collected_at: "2024-05-01T10:20:30.123Z".parse().unwrap(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["imageId"], "42");
        assert_eq!(value["resourcesUsed"][0]["type"], "Checkpoint");
        assert_eq!(value["resourcesUsed"][0]["version"], "v6");
        assert!(value["collectedAt"].as_str().unwrap().starts_with("2024-05-01T10:20:30"));
    }

    #[test]
    fn reads_records_written_without_optional_fields() {
        let json = r#"{
            "imageId": "7",
            "url": "https://civitai.com/images/7",
            "resourcesUsed": [{ "name": "Detail Tweaker" }],
            "collectedAt": "2024-05-01T10:20:30.000Z"
        }"#;
        let record: ImageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.resources_used[0].kind, "");
        assert_eq!(record.resources_used[0].version, "");
        assert!(record.tags.is_empty());
    }
}
