//! Album classification: prompt and schema for the structured call, the batch
//! processor wiring, and the pure post-processing helpers (canonical dedup key,
//! suggested target path).

use crate::scan::AlbumInfo;
use async_trait::async_trait;
use cratedig_core::config::CategoriesConfig;
use cratedig_core::{
    ApiError, BatchResult, CallParams, ItemProcessor, SchemaValidator, StructuredCallClient,
    WorkItem,
};
use serde_json::{json, Value};
use std::fmt::Write;
use std::sync::Arc;

pub const SCHEMA_NAME: &str = "AlbumClassification";

/// The shape every classification answer must satisfy. Category membership is
/// enforced by the schema enum so an off-list answer fails validation and is
/// retried rather than silently accepted.
pub fn album_schema(categories: &CategoriesConfig) -> Value {
    json!({
        "type": "object",
        "properties": {
            "artist": {
                "type": "string",
                "description": "Primary artist, or 'Various Artists' for compilations"
            },
            "title": {
                "type": "string",
                "description": "Album title without artist, year, or format noise"
            },
            "year": {
                "type": ["integer", "null"],
                "description": "Original release year, null if unknown"
            },
            "category": {
                "type": "string",
                "enum": &categories.top_buckets,
                "description": "Top-level library bucket"
            },
            "subcategory": {
                "type": ["string", "null"],
                "enum": subcategory_enum(categories),
                "description": "Soundtrack medium, null for every other category"
            },
            "tags": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Lowercase genre or style descriptors"
            },
            "confidence": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0,
                "description": "Classification confidence"
            }
        },
        "required": ["artist", "title", "year", "category", "confidence"]
    })
}

fn subcategory_enum(categories: &CategoriesConfig) -> Value {
    let mut values: Vec<Value> = categories
        .soundtrack_subs
        .iter()
        .map(|s| Value::String(s.clone()))
        .collect();
    values.push(Value::Null);
    Value::Array(values)
}

/// Describe one album directory for the model: folder name, disc/track shape,
/// and a few file stems. No tag reading; the directory itself is the evidence.
pub fn build_prompt(album: &AlbumInfo, categories: &CategoriesConfig) -> String {
    let mut p = String::new();
    let _ = writeln!(p, "Classify this music album directory for library organization.");
    let _ = writeln!(p);
    let _ = writeln!(p, "Folder name: {}", album.folder_name);
    let _ = writeln!(
        p,
        "Contents: {} tracks across {} disc(s), formats: {}",
        album.track_count,
        album.disc_count,
        album.formats.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    if !album.sample_tracks.is_empty() {
        let _ = writeln!(p, "Sample track names:");
        for t in &album.sample_tracks {
            let _ = writeln!(p, "  - {t}");
        }
    }
    let _ = writeln!(p);
    let _ = writeln!(
        p,
        "Choose exactly one category from: {}.",
        categories.top_buckets.join(", ")
    );
    let _ = writeln!(
        p,
        "If the category is Soundtracks, also choose a subcategory from: {}; \
         otherwise the subcategory must be null.",
        categories.soundtrack_subs.join(", ")
    );
    p
}

/// One album through the structured-call client. Owns nothing batch-specific;
/// the orchestrator handles records and failure folding.
pub struct AlbumClassifier {
    client: Arc<StructuredCallClient>,
    validator: SchemaValidator,
    model: String,
    params: CallParams,
    categories: CategoriesConfig,
}

impl AlbumClassifier {
    pub fn new(
        client: Arc<StructuredCallClient>,
        validator: SchemaValidator,
        model: String,
        params: CallParams,
        categories: CategoriesConfig,
    ) -> Self {
        Self {
            client,
            validator,
            model,
            params,
            categories,
        }
    }
}

#[async_trait]
impl ItemProcessor<AlbumInfo> for AlbumClassifier {
    async fn process(&self, item: &WorkItem<AlbumInfo>) -> Result<Value, ApiError> {
        let prompt = build_prompt(&item.payload, &self.categories);
        let mut payload = self
            .client
            .get_structured(&prompt, &self.model, &self.validator, self.params)
            .await?;
        let suggested = suggested_path(&payload);
        if let Value::Object(map) = &mut payload {
            map.insert("suggested_path".to_string(), Value::String(suggested));
            map.insert(
                "source_path".to_string(),
                Value::String(item.path.to_string_lossy().into_owned()),
            );
        }
        Ok(payload)
    }
}

/// Canonical identity of a classified album: artist, title, year, and sorted
/// tags, lowercased. Two directories with the same identity are duplicates.
pub fn canonical_key(result: &BatchResult) -> Option<String> {
    let payload = result.payload.as_ref()?;
    let artist = payload.get("artist")?.as_str()?;
    let title = payload.get("title")?.as_str()?;
    let year = payload
        .get("year")
        .and_then(|y| y.as_i64())
        .map(|y| y.to_string())
        .unwrap_or_default();
    let mut tags: Vec<String> = payload
        .get("tags")
        .and_then(|t| t.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .collect()
        })
        .unwrap_or_default();
    tags.sort();
    Some(format!(
        "{}::{}::{}::{}",
        artist.trim().to_lowercase(),
        title.trim().to_lowercase(),
        year,
        tags.join(",")
    ))
}

/// Target location inside the reorganized library:
/// `Category[/Subcategory]/Artist - Title (Year)`.
pub fn suggested_path(payload: &Value) -> String {
    let category = payload
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or("Misc");
    let artist = payload
        .get("artist")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Artist");
    let title = payload
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Album");

    let mut leaf = format!("{} - {}", sanitize_component(artist), sanitize_component(title));
    if let Some(year) = payload.get("year").and_then(|v| v.as_i64()) {
        let _ = write!(leaf, " ({year})");
    }

    match payload.get("subcategory").and_then(|v| v.as_str()) {
        Some(sub) if category == "Soundtracks" => {
            format!("{}/{}/{}", category, sanitize_component(sub), leaf)
        }
        _ => format!("{category}/{leaf}"),
    }
}

/// Strip characters that are unsafe or awkward in directory names.
fn sanitize_component(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').trim().to_string()
}
