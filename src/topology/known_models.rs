use once_cell::sync::Lazy;
use serde::Deserialize;

use super::Layout;

#[derive(Deserialize)]
struct ModelsRoot {
    models: Vec<KnownModel>,
}

/// One entry of the embedded model table.
#[derive(Debug, Clone, Deserialize)]
pub struct KnownModel {
    pub name: String,
    /// Every keyword must appear in the normalized model name.
    pub keywords: Vec<String>,
    /// Restricts the entry to one logical processor count when set.
    #[serde(default)]
    pub threads: Option<usize>,
    pub layout: Layout,
}

const MODELS_JSON: &str = include_str!("../../assets/cpu_models.json");

// The table is compiled in; a parse failure is caught by the tests below.
static MODELS: Lazy<Vec<KnownModel>> =
    Lazy::new(|| match serde_json::from_str::<ModelsRoot>(MODELS_JSON) {
        Ok(root) => root.models,
        Err(e) => {
            tracing::error!("embedded cpu_models.json is invalid: {e}");
            Vec::new()
        }
    });

/// Lowercases a brand string and strips the marketing noise around the model number.
///
/// `"13th Gen Intel(R) Core(TM) i9-13900K CPU @ 3.00GHz"` becomes
/// `"13th gen intel core i9-13900k"`.
pub fn normalize_model_name(model: &str) -> String {
    let lower = model.to_lowercase();
    let without_clock = lower.split('@').next().unwrap_or_default();
    without_clock
        .replace("(r)", "")
        .replace("(tm)", "")
        .split_whitespace()
        .filter(|word| *word != "cpu")
        .collect::<Vec<_>>()
        .join(" ")
}

/// First table entry whose keywords all occur in `model` and whose thread count, if any,
/// equals `logical_count`. Entries are ordered most specific first.
pub fn lookup_model(model: &str, logical_count: usize) -> Option<&'static KnownModel> {
    let normalized = normalize_model_name(model);
    MODELS.iter().find(|entry| {
        let threads_match = entry.threads.is_none_or(|t| t == logical_count);
        let keywords_match = !entry.keywords.is_empty()
            && entry
                .keywords
                .iter()
                .all(|kw| normalized.contains(normalize_model_name(kw).as_str()));
        threads_match && keywords_match
    })
}
