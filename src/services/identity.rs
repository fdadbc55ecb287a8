//! Reference dataset loading and identity resolution.
//!
//! Two JSON tables feed the index: the primary subject table
//! (`character_table.json`) and an optional faction table
//! (`handbookpos_table.json`) carrying accent colors. The index is built
//! once and read-only afterwards; a failed load leaves it empty so callers
//! proceed in degraded mode instead of aborting.

use crate::models::{OperatorRecord, class_label};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

pub const CHARACTER_TABLE: &str = "character_table.json";
pub const HANDBOOK_TABLE: &str = "handbookpos_table.json";

/// Fuzzy matches below this 0-100 score are discarded.
pub const DEFAULT_FUZZY_THRESHOLD: u32 = 80;

/// At most this many fuzzy candidates are surfaced.
pub const DEFAULT_FUZZY_LIMIT: usize = 5;

/// Accent color for records the faction table does not cover.
const FALLBACK_COLOR: &str = "#ff0000";

/// Result of a combined exact/fuzzy lookup.
///
/// When `is_exact` is true `candidates` is empty; otherwise candidates are
/// sorted by descending score and every score clears the threshold.
#[derive(Debug, Clone)]
pub struct IdentityMatch {
    pub record: Option<OperatorRecord>,
    pub is_exact: bool,
    pub candidates: Vec<(OperatorRecord, u32)>,
}

#[derive(Debug, Deserialize)]
struct CharacterTable {
    #[serde(rename = "Characters", default)]
    characters: IndexMap<String, CharacterEntry>,
}

#[derive(Debug, Deserialize)]
struct CharacterEntry {
    #[serde(rename = "Appellation", default)]
    appellation: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "DisplayNumber", default)]
    display_number: String,
    #[serde(rename = "NationId", default)]
    nation_id: Option<String>,
    #[serde(rename = "Profession", default)]
    profession: u32,
}

#[derive(Debug, Deserialize)]
struct HandbookTable {
    #[serde(rename = "groupList", default)]
    group_list: HashMap<String, HandbookGroup>,
}

#[derive(Debug, Deserialize)]
struct HandbookGroup {
    #[serde(rename = "forceDataList", default)]
    force_data_list: Vec<ForceData>,
}

#[derive(Debug, Deserialize)]
struct ForceData {
    #[serde(default)]
    color: Option<String>,
    #[serde(rename = "charList", default)]
    char_list: Vec<String>,
}

/// The in-memory subject index: id-keyed records, a case-folded name map
/// and the name list used as the fuzzy-match corpus.
pub struct IdentityIndex {
    operators: IndexMap<String, OperatorRecord>,
    name_index: HashMap<String, String>,
    names: Vec<String>,
    loaded: bool,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self {
            operators: IndexMap::new(),
            name_index: HashMap::new(),
            names: Vec::new(),
            loaded: false,
        }
    }

    /// Build an index from `data_dir`, empty on failure.
    pub fn load_from(data_dir: &Utf8Path) -> Self {
        let mut index = Self::new();
        index.load(data_dir);
        index
    }

    /// Load both tables. Idempotent: a second call on a loaded index is a
    /// no-op returning true. Any failure leaves the index empty and
    /// returns false.
    pub fn load(&mut self, data_dir: &Utf8Path) -> bool {
        if self.loaded {
            return true;
        }

        let table_path = data_dir.join(CHARACTER_TABLE);
        if !table_path.is_file() {
            tracing::error!("Subject table missing: {}", table_path);
            return false;
        }

        let colors = load_faction_colors(&data_dir.join(HANDBOOK_TABLE));

        let table: CharacterTable = match fs::read_to_string(&table_path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from))
        {
            Ok(table) => table,
            Err(e) => {
                tracing::error!("Failed to load subject table {}: {}", table_path, e);
                return false;
            }
        };

        for (id, entry) in table.characters {
            if !id.starts_with("char_") {
                continue;
            }
            let record = OperatorRecord {
                name: entry.appellation,
                name_local: entry.name,
                code: entry.display_number,
                nation: entry.nation_id,
                class_tag: class_label(entry.profession).to_string(),
                accent_color: colors
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| FALLBACK_COLOR.to_string()),
                id: id.clone(),
            };

            let key = record.name.to_lowercase();
            if let Some(previous) = self.name_index.get(&key) {
                tracing::debug!(
                    "Duplicate display name {:?} ({} vs {})",
                    record.name,
                    id,
                    previous
                );
            }
            self.name_index.insert(key, id.clone());
            self.names.push(record.name.clone());
            self.operators.insert(id, record);
        }

        tracing::info!("Loaded {} subject records", self.operators.len());
        self.loaded = true;
        true
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Case-insensitive exact lookup by display name.
    pub fn lookup_exact(&self, name: &str) -> Option<OperatorRecord> {
        let key = name.trim().to_lowercase();
        let id = self.name_index.get(&key)?;
        self.operators.get(id).cloned()
    }

    /// Similarity-ranked matches against all known display names, filtered
    /// to `score >= threshold`, truncated to `limit`, best first.
    pub fn lookup_fuzzy(
        &self,
        name: &str,
        threshold: u32,
        limit: usize,
    ) -> Vec<(OperatorRecord, u32)> {
        let query = name.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&String, u32)> = self
            .names
            .iter()
            .map(|candidate| (candidate, similarity(&query, &candidate.to_lowercase())))
            .filter(|&(_, score)| score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(limit);

        scored
            .into_iter()
            .filter_map(|(candidate, score)| {
                let id = self.name_index.get(&candidate.to_lowercase())?;
                Some((self.operators.get(id)?.clone(), score))
            })
            .collect()
    }

    /// Exact match wins unconditionally; otherwise the best fuzzy candidate
    /// (if any clears `threshold`) with the full candidate list.
    pub fn resolve(&self, name: &str, threshold: u32) -> IdentityMatch {
        if let Some(record) = self.lookup_exact(name) {
            return IdentityMatch {
                record: Some(record),
                is_exact: true,
                candidates: Vec::new(),
            };
        }

        let candidates = self.lookup_fuzzy(name, threshold, DEFAULT_FUZZY_LIMIT);
        IdentityMatch {
            record: candidates.first().map(|(record, _)| record.clone()),
            is_exact: false,
            candidates,
        }
    }

    /// Free-text contains-match over display name, localized name and code,
    /// in index-iteration order. Meant for manual lookup UIs.
    pub fn search(&self, keyword: &str, limit: usize) -> Vec<OperatorRecord> {
        let trimmed = keyword.trim();
        let needle = trimmed.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::new();
        for record in self.operators.values() {
            if record.name.to_lowercase().contains(&needle)
                || record.name_local.contains(trimmed)
                || record.code.to_lowercase().contains(&needle)
            {
                results.push(record.clone());
                if results.len() >= limit {
                    break;
                }
            }
        }
        results
    }

    pub fn all_records(&self) -> impl Iterator<Item = &OperatorRecord> {
        self.operators.values()
    }
}

impl Default for IdentityIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// 0-100 similarity (normalized Levenshtein).
pub(crate) fn similarity(a: &str, b: &str) -> u32 {
    (strsim::normalized_levenshtein(a, b) * 100.0).round() as u32
}

fn load_faction_colors(path: &Utf8Path) -> HashMap<String, String> {
    let mut colors = HashMap::new();
    if !path.is_file() {
        tracing::warn!("Faction table missing: {}", path);
        return colors;
    }

    let table: HandbookTable = match fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from))
    {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("Failed to load faction table {}: {}", path, e);
            return colors;
        }
    };

    for group in table.group_list.values() {
        for force in &group.force_data_list {
            let color = format!("#{}", force.color.as_deref().unwrap_or("ff0000"));
            for id in &force.char_list {
                if id.starts_with("char_") {
                    colors.insert(id.clone(), color.clone());
                }
            }
        }
    }
    tracing::info!("Loaded accent colors for {} subjects", colors.len());
    colors
}
