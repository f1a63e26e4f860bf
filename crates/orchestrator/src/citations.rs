//! Citation coordination: remaps the assistant's per-turn local citation
//! markers onto globally stable display indexes.
//!
//! The [`SourceRegistry`] lives for the process: once a source key is
//! assigned a display index it keeps it, so re-citing a source in a later
//! turn yields the same number and the source panel never grows for it.
//! The per-turn scratch state maps the model's local numbering (from the
//! latest retrieval) onto registry indexes, provisionally during streaming
//! and definitively at commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ui::{UiEvent, UiSink};

/// Session-storage key for the opt-in registry persistence.
pub const REGISTRY_STORAGE_KEY: &str = "tinge-source-registry-v1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One retrieved source as returned by the knowledge search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub language: String,
}

impl Source {
    /// Identity key: lowercase `url|title|source|language`.
    pub fn source_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.url.to_lowercase(),
            self.title.to_lowercase(),
            self.source.to_lowercase(),
            self.language.to_lowercase()
        )
    }
}

/// Entry shown in the source panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelSource {
    pub display_index: u32,
    pub title: String,
    pub url: String,
    pub source: String,
    pub language: String,
}

/// Parse the retrieval response into `(local citation index, source)` pairs.
///
/// Accepts either a bare array or an object with a `results` array; items
/// without a `citation_index` are numbered by position (1-based).
pub fn sources_from_search_result(value: &Value) -> Vec<(u32, Source)> {
    let items = value
        .get("results")
        .and_then(|r| r.as_array())
        .or_else(|| value.as_array());
    let Some(items) = items else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let local = item
                .get("citation_index")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .unwrap_or(position as u32 + 1);
            let source: Source = serde_json::from_value(item.clone()).ok()?;
            Some((local, source))
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source registry (process lifetime)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryEntry {
    source: Source,
    display_index: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryInner {
    entries: HashMap<String, RegistryEntry>,
    next_display_index: u32,
}

/// Opt-in persistence target for the registry (session-scoped storage of
/// the embedding application). Not persisted by default.
pub trait SessionScopedStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);
}

/// Process-lifetime registry of cited sources with stable display indexes.
pub struct SourceRegistry {
    inner: RwLock<RegistryInner>,
    storage: Option<Arc<dyn SessionScopedStorage>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                entries: HashMap::new(),
                next_display_index: 1,
            }),
            storage: None,
        }
    }

    /// Registry that loads from, and writes back to, session storage under
    /// [`REGISTRY_STORAGE_KEY`].
    pub fn with_storage(storage: Arc<dyn SessionScopedStorage>) -> Self {
        let inner = storage
            .get(REGISTRY_STORAGE_KEY)
            .and_then(|raw| serde_json::from_str::<RegistryInner>(&raw).ok())
            .filter(|inner| inner.next_display_index >= 1)
            .unwrap_or(RegistryInner {
                entries: HashMap::new(),
                next_display_index: 1,
            });
        Self {
            inner: RwLock::new(inner),
            storage: Some(storage),
        }
    }

    /// Display index already assigned to this key, if any.
    pub fn existing_index_for(&self, source_key: &str) -> Option<u32> {
        self.inner
            .read()
            .entries
            .get(source_key)
            .map(|e| e.display_index)
    }

    /// Display index for this source: exact key match first, then a
    /// URL-only match so retitled copies of the same page keep their index.
    pub fn existing_index_for_source(&self, source: &Source) -> Option<u32> {
        let inner = self.inner.read();
        if let Some(entry) = inner.entries.get(&source.source_key()) {
            return Some(entry.display_index);
        }
        if source.url.is_empty() {
            return None;
        }
        let url = source.url.to_lowercase();
        inner
            .entries
            .values()
            .find(|entry| entry.source.url.to_lowercase() == url)
            .map(|entry| entry.display_index)
    }

    /// The index the next new source would receive.
    pub fn next_display_index(&self) -> u32 {
        self.inner.read().next_display_index
    }

    /// Assign a display index to this source, or return the existing one.
    /// Assignment is monotonic and never reused or reassigned.
    pub fn get_or_assign(&self, source: &Source) -> u32 {
        if let Some(existing) = self.existing_index_for_source(source) {
            return existing;
        }
        let key = source.source_key();
        let index = {
            let mut inner = self.inner.write();
            // Double-checked: another caller may have won the race.
            if let Some(entry) = inner.entries.get(&key) {
                return entry.display_index;
            }
            let index = inner.next_display_index;
            inner.next_display_index += 1;
            inner.entries.insert(
                key,
                RegistryEntry {
                    source: source.clone(),
                    display_index: index,
                },
            );
            index
        };
        self.persist();
        index
    }

    /// Whether the panel knows this display index.
    pub fn has_display_index(&self, index: u32) -> bool {
        self.inner
            .read()
            .entries
            .values()
            .any(|e| e.display_index == index)
    }

    /// All registered sources, sorted by display index.
    pub fn panel_sources(&self) -> Vec<PanelSource> {
        let inner = self.inner.read();
        let mut sources: Vec<PanelSource> = inner
            .entries
            .values()
            .map(|entry| PanelSource {
                display_index: entry.display_index,
                title: entry.source.title.clone(),
                url: entry.source.url.clone(),
                source: entry.source.source.clone(),
                language: entry.source.language.clone(),
            })
            .collect();
        sources.sort_by_key(|s| s.display_index);
        sources
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    fn persist(&self) {
        if let Some(storage) = &self.storage {
            match serde_json::to_string(&*self.inner.read()) {
                Ok(raw) => storage.put(REGISTRY_STORAGE_KEY, &raw),
                Err(e) => tracing::warn!(error = %e, "source registry persist failed"),
            }
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Marker scanning & remapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("static regex"))
}

fn paren_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+)\)").expect("static regex"))
}

fn named_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:source|fuente)\s*#\s*(\d+)").expect("static regex"))
}

/// Local indexes cited in `text`, in order of first appearance.
pub fn scan_local_indexes(text: &str) -> Vec<u32> {
    let mut ordered: Vec<(usize, u32)> = Vec::new();
    for re in [bracket_re(), paren_re(), named_re()] {
        for capture in re.captures_iter(text) {
            let whole = capture.get(0).expect("match");
            if let Ok(index) = capture[1].parse::<u32>() {
                ordered.push((whole.start(), index));
            }
        }
    }
    ordered.sort_by_key(|(pos, _)| *pos);
    let mut seen = Vec::new();
    for (_, index) in ordered {
        if !seen.contains(&index) {
            seen.push(index);
        }
    }
    seen
}

/// Rewrite every recognized marker whose index has a mapping into the
/// canonical `[global]` form, in one simultaneous pass. Unmapped markers
/// are left unchanged.
pub fn remap_markers(text: &str, map: &BTreeMap<u32, u32>) -> String {
    let rewrite = |caps: &regex::Captures| -> String {
        match caps[1].parse::<u32>().ok().and_then(|n| map.get(&n)) {
            Some(global) => format!("[{global}]"),
            None => caps[0].to_string(),
        }
    };
    let pass1 = bracket_re().replace_all(text, rewrite);
    let pass2 = paren_re().replace_all(&pass1, rewrite);
    named_re().replace_all(&pass2, rewrite).into_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Citation coordinator (per-turn scratch over the registry)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct TurnScratch {
    pending_retrieved: HashMap<u32, Source>,
    pending_local_to_global: BTreeMap<u32, u32>,
    pending_provisional_by_key: HashMap<String, u32>,
    provisional_next: u32,
    stream_raw: String,
}

/// Outcome of committing one turn's transcript.
#[derive(Debug, Clone)]
pub struct CommittedTurn {
    pub text: String,
    pub panel: Vec<PanelSource>,
}

pub struct CitationCoordinator {
    registry: Arc<SourceRegistry>,
    scratch: Mutex<TurnScratch>,
    ui: UiSink,
}

impl CitationCoordinator {
    pub fn new(registry: Arc<SourceRegistry>, ui: UiSink) -> Self {
        Self {
            registry,
            scratch: Mutex::new(TurnScratch::default()),
            ui,
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// A new retrieval begins: clear the turn scratch and the streaming
    /// buffer, and seed the provisional counter from the registry.
    pub fn on_search_started(&self) {
        let mut scratch = self.scratch.lock();
        *scratch = TurnScratch {
            provisional_next: self.registry.next_display_index(),
            ..TurnScratch::default()
        };
    }

    /// Retrieval results arrived: index them by local citation index and
    /// resolve each to an existing registry index or a fresh provisional.
    pub fn on_search_result(&self, results: Vec<(u32, Source)>) {
        let mut scratch = self.scratch.lock();
        let TurnScratch {
            pending_retrieved,
            pending_local_to_global,
            pending_provisional_by_key,
            provisional_next,
            ..
        } = &mut *scratch;
        for (local, source) in results {
            let key = source.source_key();
            let global = match self.registry.existing_index_for_source(&source) {
                Some(existing) => existing,
                None => *pending_provisional_by_key.entry(key).or_insert_with(|| {
                    let index = *provisional_next;
                    *provisional_next += 1;
                    index
                }),
            };
            pending_local_to_global.insert(local, global);
            pending_retrieved.insert(local, source);
        }
    }

    /// One streaming delta: append to the raw buffer, reserve indexes for
    /// newly seen markers, and return the whole transcript-so-far with all
    /// markers remapped.
    pub fn on_streaming_delta(&self, delta: &str) -> String {
        let mut scratch = self.scratch.lock();
        scratch.stream_raw.push_str(delta);
        let locals = scan_local_indexes(&scratch.stream_raw);
        let TurnScratch {
            pending_retrieved,
            pending_local_to_global,
            pending_provisional_by_key,
            provisional_next,
            stream_raw,
        } = &mut *scratch;
        for local in locals {
            if pending_local_to_global.contains_key(&local) {
                continue;
            }
            let Some(source) = pending_retrieved.get(&local) else {
                continue;
            };
            let key = source.source_key();
            let global = match self.registry.existing_index_for_source(source) {
                Some(existing) => existing,
                None => *pending_provisional_by_key.entry(key).or_insert_with(|| {
                    let index = *provisional_next;
                    *provisional_next += 1;
                    index
                }),
            };
            pending_local_to_global.insert(local, global);
        }
        remap_markers(stream_raw, pending_local_to_global)
    }

    /// Commit the final transcript: realize display indexes for every cited
    /// source (in order of first appearance), remap the text, update the
    /// panel, and reset the scratch.
    pub fn commit(&self, final_text: &str) -> CommittedTurn {
        let mut scratch = self.scratch.lock();
        let cited = scan_local_indexes(final_text);

        let mut final_map: BTreeMap<u32, u32> = BTreeMap::new();
        for local in &cited {
            if let Some(source) = scratch.pending_retrieved.get(local) {
                final_map.insert(*local, self.registry.get_or_assign(source));
            }
        }

        let text = if final_map.is_empty() {
            self.fallback_text(final_text, &scratch)
        } else {
            remap_markers(final_text, &final_map)
        };

        *scratch = TurnScratch {
            provisional_next: self.registry.next_display_index(),
            ..TurnScratch::default()
        };
        drop(scratch);

        let panel = self.registry.panel_sources();
        self.ui.emit(UiEvent::SourcePanelUpdated {
            sources: panel.clone(),
        });
        CommittedTurn { text, panel }
    }

    /// No recognizable marker in the utterance: append `[i]` suffixes for
    /// the turn's distinct global indexes, ascending, skipping indexes the
    /// panel does not recognize. Without a pending mapping the text is
    /// returned unchanged.
    fn fallback_text(&self, final_text: &str, scratch: &TurnScratch) -> String {
        if scratch.pending_local_to_global.is_empty() {
            return final_text.to_string();
        }
        let mut globals: Vec<u32> = scratch
            .pending_local_to_global
            .values()
            .copied()
            .collect();
        globals.sort_unstable();
        globals.dedup();

        let mut text = final_text.to_string();
        for global in globals {
            if !self.registry.has_display_index(global) {
                continue;
            }
            text.push_str(&format!(" [{global}]"));
        }
        text
    }
}
