//! Transcript bubble contract: turn begin/reuse, delta append with
//! completed-word extraction, per-word append, finalize, and utterance
//! dedup across redundant event paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use tinge_domain::utterance::{DeviceType, Speaker, UtteranceRecord};

/// Words shorter than this are not reported as completed (fillers, ruido).
const MIN_COMPLETED_WORD_LEN: usize = 3;

/// Prefix length used for content-based dedup keys.
const DEDUP_PREFIX_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BubbleHandle(pub u64);

#[derive(Debug)]
struct Bubble {
    id: u64,
    text: String,
    words_emitted: usize,
    finalized: bool,
    has_placeholder: bool,
}

pub struct BubbleManager {
    device: DeviceType,
    cooldown: Duration,
    next_id: u64,
    active: HashMap<Speaker, Bubble>,
    last_begin: HashMap<Speaker, Instant>,
    processed_ids: HashSet<String>,
    content_seen: HashMap<String, DeviceType>,
}

impl BubbleManager {
    pub fn new(device: DeviceType, cooldown: Duration) -> Self {
        Self {
            device,
            cooldown,
            next_id: 0,
            active: HashMap::new(),
            last_begin: HashMap::new(),
            processed_ids: HashSet::new(),
            content_seen: HashMap::new(),
        }
    }

    /// Begin (or resume) a turn for `speaker`.
    ///
    /// Reuses the most recent unfinalized bubble; on mobile, presses inside
    /// the cooldown window reuse the last bubble even if it was finalized,
    /// preventing rapid double-creation.
    pub fn begin_turn(&mut self, speaker: Speaker, now: Instant) -> BubbleHandle {
        if let Some(bubble) = self.active.get(&speaker) {
            let reuse_unfinalized = !bubble.finalized;
            let within_cooldown = self.device == DeviceType::Mobile
                && self
                    .last_begin
                    .get(&speaker)
                    .is_some_and(|at| now.saturating_duration_since(*at) < self.cooldown);
            if reuse_unfinalized || within_cooldown {
                return BubbleHandle(bubble.id);
            }
        }

        self.next_id += 1;
        let id = self.next_id;
        self.active.insert(
            speaker,
            Bubble {
                id,
                text: String::new(),
                words_emitted: 0,
                finalized: false,
                has_placeholder: true,
            },
        );
        self.last_begin.insert(speaker, now);
        BubbleHandle(id)
    }

    /// Append streamed text. For the assistant, returns lexical words of
    /// length > 2 completed since the last call.
    pub fn append_delta(&mut self, speaker: Speaker, delta: &str, now: Instant) -> Vec<String> {
        self.begin_turn(speaker, now);
        let bubble = self.active.get_mut(&speaker).expect("bubble just ensured");
        bubble.has_placeholder = false;
        bubble.text.push_str(delta);

        if speaker != Speaker::Ai {
            return Vec::new();
        }

        let words = lexical_words(&bubble.text);
        // The trailing word is complete only when the text ends on a
        // boundary character.
        let boundary_ended = bubble
            .text
            .chars()
            .next_back()
            .is_some_and(|c| !is_word_char(c));
        let complete_count = if boundary_ended {
            words.len()
        } else {
            words.len().saturating_sub(1)
        };

        let fresh: Vec<String> = words[bubble.words_emitted.min(complete_count)..complete_count]
            .iter()
            .filter(|w| w.chars().count() >= MIN_COMPLETED_WORD_LEN)
            .cloned()
            .collect();
        bubble.words_emitted = complete_count;
        fresh
    }

    /// Append a single hydrated word, clearing any placeholder.
    pub fn append_word(&mut self, speaker: Speaker, word: &str, now: Instant) {
        self.begin_turn(speaker, now);
        let bubble = self.active.get_mut(&speaker).expect("bubble just ensured");
        bubble.has_placeholder = false;
        if !bubble.text.is_empty() && !bubble.text.ends_with(' ') {
            bubble.text.push(' ');
        }
        bubble.text.push_str(word);
    }

    /// Finalize the active bubble, returning words not yet reported.
    pub fn finalize(&mut self, speaker: Speaker) -> Vec<String> {
        let Some(bubble) = self.active.get_mut(&speaker) else {
            return Vec::new();
        };
        if bubble.finalized {
            return Vec::new();
        }
        bubble.finalized = true;
        let words = lexical_words(&bubble.text);
        words[bubble.words_emitted.min(words.len())..].to_vec()
    }

    pub fn has_placeholder(&self, speaker: Speaker) -> bool {
        self.active
            .get(&speaker)
            .is_some_and(|bubble| bubble.has_placeholder)
    }

    pub fn text(&self, speaker: Speaker) -> Option<&str> {
        self.active.get(&speaker).map(|bubble| bubble.text.as_str())
    }

    /// Whether this utterance should be rendered, or has already been seen
    /// via another event path. Dedup keys: `(speaker, id)`,
    /// `(device, speaker, id)`, and `(speaker, first 30 chars)`.
    pub fn should_process_utterance(
        &mut self,
        record: &UtteranceRecord,
        device: DeviceType,
    ) -> bool {
        let id_key = format!("{}|{}", record.speaker.as_str(), record.id);
        let device_id_key = format!("{}|{}|{}", device.as_str(), record.speaker.as_str(), record.id);
        let prefix: String = record.text.chars().take(DEDUP_PREFIX_LEN).collect();
        let content_key = format!("{}|{}", record.speaker.as_str(), prefix);

        if self.processed_ids.contains(&id_key)
            || self.processed_ids.contains(&device_id_key)
            || self.content_seen.contains_key(&content_key)
        {
            return false;
        }
        self.processed_ids.insert(id_key);
        self.processed_ids.insert(device_id_key);
        self.content_seen.insert(content_key, device);
        true
    }
}

/// Schedule a deferred finalize; leftover words go to `on_words`.
pub fn schedule_finalize<F>(
    manager: Arc<Mutex<BubbleManager>>,
    speaker: Speaker,
    delay: Duration,
    on_words: F,
) where
    F: FnOnce(Vec<String>) + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let leftover = manager.lock().finalize(speaker);
        on_words(leftover);
    });
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\''
}

fn lexical_words(text: &str) -> Vec<String> {
    text.split(|c: char| !is_word_char(c))
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}
