//! Assistant-turn state machine.
//!
//! Prevents stale assistant transcript/audio events, emitted after the user
//! has barged in, from polluting the current bubble or producing an orphan
//! recorded clip. While `interrupted`, assistant events are suppressed until
//! a drain signal arrives or the drain window elapses.

use std::time::{Duration, Instant};

use chrono::Utc;

/// Phase of the current assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Speaking,
    Interrupted,
}

/// One transcript fragment with its offset from capture start.
#[derive(Debug, Clone, PartialEq)]
pub struct WordOffset {
    pub word: String,
    pub offset_ms: u64,
}

/// Buffers accumulated over one assistant turn.
#[derive(Debug, Clone, Default)]
pub struct TurnBuffers {
    pub transcript: String,
    pub word_offsets: Vec<WordOffset>,
    pub recording_start_ms: Option<i64>,
}

/// Result of an interrupt that actually cancelled a speaking turn.
#[derive(Debug)]
pub struct InterruptTransition {
    pub buffers: TurnBuffers,
    /// Matches the generation handed to the drain timer; a stale timer
    /// firing after the next turn started is ignored.
    pub drain_generation: u64,
}

pub struct TurnGate {
    phase: TurnPhase,
    started_at: Option<Instant>,
    buffers: TurnBuffers,
    drain_deadline: Option<Instant>,
    drain_generation: u64,
}

impl Default for TurnGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnGate {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::Idle,
            started_at: None,
            buffers: TurnBuffers::default(),
            drain_deadline: None,
            drain_generation: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Whether assistant transcript/audio events may reach the UI and the
    /// capture buffers right now.
    pub fn allows_assistant_events(&self) -> bool {
        self.phase != TurnPhase::Interrupted
    }

    /// A delta or buffer-start observed while idle begins the turn;
    /// whichever arrives first wins. Returns `true` on the transition.
    pub fn begin_speaking(&mut self, now: Instant) -> bool {
        if self.phase != TurnPhase::Idle {
            return false;
        }
        self.phase = TurnPhase::Speaking;
        self.started_at = Some(now);
        self.buffers = TurnBuffers {
            transcript: String::new(),
            word_offsets: Vec::new(),
            recording_start_ms: Some(Utc::now().timestamp_millis()),
        };
        true
    }

    /// Accumulate one transcript fragment.
    pub fn push_delta(&mut self, delta: &str, now: Instant) {
        if self.phase != TurnPhase::Speaking {
            return;
        }
        let offset_ms = self
            .started_at
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0);
        self.buffers.word_offsets.push(WordOffset {
            word: delta.to_string(),
            offset_ms,
        });
        self.buffers.transcript.push_str(delta);
    }

    pub fn transcript(&self) -> &str {
        &self.buffers.transcript
    }

    /// Replace the buffered transcript (used after citation remapping).
    pub fn set_transcript(&mut self, text: impl Into<String>) {
        self.buffers.transcript = text.into();
    }

    /// Normal end of a speaking turn (`output_audio_buffer.stopped`):
    /// return to idle and hand the buffers to finalization.
    pub fn end_speaking(&mut self) -> Option<TurnBuffers> {
        if self.phase != TurnPhase::Speaking {
            return None;
        }
        self.phase = TurnPhase::Idle;
        self.started_at = None;
        Some(std::mem::take(&mut self.buffers))
    }

    /// User barge-in. Only a speaking turn can be interrupted; otherwise
    /// this is a no-op and nothing is emitted.
    pub fn interrupt(
        &mut self,
        now: Instant,
        drain_timeout: Duration,
    ) -> Option<InterruptTransition> {
        if self.phase != TurnPhase::Speaking {
            return None;
        }
        self.phase = TurnPhase::Interrupted;
        self.started_at = None;
        self.drain_generation += 1;
        self.drain_deadline = Some(now + drain_timeout);
        Some(InterruptTransition {
            buffers: std::mem::take(&mut self.buffers),
            drain_generation: self.drain_generation,
        })
    }

    /// A terminal event (`output_audio_buffer.stopped` / `response.done`)
    /// consumed during the drain window. Returns `true` when it ends the
    /// interrupted state.
    pub fn on_drain_signal(&mut self) -> bool {
        if self.phase != TurnPhase::Interrupted {
            return false;
        }
        self.phase = TurnPhase::Idle;
        self.drain_deadline = None;
        true
    }

    /// The drain window elapsed without a terminal event. Stale timers
    /// (from an earlier interrupt) are ignored via the generation check.
    pub fn on_drain_elapsed(&mut self, generation: u64) -> bool {
        if self.phase != TurnPhase::Interrupted || generation != self.drain_generation {
            return false;
        }
        self.phase = TurnPhase::Idle;
        self.drain_deadline = None;
        true
    }

    pub fn drain_deadline(&self) -> Option<Instant> {
        self.drain_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAIN: Duration = Duration::from_secs(4);

    #[test]
    fn delta_or_buffer_start_begins_the_turn() {
        let mut gate = TurnGate::new();
        let now = Instant::now();
        assert_eq!(gate.phase(), TurnPhase::Idle);
        assert!(gate.begin_speaking(now));
        assert_eq!(gate.phase(), TurnPhase::Speaking);
        // Second starter is a no-op, whichever event kind it was.
        assert!(!gate.begin_speaking(now));
    }

    #[test]
    fn deltas_accumulate_with_offsets() {
        let mut gate = TurnGate::new();
        let start = Instant::now();
        gate.begin_speaking(start);
        gate.push_delta("Hola ", start + Duration::from_millis(120));
        gate.push_delta("mundo", start + Duration::from_millis(350));
        assert_eq!(gate.transcript(), "Hola mundo");
        let buffers = gate.end_speaking().unwrap();
        assert_eq!(buffers.word_offsets.len(), 2);
        assert_eq!(buffers.word_offsets[0].offset_ms, 120);
        assert!(buffers.recording_start_ms.is_some());
        assert_eq!(gate.phase(), TurnPhase::Idle);
    }

    #[test]
    fn interrupt_cancels_a_speaking_turn() {
        let mut gate = TurnGate::new();
        let now = Instant::now();
        gate.begin_speaking(now);
        gate.push_delta("First answer.", now);

        let transition = gate.interrupt(now, DRAIN).unwrap();
        assert_eq!(transition.buffers.transcript, "First answer.");
        assert_eq!(gate.phase(), TurnPhase::Interrupted);
        assert!(!gate.allows_assistant_events());
        assert!(gate.drain_deadline().is_some());

        // Stale deltas during the drain do not accumulate.
        gate.push_delta(" stale tail", now);
        assert_eq!(gate.transcript(), "");
    }

    #[test]
    fn interrupt_while_idle_is_a_no_op() {
        let mut gate = TurnGate::new();
        assert!(gate.interrupt(Instant::now(), DRAIN).is_none());
        assert_eq!(gate.phase(), TurnPhase::Idle);
    }

    #[test]
    fn drain_signal_returns_to_idle() {
        let mut gate = TurnGate::new();
        let now = Instant::now();
        gate.begin_speaking(now);
        gate.interrupt(now, DRAIN).unwrap();

        assert!(gate.on_drain_signal());
        assert_eq!(gate.phase(), TurnPhase::Idle);
        assert!(gate.drain_deadline().is_none());
        // Next turn starts cleanly.
        assert!(gate.begin_speaking(now));
    }

    #[test]
    fn drain_timer_is_generation_checked() {
        let mut gate = TurnGate::new();
        let now = Instant::now();
        gate.begin_speaking(now);
        let first = gate.interrupt(now, DRAIN).unwrap();

        // Terminal event arrives first; the timer must then be stale.
        assert!(gate.on_drain_signal());
        gate.begin_speaking(now);
        let second = gate.interrupt(now, DRAIN).unwrap();
        assert_ne!(first.drain_generation, second.drain_generation);

        assert!(!gate.on_drain_elapsed(first.drain_generation));
        assert_eq!(gate.phase(), TurnPhase::Interrupted);
        assert!(gate.on_drain_elapsed(second.drain_generation));
        assert_eq!(gate.phase(), TurnPhase::Idle);
    }

    #[test]
    fn end_speaking_outside_speaking_is_none() {
        let mut gate = TurnGate::new();
        assert!(gate.end_speaking().is_none());
        gate.begin_speaking(Instant::now());
        gate.interrupt(Instant::now(), DRAIN);
        assert!(gate.end_speaking().is_none());
    }
}
