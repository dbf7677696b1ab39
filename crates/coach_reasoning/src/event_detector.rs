//! C6 — pattern layer: score every keyword set against recent dialogue
//! and keep the top-confidence kind, rather than stopping at the first
//! trigger that fires. The LLM refinement layer follows the same
//! non-fatal-failure idiom as the rest of this crate: a provider error
//! here is logged and swallowed, never surfaced past this module's
//! boundary (§7 External dependency clause).

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use coach_core::{
    ChatRole, ContextEvent, ContextEventKind, CoreResult, DecisionMode, LlmClient, LlmMessage,
    LlmParams, MemoryKind, ShortTermBuffer, UserId,
};
use coach_core::EventDetector;
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Keyword sets are intentionally coarse; confidence comes from how many
/// distinct terms matched, not from any single term's strength.
struct KeywordLayer {
    kind: ContextEventKind,
    set: RegexSet,
}

fn keyword_layers() -> &'static Vec<KeywordLayer> {
    static LAYERS: Lazy<Vec<KeywordLayer>> = Lazy::new(|| {
        vec![
            KeywordLayer {
                kind: ContextEventKind::Illness,
                set: RegexSet::new([
                    r"(?i)\bfever\b",
                    r"(?i)\bsick\b",
                    r"(?i)\bcold\b",
                    r"(?i)\bflu\b",
                    r"(?i)\bheadache\b",
                    r"(?i)\bnausea\b",
                    r"(?i)\bdoctor\b",
                    r"(?i)\bmedicine\b",
                    r"(?i)\bnot feeling well\b",
                ])
                .unwrap(),
            },
            KeywordLayer {
                kind: ContextEventKind::Travel,
                set: RegexSet::new([
                    r"(?i)\bflight\b",
                    r"(?i)\bflying\b",
                    r"(?i)\btraveling\b",
                    r"(?i)\btravelling\b",
                    r"(?i)\btrip\b",
                    r"(?i)\bvacation\b",
                    r"(?i)\bairport\b",
                    r"(?i)\bhotel\b",
                    r"(?i)\babroad\b",
                ])
                .unwrap(),
            },
            KeywordLayer {
                kind: ContextEventKind::SocialEngagement,
                set: RegexSet::new([
                    r"(?i)\bdinner party\b",
                    r"(?i)\bbanquet\b",
                    r"(?i)\bwedding\b",
                    r"(?i)\bhappy hour\b",
                    r"(?i)\bcatching up with\b",
                    r"(?i)\bgathering\b",
                    r"(?i)\breunion\b",
                    r"(?i)\bparty\b",
                ])
                .unwrap(),
            },
            KeywordLayer {
                kind: ContextEventKind::HighStress,
                set: RegexSet::new([
                    r"(?i)\bdeadline\b",
                    r"(?i)\boverworked\b",
                    r"(?i)\bovertime\b",
                    r"(?i)\bburnt out\b",
                    r"(?i)\bburned out\b",
                    r"(?i)\bso stressed\b",
                    r"(?i)\bunder pressure\b",
                    r"(?i)\bcan't sleep\b",
                    r"(?i)\banxious\b",
                ])
                .unwrap(),
            },
        ]
    });
    &LAYERS
}

/// Ambiguous confidence band (§4.6) where the LLM layer is consulted.
const AMBIGUOUS_RANGE: std::ops::RangeInclusive<f32> = 0.35..=0.65;
/// Default TTL (hours) for `travel` events when no end-date is parseable
/// from the dialogue — the pattern layer here does no date extraction, so
/// this stands in for "until explicit end-date" per §4.6.
const TRAVEL_DEFAULT_TTL_HOURS: i64 = 72;
/// How far back into dialogue history the pattern layer scans.
const SCAN_WINDOW_HOURS: i64 = 24;
const SCAN_DIALOGUE_LIMIT: usize = 50;

pub struct PatternEventDetector {
    short_term: Arc<dyn ShortTermBuffer>,
    llm: Option<Arc<dyn LlmClient>>,
    ttl_hours: HashMap<String, i64>,
}

impl PatternEventDetector {
    pub fn new(
        short_term: Arc<dyn ShortTermBuffer>,
        llm: Option<Arc<dyn LlmClient>>,
        ttl_hours: HashMap<String, i64>,
    ) -> Self {
        Self { short_term, llm, ttl_hours }
    }

    fn ttl_for(&self, kind: ContextEventKind) -> ChronoDuration {
        if kind == ContextEventKind::Travel {
            let hours = self.ttl_hours.get(kind.as_str()).copied().unwrap_or(TRAVEL_DEFAULT_TTL_HOURS);
            return ChronoDuration::hours(hours);
        }
        let hours = self.ttl_hours.get(kind.as_str()).copied().unwrap_or(24);
        ChronoDuration::hours(hours)
    }

    /// Score each keyword layer against `text`, returning (kind,
    /// confidence, matched terms) sorted by confidence descending.
    fn score(&self, text: &str) -> Vec<(ContextEventKind, f32, usize)> {
        let mut scored: Vec<(ContextEventKind, f32, usize)> = keyword_layers()
            .iter()
            .map(|layer| {
                let matches = layer.set.matches(text).len();
                // Confidence saturates at 3+ distinct matched terms.
                let confidence = (matches as f32 / 3.0).min(1.0);
                (layer.kind, confidence, matches)
            })
            .filter(|(_, confidence, _)| *confidence > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    async fn refine_with_llm(
        &self,
        llm: &Arc<dyn LlmClient>,
        text: &str,
        candidate: ContextEventKind,
    ) -> Option<(ContextEventKind, f32)> {
        let system = "Classify the user's recent messages into exactly one of: \
            illness, travel, social_engagement, high_stress, or none. \
            Reply with a single lowercase word and nothing else.";
        let result = llm
            .complete(
                system,
                vec![LlmMessage { role: ChatRole::User, content: text.to_string() }],
                LlmParams { max_tokens: 8, temperature: 0.0 },
            )
            .await;

        match result {
            Ok(completion) => {
                let label = completion.text.trim().to_lowercase();
                let kind = match label.as_str() {
                    "illness" => Some(ContextEventKind::Illness),
                    "travel" => Some(ContextEventKind::Travel),
                    "social_engagement" => Some(ContextEventKind::SocialEngagement),
                    "high_stress" => Some(ContextEventKind::HighStress),
                    _ => None,
                }?;
                Some((kind, 0.75))
            }
            Err(err) => {
                tracing::warn!(error = %err, candidate = candidate.as_str(), "event detector llm layer failed, keeping pattern-layer result");
                None
            }
        }
    }
}

#[async_trait]
impl EventDetector for PatternEventDetector {
    async fn detect(
        &self,
        user: UserId,
        decision_mode: DecisionMode,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<ContextEvent>> {
        let entries = self.short_term.combined_context(user, 0, SCAN_DIALOGUE_LIMIT).await?;
        let cutoff = now - ChronoDuration::hours(SCAN_WINDOW_HOURS);
        let text: String = entries
            .iter()
            .filter(|e| e.kind == MemoryKind::Dialogue && e.created_at >= cutoff)
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Ok(Vec::new());
        }

        let scored = self.score(&text);
        let Some((top_kind, top_confidence, _)) = scored.first().copied() else {
            return Ok(Vec::new());
        };

        let (final_kind, final_confidence) =
            if AMBIGUOUS_RANGE.contains(&top_confidence) && decision_mode.uses_llm() {
                if let Some(llm) = &self.llm {
                    match self.refine_with_llm(llm, &text, top_kind).await {
                        Some(refined) => refined,
                        None => (top_kind, top_confidence),
                    }
                } else {
                    (top_kind, top_confidence)
                }
            } else {
                (top_kind, top_confidence)
            };

        let event = ContextEvent {
            id: Uuid::new_v4(),
            user,
            kind: final_kind,
            confidence: final_confidence,
            detected_at: now,
            evidence: Some(text.chars().take(200).collect()),
            expires_at: now + self.ttl_for(final_kind),
        };

        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::MemoryEntry;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct StubShortTerm {
        entries: Mutex<VecDeque<MemoryEntry>>,
    }

    #[async_trait]
    impl ShortTermBuffer for StubShortTerm {
        async fn add(&self, _user: UserId, _kind: MemoryKind, entry: MemoryEntry) -> CoreResult<()> {
            self.entries.lock().await.push_back(entry);
            Ok(())
        }

        async fn combined_context(
            &self,
            _user: UserId,
            _checkin_limit: usize,
            _dialogue_limit: usize,
        ) -> CoreResult<Vec<MemoryEntry>> {
            Ok(self.entries.lock().await.iter().cloned().collect())
        }

        async fn checkin_count(&self, _user: UserId) -> CoreResult<usize> {
            Ok(0)
        }

        async fn dialogue_count(&self, _user: UserId) -> CoreResult<usize> {
            Ok(self.entries.lock().await.len())
        }
    }

    fn dialogue(content: &str, now: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry {
            id: Uuid::new_v4(),
            user: UserId(1),
            kind: MemoryKind::Dialogue,
            content: content.to_string(),
            metadata: serde_json::Value::Null,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn strong_illness_signal_detected_without_llm() {
        let now = Utc::now();
        let short_term = Arc::new(StubShortTerm {
            entries: Mutex::new(VecDeque::from(vec![dialogue(
                "I've had a fever and a headache, took some medicine and saw the doctor",
                now,
            )])),
        });
        let detector = PatternEventDetector::new(short_term, None, HashMap::new());
        let events = detector.detect(UserId(1), DecisionMode::Balanced, now).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ContextEventKind::Illness);
        assert!(events[0].confidence >= 0.65);
    }

    #[tokio::test]
    async fn no_signal_returns_no_events() {
        let now = Utc::now();
        let short_term = Arc::new(StubShortTerm {
            entries: Mutex::new(VecDeque::from(vec![dialogue("logged breakfast, all good today", now)])),
        });
        let detector = PatternEventDetector::new(short_term, None, HashMap::new());
        let events = detector.detect(UserId(1), DecisionMode::Balanced, now).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn stale_dialogue_outside_scan_window_is_ignored() {
        let now = Utc::now();
        let short_term = Arc::new(StubShortTerm {
            entries: Mutex::new(VecDeque::from(vec![dialogue(
                "fever headache flu medicine doctor",
                now - ChronoDuration::hours(48),
            )])),
        });
        let detector = PatternEventDetector::new(short_term, None, HashMap::new());
        let events = detector.detect(UserId(1), DecisionMode::Balanced, now).await.unwrap();
        assert!(events.is_empty());
    }
}
