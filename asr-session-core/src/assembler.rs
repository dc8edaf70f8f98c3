//! C6: Result Assembler.
//!
//! Groups/merges utterance fragments, projects timestamps through the audio
//! timeline, and tracks two-pass delay metrics. Grounded on
//! `bytedance_llm_based_asr/extension.py` (`_on_asr_result`,
//! `TwoPassDelayTracker`, the `itertools.groupby`-based merge) — see
//! `spec.md` §4.6 and the literal scenarios in §8.

use serde_json::Map;

use crate::vendor::{ResultBatch, Utterance};

/// One emission produced by the assembler, pre-projection-ready; the caller
/// (the session orchestrator) adds `offset_before_last_reset_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledResult {
    pub text: String,
    pub is_final: bool,
    /// Vendor-relative start, to be projected by `AudioTimeline::audio_before`.
    pub vendor_start_ms: i64,
    pub duration_ms: i64,
    pub language: String,
    pub metadata: Map<String, serde_json::Value>,
}

/// Two-pass delay metric sample, emitted once a `hard_vad` final arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoPassMetrics {
    pub two_pass_delay_ms: i64,
    pub soft_two_pass_delay_ms: Option<i64>,
}

/// Outcome of processing one [`ResultBatch`].
#[derive(Debug, Default)]
pub struct AssembledBatch {
    pub results: Vec<AssembledResult>,
    pub metrics: Vec<TwoPassMetrics>,
    /// Whether any result in this batch was final — gates `finalize_end`.
    pub has_final: bool,
}

/// Tracks `stream` / `two_pass soft_vad` timestamps to compute two-pass
/// delay metrics, per utterance stream (`spec.md` §4.6 step 2).
#[derive(Debug, Default)]
struct TwoPassTracker {
    stream_ts: Option<i64>,
    soft_vad_ts: Option<i64>,
}

impl TwoPassTracker {
    fn record(&mut self, now_ms: i64, additions: &Map<String, serde_json::Value>, is_final: bool) -> Option<TwoPassMetrics> {
        let source = additions.get("source").and_then(|v| v.as_str()).unwrap_or("");
        let invoke_type = additions
            .get("invoke_type")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        match (source, invoke_type, is_final) {
            ("stream", _, _) => {
                self.stream_ts = Some(now_ms);
                None
            }
            ("two_pass", "soft_vad", _) => {
                self.soft_vad_ts = Some(now_ms);
                None
            }
            ("two_pass", "hard_vad", true) => {
                let two_pass_delay_ms = self.stream_ts.map_or(-1, |t| now_ms - t);
                let soft_two_pass_delay_ms = match (self.soft_vad_ts, self.stream_ts) {
                    (Some(soft), Some(stream)) => Some(soft - stream),
                    _ => Some(-1),
                };
                Some(TwoPassMetrics {
                    two_pass_delay_ms,
                    soft_two_pass_delay_ms,
                })
            }
            _ => None,
        }
    }
}

/// Configuration the assembler needs beyond grouping on/off: whether
/// soft-vad metrics are meaningful for this vendor request, matching the
/// original's `enable_nonstream`/`soft_vad_window_size` gating.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerOptions {
    pub enable_utterance_grouping: bool,
    pub emit_soft_two_pass_metric: bool,
}

/// Groups/merges utterance fragments and emits assembled results.
#[derive(Default)]
pub struct ResultAssembler {
    options: AssemblerOptions,
    two_pass: TwoPassTracker,
}

impl ResultAssembler {
    #[must_use]
    pub fn new(options: AssemblerOptions) -> Self {
        Self {
            options,
            two_pass: TwoPassTracker::default(),
        }
    }

    /// Processes one batch. `now_ms` is the wall-clock time used for
    /// two-pass delay metrics (injected so tests are deterministic).
    pub fn process(&mut self, batch: &ResultBatch, now_ms: i64) -> AssembledBatch {
        let mut out = AssembledBatch::default();

        if batch.utterances.is_empty() {
            // Best-effort passthrough (`spec.md` §4.6 tie-break note).
            out.results.push(AssembledResult {
                text: batch.overall_text.clone(),
                is_final: false,
                vendor_start_ms: batch.overall_start_ms,
                duration_ms: batch.overall_duration_ms,
                language: batch.language.clone(),
                metadata: Map::new(),
            });
            return out;
        }

        let valid: Vec<&Utterance> = batch
            .utterances
            .iter()
            .filter(|u| {
                let ok = u.is_valid();
                if !ok {
                    tracing::warn!(text = %u.text, start_ms = u.start_ms, end_ms = u.end_ms, "dropping invalid utterance");
                }
                ok
            })
            .collect();

        for u in &valid {
            if let Some(metric) = self.two_pass.record(now_ms, &u.additions, u.is_final) {
                out.metrics.push(metric);
            }
        }

        if self.options.enable_utterance_grouping {
            self.emit_grouped(&valid, &batch.language, &mut out);
        } else {
            for u in &valid {
                self.emit_single(u, &batch.language, &mut out);
            }
        }

        out
    }

    fn emit_single(&self, u: &Utterance, language: &str, out: &mut AssembledBatch) {
        out.has_final |= u.is_final;
        out.results.push(AssembledResult {
            text: u.text.clone(),
            is_final: u.is_final,
            vendor_start_ms: u.start_ms,
            duration_ms: u.end_ms - u.start_ms,
            language: language.to_string(),
            metadata: self.metadata_for(u),
        });
    }

    /// Merges maximal adjacent runs of identical `is_final` (`spec.md` §4.6
    /// step 4): concatenated text, `start_ms` of the first, `duration_ms`
    /// spanning to the last, metadata from the last utterance in the run.
    fn emit_grouped(&self, valid: &[&Utterance], language: &str, out: &mut AssembledBatch) {
        let mut i = 0;
        while i < valid.len() {
            let is_final = valid[i].is_final;
            let mut j = i + 1;
            while j < valid.len() && valid[j].is_final == is_final {
                j += 1;
            }
            let run = &valid[i..j];
            let first = run[0];
            let last = run[run.len() - 1];
            let text: String = run.iter().map(|u| u.text.as_str()).collect();

            out.has_final |= is_final;
            out.results.push(AssembledResult {
                text,
                is_final,
                vendor_start_ms: first.start_ms,
                duration_ms: last.end_ms - first.start_ms,
                language: language.to_string(),
                metadata: self.metadata_for(last),
            });
            i = j;
        }
    }

    /// Non-final results only carry `{invoke_type, source}`; final results
    /// carry the full `additions` map (`spec.md` §4.6 step 5).
    fn metadata_for(&self, u: &Utterance) -> Map<String, serde_json::Value> {
        if u.is_final {
            u.additions.clone()
        } else {
            let mut meta = Map::new();
            if let Some(v) = u.additions.get("invoke_type") {
                meta.insert("invoke_type".into(), v.clone());
            }
            if let Some(v) = u.additions.get("source") {
                meta.insert("source".into(), v.clone());
            }
            meta
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utt(text: &str, start_ms: i64, end_ms: i64, is_final: bool) -> Utterance {
        Utterance {
            text: text.into(),
            start_ms,
            end_ms,
            is_final,
            additions: Map::new(),
        }
    }

    fn batch(utterances: Vec<Utterance>) -> ResultBatch {
        ResultBatch {
            utterances,
            language: "en-US".into(),
            ..Default::default()
        }
    }

    /// `spec.md` §8 scenario 2.
    #[test]
    fn grouping_enabled_merges_adjacent_same_finality_runs() {
        let b = batch(vec![
            utt("hello", 0, 1000, true),
            utt("world", 1000, 2000, true),
            utt("this", 2000, 3000, false),
            utt("is", 3000, 4000, false),
            utt("test", 4000, 5000, true),
            utt("example", 5000, 6000, false),
        ]);
        let mut assembler = ResultAssembler::new(AssemblerOptions {
            enable_utterance_grouping: true,
            ..Default::default()
        });
        let out = assembler.process(&b, 0);

        assert_eq!(out.results.len(), 4);
        assert_eq!(out.results[0].text, "helloworld");
        assert!(out.results[0].is_final);
        assert_eq!(out.results[0].vendor_start_ms, 0);
        assert_eq!(out.results[0].duration_ms, 2000);

        assert_eq!(out.results[1].text, "thisis");
        assert!(!out.results[1].is_final);
        assert_eq!(out.results[1].vendor_start_ms, 2000);
        assert_eq!(out.results[1].duration_ms, 2000);

        assert_eq!(out.results[2].text, "test");
        assert_eq!(out.results[2].duration_ms, 1000);

        assert_eq!(out.results[3].text, "example");
        assert!(!out.results[3].is_final);
        assert_eq!(out.results[3].duration_ms, 1000);

        assert!(out.has_final);
    }

    /// `spec.md` §8 scenario 3.
    #[test]
    fn grouping_disabled_emits_one_result_per_utterance() {
        let b = batch(vec![
            utt("hello", 0, 1000, true),
            utt("world", 1000, 2000, true),
            utt("this", 2000, 3000, false),
            utt("is", 3000, 4000, false),
            utt("test", 4000, 5000, true),
            utt("example", 5000, 6000, false),
        ]);
        let mut assembler = ResultAssembler::new(AssemblerOptions {
            enable_utterance_grouping: false,
            ..Default::default()
        });
        let out = assembler.process(&b, 0);
        assert_eq!(out.results.len(), 6);
        assert_eq!(out.results[2].text, "this");
        assert!(out.has_final);
    }

    #[test]
    fn invalid_utterances_are_dropped() {
        let b = batch(vec![
            utt("", 0, 100, true),       // empty after trim
            utt("  ", 0, 100, true),     // whitespace-only
            utt("ok", 100, -1, true),    // end < start
            utt("keep", 0, 100, true),
        ]);
        let mut assembler = ResultAssembler::new(AssemblerOptions {
            enable_utterance_grouping: false,
            ..Default::default()
        });
        let out = assembler.process(&b, 0);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].text, "keep");
    }

    #[test]
    fn empty_batch_is_passthrough_non_final() {
        let b = ResultBatch {
            overall_text: "partial".into(),
            overall_start_ms: 42,
            overall_duration_ms: 10,
            ..Default::default()
        };
        let mut assembler = ResultAssembler::new(AssemblerOptions::default());
        let out = assembler.process(&b, 0);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].text, "partial");
        assert!(!out.results[0].is_final);
        assert!(!out.has_final);
    }

    #[test]
    fn non_final_metadata_limited_to_invoke_type_and_source() {
        let mut additions = Map::new();
        additions.insert("invoke_type".into(), "stream".into());
        additions.insert("source".into(), "stream".into());
        additions.insert("speech_rate".into(), 1.into());

        let u = Utterance {
            text: "partial".into(),
            start_ms: 0,
            end_ms: 100,
            is_final: false,
            additions,
        };
        let b = batch(vec![u]);
        let mut assembler = ResultAssembler::new(AssemblerOptions::default());
        let out = assembler.process(&b, 0);
        assert_eq!(out.results[0].metadata.len(), 2);
        assert!(!out.results[0].metadata.contains_key("speech_rate"));
    }

    #[test]
    fn two_pass_metrics_computed_on_hard_vad_final() {
        let mut stream_additions = Map::new();
        stream_additions.insert("source".into(), "stream".into());
        let mut soft_additions = Map::new();
        soft_additions.insert("source".into(), "two_pass".into());
        soft_additions.insert("invoke_type".into(), "soft_vad".into());
        let mut hard_additions = Map::new();
        hard_additions.insert("source".into(), "two_pass".into());
        hard_additions.insert("invoke_type".into(), "hard_vad".into());

        let b = batch(vec![
            Utterance { text: "a".into(), start_ms: 0, end_ms: 100, is_final: false, additions: stream_additions },
            Utterance { text: "b".into(), start_ms: 0, end_ms: 100, is_final: false, additions: soft_additions },
            Utterance { text: "c".into(), start_ms: 0, end_ms: 100, is_final: true, additions: hard_additions },
        ]);
        let mut assembler = ResultAssembler::new(AssemblerOptions {
            enable_utterance_grouping: false,
            emit_soft_two_pass_metric: true,
        });

        let out1 = assembler.process(&batch(vec![b.utterances[0].clone()]), 1_000);
        assert!(out1.metrics.is_empty());
        let out2 = assembler.process(&batch(vec![b.utterances[1].clone()]), 1_200);
        assert!(out2.metrics.is_empty());
        let out3 = assembler.process(&batch(vec![b.utterances[2].clone()]), 1_500);
        assert_eq!(out3.metrics.len(), 1);
        assert_eq!(out3.metrics[0].two_pass_delay_ms, 500);
        assert_eq!(out3.metrics[0].soft_two_pass_delay_ms, Some(200));
    }
}
