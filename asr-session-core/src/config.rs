//! Session configuration.
//!
//! Recognized keys mirror `spec.md` §6. Anything not named here lands in
//! [`SessionConfig::vendor_params`] and is forwarded opaquely to the vendor
//! client, per the "dynamic configuration maps" redesign note in §9.

use serde::{Deserialize, Serialize};
use serde_json::Map;

/// How `finalize` signals the vendor to flush pending results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeMode {
    /// Finalize is a graceful transport close.
    Disconnect,
    /// Finalize injects a "mute package" of silence and waits for drain.
    #[default]
    MutePkg,
}


/// Configuration recognized by the session orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Enable dumping raw PCM (and vendor responses) to `dump_path`.
    pub dump: bool,
    /// Directory for dump files. Only consulted when `dump` is set.
    pub dump_path: String,
    /// Input audio sample rate in Hz.
    pub sample_rate: u32,
    /// Input audio channel count.
    pub channels: u16,
    /// Input audio sample width in bits.
    pub sample_width_bits: u16,
    /// Duration of injected silence on finalize, in milliseconds.
    pub mute_pkg_duration_ms: u32,
    /// Whether to merge adjacent same-`is_final` utterances (C6 step 3/4).
    pub enable_utterance_grouping: bool,
    /// How `finalize` is communicated to the vendor.
    pub finalize_mode: FinalizeMode,
    /// Minimum reconnect backoff delay.
    pub min_retry_delay_ms: u64,
    /// Maximum reconnect backoff delay (cap).
    pub max_retry_delay_ms: u64,
    /// Open-connection timeout; a timeout is a retryable [`crate::error::SessionError::Connection`].
    pub connect_timeout_ms: u64,
    /// Optional vendor keepalive heartbeat period; `0` disables it.
    pub keepalive_interval_ms: u64,
    /// Vendor-specific parameters (`params.*`), opaque to the session core.
    /// Flattened so unrecognized top-level config keys land here instead of
    /// being silently dropped by serde.
    #[serde(flatten)]
    pub vendor_params: Map<String, serde_json::Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dump: false,
            dump_path: String::from("."),
            sample_rate: 16_000,
            channels: 1,
            sample_width_bits: 16,
            mute_pkg_duration_ms: 800,
            enable_utterance_grouping: true,
            finalize_mode: FinalizeMode::MutePkg,
            min_retry_delay_ms: 500,
            max_retry_delay_ms: 4_000,
            connect_timeout_ms: 10_000,
            keepalive_interval_ms: 5_000,
            vendor_params: Map::new(),
        }
    }
}

impl SessionConfig {
    /// Bytes per millisecond of audio at the configured format, used by the
    /// audio timeline and chunk buffer to convert frame sizes to durations.
    #[must_use]
    pub fn bytes_per_ms(&self) -> f64 {
        let bytes_per_sample = f64::from(self.sample_width_bits) / 8.0;
        f64::from(self.sample_rate) / 1000.0 * bytes_per_sample * f64::from(self.channels)
    }

    /// Converts a byte length to a duration in milliseconds at the
    /// configured audio format.
    #[must_use]
    pub fn duration_ms_for_bytes(&self, len: usize) -> u64 {
        let bpm = self.bytes_per_ms();
        if bpm <= 0.0 {
            0
        } else {
            (len as f64 / bpm).round() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.sample_rate, 16_000);
        assert_eq!(cfg.channels, 1);
        assert_eq!(cfg.sample_width_bits, 16);
        assert_eq!(cfg.mute_pkg_duration_ms, 800);
        assert!(cfg.enable_utterance_grouping);
        assert_eq!(cfg.min_retry_delay_ms, 500);
        assert_eq!(cfg.max_retry_delay_ms, 4_000);
    }

    #[test]
    fn duration_ms_for_bytes_matches_16k_mono_16bit() {
        let cfg = SessionConfig::default();
        // 320 bytes at 16kHz/16-bit/mono = 10ms.
        assert_eq!(cfg.duration_ms_for_bytes(320), 10);
    }

    #[test]
    fn unrecognized_top_level_keys_flow_into_vendor_params() {
        let cfg: SessionConfig = serde_json::from_value(serde_json::json!({
            "sample_rate": 8000,
            "app_key": "x",
            "reconnectable_error_codes": ["429"],
        }))
        .unwrap();
        assert_eq!(cfg.sample_rate, 8000);
        assert_eq!(cfg.vendor_params.get("app_key").unwrap(), "x");
        assert_eq!(
            cfg.vendor_params.get("reconnectable_error_codes").unwrap(),
            &serde_json::json!(["429"])
        );
    }
}
