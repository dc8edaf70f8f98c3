//! C7: Session Orchestrator.
//!
//! Owns one duplex connection to a vendor recognizer for the lifetime of a
//! caller's ASR session, composing C1-C6: timeline, chunk buffer, dump
//! sink, vendor client, reconnect supervisor, and result assembler.
//! Grounded on `stream_coordinator.rs` (owns-a-state-machine-of-services
//! shape) and `stream/manager.rs` (per-connection lifecycle + cadence),
//! generalized to the states and transitions in `spec.md` §5.
//!
//! The session is used cooperatively from a single task at a time (`spec.md`
//! §5): callers await `on_audio_frame`/`finalize`/`stop`, and each call
//! drains any vendor events that have arrived in the meantime before
//! returning, rather than running a background pump task.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::assembler::{AssemblerOptions, ResultAssembler};
use crate::chunk_buffer::ChunkBuffer;
use crate::config::{FinalizeMode, SessionConfig};
use crate::dump::{DumpSink, VendorResultLog};
use crate::error::{classify_vendor_error, ErrorCode, ErrorDisposition, SessionError, SessionResult};
use crate::events::{AsrErrorEvent, AsrFinalizeEndEvent, AsrResultEvent, EventSink, VendorErrorInfo};
use crate::reconnect::ReconnectSupervisor;
use crate::timeline::AudioTimeline;
use crate::vendor::{ResultBatch, VendorClient, VendorClientFactory, VendorEvent};

/// Lifecycle states (`spec.md` §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Finalizing,
    Reconnecting,
    Closed,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A single duplex ASR session.
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    timeline: AudioTimeline,
    chunk_buffer: ChunkBuffer,
    dump: Option<DumpSink>,
    vendor_log: Option<VendorResultLog>,
    factory: Arc<dyn VendorClientFactory>,
    client: Option<Box<dyn VendorClient>>,
    vendor_rx: Option<mpsc::UnboundedReceiver<VendorEvent>>,
    reconnect: ReconnectSupervisor,
    assembler: ResultAssembler,
    sink: Arc<dyn EventSink>,
    /// User audio accumulated across all timelines before the current one
    /// (i.e. across every prior reconnect), so projected timestamps stay
    /// monotonic across resets (`spec.md` §4.1, §8 scenario 6).
    offset_before_last_reset_ms: u64,
    finalize_id: Option<String>,
    finalize_has_final: bool,
}

impl Session {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn VendorClientFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let chunk_threshold = (config.bytes_per_ms() * 20.0).round().max(1.0) as usize;
        let dump = if config.dump {
            Some(DumpSink::new(config.dump_path.clone()))
        } else {
            None
        };
        let vendor_log = if config.dump {
            Some(VendorResultLog::new(config.dump_path.clone()))
        } else {
            None
        };
        let assembler = ResultAssembler::new(AssemblerOptions {
            enable_utterance_grouping: config.enable_utterance_grouping,
            emit_soft_two_pass_metric: true,
        });
        let reconnect = ReconnectSupervisor::new(config.min_retry_delay_ms, config.max_retry_delay_ms);

        Self {
            config,
            state: SessionState::Idle,
            timeline: AudioTimeline::new(),
            chunk_buffer: ChunkBuffer::new(chunk_threshold),
            dump,
            vendor_log,
            factory,
            client: None,
            vendor_rx: None,
            reconnect,
            assembler,
            sink,
            offset_before_last_reset_ms: 0,
            finalize_id: None,
            finalize_has_final: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Opens the vendor connection, retrying with capped exponential
    /// backoff until a reconnectable error no longer blocks progress, or a
    /// fatal error surfaces immediately (`spec.md` §5 `Idle -> Connecting`).
    pub async fn start(&mut self) -> SessionResult<()> {
        self.state = SessionState::Connecting;
        if let Some(dump) = &self.dump {
            dump.open().await.map_err(|e| SessionError::Configuration(e.to_string()))?;
        }
        if let Some(log) = &self.vendor_log {
            log.open().await.map_err(|e| SessionError::Configuration(e.to_string()))?;
        }
        self.connect_with_retry().await?;
        self.drain_vendor_events().await
    }

    async fn connect_once(&mut self) -> SessionResult<()> {
        let mut client = self.factory.create();
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let rx = match tokio::time::timeout(timeout, client.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::Connection("connect timed out".into())),
        };
        self.client = Some(client);
        self.vendor_rx = Some(rx);
        Ok(())
    }

    /// Runs the capped-backoff retry loop (`spec.md` §4.5): fatal errors
    /// abort immediately, everything else retries forever.
    async fn connect_with_retry(&mut self) -> SessionResult<()> {
        loop {
            let k = self.reconnect.begin_attempt();
            if k > 1 {
                let delay = self.reconnect.delay_for_attempt(k);
                tracing::info!(attempt = k, delay_ms = delay.as_millis() as u64, "reconnecting");
                tokio::time::sleep(delay).await;
            }
            match self.connect_once().await {
                Ok(()) => {
                    self.reconnect.reset();
                    return Ok(());
                }
                Err(err) if err.disposition() == ErrorDisposition::Fatal => {
                    self.state = SessionState::Closed;
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt = k, "connect attempt failed, retrying");
                    self.sink.emit_error(AsrErrorEvent {
                        code: err.code().to_string(),
                        message: err.to_string(),
                        vendor_info: None,
                    });
                }
            }
        }
    }

    /// Feeds one frame of raw PCM audio into the session: buffers it into
    /// fixed-size chunks, dumps the raw bytes (if enabled), forwards full
    /// chunks to the vendor client, and advances the audio timeline
    /// (`spec.md` §4.1, §4.2).
    ///
    /// If there is no live connection, triggers a connect first (`spec.md`
    /// §4.7). If that connect attempt fails, the frame is dropped and the
    /// failure is surfaced to the host as a non-fatal `asr_error` rather
    /// than propagated as a fatal `Err` from this call.
    pub async fn on_audio_frame(&mut self, bytes: Bytes) -> SessionResult<()> {
        if self.client.is_none() && self.state != SessionState::Closed {
            if let Err(err) = self.connect_with_retry().await {
                self.sink.emit_error(AsrErrorEvent {
                    code: err.code().to_string(),
                    message: err.to_string(),
                    vendor_info: None,
                });
                return Ok(());
            }
        }

        if let Some(dump) = &self.dump {
            dump.write(&bytes).await;
        }

        let threshold = self.chunk_buffer_threshold();
        let chunks = self.chunk_buffer.add(&bytes);
        for chunk in chunks {
            self.send_chunk(chunk, threshold).await?;
        }
        self.drain_vendor_events().await
    }

    fn chunk_buffer_threshold(&self) -> usize {
        (self.config.bytes_per_ms() * 20.0).round().max(1.0) as usize
    }

    async fn send_chunk(&mut self, chunk: Bytes, _threshold: usize) -> SessionResult<()> {
        let duration_ms = self.config.duration_ms_for_bytes(chunk.len());
        if let Some(client) = &mut self.client {
            client.send_audio(chunk).await?;
        }
        self.timeline.add_user(duration_ms);
        Ok(())
    }

    /// Signals the vendor to flush pending final results (`spec.md` §4.7,
    /// §5 `Streaming -> Finalizing`). Waits for the vendor's final batch (or
    /// connection close) before returning, and emits `asr_finalize_end`
    /// gated on at least one final utterance having been seen.
    pub async fn finalize(&mut self, finalize_id: impl Into<String>) -> SessionResult<()> {
        self.state = SessionState::Finalizing;
        self.finalize_id = Some(finalize_id.into());
        self.finalize_has_final = false;

        match self.config.finalize_mode {
            FinalizeMode::MutePkg => {
                let silence_bytes =
                    (self.config.bytes_per_ms() * f64::from(self.config.mute_pkg_duration_ms)).round() as usize;
                let silence = vec![0u8; silence_bytes];
                if let Some(client) = &mut self.client {
                    client.send_audio(Bytes::from(silence)).await?;
                    client.finalize().await?;
                }
                self.timeline.add_silence(u64::from(self.config.mute_pkg_duration_ms));
            }
            FinalizeMode::Disconnect => {
                if let Some(client) = &mut self.client {
                    client.finalize().await?;
                }
            }
        }

        self.drain_vendor_events_until_final().await?;

        if self.finalize_has_final {
            let finalize_id = self.finalize_id.clone().unwrap_or_default();
            self.sink.emit_finalize_end(AsrFinalizeEndEvent {
                finalize_id,
                metadata: Default::default(),
            });
        }

        if self.state == SessionState::Finalizing {
            self.state = SessionState::Streaming;
        }
        Ok(())
    }

    /// Gracefully closes the session (`spec.md` §5 `-> Closed`).
    pub async fn stop(&mut self) -> SessionResult<()> {
        if let Some(client) = &mut self.client {
            client.close().await?;
        }
        if let Some(dump) = &self.dump {
            dump.close().await;
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Drains every vendor event currently queued, without blocking for more.
    async fn drain_vendor_events(&mut self) -> SessionResult<()> {
        while let Some(rx) = &mut self.vendor_rx {
            match rx.try_recv() {
                Ok(event) => {
                    let recurse = self.handle_vendor_event(event).await?;
                    if recurse {
                        return Ok(());
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
        Ok(())
    }

    /// Blocks (awaiting the vendor channel) until a final result has been
    /// seen or the channel closes, used by `finalize`.
    async fn drain_vendor_events_until_final(&mut self) -> SessionResult<()> {
        while !self.finalize_has_final {
            let event = match &mut self.vendor_rx {
                Some(rx) => rx.recv().await,
                None => None,
            };
            match event {
                Some(event) => {
                    let should_return = self.handle_vendor_event(event).await?;
                    if should_return {
                        return Ok(());
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Handles one vendor event. Returns `Ok(true)` when the session just
    /// entered `Reconnecting` or `Closed` and the caller's drain loop should
    /// stop pulling more events this call (a fresh channel may now be in
    /// place, or there is nothing left to read).
    async fn handle_vendor_event(&mut self, event: VendorEvent) -> SessionResult<bool> {
        match event {
            VendorEvent::Opened => {
                self.state = SessionState::Streaming;
                self.reconnect.reset();
                Ok(false)
            }
            VendorEvent::Result(batch) => {
                self.handle_result_batch(batch).await;
                Ok(false)
            }
            VendorEvent::VendorError { code, message } => {
                self.handle_vendor_error(code, message).await
            }
            VendorEvent::ConnectionError(message) => {
                self.handle_connection_error(message).await
            }
            VendorEvent::Closed => {
                if self.state != SessionState::Closed {
                    self.state = SessionState::Closed;
                }
                Ok(true)
            }
        }
    }

    async fn handle_result_batch(&mut self, batch: ResultBatch) {
        if let Some(log_id) = batch.additions.get("log_id").and_then(|v| v.as_str()) {
            if let Some(dump) = &self.dump {
                dump.bind_log_id(log_id).await;
            }
        }
        if let Some(log) = &self.vendor_log {
            if let Some(raw) = &batch.raw_payload {
                log.append_line(&raw.to_string()).await;
            }
        }

        let assembled = self.assembler.process(&batch, now_ms());

        for metric in assembled.metrics {
            let mut map = serde_json::Map::new();
            map.insert("two_pass_delay_ms".into(), metric.two_pass_delay_ms.into());
            if let Some(soft) = metric.soft_two_pass_delay_ms {
                map.insert("soft_two_pass_delay_ms".into(), soft.into());
            }
            self.sink.emit_metrics(map);
        }

        for result in assembled.results {
            let absolute_start_ms =
                self.timeline.audio_before(result.vendor_start_ms) + self.offset_before_last_reset_ms;
            self.sink.emit_result(AsrResultEvent {
                text: result.text,
                is_final: result.is_final,
                start_ms: absolute_start_ms as i64,
                duration_ms: result.duration_ms,
                language: result.language,
                words: Vec::new(),
                metadata: result.metadata,
            });
        }

        if assembled.has_final {
            self.finalize_has_final = true;
        }
    }

    async fn handle_vendor_error(&mut self, code: String, message: String) -> SessionResult<bool> {
        let reconnectable_codes = self.config.vendor_params.get("reconnectable_error_codes").cloned();
        let classified = classify_vendor_error(code.clone(), message.clone(), |c| {
            reconnectable_codes
                .as_ref()
                .and_then(|v| v.as_array())
                .map(|codes| codes.iter().any(|x| x.as_str() == Some(c)))
                .unwrap_or(false)
        });
        let disposition = classified.disposition();

        self.sink.emit_error(AsrErrorEvent {
            code: code.clone(),
            message: message.clone(),
            vendor_info: Some(VendorErrorInfo {
                vendor: "unspecified".into(),
                code,
                message,
            }),
        });

        match disposition {
            ErrorDisposition::Fatal => {
                self.stop().await.ok();
                Ok(true)
            }
            ErrorDisposition::Reconnectable => self.begin_reconnect().await,
            ErrorDisposition::NonFatal => Ok(false),
        }
    }

    async fn handle_connection_error(&mut self, message: String) -> SessionResult<bool> {
        tracing::warn!(error = %message, "vendor connection error, reconnecting");
        self.begin_reconnect().await
    }

    /// Resets the timeline (carrying its total forward as an offset) and
    /// reconnects with backoff (`spec.md` §4.1, §4.5, §8 scenario 6).
    async fn begin_reconnect(&mut self) -> SessionResult<bool> {
        self.state = SessionState::Reconnecting;
        self.offset_before_last_reset_ms += self.timeline.total_user_ms();
        self.timeline.reset();
        self.vendor_rx = None;
        self.client = None;

        match self.connect_with_retry().await {
            Ok(()) => {
                // `connect_with_retry` only opens the transport; the fresh
                // connection's own `Opened` (and anything already queued
                // behind it) is drained on the caller's next interaction,
                // consistent with the cooperative, no-background-pump model.
                self.state = SessionState::Streaming;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::vendor::scripted::{Script, ScriptedFactory};
    use parking_lot::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        results: Mutex<Vec<AsrResultEvent>>,
        finalize_ends: Mutex<Vec<AsrFinalizeEndEvent>>,
        errors: Mutex<Vec<AsrErrorEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit_result(&self, event: AsrResultEvent) {
            self.results.lock().push(event);
        }
        fn emit_error(&self, event: AsrErrorEvent) {
            self.errors.lock().push(event);
        }
        fn emit_finalize_end(&self, event: AsrFinalizeEndEvent) {
            self.finalize_ends.lock().push(event);
        }
        fn emit_metrics(&self, _metrics: serde_json::Map<String, serde_json::Value>) {}
    }

    fn config() -> SessionConfig {
        SessionConfig {
            dump: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_connects_and_transitions_to_streaming() {
        let factory = Arc::new(ScriptedFactory::new(Script::default()));
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(config(), factory, sink);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn start_retries_through_connection_failures_then_succeeds() {
        let factory = Arc::new(ScriptedFactory::new(Script {
            fail_connects: 3,
            ..Default::default()
        }));
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(config(), factory.clone(), sink);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(factory.connect_attempts(), 4);
    }

    #[tokio::test]
    async fn audio_frames_are_chunked_and_forwarded_to_vendor() {
        let factory = Arc::new(ScriptedFactory::new(Script::default()));
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(config(), factory.clone(), sink);
        session.start().await.unwrap();

        // 20ms at 16kHz/16-bit/mono = 640 bytes per chunk.
        session.on_audio_frame(Bytes::from(vec![0u8; 1280])).await.unwrap();
        assert_eq!(factory.sent_audio().len(), 2);
    }

    #[tokio::test]
    async fn finalize_emits_finalize_end_when_a_final_result_arrives() {
        let script = Script::with_final_result("done", 0, 500);
        let factory = Arc::new(ScriptedFactory::new(Script {
            on_finalize: script.on_connect,
            ..Default::default()
        }));
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(config(), factory, sink.clone());
        session.start().await.unwrap();

        session.finalize("fin-1").await.unwrap();
        assert_eq!(sink.finalize_ends.lock().len(), 1);
        assert_eq!(sink.finalize_ends.lock()[0].finalize_id, "fin-1");
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[tokio::test]
    async fn dump_file_is_bound_to_log_id_from_result_additions() {
        let dir = tempdir().unwrap();
        let mut additions = serde_json::Map::new();
        additions.insert("log_id".into(), "LID-99".into());
        let batch = ResultBatch {
            overall_text: "hi".into(),
            utterances: vec![crate::vendor::Utterance {
                text: "hi".into(),
                start_ms: 0,
                end_ms: 100,
                is_final: true,
                additions: Default::default(),
            }],
            additions,
            language: "en-US".into(),
            ..Default::default()
        };
        let factory = Arc::new(ScriptedFactory::new(Script {
            on_connect: vec![VendorEvent::Result(batch)],
            ..Default::default()
        }));
        let sink = Arc::new(RecordingSink::default());
        let mut cfg = config();
        cfg.dump = true;
        cfg.dump_path = dir.path().to_string_lossy().into_owned();
        let mut session = Session::new(cfg, factory, sink.clone());
        session.start().await.unwrap();

        assert_eq!(sink.results.lock().len(), 1);
        let path = session.dump.as_ref().unwrap().current_path().await;
        assert_eq!(path.file_name().unwrap(), "out_LID-99.pcm");
    }

    #[tokio::test]
    async fn connection_error_triggers_reconnect_and_resets_timeline_offset() {
        let factory = Arc::new(ScriptedFactory::new(Script {
            on_connect: vec![VendorEvent::ConnectionError("dropped".into())],
            ..Default::default()
        }));
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(config(), factory.clone(), sink);
        session.start().await.unwrap();

        // The scripted client always succeeds its *next* connect, so after
        // the injected connection error we should be back in Streaming with
        // at least 2 connect attempts observed.
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(factory.connect_attempts() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_is_enforced_and_retried() {
        let mut cfg = config();
        cfg.connect_timeout_ms = 50;
        let factory = Arc::new(ScriptedFactory::new(Script {
            slow_connects: 2,
            connect_delay_ms: 10_000,
            ..Default::default()
        }));
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(cfg, factory.clone(), sink.clone());

        session.start().await.unwrap();

        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(factory.connect_attempts(), 3);
        assert_eq!(sink.errors.lock().len(), 2);
        assert!(sink.errors.lock().iter().all(|e| e.message.contains("timed out")));
    }

    /// A [`VendorClient`]/[`VendorClientFactory`] pair whose every connect
    /// attempt fails fatally, used to exercise `on_audio_frame`'s
    /// not-connected path without retrying forever.
    struct AlwaysFailsClient;

    #[async_trait::async_trait]
    impl VendorClient for AlwaysFailsClient {
        async fn connect(&mut self) -> SessionResult<mpsc::UnboundedReceiver<VendorEvent>> {
            Err(SessionError::Configuration("no credentials".into()))
        }
        async fn send_audio(&mut self, _bytes: Bytes) -> SessionResult<()> {
            Ok(())
        }
        async fn finalize(&mut self) -> SessionResult<()> {
            Ok(())
        }
        async fn close(&mut self) -> SessionResult<()> {
            Ok(())
        }
    }

    struct AlwaysFailsFactory;

    impl VendorClientFactory for AlwaysFailsFactory {
        fn create(&self) -> Box<dyn VendorClient> {
            Box::new(AlwaysFailsClient)
        }
    }

    #[tokio::test]
    async fn on_audio_frame_triggers_connect_and_surfaces_non_fatal_failure() {
        let factory = Arc::new(AlwaysFailsFactory);
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(config(), factory, sink.clone());

        let result = session.on_audio_frame(Bytes::from(vec![0u8; 640])).await;

        assert!(result.is_ok());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(sink.errors.lock().len(), 1);
        assert_eq!(sink.errors.lock()[0].code, "configuration_error");
    }
}
