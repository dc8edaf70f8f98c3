//! Real-time streaming ASR session core.
//!
//! A per-session component that manages one duplex connection to a remote
//! speech-recognition vendor: audio chunking and timeline accounting,
//! reconnect with capped exponential backoff, vendor result assembly and
//! utterance grouping, finalize/drain semantics, and an optional raw-audio
//! dump-file side channel. Concrete vendor wire protocols are out of scope
//! (see [`vendor::scripted`] for the test double used in place of one).

pub mod assembler;
pub mod chunk_buffer;
pub mod config;
pub mod dump;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod session;
pub mod timeline;
pub mod vendor;

pub use assembler::{AssembledBatch, AssembledResult, AssemblerOptions, ResultAssembler, TwoPassMetrics};
pub use chunk_buffer::{ChunkBuffer, ChunkSink};
pub use config::{FinalizeMode, SessionConfig};
pub use dump::{DumpSink, VendorResultLog};
pub use error::{classify_vendor_error, ErrorCode, ErrorDisposition, SessionError, SessionResult};
pub use events::{AsrErrorEvent, AsrFinalizeEndEvent, AsrResultEvent, EventSink, NoopEventSink, TracingEventSink, VendorErrorInfo};
pub use reconnect::ReconnectSupervisor;
pub use session::{Session, SessionState};
pub use timeline::AudioTimeline;
pub use vendor::{ResultBatch, Utterance, VendorClient, VendorClientFactory, VendorEvent};
