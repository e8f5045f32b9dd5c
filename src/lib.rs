//! Transcodes a vendor NDJSON chat event stream into OpenAI-compatible chat
//! completions, streamed as SSE or collected into a single response.

pub mod aggregate;
pub mod api;
pub mod assets;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod stream;

mod util;

pub use aggregate::{collect_completion, BatchAggregator};
pub use assets::{decode_asset_path, encode_asset_path, AssetLinker, AssetRef};
pub use config::{AppConfig, TranscodeConfig, TranscodeOptions};
pub use error::BridgeError;
pub use stream::{transcode_stream, CompletionHook, StreamOutcome, TranscodeRequest};
