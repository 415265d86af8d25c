//! Shared wire types for the Tailfed identity token issuer.
//!
//! Every payload that crosses a process boundary lives here: the JSON
//! response envelope, the issuance protocol requests and responses, the
//! persisted [`Flow`](flow::Flow) record, and the scalar wrappers
//! (durations, unix timestamps, base64 bytes) those payloads are built from.
//!
//! The issuer, the client daemon, and the launcher all speak these types, so
//! the crate is deliberately free of I/O and runtime dependencies.

pub mod b64;
pub mod duration;
pub mod envelope;
pub mod flow;
pub mod proto;
pub mod timestamp;
pub mod version;

pub use b64::Base64Bytes;
pub use duration::GoDuration;
pub use envelope::ApiResponse;
pub use flow::{Flow, FlowStatus, SigningSecret};
pub use timestamp::UnixTime;
