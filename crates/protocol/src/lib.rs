// Wire protocol for controller <-> worker communication
//
// Decision: Every message is a JSON object tagged with MESSAGE_MARKER so
//           foreign traffic on the same channel is ignored, not rejected
// Decision: Exactly one variant key per message (execution, cancelation,
//           resolved, rejected, worker_cancelation, progress)
// Decision: Rust types are the source of truth; the JSON shape is derived from them

pub mod error;
pub mod frame;
pub mod id;
pub mod message;
pub mod status;

pub use error::ProtocolError;
pub use frame::{Frame, TransferList};
pub use id::MessageId;
pub use message::{is_tagged, Marker, Request, RequestBody, Response, ResponseBody};
pub use status::MessageStatus;

/// Field present (and `true`) on every protocol message
pub const MESSAGE_MARKER: &str = "__threadpost_message__";
