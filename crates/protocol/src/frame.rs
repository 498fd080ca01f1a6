//! Transport frames

use serde_json::Value;

use crate::message::is_tagged;

/// Buffers moved alongside a frame instead of being copied into its JSON body
pub type TransferList = Vec<Vec<u8>>;

/// Unit of delivery over a worker channel
///
/// `data` is the structured message (tagged protocol messages and foreign
/// traffic alike), `transfer` carries out-of-band buffers, and `origin`
/// names the sender so receivers can restrict who they listen to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub data: Value,
    pub transfer: TransferList,
    pub origin: Option<String>,
}

impl Frame {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            transfer: Vec::new(),
            origin: None,
        }
    }

    /// Attach buffers to move with the frame
    pub fn with_transfer(mut self, transfer: TransferList) -> Self {
        self.transfer = transfer;
        self
    }

    /// Set the origin the frame is addressed from
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// Whether the frame carries a protocol message
    pub fn is_tagged(&self) -> bool {
        is_tagged(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MESSAGE_MARKER;
    use serde_json::json;

    #[test]
    fn test_untagged_frame() {
        assert!(!Frame::new(json!({"hello": "world"})).is_tagged());
        assert!(!Frame::new(json!(42)).is_tagged());
        assert!(!Frame::new(json!({ MESSAGE_MARKER: false })).is_tagged());
    }

    #[test]
    fn test_builder() {
        let frame = Frame::new(json!({ MESSAGE_MARKER: true }))
            .with_transfer(vec![vec![1, 2, 3]])
            .with_origin(Some("https://app.local".into()));

        assert!(frame.is_tagged());
        assert_eq!(frame.transfer, vec![vec![1, 2, 3]]);
        assert_eq!(frame.origin.as_deref(), Some("https://app.local"));
    }
}
