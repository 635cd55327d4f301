//! The merge engine seam.
//!
//! The engine host only ever moves opaque update blocks and opaque states
//! around. Whatever implements these traits must merge commutatively and
//! treat a repeated block as a no-op.

pub mod lorodoc;

pub use lorodoc::LoroMergeEngine;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Failed to apply update: {0}")]
    Apply(String),
    #[error("Failed to encode document state: {0}")]
    Encode(String),
}

/// One live document instance
pub trait MergeDocument: Send {
    /// Merge an update block (or a full encoded state) into the document.
    fn apply_update(&mut self, block: &[u8]) -> Result<(), MergeError>;

    /// Encode the full document state as one block accepted by `apply_update`.
    fn encode_state(&self) -> Result<Vec<u8>, MergeError>;

    /// Readable view of the current content.
    fn to_json(&self) -> serde_json::Value;
}

pub trait MergeEngine: Send + Sync {
    fn new_document(&self) -> Box<dyn MergeDocument>;

    fn name(&self) -> &'static str;
}

/// Rebuild a document from a stored state
pub fn restore(engine: &dyn MergeEngine, state: &[u8]) -> Result<Box<dyn MergeDocument>, MergeError> {
    let mut doc = engine.new_document();
    doc.apply_update(state)?;
    Ok(doc)
}
