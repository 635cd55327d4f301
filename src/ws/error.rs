use crate::crdt::MergeError;
use crate::db::StoreError;

/// Failures reported back to a client as an `error` message
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("Invalid message: {0}")]
    Protocol(String),
    #[error("Authentication required to {0}")]
    Unauthenticated(&'static str),
    #[error("Not joined to a session")]
    NotInSession,
    #[error("No live document for session {0}")]
    DocumentNotLoaded(String),
    #[error("Unknown client {0}")]
    UnknownClient(String),
    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("Document failure: {0}")]
    Merge(#[from] MergeError),
}
