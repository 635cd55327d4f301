pub mod collab;
pub mod messages;
pub mod health;
pub mod doc_export;
pub mod diagnostics;
pub mod session;
pub mod error;

pub use collab::*;
pub use messages::*;
pub use health::*;
pub use doc_export::*;
pub use diagnostics::*;
pub use session::*;
pub use error::*;
