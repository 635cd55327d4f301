pub mod health;
pub mod diagnostics;
pub mod doc_export;
pub mod session;

#[cfg(test)]
mod tests;

pub use health::*;
pub use diagnostics::*;
pub use doc_export::*;
pub use session::*;
