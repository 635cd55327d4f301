pub mod client;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod hub;
pub mod room;
pub mod supervisor;


pub use hub::{CollabHub, HubSettings};
pub use supervisor::{Supervisor, SupervisorSettings};
