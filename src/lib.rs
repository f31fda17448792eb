pub mod actions;
pub mod chat;
pub mod command;
pub mod config;
pub mod error;
pub mod model;
pub mod peer;
pub mod persistence;
pub mod reconciler;
pub mod scheduler;
pub mod session;
pub mod signals;
pub mod source;
pub mod telemetry;

pub use reconciler::GameViewReconciler;
pub use session::{
    Session,
    ViewEvent,
    open_session,
};
