//! Engine session supervision

mod manager;

pub use manager::{Session, SessionManager};
