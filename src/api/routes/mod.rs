//! API Routes
//!
//! Route handlers organized by functionality.

pub mod check;
pub mod health;
pub mod matches;
pub mod refresh;
pub mod status;
