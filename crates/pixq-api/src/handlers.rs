//! Request handlers.

pub mod health;
pub mod images;
pub mod jobs;

pub use health::*;
pub use images::*;
pub use jobs::*;
