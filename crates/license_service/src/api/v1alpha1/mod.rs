pub mod auth;
pub mod container;
pub mod reporter;

pub use reporter::*;
