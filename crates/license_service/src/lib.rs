pub mod api;
pub mod controllers;
pub mod engine;
pub mod reporter;
pub mod scanner;
pub mod util;
