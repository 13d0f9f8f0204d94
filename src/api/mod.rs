pub mod coloring;
pub mod error;
pub mod generate;
pub mod handler_utils;
pub mod server;
