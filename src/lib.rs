pub mod api;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod player;
pub mod tasks;
pub mod utils;

#[cfg(test)]
mod test_support;
