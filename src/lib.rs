pub mod browser;
pub mod config;
pub mod disposition;
pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod library;
pub mod logging;
pub mod quality;
pub mod rpc;
pub mod runner;
pub mod session;
pub mod sidecar_api;
pub mod summary;
pub mod transcode;
