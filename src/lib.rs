// Library exports for chirp
// The binary and the integration tests both build on these modules

pub mod accounts;
pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod extractors;
pub mod feed;
pub mod graph;
pub mod media;
pub mod response;
pub mod routes;
pub mod state;

pub use routes::app;
