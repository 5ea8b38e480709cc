pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod normalize;
pub mod reconcile;
pub mod upload;
pub mod upstream;
