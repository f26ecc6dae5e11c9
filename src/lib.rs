pub mod app;
pub mod auth;
pub mod cache;
pub mod characters;
pub mod config;
pub mod error;
pub mod filmography;
mod http;
pub mod plex;
pub mod retry;
pub mod service;
