//! Plex Media Server client and its XML response parsers.

mod client;
mod metadata;
mod server;
mod sessions;
pub mod xml;

pub use client::{PlexClient, Transport};
pub use metadata::{parse_movie_metadata, ExternalId, MovieMetadata, RatingValue, Role, ThemeColors};
pub use server::{parse_server_info, ServerInfo};
pub use sessions::{parse_sessions, Player, Session, SessionUser, Transcode};
