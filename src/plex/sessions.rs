use serde::Serialize;
use tracing::warn;

use super::xml::{parse_document, Attrs, XmlHandler};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    /// Plex `type` attribute: `movie`, `episode`, `track`...
    pub kind: String,
    pub grandparent_title: Option<String>,
    pub year: Option<i32>,
    pub duration_ms: u64,
    pub view_offset_ms: u64,
    pub thumb: Option<String>,
    pub user: SessionUser,
    pub player: Player,
    pub transcode: Option<Transcode>,
}

impl Session {
    /// Fraction of the item already played, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        (self.view_offset_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Player {
    pub device: String,
    pub platform: String,
    pub product: String,
    pub state: String,
    pub address: Option<String>,
    pub local: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcode {
    pub video_decision: Option<String>,
    pub audio_decision: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub container: Option<String>,
    pub progress: f64,
    pub speed: f64,
    pub throttled: bool,
}

fn is_record(name: &str) -> bool {
    matches!(name, "Video" | "Track")
}

#[derive(Debug, Default)]
struct SessionBuilder {
    id: Option<String>,
    title: String,
    kind: String,
    grandparent_title: Option<String>,
    year: Option<i32>,
    duration_ms: u64,
    view_offset_ms: u64,
    thumb: Option<String>,
    user: SessionUser,
    player: Player,
    transcode: Option<Transcode>,
}

impl SessionBuilder {
    fn from_attrs(attrs: &Attrs) -> Self {
        Self {
            id: attrs.string("ratingKey"),
            title: attrs.text("title"),
            kind: attrs.text("type"),
            grandparent_title: attrs.string("grandparentTitle"),
            year: attrs.i32_opt("year"),
            duration_ms: attrs.u64_or_zero("duration"),
            view_offset_ms: attrs.u64_or_zero("viewOffset"),
            thumb: attrs.string("thumb"),
            ..Self::default()
        }
    }

    fn child(&mut self, name: &str, attrs: &Attrs) {
        match name {
            "User" => {
                self.user = SessionUser {
                    id: attrs.text("id"),
                    name: attrs.text("title"),
                }
            }
            "Player" => {
                self.player = Player {
                    device: attrs.text("device"),
                    platform: attrs.text("platform"),
                    product: attrs.text("product"),
                    state: attrs.text("state"),
                    address: attrs.string("address"),
                    local: attrs.flag("local"),
                }
            }
            "TranscodeSession" => {
                self.transcode = Some(Transcode {
                    video_decision: attrs.string("videoDecision"),
                    audio_decision: attrs.string("audioDecision"),
                    video_codec: attrs.string("videoCodec"),
                    audio_codec: attrs.string("audioCodec"),
                    container: attrs.string("container"),
                    progress: attrs.f64_or_zero("progress"),
                    speed: attrs.f64_or_zero("speed"),
                    throttled: attrs.flag("throttled"),
                })
            }
            _ => {}
        }
    }

    fn finish(self) -> std::result::Result<Session, &'static str> {
        let id = self.id.ok_or("ratingKey")?;
        Ok(Session {
            id,
            title: self.title,
            kind: self.kind,
            grandparent_title: self.grandparent_title,
            year: self.year,
            duration_ms: self.duration_ms,
            view_offset_ms: self.view_offset_ms,
            thumb: self.thumb,
            user: self.user,
            player: self.player,
            transcode: self.transcode,
        })
    }
}

#[derive(Default)]
struct SessionsHandler {
    current: Option<SessionBuilder>,
    sessions: Vec<Session>,
}

impl XmlHandler for SessionsHandler {
    fn start(&mut self, name: &str, attrs: &Attrs, depth: usize) {
        if depth == 1 && is_record(name) {
            self.current = Some(SessionBuilder::from_attrs(attrs));
        } else if depth == 2 {
            if let Some(builder) = self.current.as_mut() {
                builder.child(name, attrs);
            }
        }
    }

    fn end(&mut self, name: &str, depth: usize) {
        if depth != 1 || !is_record(name) {
            return;
        }
        if let Some(builder) = self.current.take() {
            let title = builder.title.clone();
            match builder.finish() {
                Ok(session) => self.sessions.push(session),
                Err(field) => warn!(%title, field, "Dropping session without required field"),
            }
        }
    }
}

/// Parse a `/status/sessions` response into one record per playing item.
pub fn parse_sessions(bytes: &[u8]) -> Result<Vec<Session>> {
    let mut handler = SessionsHandler::default();
    parse_document(bytes, &mut handler)?;
    Ok(handler.sessions)
}
