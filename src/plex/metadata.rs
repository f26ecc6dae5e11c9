use serde::Serialize;
use std::fmt;
use tracing::warn;

use super::xml::{parse_document, Attrs, XmlHandler};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieMetadata {
    pub id: String,
    pub title: String,
    pub year: Option<i32>,
    pub studio: Option<String>,
    pub summary: Option<String>,
    pub tagline: Option<String>,
    pub content_rating: Option<String>,
    pub duration_ms: u64,
    pub originally_available_at: Option<String>,
    pub thumb: Option<String>,
    pub ratings: Vec<RatingValue>,
    pub external_ids: Vec<ExternalId>,
    pub roles: Vec<Role>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub genres: Vec<String>,
    pub countries: Vec<String>,
    pub theme_colors: Option<ThemeColors>,
}

impl MovieMetadata {
    pub fn external_id(&self, provider: &str) -> Option<&str> {
        self.external_ids
            .iter()
            .find(|e| e.provider == provider)
            .map(|e| e.id.as_str())
    }

    pub fn imdb_id(&self) -> Option<&str> {
        self.external_id("imdb")
    }
}

/// One rating value tagged by where it came from (`imdb`, `rottentomatoes`,
/// `themoviedb`...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingValue {
    pub source: String,
    /// `audience` or `critic`.
    pub kind: String,
    pub value: f64,
}

/// Provider-qualified identifier such as `imdb:tt0038650`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalId {
    pub provider: String,
    pub id: String,
}

impl ExternalId {
    /// Parse Plex's `scheme://value` guid form.
    pub fn from_guid(guid: &str) -> Option<Self> {
        let (provider, id) = guid.split_once("://")?;
        if provider.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self {
            provider: provider.to_string(),
            id: id.to_string(),
        })
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Role {
    pub id: Option<String>,
    pub name: String,
    pub character: Option<String>,
    pub thumb: Option<String>,
}

/// Corner swatches Plex derives from the artwork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeColors {
    pub top_left: String,
    pub top_right: String,
    pub bottom_left: String,
    pub bottom_right: String,
}

#[derive(Debug, Default)]
struct MetadataBuilder {
    id: Option<String>,
    title: String,
    year: Option<i32>,
    studio: Option<String>,
    summary: Option<String>,
    tagline: Option<String>,
    content_rating: Option<String>,
    duration_ms: u64,
    originally_available_at: Option<String>,
    thumb: Option<String>,
    legacy_ratings: Vec<RatingValue>,
    ratings: Vec<RatingValue>,
    external_ids: Vec<ExternalId>,
    roles: Vec<Role>,
    directors: Vec<String>,
    writers: Vec<String>,
    genres: Vec<String>,
    countries: Vec<String>,
    theme_colors: Option<ThemeColors>,
}

/// `imdb://image.rating` -> `imdb`
fn rating_source(image: Option<&str>) -> String {
    image
        .and_then(|i| i.split_once("://").map(|(scheme, _)| scheme))
        .filter(|s| !s.is_empty())
        .unwrap_or("plex")
        .to_string()
}

impl MetadataBuilder {
    fn from_attrs(attrs: &Attrs) -> Self {
        let mut legacy_ratings = Vec::new();
        if let Some(value) = attrs.f64_opt("rating") {
            legacy_ratings.push(RatingValue {
                source: rating_source(attrs.get("ratingImage")),
                kind: "critic".to_string(),
                value,
            });
        }
        if let Some(value) = attrs.f64_opt("audienceRating") {
            legacy_ratings.push(RatingValue {
                source: rating_source(attrs.get("audienceRatingImage")),
                kind: "audience".to_string(),
                value,
            });
        }

        Self {
            id: attrs.string("ratingKey"),
            title: attrs.text("title"),
            year: attrs.i32_opt("year"),
            studio: attrs.string("studio"),
            summary: attrs.string("summary"),
            tagline: attrs.string("tagline"),
            content_rating: attrs.string("contentRating"),
            duration_ms: attrs.u64_or_zero("duration"),
            originally_available_at: attrs.string("originallyAvailableAt"),
            thumb: attrs.string("thumb"),
            legacy_ratings,
            external_ids: attrs
                .get("guid")
                .and_then(ExternalId::from_guid)
                .into_iter()
                .collect(),
            ..Self::default()
        }
    }

    fn child(&mut self, name: &str, attrs: &Attrs) {
        match name {
            "Genre" => self.genres.extend(attrs.string("tag")),
            "Country" => self.countries.extend(attrs.string("tag")),
            "Director" => self.directors.extend(attrs.string("tag")),
            "Writer" => self.writers.extend(attrs.string("tag")),
            "Role" => {
                if let Some(name) = attrs.string("tag") {
                    self.roles.push(Role {
                        id: attrs.string("id"),
                        name,
                        character: attrs.string("role"),
                        thumb: attrs.string("thumb"),
                    });
                }
            }
            "Guid" => {
                if let Some(id) = attrs.get("id").and_then(ExternalId::from_guid) {
                    if !self.external_ids.contains(&id) {
                        self.external_ids.push(id);
                    }
                }
            }
            "Rating" => {
                if let Some(value) = attrs.f64_opt("value") {
                    self.ratings.push(RatingValue {
                        source: rating_source(attrs.get("image")),
                        kind: attrs.string("type").unwrap_or_else(|| "critic".to_string()),
                        value,
                    });
                }
            }
            "UltraBlurColors" => {
                self.theme_colors = Some(ThemeColors {
                    top_left: attrs.text("topLeft"),
                    top_right: attrs.text("topRight"),
                    bottom_left: attrs.text("bottomLeft"),
                    bottom_right: attrs.text("bottomRight"),
                })
            }
            _ => {}
        }
    }

    fn finish(self) -> std::result::Result<MovieMetadata, &'static str> {
        let id = self.id.ok_or("ratingKey")?;
        // Older servers only carry the root rating attributes.
        let ratings = if self.ratings.is_empty() {
            self.legacy_ratings
        } else {
            self.ratings
        };
        Ok(MovieMetadata {
            id,
            title: self.title,
            year: self.year,
            studio: self.studio,
            summary: self.summary,
            tagline: self.tagline,
            content_rating: self.content_rating,
            duration_ms: self.duration_ms,
            originally_available_at: self.originally_available_at,
            thumb: self.thumb,
            ratings,
            external_ids: self.external_ids,
            roles: self.roles,
            directors: self.directors,
            writers: self.writers,
            genres: self.genres,
            countries: self.countries,
            theme_colors: self.theme_colors,
        })
    }
}

#[derive(Default)]
struct MetadataHandler {
    current: Option<MetadataBuilder>,
    items: Vec<MovieMetadata>,
}

impl XmlHandler for MetadataHandler {
    fn start(&mut self, name: &str, attrs: &Attrs, depth: usize) {
        if depth == 1 && name == "Video" {
            self.current = Some(MetadataBuilder::from_attrs(attrs));
        } else if depth == 2 {
            if let Some(builder) = self.current.as_mut() {
                builder.child(name, attrs);
            }
        }
    }

    fn end(&mut self, name: &str, depth: usize) {
        if depth != 1 || name != "Video" {
            return;
        }
        if let Some(builder) = self.current.take() {
            let title = builder.title.clone();
            match builder.finish() {
                Ok(item) => self.items.push(item),
                Err(field) => warn!(%title, field, "Dropping metadata without required field"),
            }
        }
    }
}

/// Parse a `/library/metadata/{id}` response.
pub fn parse_movie_metadata(bytes: &[u8]) -> Result<Vec<MovieMetadata>> {
    let mut handler = MetadataHandler::default();
    parse_document(bytes, &mut handler)?;
    Ok(handler.items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WONDERFUL_LIFE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaContainer size="1" librarySectionID="1">
  <Video ratingKey="12345" guid="plex://movie/5d7768244de0ee001fcc7fed" type="movie" title="It's a Wonderful Life" studio="Liberty Films" contentRating="PG" summary="An angel is sent from Heaven." rating="9.4" audienceRating="9.3" year="1946" tagline="A classic." duration="7800000" originallyAvailableAt="1946-12-20" thumb="/library/metadata/12345/thumb/1">
    <Media id="1"><Part id="1"/></Media>
    <Genre id="1" tag="Drama"/>
    <Genre id="2" tag="Fantasy"/>
    <Country id="3" tag="United States of America"/>
    <Guid id="imdb://tt0038650"/>
    <Guid id="tmdb://1585"/>
    <Rating image="imdb://image.rating" value="8.6" type="audience"/>
    <Rating image="rottentomatoes://image.rating.ripe" value="9.4" type="critic"/>
    <Director id="10" tag="Frank Capra"/>
    <Writer id="11" tag="Frances Goodrich"/>
    <Writer id="12" tag="Albert Hackett"/>
    <Role id="20" tag="James Stewart" role="George Bailey" thumb="https://metadata-static.plex.tv/a.jpg"/>
    <Role id="21" tag="Donna Reed" role="Mary Hatch"/>
    <Role id="22" tag="Lionel Barrymore"/>
    <UltraBlurColors topLeft="2b2b2b" topRight="3c3c3c" bottomRight="1a1a1a" bottomLeft="0f0f0f"/>
  </Video>
</MediaContainer>"#;

    #[test]
    fn parses_full_movie_record() {
        let items = parse_movie_metadata(WONDERFUL_LIFE.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        let m = &items[0];
        assert_eq!(m.id, "12345");
        assert_eq!(m.title, "It's a Wonderful Life");
        assert_eq!(m.year, Some(1946));
        assert_eq!(m.studio.as_deref(), Some("Liberty Films"));
        assert_eq!(m.content_rating.as_deref(), Some("PG"));
        assert_eq!(m.duration_ms, 7_800_000);
        assert_eq!(m.genres, vec!["Drama", "Fantasy"]);
        assert_eq!(m.countries, vec!["United States of America"]);
        assert_eq!(m.directors, vec!["Frank Capra"]);
        assert_eq!(m.writers, vec!["Frances Goodrich", "Albert Hackett"]);
        assert_eq!(m.roles.len(), 3);
        assert_eq!(m.roles[0].character.as_deref(), Some("George Bailey"));
        assert_eq!(m.roles[2].character, None);
        assert_eq!(m.imdb_id(), Some("tt0038650"));
        assert_eq!(m.external_id("tmdb"), Some("1585"));
        assert_eq!(m.external_ids[0].to_string(), "plex:movie/5d7768244de0ee001fcc7fed");
        assert_eq!(m.ratings.len(), 2);
        assert_eq!(m.ratings[0].source, "imdb");
        assert_eq!(m.ratings[0].kind, "audience");
        assert_eq!(m.ratings[1].source, "rottentomatoes");
        assert_eq!(m.theme_colors.as_ref().unwrap().bottom_left, "0f0f0f");
    }

    #[test]
    fn falls_back_to_root_rating_attributes() {
        let xml = br#"<MediaContainer size="1"><Video ratingKey="1" title="Old" rating="7.5" ratingImage="rottentomatoes://image.rating.ripe" audienceRating="8.0"/></MediaContainer>"#;
        let m = &parse_movie_metadata(xml).unwrap()[0];
        assert_eq!(m.ratings.len(), 2);
        assert_eq!(m.ratings[0].source, "rottentomatoes");
        assert_eq!(m.ratings[1].source, "plex");
        assert_eq!(m.ratings[1].kind, "audience");
    }

    #[test]
    fn minimal_record_parses_with_absent_fields() {
        let xml = br#"<MediaContainer size="1"><Video ratingKey="5"></Video></MediaContainer>"#;
        let m = &parse_movie_metadata(xml).unwrap()[0];
        assert_eq!(m.id, "5");
        assert_eq!(m.year, None);
        assert_eq!(m.duration_ms, 0);
        assert!(m.roles.is_empty());
        assert!(m.genres.is_empty());
        assert!(m.ratings.is_empty());
        assert!(m.theme_colors.is_none());
    }

    #[test]
    fn empty_container_has_no_items() {
        assert!(parse_movie_metadata(br#"<MediaContainer size="0"/>"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn sub_lists_are_rebuilt_per_parse() {
        let first = parse_movie_metadata(WONDERFUL_LIFE.as_bytes()).unwrap();
        let second = parse_movie_metadata(WONDERFUL_LIFE.as_bytes()).unwrap();
        assert_eq!(first[0].genres.len(), second[0].genres.len());
        assert_eq!(second[0].roles.len(), 3);
    }

    #[test]
    fn guid_parsing_rejects_bare_values() {
        assert!(ExternalId::from_guid("tt0038650").is_none());
        assert!(ExternalId::from_guid("imdb://").is_none());
    }
}
