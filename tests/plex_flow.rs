use rolecall::config::Config;
use rolecall::error::Error;
use rolecall::plex::{PlexClient, Transport};
use rolecall::retry::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const TOKEN: &str = "plex-token";

const ONE_SESSION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaContainer size="1">
  <Video ratingKey="12345" title="It's A Wonderful Life" year="1946" duration="7800000" viewOffset="3600000" type="movie">
    <User id="1" title="george"/>
    <Player device="Living Room" platform="tvOS" product="Plex for Apple TV" state="playing" local="1"/>
  </Video>
</MediaContainer>"#;

fn client() -> PlexClient {
    let config = Config {
        retry: RetryPolicy::none(),
        ..Config::default()
    };
    PlexClient::new(&config).unwrap()
}

fn transport(label: &str, base: &str) -> Transport {
    Transport::new(label, base, Duration::from_secs(2))
}

fn unreachable() -> Transport {
    transport("secure", "http://127.0.0.1:1")
}

#[tokio::test]
async fn fetches_and_parses_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .and(query_param("X-Plex-Token", TOKEN))
        .and(header("accept", "application/xml"))
        .and(header("X-Plex-Product", "RoleCall"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ONE_SESSION))
        .expect(1)
        .mount(&server)
        .await;

    let sessions = client()
        .fetch_sessions(
            &[transport("local", &server.uri())],
            TOKEN,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(sessions.len(), 1);
    let s = &sessions[0];
    assert_eq!(s.id, "12345");
    assert_eq!(s.title, "It's A Wonderful Life");
    assert_eq!(s.year, Some(1946));
    assert_eq!(s.duration_ms, 7_800_000);
    assert_eq!(s.view_offset_ms, 3_600_000);
    assert_eq!(s.user.name, "george");
    assert!(s.player.local);
}

#[tokio::test]
async fn falls_back_to_next_transport_on_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<MediaContainer size="0"/>"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let sessions = client()
        .fetch_sessions(
            &[unreachable(), transport("insecure", &server.uri())],
            TOKEN,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(sessions.is_empty());
}

#[tokio::test]
async fn unauthorized_stops_before_the_next_transport() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ONE_SESSION))
        .expect(0)
        .mount(&second)
        .await;

    let err = client()
        .fetch_sessions(
            &[transport("a", &first.uri()), transport("b", &second.uri())],
            TOKEN,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unauthorized));
}

#[tokio::test]
async fn last_error_surfaces_when_every_transport_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client()
        .fetch_server_info(
            &[unreachable(), transport("b", &server.uri())],
            TOKEN,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        Error::Server { status, .. } => assert_eq!(status, 503),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn validation_message_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(422).set_body_string(r#"{"error":"Server is shutting down"}"#),
        )
        .mount(&server)
        .await;

    let err = client()
        .fetch_sessions(
            &[transport("a", &server.uri())],
            TOKEN,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.user_message(), "Server is shutting down");
}

#[tokio::test]
async fn retries_transient_failures_on_the_same_transport() {
    let config = Config {
        retry: RetryPolicy {
            max_attempts: 2,
            step: Duration::from_millis(10),
        },
        ..Config::default()
    };
    let plex = PlexClient::new(&config).unwrap();

    let err = plex
        .fetch_sessions(&[unreachable()], TOKEN, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn metadata_lookup_maps_empty_container_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/metadata/999"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<MediaContainer size="0"></MediaContainer>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/library/metadata/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<MediaContainer size="1">
                 <Video ratingKey="12345" title="It's A Wonderful Life" year="1946" duration="7800000">
                   <Guid id="imdb://tt0038650"/>
                   <Role id="7" tag="James Stewart" role="George Bailey"/>
                 </Video>
               </MediaContainer>"#,
        ))
        .mount(&server)
        .await;

    let plex = client();
    let transports = [transport("a", &server.uri())];
    let cancel = CancellationToken::new();

    let missing = plex
        .fetch_movie_metadata(&transports, TOKEN, "999", &cancel)
        .await
        .unwrap();
    assert!(missing.is_none());

    let movie = plex
        .fetch_movie_metadata(&transports, TOKEN, "12345", &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(movie.imdb_id(), Some("tt0038650"));
    assert_eq!(movie.roles[0].character.as_deref(), Some("George Bailey"));
}

#[tokio::test]
async fn cancelled_request_returns_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ONE_SESSION)
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = client()
        .fetch_sessions(&[transport("a", &server.uri())], TOKEN, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn transports_are_tried_strictly_in_list_order() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    let log = order.clone();
    Mock::given(method("GET"))
        .respond_with(move |_: &Request| {
            log.lock().unwrap().push("a");
            ResponseTemplate::new(500)
        })
        .expect(1)
        .mount(&first)
        .await;
    let log = order.clone();
    Mock::given(method("GET"))
        .respond_with(move |_: &Request| {
            log.lock().unwrap().push("b");
            ResponseTemplate::new(200).set_body_string(ONE_SESSION)
        })
        .expect(1)
        .mount(&second)
        .await;

    let sessions = client()
        .fetch_sessions(
            &[transport("a", &first.uri()), transport("b", &second.uri())],
            TOKEN,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(sessions.len(), 1);
    assert_eq!(order.lock().unwrap().as_slice(), ["a", "b"]);
}

#[tokio::test]
async fn malformed_body_names_the_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/metadata/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<MediaContainer size=\"1\">"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .mount(&server)
        .await;
    let plex = client();
    let transports = [transport("a", &server.uri())];
    let cancel = CancellationToken::new();

    let err = plex
        .fetch_movie_metadata(&transports, TOKEN, "12345", &cancel)
        .await
        .unwrap_err();
    match err {
        Error::Decode { endpoint, .. } => assert_eq!(endpoint, "/library/metadata/12345"),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = plex
        .fetch_sessions(&transports, TOKEN, &cancel)
        .await
        .unwrap_err();
    match err {
        Error::Decode { endpoint, .. } => assert_eq!(endpoint, "/status/sessions"),
        other => panic!("unexpected error: {other:?}"),
    }
}
