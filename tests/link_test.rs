//! Link resolution tests

use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use stalkercheck::api::link::episode_command;
use stalkercheck::api::{
    build_http_client, DeviceIdentity, LinkResolver, PortalError, PortalSettings, SessionManager,
};
use stalkercheck::models::ContentKind;

const LOAD: &str = "/stalker_portal/server/load.php";

async fn connected(server: &mut ServerGuard) -> SessionManager {
    server
        .mock("GET", LOAD)
        .match_query(Matcher::UrlEncoded("action".into(), "handshake".into()))
        .with_status(200)
        .with_body(r#"{"js":{"token":"TOKEN"}}"#)
        .create_async()
        .await;

    let session = SessionManager::new(
        build_http_client(Duration::from_secs(5)).unwrap(),
        &format!("{}/stalker_portal/c/", server.url()),
        DeviceIdentity::derive("00:1A:79:00:00:02"),
        PortalSettings {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            fetch_main_info: false,
            ..PortalSettings::default()
        },
    );
    session.handshake().await.unwrap();
    session
}

async fn mock_link(server: &mut ServerGuard, kind: &str, cmd: &str, answer: &str) -> mockito::Mock {
    server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("action".into(), "create_link".into()),
            Matcher::UrlEncoded("type".into(), kind.into()),
            Matcher::UrlEncoded("cmd".into(), cmd.into()),
        ]))
        .with_status(200)
        .with_body(serde_json::json!({"js": {"cmd": answer}}).to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn test_create_link_strips_player_prefix() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;
    let mock = mock_link(
        &mut server,
        "itv",
        "ffmpeg http://localhost/ch/1",
        "ffmpeg http://cdn.example.net/live/1.ts?play_token=abc",
    )
    .await;

    let url = LinkResolver::new(&session)
        .create_link("ffmpeg http://localhost/ch/1", ContentKind::Live)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(url, "http://cdn.example.net/live/1.ts?play_token=abc");
}

#[tokio::test]
async fn test_relative_link_resolves_against_portal_host() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;
    let cmd = episode_command("55");
    mock_link(&mut server, "vod", &cmd, "ffrt /media/file_55.mpg").await;

    let url = LinkResolver::new(&session)
        .create_link(&cmd, ContentKind::Series)
        .await
        .unwrap();

    assert_eq!(url, format!("{}/media/file_55.mpg", server.url()));
}

#[tokio::test]
async fn test_bare_filename_goes_under_media() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;
    mock_link(&mut server, "vod", "/media/7.mpg", "auto movie_7.mkv").await;

    let url = LinkResolver::new(&session)
        .create_link("/media/7.mpg", ContentKind::Movie)
        .await
        .unwrap();

    assert_eq!(url, format!("{}/media/movie_7.mkv", server.url()));
}

#[tokio::test]
async fn test_missing_link_is_an_error() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;
    mock_link(&mut server, "itv", "ffmpeg http://localhost/ch/2", "").await;

    let err = LinkResolver::new(&session)
        .create_link("ffmpeg http://localhost/ch/2", ContentKind::Live)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::Network(_)), "{:?}", err);
}
