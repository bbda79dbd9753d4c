//! Content listing tests
//!
//! Category splitting, paginated retrieval and series navigation against a
//! mocked portal.

use std::io::Write;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use stalkercheck::api::{
    build_http_client, ContentResolver, DeviceIdentity, PortalError, PortalSettings,
    SessionManager,
};
use stalkercheck::models::{ContentKind, ItemType};

const LOAD: &str = "/stalker_portal/server/load.php";

fn action(name: &str) -> Matcher {
    Matcher::UrlEncoded("action".into(), name.into())
}

fn param(key: &str, value: &str) -> Matcher {
    Matcher::UrlEncoded(key.into(), value.into())
}

/// Session already holding a token
async fn connected(server: &mut ServerGuard) -> SessionManager {
    server
        .mock("GET", LOAD)
        .match_query(action("handshake"))
        .with_status(200)
        .with_body(r#"{"js":{"token":"TOKEN"}}"#)
        .create_async()
        .await;

    let session = SessionManager::new(
        build_http_client(Duration::from_secs(5)).unwrap(),
        &server.url(),
        DeviceIdentity::derive("00:1A:79:00:00:01"),
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

fn page_body(page: u32, per_page: u32, total: u64) -> String {
    let data: Vec<serde_json::Value> = (0..per_page)
        .map(|i| {
            serde_json::json!({
                "id": format!("{}-{}", page, i),
                "name": format!("Movie {} {}", page, i),
                "cmd": format!("/media/{}-{}.mpg", page, i),
            })
        })
        .collect();
    serde_json::json!({"js": {"total_items": total, "data": data}}).to_string()
}

// =============================================================================
// Category Tests
// =============================================================================

#[tokio::test]
async fn test_vod_categories_split_by_keyword() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![
            action("get_categories"),
            param("type", "vod"),
        ]))
        .with_status(200)
        .with_body(
            r#"{"js":[
                {"id":"1","title":"Action Movies"},
                {"id":"2","title":"TV Series"},
                {"id":3,"title":"Kids SHOWS"},
                {"id":"","title":"Broken"}
            ]}"#,
        )
        .expect(2)
        .create_async()
        .await;

    let content = ContentResolver::new(&session);
    let movies = content.list_categories(ContentKind::Movie).await.unwrap();
    let series = content.list_categories(ContentKind::Series).await.unwrap();

    let movie_ids: Vec<&str> = movies.iter().map(|c| c.id.as_str()).collect();
    let series_ids: Vec<&str> = series.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(movie_ids, vec!["1"]);
    assert_eq!(series_ids, vec!["2", "3"]);
    assert!(series.iter().all(|c| c.kind == ContentKind::Series));
}

#[tokio::test]
async fn test_live_genres_are_not_filtered() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    let mock = server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![action("get_genres"), param("type", "itv")]))
        .match_header("Authorization", "Bearer TOKEN")
        .with_status(200)
        .with_body(r#"{"js":[{"id":"*","title":"All"},{"id":"5","title":"TV News"}]}"#)
        .create_async()
        .await;

    let genres = ContentResolver::new(&session)
        .list_categories(ContentKind::Live)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(genres.len(), 2);
    assert_eq!(genres[1].name, "TV News");
}

// =============================================================================
// Pagination Tests
// =============================================================================

#[tokio::test]
async fn test_fetch_all_pages_issues_one_request_per_page_in_order() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    let mut mocks = Vec::new();
    for page in 1..=5u32 {
        let body = page_body(page, 50, 250);
        let mock = server
            .mock("GET", LOAD)
            .match_query(Matcher::AllOf(vec![
                action("get_ordered_list"),
                param("type", "vod"),
                param("category", "12"),
                param("p", &page.to_string()),
            ]))
            .with_status(200)
            .expect(1);
        // Page 2 answers last so completion order differs from page order
        let mock = if page == 2 {
            mock.with_chunked_body(move |w| {
                std::thread::sleep(Duration::from_millis(300));
                w.write_all(body.as_bytes())
            })
        } else {
            mock.with_body(body)
        };
        mocks.push(mock.create_async().await);
    }

    let items = ContentResolver::new(&session)
        .fetch_all_pages(ContentKind::Movie, "12")
        .await
        .unwrap();

    for mock in &mocks {
        mock.assert_async().await;
    }
    assert_eq!(items.len(), 250);
    assert_eq!(items[0].stream_id, "1-0");
    assert_eq!(items[49].stream_id, "1-49");
    assert_eq!(items[50].stream_id, "2-0");
    assert_eq!(items[249].stream_id, "5-49");
    assert!(items.iter().all(|i| i.item_type == ItemType::Movie));
}

#[tokio::test]
async fn test_page_size_counts_rows_without_id() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![action("get_ordered_list"), param("p", "1")]))
        .with_status(200)
        .with_body(r#"{"js":{"total_items":"4","data":[{"id":"1"},{"name":"no id"}]}}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![action("get_ordered_list"), param("p", "2")]))
        .with_status(200)
        .with_body(r#"{"js":{"total_items":"4","data":[{"id":"3"},{"id":"4"}]}}"#)
        .expect(1)
        .create_async()
        .await;
    let beyond = server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![
            action("get_ordered_list"),
            Matcher::Regex("(^|&)p=[3-9]".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"js":{"total_items":"4","data":[]}}"#)
        .expect(0)
        .create_async()
        .await;

    let items = ContentResolver::new(&session)
        .fetch_all_pages(ContentKind::Movie, "3")
        .await
        .unwrap();

    beyond.assert_async().await;
    let ids: Vec<&str> = items.iter().map(|i| i.stream_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3", "4"]);
}

#[tokio::test]
async fn test_single_page_category() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    let mock = server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![
            action("get_ordered_list"),
            param("type", "itv"),
            param("genre", "0"),
            param("p", "1"),
        ]))
        .with_status(200)
        .with_body(r#"{"js":{"total_items":"2","data":[
            {"id":"1","name":"One","cmd":"ffmpeg http://localhost/ch/1"},
            {"id":"2","name":"Two"}
        ]}}"#)
        .expect(1)
        .create_async()
        .await;

    let items = ContentResolver::new(&session)
        .fetch_all_pages(ContentKind::Live, "*")
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].has_cmd());
    assert!(!items[1].has_cmd());
    assert_eq!(items[0].item_type, ItemType::Channel);
}

#[tokio::test]
async fn test_failed_page_fails_whole_listing() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    // Page 3 is left unmocked and answers 501
    for page in [1u32, 2, 4] {
        server
            .mock("GET", LOAD)
            .match_query(Matcher::AllOf(vec![
                action("get_ordered_list"),
                param("p", &page.to_string()),
            ]))
            .with_status(200)
            .with_body(page_body(page, 10, 40))
            .create_async()
            .await;
    }

    let result = ContentResolver::new(&session)
        .fetch_all_pages(ContentKind::Movie, "7")
        .await;

    assert!(matches!(result, Err(PortalError::Network(_))), "{:?}", result);
}

#[tokio::test]
async fn test_list_items_page_reports_total() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![
            action("get_ordered_list"),
            param("p", "3"),
        ]))
        .with_status(200)
        .with_body(page_body(3, 14, 114))
        .create_async()
        .await;

    let (items, total) = ContentResolver::new(&session)
        .list_items_page(ContentKind::Movie, "9", 3)
        .await
        .unwrap();

    assert_eq!(total, 114);
    assert_eq!(items.len(), 14);
    assert_eq!(items[0].stream_id, "3-0");
}

// =============================================================================
// Series Tests
// =============================================================================

#[tokio::test]
async fn test_list_seasons() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![
            action("get_ordered_list"),
            param("movie_id", "10"),
            param("season_id", "0"),
            param("episode_id", "0"),
        ]))
        .with_status(200)
        .with_body(r#"{"js":{"total_items":3,"data":[
            {"id":"10:1","name":"Season 1","is_season":true},
            {"id":"10:2","name":"Season 2","is_season":"1"},
            {"id":"10:x","name":"Trailer","cmd":"/media/trailer.mpg"}
        ]}}"#)
        .create_async()
        .await;

    let seasons = ContentResolver::new(&session)
        .list_seasons("10")
        .await
        .unwrap();

    let ids: Vec<&str> = seasons.iter().map(|s| s.stream_id.as_str()).collect();
    assert_eq!(ids, vec!["10:1", "10:2"]);
    assert!(seasons
        .iter()
        .all(|s| s.item_type == ItemType::Season && s.parent_series_id.as_deref() == Some("10")));
}

#[tokio::test]
async fn test_list_episodes_links_parents() {
    let mut server = Server::new_async().await;
    let session = connected(&mut server).await;

    server
        .mock("GET", LOAD)
        .match_query(Matcher::AllOf(vec![
            action("get_ordered_list"),
            param("movie_id", "10"),
            param("season_id", "10:1"),
        ]))
        .with_status(200)
        .with_body(r#"{"js":{"total_items":2,"data":[
            {"id":"101","name":"Pilot","cmd":"/media/file_101.mpg"},
            {"id":"102","name":"Second","is_episode":1}
        ]}}"#)
        .create_async()
        .await;

    let episodes = ContentResolver::new(&session)
        .list_episodes("10", "10:1")
        .await
        .unwrap();

    assert_eq!(episodes.len(), 2);
    for episode in &episodes {
        assert_eq!(episode.item_type, ItemType::Episode);
        assert_eq!(episode.parent_series_id.as_deref(), Some("10"));
        assert_eq!(episode.parent_season_id.as_deref(), Some("10:1"));
    }
    assert!(!episodes[1].has_cmd());
}
