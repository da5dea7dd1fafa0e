use cloudkit::{
    RequestOptions, StoreConfig, StoreEngine, ViewConfig, implementations::memory::MemoryBackend,
};

fn engine(collections: &[&str], views: Vec<ViewConfig>) -> StoreEngine<MemoryBackend> {
    let config = StoreConfig {
        collections: collections.iter().map(|c| c.to_string()).collect(),
        views,
        database_url: None,
    };
    StoreEngine::new(MemoryBackend::new(), config).expect("valid config")
}

fn opts() -> RequestOptions {
    RequestOptions::default()
}

fn with_json(json: &str) -> RequestOptions {
    RequestOptions { json: Some(json.to_string()), ..Default::default() }
}

#[tokio::test]
async fn creates_and_fetches_a_resource() {
    let engine = engine(&["foos"], vec![]);
    let created = engine.post("/foos", &with_json(r#"{"name":"widget"}"#)).await.expect("post succeeds");
    assert_eq!(created.status, 201);
    let etag = created.etag().expect("etag present").to_string();

    let body: serde_json::Value = serde_json::from_str(&created.content).unwrap();
    let uri = body["uri"].as_str().unwrap().to_string();

    let fetched = engine.get(&uri, &opts()).await.expect("get succeeds");
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.content, r#"{"name":"widget"}"#);
    assert_eq!(fetched.etag(), Some(etag.as_str()));
}

#[tokio::test]
async fn put_creates_then_updates_with_matching_etag() {
    let engine = engine(&["foos"], vec![]);
    let uri = "/foos/00000000-0000-0000-0000-000000000001";
    let created = engine.put(uri, &with_json(r#"{"v":1}"#)).await.expect("create via put");
    assert_eq!(created.status, 201);
    let etag = created.etag().unwrap().to_string();

    let update_opts =
        RequestOptions { json: Some(r#"{"v":2}"#.to_string()), etag: Some(etag), ..Default::default() };
    let updated = engine.put(uri, &update_opts).await.expect("update via put");
    assert_eq!(updated.status, 200);

    let current = engine.get(uri, &opts()).await.expect("get succeeds");
    assert_eq!(current.content, r#"{"v":2}"#);
}

#[tokio::test]
async fn put_update_with_stale_etag_is_rejected() {
    let engine = engine(&["foos"], vec![]);
    let uri = "/foos/00000000-0000-0000-0000-000000000002";
    engine.put(uri, &with_json(r#"{"v":1}"#)).await.expect("create via put");

    let update_opts = RequestOptions {
        json: Some(r#"{"v":2}"#.to_string()),
        etag: Some("not-the-real-etag".to_string()),
        ..Default::default()
    };
    let err = engine.put(uri, &update_opts).await.expect_err("stale etag rejected");
    assert_eq!(err.status().as_u16(), 412);
}

#[tokio::test]
async fn update_without_etag_requires_one() {
    let engine = engine(&["foos"], vec![]);
    let uri = "/foos/00000000-0000-0000-0000-000000000003";
    engine.put(uri, &with_json(r#"{"v":1}"#)).await.expect("create via put");

    let err = engine.put(uri, &with_json(r#"{"v":2}"#)).await.expect_err("etag required");
    assert_eq!(err.status().as_u16(), 400);
}

#[tokio::test]
async fn delete_requires_matching_etag_then_tombstones() {
    let engine = engine(&["foos"], vec![]);
    let created = engine.post("/foos", &with_json(r#"{"name":"gone-soon"}"#)).await.unwrap();
    let body: serde_json::Value = serde_json::from_str(&created.content).unwrap();
    let uri = body["uri"].as_str().unwrap().to_string();
    let etag = created.etag().unwrap().to_string();

    let delete_opts = RequestOptions { etag: Some(etag), ..Default::default() };
    let deleted = engine.delete(&uri, &delete_opts).await.expect("delete succeeds");
    assert_eq!(deleted.status, 200);

    let err = engine.get(&uri, &opts()).await.expect_err("tombstoned resource is gone");
    assert_eq!(err.status().as_u16(), 410);
}

#[tokio::test]
async fn versions_remain_addressable_after_update() {
    let engine = engine(&["foos"], vec![]);
    let uri = "/foos/00000000-0000-0000-0000-000000000004";
    let created = engine.put(uri, &with_json(r#"{"v":1}"#)).await.unwrap();
    let first_etag = created.etag().unwrap().to_string();

    let update_opts = RequestOptions {
        json: Some(r#"{"v":2}"#.to_string()),
        etag: Some(first_etag.clone()),
        ..Default::default()
    };
    engine.put(uri, &update_opts).await.unwrap();

    let version_uri = format!("{uri}/versions/{first_etag}");
    let historical = engine.get(&version_uri, &opts()).await.expect("historical version is readable");
    assert_eq!(historical.content, r#"{"v":1}"#);

    let collection = engine.get(&format!("{uri}/versions"), &opts()).await.expect("version collection");
    let body: serde_json::Value = serde_json::from_str(&collection.content).unwrap();
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn malformed_json_is_rejected_with_422() {
    let engine = engine(&["foos"], vec![]);
    let err = engine.post("/foos", &with_json("not json")).await.expect_err("malformed json rejected");
    assert_eq!(err.status().as_u16(), 422);
}

#[tokio::test]
async fn put_against_unregistered_collection_is_invalid_entity_type() {
    let engine = engine(&["foos"], vec![]);
    let err = engine
        .put("/bars/00000000-0000-0000-0000-000000000005", &with_json(r#"{"v":1}"#))
        .await
        .expect_err("unregistered collection rejected");
    assert_eq!(err.status().as_u16(), 400);
}

#[tokio::test]
async fn post_against_a_resource_uri_is_method_not_allowed() {
    let engine = engine(&["foos"], vec![]);
    let err = engine
        .post("/foos/00000000-0000-0000-0000-000000000006", &with_json(r#"{"v":1}"#))
        .await
        .expect_err("post against a resource uri is rejected");
    assert_eq!(err.status().as_u16(), 405);
}

#[tokio::test]
async fn remote_user_scopes_resource_visibility() {
    let engine = engine(&["foos"], vec![]);
    let owned_opts = RequestOptions {
        json: Some(r#"{"v":1}"#.to_string()),
        remote_user: Some("alice".to_string()),
        ..Default::default()
    };
    let created = engine.post("/foos", &owned_opts).await.unwrap();
    let body: serde_json::Value = serde_json::from_str(&created.content).unwrap();
    let uri = body["uri"].as_str().unwrap().to_string();

    let as_bob = RequestOptions { remote_user: Some("bob".to_string()), ..Default::default() };
    let err = engine.get(&uri, &as_bob).await.expect_err("bob cannot see alice's resource");
    assert_eq!(err.status().as_u16(), 404);

    let as_alice = RequestOptions { remote_user: Some("alice".to_string()), ..Default::default() };
    let fetched = engine.get(&uri, &as_alice).await.expect("alice can see her own resource");
    assert_eq!(fetched.status, 200);

    let anonymous = engine.get(&uri, &opts()).await.expect("unscoped read sees everything");
    assert_eq!(anonymous.status, 200);
}

#[tokio::test]
async fn put_by_non_owner_against_an_owned_resource_is_not_found() {
    let engine = engine(&["foos"], vec![]);
    let owned_opts = RequestOptions {
        json: Some(r#"{"v":1}"#.to_string()),
        remote_user: Some("alice".to_string()),
        ..Default::default()
    };
    let created = engine.post("/foos", &owned_opts).await.unwrap();
    let body: serde_json::Value = serde_json::from_str(&created.content).unwrap();
    let uri = body["uri"].as_str().unwrap().to_string();
    let etag = created.etag().unwrap().to_string();

    let as_bob = RequestOptions {
        json: Some(r#"{"v":2}"#.to_string()),
        etag: Some(etag),
        remote_user: Some("bob".to_string()),
        ..Default::default()
    };
    let err = engine.put(&uri, &as_bob).await.expect_err("bob cannot update alice's resource");
    assert_eq!(err.status().as_u16(), 404);

    let as_alice = RequestOptions { remote_user: Some("alice".to_string()), ..Default::default() };
    let still_there = engine.get(&uri, &as_alice).await.expect("alice's resource is untouched");
    assert_eq!(still_there.content, r#"{"v":1}"#);
}

#[tokio::test]
async fn options_reports_allowed_methods_per_uri_kind() {
    let engine = engine(&["foos"], vec![]);
    let collection = engine.options("/foos");
    assert_eq!(collection.header("Allow"), Some("GET, HEAD, POST, OPTIONS"));

    let resource = engine.options("/foos/00000000-0000-0000-0000-000000000007");
    assert_eq!(resource.header("Allow"), Some("GET, HEAD, PUT, DELETE, OPTIONS"));
}

#[tokio::test]
async fn meta_endpoint_lists_configured_collections_only() {
    let engine = engine(
        &["foos", "fruits"],
        vec![ViewConfig {
            name: "fruits_by_color".to_string(),
            observed_collection: "fruits".to_string(),
            extracted_keys: vec!["color".to_string()],
        }],
    );
    let meta = engine.get("/cloudkit-meta", &opts()).await.expect("meta endpoint responds");
    let body: serde_json::Value = serde_json::from_str(&meta.content).unwrap();
    let uris: Vec<&str> = body["uris"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(uris, vec!["/foos", "/fruits"]);
}

#[tokio::test]
async fn view_tracks_creates_updates_and_deletes() {
    let view = ViewConfig {
        name: "fruits_by_color".to_string(),
        observed_collection: "fruits".to_string(),
        extracted_keys: vec!["color".to_string()],
    };
    let engine = engine(&["fruits"], vec![view]);

    let apple =
        engine.post("/fruits", &with_json(r#"{"kind":"apple","color":"red"}"#)).await.unwrap();
    let apple_body: serde_json::Value = serde_json::from_str(&apple.content).unwrap();
    let apple_uri = apple_body["uri"].as_str().unwrap().to_string();
    let apple_etag = apple.etag().unwrap().to_string();

    engine.post("/fruits", &with_json(r#"{"kind":"lime","color":"green"}"#)).await.unwrap();

    let red_view = engine.get("/fruits_by_color", &RequestOptions {
        filters: [("color".to_string(), "red".to_string())].into_iter().collect(),
        ..Default::default()
    })
    .await
    .expect("view lookup succeeds");
    let red_body: serde_json::Value = serde_json::from_str(&red_view.content).unwrap();
    assert_eq!(red_body["uris"].as_array().unwrap().len(), 1);
    assert_eq!(red_body["uris"][0], apple_uri);

    let recolor_opts = RequestOptions {
        json: Some(r#"{"kind":"apple","color":"green"}"#.to_string()),
        etag: Some(apple_etag),
        ..Default::default()
    };
    engine.put(&apple_uri, &recolor_opts).await.expect("update succeeds");

    let red_view_after = engine.get("/fruits_by_color", &RequestOptions {
        filters: [("color".to_string(), "red".to_string())].into_iter().collect(),
        ..Default::default()
    })
    .await
    .unwrap();
    let red_body_after: serde_json::Value = serde_json::from_str(&red_view_after.content).unwrap();
    assert!(red_body_after["uris"].as_array().unwrap().is_empty());

    let current = engine.get(&apple_uri, &opts()).await.unwrap();
    let etag = current.etag().unwrap().to_string();
    let delete_opts = RequestOptions { etag: Some(etag), ..Default::default() };
    engine.delete(&apple_uri, &delete_opts).await.expect("delete succeeds");

    let green_view = engine.get("/fruits_by_color", &RequestOptions {
        filters: [("color".to_string(), "green".to_string())].into_iter().collect(),
        ..Default::default()
    })
    .await
    .unwrap();
    let green_body: serde_json::Value = serde_json::from_str(&green_view.content).unwrap();
    assert!(green_body["uris"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn resource_collection_bundles_total_before_slicing() {
    let engine = engine(&["foos"], vec![]);
    for i in 0..5 {
        engine.post("/foos", &with_json(&format!(r#"{{"n":{i}}}"#))).await.unwrap();
    }
    let paged = engine
        .get("/foos", &RequestOptions { limit: Some(2), offset: Some(1), ..Default::default() })
        .await
        .expect("paged collection read");
    let body: serde_json::Value = serde_json::from_str(&paged.content).unwrap();
    assert_eq!(body["total"], 5);
    assert_eq!(body["uris"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn resource_collection_applies_extra_equality_filters() {
    let engine = engine(&["fruits"], vec![]);
    let apple = engine.post("/fruits", &with_json(r#"{"kind":"apple","color":"red"}"#)).await.unwrap();
    engine.post("/fruits", &with_json(r#"{"kind":"lime","color":"green"}"#)).await.unwrap();
    let apple_body: serde_json::Value = serde_json::from_str(&apple.content).unwrap();
    let apple_uri = apple_body["uri"].as_str().unwrap().to_string();

    let red_only = engine
        .get("/fruits", &RequestOptions {
            filters: [("color".to_string(), "red".to_string())].into_iter().collect(),
            ..Default::default()
        })
        .await
        .expect("filtered collection read");
    let body: serde_json::Value = serde_json::from_str(&red_only.content).unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["uris"][0], apple_uri);
}

#[tokio::test]
async fn head_returns_no_body_but_same_headers_as_get() {
    let engine = engine(&["foos"], vec![]);
    let created = engine.post("/foos", &with_json(r#"{"v":1}"#)).await.unwrap();
    let body: serde_json::Value = serde_json::from_str(&created.content).unwrap();
    let uri = body["uri"].as_str().unwrap().to_string();

    let head = engine.head(&uri, &opts()).await.expect("head succeeds");
    assert!(head.content.is_empty());
    assert_eq!(head.etag(), created.etag());
}

#[tokio::test]
async fn reset_clears_all_state() {
    let engine = engine(&["foos"], vec![]);
    engine.post("/foos", &with_json(r#"{"v":1}"#)).await.unwrap();
    engine.reset().await.expect("reset succeeds");
    let listing = engine.get("/foos", &opts()).await.expect("empty collection read");
    let body: serde_json::Value = serde_json::from_str(&listing.content).unwrap();
    assert_eq!(body["total"], 0);
}
