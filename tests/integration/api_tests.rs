use super::*;
use axum::http::{Method, StatusCode};
use serde_json::Value;

fn default_stores() -> Vec<StoreAdapterRef> {
    vec![
        scripted("kabum", Script::Items(items("kabum", "notebook", &[3500.0, 2999.9]))),
        scripted("pichau", Script::Items(items("pichau", "notebook", &[3200.0]))),
    ]
}

fn json(body: &str) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(body)?)
}

#[tokio::test]
async fn test_health_check() -> anyhow::Result<()> {
    let (app, _) = create_test_app(default_stores()).await?;

    let (status, body) = make_request(&app, Method::GET, "/health").await?;

    assert_eq!(status, StatusCode::OK);
    let body = json(&body)?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["stores"], 2);
    Ok(())
}

#[tokio::test]
async fn test_list_stores() -> anyhow::Result<()> {
    let mut stores = default_stores();
    stores.push(Arc::new(ScriptedStore::new("antiga", Script::Items(Vec::new())).disabled()));
    let (app, _) = create_test_app(stores).await?;

    let (status, body) = make_request(&app, Method::GET, "/api/search/stores").await?;

    assert_eq!(status, StatusCode::OK);
    let body = json(&body)?;
    let names: Vec<&str> = body["data"]
        .as_array()
        .map(|stores| stores.iter().filter_map(|s| s["name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["kabum", "pichau"]);
    Ok(())
}

#[tokio::test]
async fn test_short_query_is_rejected() -> anyhow::Result<()> {
    let (app, _) = create_test_app(default_stores()).await?;

    for uri in ["/api/search/stream?q=a", "/api/search?q=a", "/api/search"] {
        let (status, body) = make_request(&app, Method::GET, uri).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(json(&body)?["success"], false);
    }
    Ok(())
}

#[tokio::test]
async fn test_inverted_price_range_is_rejected() -> anyhow::Result<()> {
    let (app, _) = create_test_app(default_stores()).await?;

    let (status, _) = make_request(&app, Method::GET, "/api/search?q=notebook&minPrice=500&maxPrice=100").await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_search_stream_emits_sse_events() -> anyhow::Result<()> {
    let (app, _) = create_test_app(default_stores()).await?;

    let (status, body) = make_request(&app, Method::GET, "/api/search/stream?q=notebook").await?;

    assert_eq!(status, StatusCode::OK);
    let events: Vec<Value> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .map(serde_json::from_str)
        .collect::<std::result::Result<_, _>>()?;

    assert_eq!(events.first().map(|e| e["type"].clone()), Some(Value::from("start")));
    assert_eq!(events.last().map(|e| e["type"].clone()), Some(Value::from("done")));
    assert_eq!(events.iter().filter(|e| e["type"] == "searching").count(), 2);

    let done = &events[events.len() - 1]["data"];
    assert_eq!(done["totalResults"], 3);
    assert_eq!(done["results"][0]["price"].as_f64(), Some(2999.9));
    Ok(())
}

#[tokio::test]
async fn test_classic_search_returns_summary() -> anyhow::Result<()> {
    let (app, _) = create_test_app(default_stores()).await?;

    let uri = "/api/search?q=notebook&stores=pichau&sortBy=price_desc";
    let (status, body) = make_request(&app, Method::GET, uri).await?;

    assert_eq!(status, StatusCode::OK);
    let body = json(&body)?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["query"], "notebook");
    assert_eq!(body["data"]["totalResults"], 1);
    assert_eq!(body["data"]["storesSearched"][0], "pichau");
    assert_eq!(body["data"]["fromCache"], false);

    let (_, again) = make_request(&app, Method::GET, uri).await?;
    assert_eq!(json(&again)?["data"]["fromCache"], true);
    Ok(())
}

#[tokio::test]
async fn test_stats_and_clear_cache() -> anyhow::Result<()> {
    let (app, state) = create_test_app(default_stores()).await?;
    make_request(&app, Method::GET, "/api/search?q=notebook").await?;
    state.orchestrator.cache().sweep().await;

    let (status, body) = make_request(&app, Method::GET, "/api/stats").await?;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body)?;
    assert_eq!(body["data"]["cache"]["entries"], 1);
    assert!(body["data"]["history"]["totalSearches"].is_number());

    let (status, body) = make_request(&app, Method::DELETE, "/api/cache").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)?["data"]["entries"], 0);

    let (_, body) = make_request(&app, Method::GET, "/api/search?q=notebook").await?;
    assert_eq!(json(&body)?["data"]["fromCache"], false);
    Ok(())
}

#[tokio::test]
async fn test_recent_searches_and_price_history() -> anyhow::Result<()> {
    let (app, state) = create_test_app(default_stores()).await?;
    make_request(&app, Method::GET, "/api/search?q=notebook").await?;

    let history = state.history.clone();
    let saved = wait_for_condition(
        || {
            let history = history.clone();
            async move { history.stats().await.map(|s| s.total_products == 3).unwrap_or(false) }
        },
        5,
    )
    .await;
    assert!(saved);

    let (status, body) = make_request(&app, Method::GET, "/api/products/recent?limit=5").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)?["data"][0]["query"], "notebook");

    let uri = "/api/products/history?name=notebook%20kabum&store=kabum";
    let (status, body) = make_request(&app, Method::GET, uri).await?;
    assert_eq!(status, StatusCode::OK);
    let rows = json(&body)?;
    assert_eq!(rows["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(rows["data"][0]["store"], "kabum");
    let prices: Vec<f64> = rows["data"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r["price"].as_f64()).collect())
        .unwrap_or_default();
    assert_eq!(prices.len(), 2);
    assert!(prices.contains(&3500.0));
    Ok(())
}

#[tokio::test]
async fn test_price_history_validation() -> anyhow::Result<()> {
    let (app, _) = create_test_app(default_stores()).await?;

    let (status, _) = make_request(&app, Method::GET, "/api/products/history?store=kabum").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = make_request(&app, Method::GET, "/api/products/history?name=ssd").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = make_request(&app, Method::GET, "/api/products/history?name=ssd&store=nenhuma").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
