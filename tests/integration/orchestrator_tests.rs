use super::*;
use busca_precos::models::{SearchFilters, SortBy};
use rust_decimal::Decimal;
use std::collections::HashMap;

fn completions_per_store(events: &[SearchEvent]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for event in events.iter().filter(|e| e.is_completion()) {
        if let Some(store) = event.store() {
            *counts.entry(store.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() -> anyhow::Result<()> {
    let tracker = Arc::new(ConcurrencyTracker::default());
    let adapters: Vec<StoreAdapterRef> = (0..10)
        .map(|i| {
            let name = format!("loja{}", i);
            Arc::new(
                ScriptedStore::new(&name, Script::Items(items(&name, "notebook", &[1000.0 + i as f64])))
                    .with_delay(Duration::from_millis(100))
                    .tracked(Arc::clone(&tracker)),
            ) as StoreAdapterRef
        })
        .collect();

    let orchestrator = create_orchestrator(adapters, SearchConfig::default(), Arc::new(RecordingSink::default())).await?;
    let events = collect_events(&orchestrator, SearchRequest::new("notebook")).await?;

    assert_eq!(tracker.peak(), 4);
    assert_eq!(events.iter().filter(|e| e.event_type() == "searching").count(), 10);
    assert_eq!(events.iter().filter(|e| e.event_type() == "store_result").count(), 10);
    Ok(())
}

#[tokio::test]
async fn test_every_store_settles_exactly_once() -> anyhow::Result<()> {
    let adapters = vec![
        scripted("kabum", Script::Items(items("kabum", "ssd", &[300.0, 250.0]))),
        scripted("pichau", Script::Items(Vec::new())),
        scripted("terabyte", Script::Fail("HTTP 403".to_string())),
        scripted("amazon", Script::Panic),
    ];

    let orchestrator = create_orchestrator(adapters, SearchConfig::default(), Arc::new(RecordingSink::default())).await?;
    let events = collect_events(&orchestrator, SearchRequest::new("ssd")).await?;

    let counts = completions_per_store(&events);
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|c| *c == 1));

    match events.first() {
        Some(SearchEvent::Start(start)) => {
            assert_eq!(start.total_stores, 4);
            assert_eq!(start.stores[0].name, "kabum");
        }
        other => panic!("expected start, got {:?}", other),
    }

    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(events.last().map(|e| e.event_type()), Some("done"));

    let summary = events.last().cloned().and_then(SearchEvent::into_summary).unwrap();
    assert_eq!(summary.stores_searched.len(), 2);
    assert_eq!(summary.stores_failed.len(), 2);
    assert!(summary.stores_failed.contains(&"amazon".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_store_events_are_ordered_per_store() -> anyhow::Result<()> {
    let adapters = vec![
        Arc::new(
            ScriptedStore::new("lenta", Script::Items(items("lenta", "monitor", &[900.0])))
                .with_delay(Duration::from_millis(150)),
        ) as StoreAdapterRef,
        scripted("rapida", Script::Items(items("rapida", "monitor", &[800.0]))),
    ];

    let orchestrator = create_orchestrator(adapters, SearchConfig::default(), Arc::new(RecordingSink::default())).await?;
    let events = collect_events(&orchestrator, SearchRequest::new("monitor")).await?;

    for store in ["lenta", "rapida"] {
        let kinds: Vec<&str> = events
            .iter()
            .filter(|e| e.store() == Some(store))
            .map(|e| e.event_type())
            .collect();
        assert_eq!(kinds, vec!["searching", "store_result"], "store {}", store);
    }
    Ok(())
}

#[tokio::test]
async fn test_hanging_store_times_out_and_search_completes() -> anyhow::Result<()> {
    let mut search = SearchConfig::default();
    search.adapter_timeout_secs = 1;
    let adapters = vec![
        scripted("travada", Script::Hang),
        scripted("kabum", Script::Items(items("kabum", "mouse", &[99.9]))),
    ];

    let orchestrator = create_orchestrator(adapters, search, Arc::new(RecordingSink::default())).await?;
    let started = std::time::Instant::now();
    let events = collect_events(&orchestrator, SearchRequest::new("mouse")).await?;

    assert!(started.elapsed() < Duration::from_secs(5));
    let failure = events
        .iter()
        .find_map(|e| match e {
            SearchEvent::StoreError(failure) => Some(failure.clone()),
            _ => None,
        })
        .expect("store_error for the hanging store");
    assert_eq!(failure.store, "travada");
    assert!(failure.timed_out);
    assert_eq!(failure.error, "Timeout after 1000ms");

    let summary = events.last().cloned().and_then(SearchEvent::into_summary).unwrap();
    assert_eq!(summary.total_results, 1);
    assert_eq!(summary.stores_failed, vec!["travada".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_aggregate_grows_and_only_holds_valid_products() -> anyhow::Result<()> {
    let mut noisy = items("kabum", "teclado", &[150.0, 90.0]);
    noisy.push(CandidateRecord::new("teclado sem preco", 0.0, "https://kabum.test/x"));
    noisy.push(CandidateRecord::new("", 120.0, "https://kabum.test/y"));
    noisy.push(CandidateRecord::new("teclado sem link", 130.0, ""));
    noisy.push(CandidateRecord::new("cadeira gamer", 800.0, "https://kabum.test/cadeira"));

    let adapters = vec![
        scripted("kabum", Script::Items(noisy)),
        Arc::new(
            ScriptedStore::new("pichau", Script::Items(items("pichau", "teclado", &[110.0, 95.0])))
                .with_delay(Duration::from_millis(50)),
        ) as StoreAdapterRef,
        Arc::new(
            ScriptedStore::new(
                "terabyte",
                Script::Items(vec![CandidateRecord::new(
                    "Teclado Mecânico Redragon",
                    "R$ 1.299,90",
                    "https://terabyte.test/redragon",
                )]),
            )
            .with_delay(Duration::from_millis(100)),
        ) as StoreAdapterRef,
    ];

    let orchestrator = create_orchestrator(adapters, SearchConfig::default(), Arc::new(RecordingSink::default())).await?;
    let events = collect_events(&orchestrator, SearchRequest::new("teclado")).await?;

    let mut previous = 0;
    for event in &events {
        if let SearchEvent::StoreResult(result) = event {
            assert!(result.all_products.len() >= previous);
            previous = result.all_products.len();

            for product in &result.all_products {
                assert!(!product.name.trim().is_empty());
                assert!(!product.url.trim().is_empty());
                assert!(product.price > Decimal::ZERO);
            }
            let prices: Vec<Decimal> = result.all_products.iter().map(|p| p.price).collect();
            let mut sorted = prices.clone();
            sorted.sort();
            assert_eq!(prices, sorted);
        }
    }

    let summary = events.last().cloned().and_then(SearchEvent::into_summary).unwrap();
    assert_eq!(summary.total_results, 5);
    assert_eq!(summary.results.last().map(|p| p.price), Some(Decimal::new(129990, 2)));
    Ok(())
}

#[tokio::test]
async fn test_cache_hit_emits_only_cached() -> anyhow::Result<()> {
    let store = Arc::new(ScriptedStore::new("kabum", Script::Items(items("kabum", "webcam", &[199.0]))));
    let orchestrator = create_orchestrator(
        vec![Arc::clone(&store) as StoreAdapterRef],
        SearchConfig::default(),
        Arc::new(RecordingSink::default()),
    )
    .await?;

    let first = collect_events(&orchestrator, SearchRequest::new("Webcam ")).await?;
    assert_eq!(first.last().map(|e| e.event_type()), Some("done"));

    let second = collect_events(&orchestrator, SearchRequest::new("  webcam")).await?;
    assert_eq!(second.len(), 1);
    match &second[0] {
        SearchEvent::Cached(summary) => {
            assert!(summary.from_cache);
            assert_eq!(summary.total_results, 1);
        }
        other => panic!("expected cached, got {:?}", other),
    }
    assert_eq!(store.calls(), 1);

    let other_sort = collect_events(&orchestrator, SearchRequest::new("webcam").with_sort(SortBy::PriceDesc)).await?;
    assert_eq!(other_sort.last().map(|e| e.event_type()), Some("done"));
    assert_eq!(store.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_results_are_not_cached() -> anyhow::Result<()> {
    let store = Arc::new(ScriptedStore::new("kabum", Script::Items(Vec::new())));
    let orchestrator = create_orchestrator(
        vec![Arc::clone(&store) as StoreAdapterRef],
        SearchConfig::default(),
        Arc::new(RecordingSink::default()),
    )
    .await?;

    orchestrator.search(SearchRequest::new("hd externo")).await?;
    let again = orchestrator.search(SearchRequest::new("hd externo")).await?;

    assert!(!again.from_cache);
    assert_eq!(store.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_history_failure_does_not_block_done() -> anyhow::Result<()> {
    let adapters = vec![scripted("kabum", Script::Items(items("kabum", "headset", &[250.0])))];
    let orchestrator = create_orchestrator(adapters, SearchConfig::default(), Arc::new(RecordingSink::failing())).await?;

    let summary = orchestrator.search(SearchRequest::new("headset")).await?;

    assert_eq!(summary.total_results, 1);
    assert!(!summary.from_cache);
    Ok(())
}

#[tokio::test]
async fn test_history_receives_query_tagged_products() -> anyhow::Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let adapters = vec![
        scripted("kabum", Script::Items(items("kabum", "gabinete", &[400.0, 350.0]))),
        scripted("pichau", Script::Items(items("pichau", "gabinete", &[380.0]))),
    ];
    let orchestrator = create_orchestrator(adapters, SearchConfig::default(), sink.clone()).await?;

    orchestrator.search(SearchRequest::new("gabinete")).await?;

    let saved = wait_for_condition(
        || {
            let sink = Arc::clone(&sink);
            async move { !sink.saves().is_empty() }
        },
        5,
    )
    .await;
    assert!(saved);
    let saves = sink.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].0, "gabinete");
    assert_eq!(saves[0].1.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_allow_list_and_fallback() -> anyhow::Result<()> {
    let kabum = Arc::new(ScriptedStore::new("kabum", Script::Items(items("kabum", "fonte", &[500.0]))));
    let pichau = Arc::new(ScriptedStore::new("pichau", Script::Items(items("pichau", "fonte", &[450.0]))));
    let retired = Arc::new(ScriptedStore::new("antiga", Script::Items(items("antiga", "fonte", &[1.0]))).disabled());
    let orchestrator = create_orchestrator(
        vec![
            Arc::clone(&kabum) as StoreAdapterRef,
            Arc::clone(&pichau) as StoreAdapterRef,
            Arc::clone(&retired) as StoreAdapterRef,
        ],
        SearchConfig::default(),
        Arc::new(RecordingSink::default()),
    )
    .await?;

    let only_pichau = orchestrator
        .search(SearchRequest::new("fonte").with_stores(["pichau"]))
        .await?;
    assert_eq!(only_pichau.stores_searched, vec!["pichau".to_string()]);
    assert_eq!(kabum.calls(), 0);

    let unknown = orchestrator
        .search(SearchRequest::new("fonte").with_stores(["inexistente"]))
        .await?;
    assert_eq!(unknown.total_results, 2);
    assert_eq!(kabum.calls(), 1);
    assert_eq!(retired.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_filters_apply_to_event_views() -> anyhow::Result<()> {
    let mut discounted = CandidateRecord::new("placa mae b550", 700.0, "https://kabum.test/b550");
    discounted.original_price = Some(900.0_f64.into());
    let mut out_of_stock = CandidateRecord::new("placa mae x570", 1200.0, "https://kabum.test/x570");
    out_of_stock.in_stock = Some(false);
    let adapters = vec![scripted(
        "kabum",
        Script::Items(vec![
            discounted,
            out_of_stock,
            CandidateRecord::new("placa mae a520", 450.0, "https://kabum.test/a520"),
        ]),
    )];
    let orchestrator = create_orchestrator(adapters, SearchConfig::default(), Arc::new(RecordingSink::default())).await?;

    let request = SearchRequest::new("placa mae").with_filters(SearchFilters {
        min_price: Some(500.0),
        in_stock_only: true,
        ..Default::default()
    });
    let events = collect_events(&orchestrator, request).await?;

    let result = events
        .iter()
        .find_map(|e| match e {
            SearchEvent::StoreResult(result) => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(result.new_products.len(), 1);
    assert_eq!(result.all_products[0].name, "placa mae b550");

    let summary = events.last().cloned().and_then(SearchEvent::into_summary).unwrap();
    assert_eq!(summary.total_results, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_query_is_rejected_before_scheduling() -> anyhow::Result<()> {
    let store = Arc::new(ScriptedStore::new("kabum", Script::Items(Vec::new())));
    let orchestrator = create_orchestrator(
        vec![Arc::clone(&store) as StoreAdapterRef],
        SearchConfig::default(),
        Arc::new(RecordingSink::default()),
    )
    .await?;

    let result = orchestrator.search_stream(SearchRequest::new("  x  "));

    assert!(matches!(result, Err(AppError::InvalidQuery(_))));
    assert_eq!(store.calls(), 0);

    let bad_range = SearchRequest::new("ssd").with_filters(SearchFilters {
        min_price: Some(500.0),
        max_price: Some(100.0),
        ..Default::default()
    });
    assert!(matches!(orchestrator.search_stream(bad_range), Err(AppError::Validation(_))));
    Ok(())
}
