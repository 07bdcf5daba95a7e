use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use storyboard_studio::{
    errors::StudioError,
    metrics::MetricsCollector,
    providers::{FailoverDispatcher, ProviderRegistry},
};

mod common;
use common::provider;

fn registry(ids: &[&str]) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::with_configs(
        ids.iter().map(|id| provider(id, &format!("https://{id}.example.com"))),
    ))
}

#[tokio::test]
async fn test_exhaustion_makes_exactly_max_attempts() {
    let dispatcher = FailoverDispatcher::new(registry(&["gemini", "yunwu"]), 3);
    let calls = AtomicU32::new(0);
    let calls = &calls;

    let result: Result<(), StudioError> = dispatcher
        .run("generate_image", move |config| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(StudioError::GenerationFailed(format!("boom {n} on {}", config.provider_id)))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match result.unwrap_err() {
        StudioError::AllProvidersFailed { attempts, provider, message } => {
            assert_eq!(attempts, 3);
            // gemini -> yunwu -> gemini
            assert_eq!(provider, "gemini");
            assert!(message.contains("boom 3 on gemini"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_success_after_rotation_promotes_provider() {
    let registry = registry(&["gemini", "yunwu", "tuzi"]);
    let dispatcher = FailoverDispatcher::new(registry.clone(), 3);
    let seen = Mutex::new(Vec::new());
    let seen = &seen;

    let url = dispatcher
        .run("generate_image", move |config| async move {
            seen.lock().unwrap().push(config.provider_id.clone());
            if config.provider_id == "gemini" {
                Err(StudioError::transport("gemini", Some(503), "overloaded"))
            } else {
                Ok(format!("https://{}.example.com/a.png", config.provider_id))
            }
        })
        .await
        .unwrap();

    assert_eq!(url, "https://yunwu.example.com/a.png");
    assert_eq!(*seen.lock().unwrap(), vec!["gemini", "yunwu"]);
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("yunwu"));
    assert!(registry.is_unavailable("gemini").await);
    assert!(!registry.is_unavailable("yunwu").await);
}

#[tokio::test]
async fn test_non_retryable_error_is_surfaced_immediately() {
    let registry = registry(&["gemini", "yunwu"]);
    let dispatcher = FailoverDispatcher::new(registry.clone(), 3);
    let calls = AtomicU32::new(0);
    let calls = &calls;

    let result: Result<String, StudioError> = dispatcher
        .run("generate_video", move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StudioError::configuration("provider 'gemini' has no API key"))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(StudioError::Configuration(_))));
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("gemini"));
}

#[tokio::test]
async fn test_rotation_is_local_to_each_call() {
    let registry = registry(&["gemini", "yunwu"]);
    let dispatcher = FailoverDispatcher::new(registry.clone(), 2);

    // a failing call rotates internally but leaves the active provider alone
    let _: Result<(), StudioError> = dispatcher
        .run("analyze_script", |_| async { Err(StudioError::Parse("no json".into())) })
        .await;
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("gemini"));

    // the next call still starts on the active provider
    let first = Mutex::new(None);
    let first = &first;
    dispatcher
        .run("analyze_script", move |config| async move {
            first.lock().unwrap().get_or_insert(config.provider_id.clone());
            Ok::<_, StudioError>(())
        })
        .await
        .unwrap();
    assert_eq!(first.lock().unwrap().as_deref(), Some("gemini"));
}

#[tokio::test]
async fn test_attempts_are_recorded_in_metrics() {
    let metrics = MetricsCollector::new();
    let dispatcher = FailoverDispatcher::new(registry(&["gemini", "yunwu"]), 3).with_metrics(metrics.clone());

    dispatcher
        .run("optimize_image_prompt", |config| async move {
            if config.provider_id == "gemini" {
                Err(StudioError::malformed("empty body"))
            } else {
                Ok("a misty harbor at dawn".to_string())
            }
        })
        .await
        .unwrap();

    let gemini = metrics.provider_metrics("gemini").await.unwrap();
    let yunwu = metrics.provider_metrics("yunwu").await.unwrap();
    assert_eq!((gemini.total_attempts, gemini.failed_attempts), (1, 1));
    assert_eq!((yunwu.total_attempts, yunwu.successful_attempts), (1, 1));
    assert_eq!(metrics.failovers(), 1);
}

#[tokio::test]
async fn test_empty_registry_is_a_configuration_error() {
    let dispatcher = FailoverDispatcher::new(Arc::new(ProviderRegistry::with_configs(Vec::new())), 3);
    let result: Result<(), StudioError> = dispatcher.run("generate_image", |_| async { Ok(()) }).await;
    assert!(matches!(result, Err(StudioError::Configuration(_))));
}

#[tokio::test]
async fn test_concurrent_calls_rotate_independently() {
    let registry = registry(&["gemini", "yunwu", "tuzi"]);
    let dispatcher = FailoverDispatcher::new(registry.clone(), 3);

    // every call fails once on the provider it starts on, then succeeds
    let calls = (0..8).map(|_| {
        let dispatcher = dispatcher.clone();
        async move {
            let seen = Mutex::new(Vec::new());
            let seen_ref = &seen;
            let result = dispatcher
                .run("generate_image", move |config| async move {
                    let mut seen = seen_ref.lock().unwrap();
                    seen.push(config.provider_id.clone());
                    if seen.len() == 1 {
                        Err(StudioError::malformed("no image"))
                    } else {
                        Ok(config.provider_id.clone())
                    }
                })
                .await;
            (result, seen.into_inner().unwrap())
        }
    });

    for (result, seen) in futures::future::join_all(calls).await {
        assert!(result.is_ok());
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }
    assert_eq!(registry.provider_count().await, 3);
}
