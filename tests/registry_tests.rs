use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde_json::json;
use storyboard_studio::{
    errors::StudioError,
    providers::{
        registry::{LEGACY_STORAGE_KEY, STORAGE_KEY},
        FileStore, MemoryStore, ProfileStore, ProviderConfig, ProviderRegistry, DEFAULT_PROVIDER_ID,
    },
};

mod common;
use common::provider;

fn four_providers() -> Vec<ProviderConfig> {
    vec![
        provider("tuzi", "https://api.tu-zi.com"),
        provider("gemini", "https://gemini.example.com"),
        provider("t8star", "https://ai.t8star.cn"),
        provider("yunwu", "https://yunwu.ai"),
    ]
}

#[tokio::test]
async fn test_load_seeds_default_provider() {
    let store = Arc::new(MemoryStore::new());
    let registry = ProviderRegistry::load(store.clone()).await.unwrap();

    assert_eq!(registry.provider_count().await, 1);
    let active = registry.active_config().await.unwrap();
    assert_eq!(active.provider_id, DEFAULT_PROVIDER_ID);
    assert!(active.api_key.is_empty());

    // the seed is persisted so the next start sees it
    let stored = store.get(STORAGE_KEY).await.unwrap().unwrap();
    assert!(stored.contains("\"yunwu\""));
}

#[tokio::test]
async fn test_load_migrates_legacy_profile() {
    let legacy = json!({
        "providerId": "tuzi",
        "baseUrl": "https://api.tu-zi.com",
        "apiKey": "sk-legacy"
    });
    let store = Arc::new(MemoryStore::with_entry(LEGACY_STORAGE_KEY, legacy.to_string()));

    let registry = ProviderRegistry::load(store.clone()).await.unwrap();

    let config = registry.get_config("tuzi").await.unwrap();
    assert_eq!(config.api_key, "sk-legacy");
    assert_eq!(config.text_model, "gemini-2.5-flash");
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("tuzi"));

    assert!(store.get(LEGACY_STORAGE_KEY).await.unwrap().is_none());
    assert!(store.get(STORAGE_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn test_load_keeps_stored_order_and_activates_first() {
    let stored = json!({
        "t8star": {"providerId": "t8star", "baseUrl": "https://ai.t8star.cn", "apiKey": "k1"},
        "gemini": {"providerId": "gemini", "baseUrl": "https://gemini.example.com", "apiKey": "k2"}
    });
    let store = Arc::new(MemoryStore::with_entry(STORAGE_KEY, stored.to_string()));

    let registry = ProviderRegistry::load(store).await.unwrap();

    let ids: Vec<String> = registry.all_configs().await.keys().cloned().collect();
    assert_eq!(ids, vec!["t8star", "gemini"]);
    assert_eq!(registry.active_config().await.unwrap().provider_id, "t8star");
}

#[tokio::test]
async fn test_unreadable_store_falls_back_to_seed() {
    let store = Arc::new(MemoryStore::with_entry(STORAGE_KEY, "{not json"));
    let registry = ProviderRegistry::load(store).await.unwrap();
    assert_eq!(registry.active_config().await.unwrap().provider_id, DEFAULT_PROVIDER_ID);
}

#[tokio::test]
async fn test_set_config_upserts_activates_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("studio-data.json");

    let registry = ProviderRegistry::load(Arc::new(FileStore::new(&path))).await.unwrap();
    registry.set_config(provider("gemini", "https://gemini.example.com")).await.unwrap();

    let mut updated = provider("gemini", "https://gemini.example.com/v1");
    updated.image_model = "nano-banana-pro".to_string();
    registry.set_config(updated).await.unwrap();

    assert_eq!(registry.provider_count().await, 2);
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("gemini"));

    // a fresh load sees both profiles, but the active pointer resets to the first
    let reloaded = ProviderRegistry::load(Arc::new(FileStore::new(&path))).await.unwrap();
    let gemini = reloaded.get_config("gemini").await.unwrap();
    assert_eq!(gemini.base_url, "https://gemini.example.com/v1");
    assert_eq!(gemini.image_model, "nano-banana-pro");
    assert_eq!(reloaded.active_provider_id().await.as_deref(), Some(DEFAULT_PROVIDER_ID));
}

#[tokio::test]
async fn test_set_config_rejects_empty_id() {
    let registry = ProviderRegistry::with_configs(four_providers());
    let err = registry.set_config(provider("  ", "https://x")).await.unwrap_err();
    assert!(matches!(err, StudioError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_select_known_and_unknown() {
    let registry = ProviderRegistry::with_configs(four_providers());

    let selected = registry.select("t8star").await.unwrap();
    assert_eq!(selected.provider_id, "t8star");
    assert_eq!(registry.active_config().await.unwrap().provider_id, "t8star");

    let err = registry.select("openrouter").await.unwrap_err();
    assert!(matches!(err, StudioError::ProviderNotFound(id) if id == "openrouter"));
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("t8star"));
}

#[tokio::test]
async fn test_empty_registry_has_no_active_config() {
    let registry = ProviderRegistry::with_configs(Vec::new());
    assert!(matches!(
        registry.active_config().await,
        Err(StudioError::Configuration(_))
    ));
    assert!(registry.next_provider("gemini").await.is_err());
}

#[tokio::test]
async fn test_rotation_visits_every_other_provider() {
    let registry = ProviderRegistry::with_configs(four_providers());
    let ids: Vec<String> = registry.all_configs().await.keys().cloned().collect();

    let mut starts = ids.clone();
    starts.shuffle(&mut rand::thread_rng());

    for start in &starts {
        let mut visited = HashSet::new();
        let mut current = start.clone();
        for _ in 0..ids.len() - 1 {
            current = registry.next_provider(&current).await.unwrap().provider_id;
            visited.insert(current.clone());
        }

        let expected: HashSet<String> = ids.iter().filter(|id| *id != start).cloned().collect();
        assert_eq!(visited, expected, "rotation from {start}");
    }
}

#[tokio::test]
async fn test_rotation_follows_priority_then_registry_order() {
    let registry = ProviderRegistry::with_configs(vec![
        provider("custom", "https://custom.example.com"),
        provider("tuzi", "https://api.tu-zi.com"),
        provider("gemini", "https://gemini.example.com"),
    ]);

    assert_eq!(registry.next_provider("gemini").await.unwrap().provider_id, "tuzi");
    assert_eq!(registry.next_provider("tuzi").await.unwrap().provider_id, "custom");
    assert_eq!(registry.next_provider("custom").await.unwrap().provider_id, "gemini");
}

#[tokio::test]
async fn test_rotation_skips_unavailable_providers() {
    let registry = ProviderRegistry::with_configs(four_providers());
    registry.mark_available("yunwu", false).await;

    // gemini -> (yunwu is down) -> t8star
    assert_eq!(registry.next_provider("gemini").await.unwrap().provider_id, "t8star");

    registry.mark_available("yunwu", true).await;
    assert_eq!(registry.next_provider("gemini").await.unwrap().provider_id, "yunwu");
}

#[tokio::test]
async fn test_rotation_never_fails_when_everything_is_down() {
    let registry = ProviderRegistry::with_configs(four_providers());
    for id in ["gemini", "yunwu", "t8star", "tuzi"] {
        registry.mark_available(id, false).await;
    }

    for id in ["gemini", "yunwu", "t8star", "tuzi"] {
        let next = registry.next_provider(id).await.unwrap();
        assert_ne!(next.provider_id, id);
    }
    // the last candidate scanned after gemini
    assert_eq!(registry.next_provider("gemini").await.unwrap().provider_id, "tuzi");
    assert!(registry.availability().await.values().all(|available| !available));
}

#[tokio::test]
async fn test_single_provider_rotation_is_noop() {
    let registry = ProviderRegistry::with_configs(vec![provider("tuzi", "https://api.tu-zi.com")]);
    registry.mark_available("tuzi", false).await;
    assert_eq!(registry.next_provider("tuzi").await.unwrap().provider_id, "tuzi");
}

#[tokio::test]
async fn test_promote_ignores_unknown_provider() {
    let registry = ProviderRegistry::with_configs(four_providers());
    registry.promote("yunwu").await;
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("yunwu"));

    registry.promote("ghost").await;
    assert_eq!(registry.active_provider_id().await.as_deref(), Some("yunwu"));
}
