use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::errors::StudioError;
use super::{
    ProviderConfig, PROVIDER_PRIORITY, DEFAULT_PROVIDER_ID,
    store::{MemoryStore, ProfileStore},
};

/// Storage key holding the `providerId -> ProviderConfig` map
pub const STORAGE_KEY: &str = "provider_configs";
/// Storage key of the old single-profile format, migrated on load
pub const LEGACY_STORAGE_KEY: &str = "provider_config";

#[derive(Debug, Default)]
struct RegistryState {
    configs: IndexMap<String, ProviderConfig>,
    active: Option<String>,
    // missing entry = available
    availability: HashMap<String, bool>,
}

/// Provider registry holding every configured provider profile
///
/// Besides the profiles it tracks which provider new calls start on and a
/// session-only availability map that biases failover rotation away from
/// providers that just failed.
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    store: Arc<dyn ProfileStore>,
}

/// Old single-profile format; `providerId` was added later
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyProfile {
    #[serde(default)]
    provider_id: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    text_model: Option<String>,
    #[serde(default)]
    image_model: Option<String>,
    #[serde(default)]
    video_model: Option<String>,
}

impl LegacyProfile {
    fn into_config(self) -> ProviderConfig {
        let seed = ProviderConfig::seed_default();
        ProviderConfig {
            provider_id: self
                .provider_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROVIDER_ID.to_string()),
            base_url: self.base_url.unwrap_or(seed.base_url),
            api_key: self.api_key,
            text_model: self.text_model.unwrap_or(seed.text_model),
            image_model: self.image_model.unwrap_or(seed.image_model),
            video_model: self.video_model.unwrap_or(seed.video_model),
        }
    }
}

impl ProviderRegistry {
    /// 从存储加载提供商注册表
    ///
    /// ## 内部实现逻辑
    /// 1. 读取 `provider_configs` 映射
    /// 2. 若不存在，尝试迁移旧版单配置键 `provider_config`，写回新格式后删除旧键
    /// 3. 两者都不存在时，写入一个 API 密钥为空的默认提供商
    /// 4. 活动提供商重置为第一个加载的提供商
    ///
    /// 无法解析的存储内容会记录警告并按不存在处理
    pub async fn load(store: Arc<dyn ProfileStore>) -> Result<Self, StudioError> {
        let mut configs = Self::read_configs(store.as_ref()).await?;

        if configs.is_empty() {
            if let Some(legacy) = Self::read_legacy(store.as_ref()).await? {
                tracing::info!(
                    provider_id = %legacy.provider_id,
                    "Migrating legacy single-provider profile"
                );
                configs.insert(legacy.provider_id.clone(), legacy);
                Self::write_configs(store.as_ref(), &configs).await?;
                store.remove(LEGACY_STORAGE_KEY).await?;
            } else {
                let seed = ProviderConfig::seed_default();
                tracing::info!(provider_id = %seed.provider_id, "No provider profiles stored, seeding default");
                configs.insert(seed.provider_id.clone(), seed);
                Self::write_configs(store.as_ref(), &configs).await?;
            }
        }

        let active = configs.keys().next().cloned();
        tracing::info!(
            providers_count = configs.len(),
            active = active.as_deref().unwrap_or("none"),
            "Provider registry loaded"
        );

        Ok(Self {
            state: RwLock::new(RegistryState {
                configs,
                active,
                availability: HashMap::new(),
            }),
            store,
        })
    }

    /// Registry over the given profiles, backed by a fresh in-memory store
    ///
    /// The first profile becomes active. Nothing is seeded, so an empty list
    /// yields an empty registry.
    pub fn with_configs(configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let configs: IndexMap<String, ProviderConfig> = configs
            .into_iter()
            .map(|c| (c.provider_id.clone(), c))
            .collect();
        let active = configs.keys().next().cloned();

        Self {
            state: RwLock::new(RegistryState {
                configs,
                active,
                availability: HashMap::new(),
            }),
            store: Arc::new(MemoryStore::new()),
        }
    }

    async fn read_configs(store: &dyn ProfileStore) -> Result<IndexMap<String, ProviderConfig>, StudioError> {
        let Some(raw) = store.get(STORAGE_KEY).await? else {
            return Ok(IndexMap::new());
        };

        match serde_json::from_str::<IndexMap<String, ProviderConfig>>(&raw) {
            // the map key is authoritative for the id
            Ok(map) => Ok(map
                .into_iter()
                .map(|(id, mut config)| {
                    config.provider_id = id.clone();
                    (id, config)
                })
                .collect()),
            Err(e) => {
                tracing::warn!(error = %e, "Stored provider profiles are unreadable, ignoring");
                Ok(IndexMap::new())
            }
        }
    }

    async fn read_legacy(store: &dyn ProfileStore) -> Result<Option<ProviderConfig>, StudioError> {
        let Some(raw) = store.get(LEGACY_STORAGE_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<LegacyProfile>(&raw) {
            Ok(legacy) => Ok(Some(legacy.into_config())),
            Err(e) => {
                tracing::warn!(error = %e, "Legacy provider profile is unreadable, ignoring");
                Ok(None)
            }
        }
    }

    async fn write_configs(store: &dyn ProfileStore, configs: &IndexMap<String, ProviderConfig>) -> Result<(), StudioError> {
        let body = serde_json::to_string(configs)
            .map_err(|e| StudioError::Storage(format!("Failed to serialize provider profiles: {}", e)))?;
        store.set(STORAGE_KEY, body).await
    }

    /// Upsert a profile, make it active and persist every profile
    pub async fn set_config(&self, config: ProviderConfig) -> Result<(), StudioError> {
        let provider_id = config.provider_id.trim().to_string();
        if provider_id.is_empty() {
            return Err(StudioError::invalid_request("providerId cannot be empty"));
        }

        let mut state = self.state.write().await;
        state.configs.insert(provider_id.clone(), ProviderConfig { provider_id: provider_id.clone(), ..config });
        state.active = Some(provider_id.clone());
        Self::write_configs(self.store.as_ref(), &state.configs).await?;

        tracing::info!(provider_id = %provider_id, "Provider profile saved and activated");
        Ok(())
    }

    /// Make an already configured provider the active one
    pub async fn select(&self, provider_id: &str) -> Result<ProviderConfig, StudioError> {
        let mut state = self.state.write().await;
        let config = state
            .configs
            .get(provider_id)
            .cloned()
            .ok_or_else(|| StudioError::ProviderNotFound(provider_id.to_string()))?;
        state.active = Some(provider_id.to_string());

        tracing::info!(provider_id = %provider_id, "Active provider selected");
        Ok(config)
    }

    /// Profile new calls start on
    pub async fn active_config(&self) -> Result<ProviderConfig, StudioError> {
        let state = self.state.read().await;
        state
            .active
            .as_ref()
            .and_then(|id| state.configs.get(id))
            .or_else(|| state.configs.values().next())
            .cloned()
            .ok_or_else(|| StudioError::configuration("No provider has been configured"))
    }

    pub async fn active_provider_id(&self) -> Option<String> {
        self.state.read().await.active.clone()
    }

    pub async fn get_config(&self, provider_id: &str) -> Option<ProviderConfig> {
        self.state.read().await.configs.get(provider_id).cloned()
    }

    /// Every profile, in registry order
    pub async fn all_configs(&self) -> IndexMap<String, ProviderConfig> {
        self.state.read().await.configs.clone()
    }

    pub async fn provider_count(&self) -> usize {
        self.state.read().await.configs.len()
    }

    pub async fn mark_available(&self, provider_id: &str, available: bool) {
        let mut state = self.state.write().await;
        state.availability.insert(provider_id.to_string(), available);
        if !available {
            tracing::debug!(provider_id = %provider_id, "Provider marked unavailable");
        }
    }

    pub async fn is_unavailable(&self, provider_id: &str) -> bool {
        self.state.read().await.availability.get(provider_id) == Some(&false)
    }

    /// Snapshot of every configured provider's availability (unknown counts as available)
    pub async fn availability(&self) -> IndexMap<String, bool> {
        let state = self.state.read().await;
        state
            .configs
            .keys()
            .map(|id| (id.clone(), state.availability.get(id).copied().unwrap_or(true)))
            .collect()
    }

    /// Point the active provider at `provider_id` if it is still configured
    pub async fn promote(&self, provider_id: &str) {
        let mut state = self.state.write().await;
        if state.configs.contains_key(provider_id) && state.active.as_deref() != Some(provider_id) {
            tracing::info!(
                from = state.active.as_deref().unwrap_or("none"),
                to = %provider_id,
                "Active provider switched after failover"
            );
            state.active = Some(provider_id.to_string());
        }
    }

    /// 选择故障转移的下一个提供商
    ///
    /// ## 轮换策略
    /// 1. 候选顺序：优先级列表中已配置的提供商，其后是未在列表中的已配置提供商（按注册顺序）
    /// 2. 从当前提供商的位置向后扫描（循环），跳过当前提供商，选第一个未被标记为不可用的
    /// 3. 若全部不可用，选扫描到的最后一个候选（即当前提供商的前一个），不可用只是软性偏好，不会报错
    /// 4. 只有一个提供商时返回它自己
    ///
    /// ## 返回值
    /// - `Err(StudioError::Configuration)`: 注册表为空
    pub async fn next_provider(&self, current_id: &str) -> Result<ProviderConfig, StudioError> {
        let state = self.state.read().await;
        let order = rotation_order(&state.configs);
        let next = pick_next(&order, current_id, &state.availability)
            .ok_or_else(|| StudioError::configuration("No provider has been configured"))?;

        state
            .configs
            .get(next)
            .cloned()
            .ok_or_else(|| StudioError::internal(format!("Provider {} not found in registry", next)))
    }
}

/// Configured providers in failover order
fn rotation_order(configs: &IndexMap<String, ProviderConfig>) -> Vec<String> {
    let mut order: Vec<String> = PROVIDER_PRIORITY
        .iter()
        .filter(|id| configs.contains_key(**id))
        .map(|id| id.to_string())
        .collect();

    for id in configs.keys() {
        if !PROVIDER_PRIORITY.contains(&id.as_str()) {
            order.push(id.clone());
        }
    }

    order
}

fn pick_next<'a>(order: &'a [String], current: &str, availability: &HashMap<String, bool>) -> Option<&'a String> {
    if order.is_empty() {
        return None;
    }

    // an unknown current provider scans from the top
    let start = order
        .iter()
        .position(|id| id == current)
        .map(|i| i + 1)
        .unwrap_or(0);

    let candidates: Vec<&String> = (0..order.len())
        .map(|offset| &order[(start + offset) % order.len()])
        .filter(|id| id.as_str() != current)
        .collect();

    if candidates.is_empty() {
        // only the current provider is configured
        return order.first();
    }

    candidates
        .iter()
        .find(|id| availability.get(id.as_str()) != Some(&false))
        .or_else(|| candidates.last())
        .copied()
}
