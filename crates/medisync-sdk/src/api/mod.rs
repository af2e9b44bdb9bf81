//! REST 客户端模块 - 远端系统唯一的出入口
//!
//! 远端按集合暴露 REST 资源，响应统一为 `{ success, data, pagination? }` 信封。
//! 本模块负责：
//! - 列表拉取（since + limit 增量）、单文档拉取、过滤批量拉取（预热用）
//! - create（携带 client_ref 幂等令牌）/ update / delete
//! - 把传输层与信封错误归类为连通性 / 业务拒绝 / 版本冲突三类
//!
//! 超时视同网络失败（重试），不是业务错误。

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{MedisyncSDKError, Result};
use crate::storage::documents::{Collection, WireDocument};

/// 响应信封（对应服务端 `{ success, data, pagination }`）
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pagination: Option<Pagination>,
}

/// 分页信息（尽量宽容地解析，字段齐不齐都不报错）
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// 远端 API 契约（trait 作为接缝，测试与替代实现从这里进来）
#[async_trait]
pub trait RemoteApi: Send + Sync + std::fmt::Debug {
    /// 增量拉取：`updatedAt` 严格大于 `since` 的文档，升序，最多 `limit` 条
    async fn fetch_since(
        &self,
        collection: Collection,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<WireDocument>>;

    /// 拉取单个文档（冲突解决时取服务端权威版本）
    async fn fetch_one(&self, collection: Collection, id: &str) -> Result<WireDocument>;

    /// 按服务端过滤条件批量拉取（缓存预热）
    async fn fetch_filtered(
        &self,
        collection: Collection,
        filters: &[(String, String)],
    ) -> Result<Vec<WireDocument>>;

    /// 新建；`client_ref` 为客户端幂等令牌（离线临时 ID），重复 create 不会产生第二份
    async fn create(
        &self,
        collection: Collection,
        body: serde_json::Value,
        client_ref: &str,
    ) -> Result<WireDocument>;

    /// 按服务端 ID 更新；服务端副本更新会以版本冲突拒绝
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        body: serde_json::Value,
    ) -> Result<WireDocument>;

    /// 删除（仅在线路径使用；离线删除被显式禁止）
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;
}

/// reqwest 实现
#[derive(Debug)]
pub struct RestApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestApiClient {
    /// 创建 REST 客户端；连接/请求超时来自配置，超时按连通性失败处理
    pub fn new(base_url: &str, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| MedisyncSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/api/{}", self.base_url, collection.api_route())
    }

    fn document_url(&self, collection: Collection, id: &str) -> String {
        format!("{}/{}", self.collection_url(collection), id)
    }

    /// 把 HTTP 状态 + 信封错误归类到错误分类学
    fn classify(status: reqwest::StatusCode, message: String) -> MedisyncSDKError {
        if status == reqwest::StatusCode::CONFLICT {
            return MedisyncSDKError::StaleConflict(message);
        }
        if status.is_server_error() {
            return MedisyncSDKError::ServerError(status.as_u16(), message);
        }
        let lowered = message.to_lowercase();
        if lowered.contains("conflict") || lowered.contains("stale") || lowered.contains("newer") {
            return MedisyncSDKError::StaleConflict(message);
        }
        MedisyncSDKError::DomainRejected(message)
    }

    /// 解包信封；`success:false` 与非 2xx 都在这里归类
    async fn unwrap_envelope<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|env| env.error)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(Self::classify(status, message));
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)
            .map_err(|e| MedisyncSDKError::Serialization(format!("解析响应信封失败: {}", e)))?;
        if !envelope.success {
            let message = envelope.error.unwrap_or_else(|| "unspecified error".into());
            return Err(Self::classify(status, message));
        }
        envelope
            .data
            .ok_or_else(|| MedisyncSDKError::Serialization("success 响应缺少 data".into()))
    }
}

#[async_trait]
impl RemoteApi for RestApiClient {
    async fn fetch_since(
        &self,
        collection: Collection,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<WireDocument>> {
        let mut request = self
            .client
            .get(self.collection_url(collection))
            .query(&[("limit", limit.to_string())]);
        if let Some(since) = since {
            request = request.query(&[(
                "since",
                since.to_rfc3339_opts(SecondsFormat::Millis, true),
            )]);
        }
        debug!("⬇️ pull {}: since={:?} limit={}", collection, since, limit);
        let resp = request.send().await?;
        Self::unwrap_envelope(resp).await
    }

    async fn fetch_one(&self, collection: Collection, id: &str) -> Result<WireDocument> {
        let resp = self
            .client
            .get(self.document_url(collection, id))
            .send()
            .await?;
        Self::unwrap_envelope(resp).await
    }

    async fn fetch_filtered(
        &self,
        collection: Collection,
        filters: &[(String, String)],
    ) -> Result<Vec<WireDocument>> {
        let resp = self
            .client
            .get(self.collection_url(collection))
            .query(filters)
            .send()
            .await?;
        Self::unwrap_envelope(resp).await
    }

    async fn create(
        &self,
        collection: Collection,
        mut body: serde_json::Value,
        client_ref: &str,
    ) -> Result<WireDocument> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("clientRef".into(), serde_json::json!(client_ref));
        }
        let resp = self
            .client
            .post(self.collection_url(collection))
            .json(&body)
            .send()
            .await?;
        Self::unwrap_envelope(resp).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        body: serde_json::Value,
    ) -> Result<WireDocument> {
        let resp = self
            .client
            .put(self.document_url(collection, id))
            .json(&body)
            .send()
            .await?;
        Self::unwrap_envelope(resp).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.document_url(collection, id))
            .send()
            .await?;
        // 删除响应可能没有 data，只校验 success
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|env| env.error)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(Self::classify(status, message));
        }
        let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| MedisyncSDKError::Serialization(format!("解析响应信封失败: {}", e)))?;
        if !envelope.success {
            let message = envelope.error.unwrap_or_else(|| "unspecified error".into());
            return Err(Self::classify(status, message));
        }
        Ok(())
    }
}
