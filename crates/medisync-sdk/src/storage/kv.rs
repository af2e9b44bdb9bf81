//! KV 存储模块 - 基于 sled 的键值存储
//!
//! 存放必须独立于文档库存活的小状态：同步检查点、缓存预热标记等。
//! 文档库 wipe 重建时这里不受影响，值统一用 JSON 序列化。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{de::DeserializeOwned, Serialize};
use sled::Db;

use crate::error::{MedisyncSDKError, Result};

/// KV 存储组件
#[derive(Debug)]
pub struct KvStore {
    #[allow(dead_code)]
    path: PathBuf,
    db: Arc<Db>,
}

impl KvStore {
    /// 打开 KV 存储（目录不存在则创建）
    pub async fn open(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");
        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| MedisyncSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        let db = sled::open(&kv_path)
            .map_err(|e| MedisyncSDKError::KvStore(format!("打开 sled 数据库失败: {}", e)))?;

        Ok(Self {
            path: kv_path,
            db: Arc::new(db),
        })
    }

    /// 设置键值对
    pub async fn set<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| MedisyncSDKError::Serialization(format!("序列化值失败: {}", e)))?;
        self.db
            .insert(key, value_bytes)
            .map_err(|e| MedisyncSDKError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    /// 获取键值对
    pub async fn get<V>(&self, key: &str) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        let result = self
            .db
            .get(key)
            .map_err(|e| MedisyncSDKError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| MedisyncSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键值对
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.db
            .remove(key)
            .map_err(|e| MedisyncSDKError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(())
    }

    /// 检查键是否存在
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.db
            .contains_key(key)
            .map_err(|e| MedisyncSDKError::KvStore(format!("检查键存在失败: {}", e)))
    }

    /// 获取指定前缀的所有键值对
    pub async fn scan_prefix<V>(&self, prefix: &str) -> Result<Vec<(String, V)>>
    where
        V: DeserializeOwned,
    {
        let mut results = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value_bytes) =
                item.map_err(|e| MedisyncSDKError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let key = String::from_utf8_lossy(&key).to_string();
            let value = serde_json::from_slice(&value_bytes)
                .map_err(|e| MedisyncSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
            results.push((key, value));
        }
        Ok(results)
    }

    /// 刷盘（关闭前调用）
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| MedisyncSDKError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}

/// 常用的键前缀常量
pub mod keys {
    /// 同步检查点前缀
    pub const SYNC_CHECKPOINT: &str = "sync_checkpoint";
    /// 缓存预热完成标记前缀
    pub const WARM_COMPLETED: &str = "cache_warm_completed";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_kv_store_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path()).await.unwrap();

        let test_data = json!({ "name": "test", "value": 123 });
        store.set("test_key", &test_data).await.unwrap();
        let retrieved: serde_json::Value = store.get("test_key").await.unwrap().unwrap();
        assert_eq!(retrieved, test_data);

        assert!(store.exists("test_key").await.unwrap());
        assert!(!store.exists("missing_key").await.unwrap());

        store.delete("test_key").await.unwrap();
        let deleted: Option<serde_json::Value> = store.get("test_key").await.unwrap();
        assert!(deleted.is_none());
    }

    #[tokio::test]
    async fn test_kv_store_scan_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path()).await.unwrap();

        for i in 1..=3 {
            store
                .set(&format!("cursor:{}", i), &json!({ "n": i }))
                .await
                .unwrap();
        }
        store.set("other:x", &json!({ "n": 0 })).await.unwrap();

        let results: Vec<(String, serde_json::Value)> =
            store.scan_prefix("cursor:").await.unwrap();
        assert_eq!(results.len(), 3);
    }
}
