// ==========================================
// 压机工具管理系统 - 变更记录 (审计链)
// ==========================================
// 职责: 任意实体的泛型变更历史 ModificationLog<T>
// 红线: 只追加,不修改历史记录
// 红线: 不持锁,调用方负责串行化同一实体的写入
// ==========================================
//
// 哈希链:
//   hash_n = SHA256(prev_hash || seq || time || actor.id || actor.name || json(data))
//   首条记录的 prev_hash 为 GENESIS_HASH
// 任一历史记录被篡改,其后所有 hash 均失效。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 首条记录的前驱哈希
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ==========================================
// Actor - 操作人
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,      // 用户ID
    pub name: String, // 显示名
}

impl Actor {
    /// 系统操作人ID
    pub const SYSTEM_ID: i64 = 0;
    /// 系统操作人名称
    pub const SYSTEM_NAME: &'static str = "system";

    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// 未提供操作人时使用的系统哨兵
    pub fn system() -> Self {
        Self::new(Self::SYSTEM_ID, Self::SYSTEM_NAME)
    }

    pub fn is_system(&self) -> bool {
        self.id == Self::SYSTEM_ID && self.name == Self::SYSTEM_NAME
    }

    /// 操作人校验
    ///
    /// # 规则
    /// - 名称不能为空
    /// - 非系统操作人的ID必须为正
    pub fn validate(&self) -> Result<(), crate::domain::types::DomainValidationError> {
        use crate::domain::types::DomainValidationError;

        if self.name.trim().is_empty() {
            return Err(DomainValidationError::new("actor.name", "操作人名称不能为空"));
        }
        if self.id < 0 || (self.id == Self::SYSTEM_ID && !self.is_system()) {
            return Err(DomainValidationError::new(
                "actor.id",
                format!("无效的操作人ID: {}", self.id),
            ));
        }
        Ok(())
    }
}

// ==========================================
// AuditError - 审计链错误
// ==========================================
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("快照序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("审计链断裂: seq={seq}, 原因={reason}")]
    ChainBroken { seq: u64, reason: String },
}

// ==========================================
// ModificationRecord - 单条变更记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRecord<T> {
    pub actor: Actor,      // 操作人 (缺省为 system)
    pub time: i64,         // 毫秒时间戳
    pub seq: u64,          // 日志内单调序号 (从1开始)
    pub data: T,           // 变更后快照
    pub prev_hash: String, // 前驱哈希 (hex)
    pub hash: String,      // 本条哈希 (hex)
}

impl<T> ModificationRecord<T> {
    /// 时间戳转为 UTC 时间
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
    }

    pub fn user_name(&self) -> &str {
        &self.actor.name
    }

    pub fn is_modified_by(&self, user_name: &str) -> bool {
        self.actor.name == user_name
    }
}

impl<T: Serialize> ModificationRecord<T> {
    fn compute_hash(&self) -> Result<String, AuditError> {
        chain_hash(&self.prev_hash, self.seq, self.time, &self.actor, &self.data)
    }
}

fn chain_hash<T: Serialize>(
    prev_hash: &str,
    seq: u64,
    time: i64,
    actor: &Actor,
    data: &T,
) -> Result<String, AuditError> {
    let payload = serde_json::to_vec(data)?;

    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(time.to_le_bytes());
    hasher.update(actor.id.to_le_bytes());
    hasher.update(actor.name.as_bytes());
    hasher.update([0]);
    hasher.update(&payload);
    Ok(hex::encode(hasher.finalize()))
}

// ==========================================
// ModificationLog - 变更历史
// ==========================================
/// 有序变更序列,插入顺序即时间顺序
///
/// - `current()`: 最后一条
/// - `first()`: 最早一条
///
/// 持久化时序列化为 JSON 数组,嵌入实体行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModificationLog<T> {
    records: Vec<ModificationRecord<T>>,
}

impl<T> Default for ModificationLog<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T> ModificationLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ModificationRecord<T>] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModificationRecord<T>> {
        self.records.iter()
    }

    /// 最新一条记录,空日志返回 None
    pub fn current(&self) -> Option<&ModificationRecord<T>> {
        self.records.last()
    }

    /// 最早一条记录,空日志返回 None
    pub fn first(&self) -> Option<&ModificationRecord<T>> {
        self.records.first()
    }

    /// 按时间戳精确查找 (线性扫描)
    ///
    /// 同一毫秒内可能存在多条记录,此时返回最早的一条;
    /// 需要无歧义定位时使用 `get_by_seq`。
    pub fn get(&self, time: i64) -> Option<&ModificationRecord<T>> {
        self.records.iter().find(|r| r.time == time)
    }

    /// 按序号查找
    pub fn get_by_seq(&self, seq: u64) -> Option<&ModificationRecord<T>> {
        self.records.iter().find(|r| r.seq == seq)
    }

    /// 倒序视图 (最新在前),不修改原日志
    pub fn reversed(&self) -> Vec<&ModificationRecord<T>> {
        self.records.iter().rev().collect()
    }

    fn next_seq(&self) -> u64 {
        self.records.last().map(|r| r.seq + 1).unwrap_or(1)
    }

    fn last_hash(&self) -> &str {
        self.records
            .last()
            .map(|r| r.hash.as_str())
            .unwrap_or(GENESIS_HASH)
    }
}

impl<T: Serialize> ModificationLog<T> {
    /// 追加变更记录 (当前时间)
    ///
    /// # 参数
    /// - `actor`: 操作人,None 时使用 system
    /// - `snapshot`: 变更后快照
    ///
    /// # 返回
    /// 新记录的序号
    pub fn add(&mut self, actor: Option<&Actor>, snapshot: T) -> Result<u64, AuditError> {
        self.add_at(actor, snapshot, Utc::now().timestamp_millis())
    }

    /// 以指定时间戳追加 (数据迁移/导入)
    ///
    /// 不校验时间戳唯一性。
    pub fn add_at(
        &mut self,
        actor: Option<&Actor>,
        snapshot: T,
        time: i64,
    ) -> Result<u64, AuditError> {
        let actor = actor.cloned().unwrap_or_else(Actor::system);
        let seq = self.next_seq();
        let prev_hash = self.last_hash().to_string();
        let hash = chain_hash(&prev_hash, seq, time, &actor, &snapshot)?;

        self.records.push(ModificationRecord {
            actor,
            time,
            seq,
            data: snapshot,
            prev_hash,
            hash,
        });
        Ok(seq)
    }

    /// 校验哈希链完整性
    ///
    /// # 返回
    /// - Ok(()): 链完整
    /// - Err(ChainBroken): 首个断裂位置
    pub fn verify(&self) -> Result<(), AuditError> {
        let mut prev = GENESIS_HASH.to_string();
        for (idx, record) in self.records.iter().enumerate() {
            let expected_seq = idx as u64 + 1;
            if record.seq != expected_seq {
                return Err(AuditError::ChainBroken {
                    seq: record.seq,
                    reason: format!("序号不连续,期望 {}", expected_seq),
                });
            }
            if record.prev_hash != prev {
                return Err(AuditError::ChainBroken {
                    seq: record.seq,
                    reason: "前驱哈希不匹配".to_string(),
                });
            }
            if record.compute_hash()? != record.hash {
                return Err(AuditError::ChainBroken {
                    seq: record.seq,
                    reason: "记录内容与哈希不符".to_string(),
                });
            }
            prev = record.hash.clone();
        }
        Ok(())
    }
}
