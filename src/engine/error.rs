// ==========================================
// 压机工具管理系统 - 引擎层错误类型
// ==========================================
// 职责: 统一错误分类, 转换 Repository 错误
// 分类: 校验 / 未找到 / 冲突 / 一致性故障 / 存储
// 说明: 通知发送失败不进入此类型 (只记日志)
// ==========================================

use crate::domain::{AuditError, DomainValidationError};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 错误大类 (边界层据此映射响应)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ConsistencyFault,
    Storage,
}

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 输入格式错误或缺失 (调用方问题)
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("资源未找到: {entity}(id={id})")]
    NotFound { entity: String, id: String },

    /// 请求违反实体当前状态的约束
    #[error("状态冲突: {0}")]
    Conflict(String),

    /// 持久化状态自相矛盾 (如标记修复中但无进行中的修复记录)
    #[error("数据一致性故障: {0}")]
    ConsistencyFault(String),

    /// 可重试的存储故障
    #[error("存储错误: {0}")]
    Storage(#[source] RepositoryError),

    /// 开始修复失败, 已撤销 regenerating 标志
    #[error("开始修复失败 (已回滚): {cause}")]
    StartRolledBack {
        #[source]
        cause: Box<EngineError>,
    },

    /// 开始修复失败, 且撤销 regenerating 标志也失败
    #[error("开始修复失败且回滚失败: cause={cause}, revert={revert}")]
    CompensationFailed {
        cause: Box<EngineError>,
        revert: Box<EngineError>,
    },
}

impl EngineError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 错误大类
    ///
    /// 回滚类错误按其根因分类; 回滚失败视为存储故障。
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::ConsistencyFault(_) => ErrorKind::ConsistencyFault,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::StartRolledBack { cause } => cause.kind(),
            EngineError::CompensationFailed { .. } => ErrorKind::Storage,
        }
    }

    /// 是否为调用方错误 (校验 / 未找到 / 冲突)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict
        )
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::ValidationError(msg) => EngineError::Validation(msg),
            RepositoryError::FieldValueError { field, message } => {
                EngineError::Validation(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                EngineError::Conflict(format!("唯一约束违反: {}", msg))
            }
            // 实体在读取后被其他子系统修改; 不在引擎内重试, 由调用方重新发起
            lock @ RepositoryError::OptimisticLockFailure { .. } => {
                EngineError::Conflict(lock.to_string())
            }
            other => EngineError::Storage(other),
        }
    }
}

impl From<DomainValidationError> for EngineError {
    fn from(err: DomainValidationError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<AuditError> for EngineError {
    fn from(err: AuditError) -> Self {
        EngineError::Storage(err.into())
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
