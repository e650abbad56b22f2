// ==========================================
// 压机工具管理系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、变更审计结构
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod cycle;
pub mod modification;
pub mod regeneration;
pub mod tool;
pub mod types;

// 重导出核心类型
pub use cycle::Cycle;
pub use modification::{Actor, AuditError, ModificationLog, ModificationRecord, GENESIS_HASH};
pub use regeneration::Regeneration;
pub use tool::{Thickness, Tool, ToolMod, TOOL_CYCLES_ERROR, TOOL_CYCLES_WARNING};
pub use types::{
    CassetteId, CycleId, CycleStatus, DomainValidationError, Format, Position, PressNumber,
    RegenerationId, ToolId, ToolStatus,
};
