// ==========================================
// 压机工具管理系统 - 修复记录领域模型
// ==========================================
// 职责: 工具修复 (冲次清零) 事件
// 红线: 每个工具同一时刻最多一条未完成的修复记录
// ==========================================

use crate::domain::types::{CycleId, RegenerationId, ToolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Regeneration - 修复记录
// ==========================================
// 对齐: tool_regenerations 表
// completed_total_cycles 为 NULL 即"进行中"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regeneration {
    pub id: RegenerationId,
    pub tool_id: ToolId,

    // ===== 起始边界 =====
    pub cycle_id: Option<CycleId>, // 开始时的最后一条台账 (无台账时为 None)
    pub start_total_cycles: i64,   // 开始时的累计冲次
    pub reason: String,
    pub performed_by: i64,
    pub started_at: DateTime<Utc>,

    // ===== 完成边界 =====
    pub completed_total_cycles: Option<i64>, // 完成时的累计冲次
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<i64>,
}

impl Regeneration {
    /// 创建进行中的修复记录 (id 由存储层分配)
    pub fn open(
        tool_id: ToolId,
        cycle_id: Option<CycleId>,
        start_total_cycles: i64,
        reason: &str,
        performed_by: i64,
    ) -> Self {
        Self {
            id: 0,
            tool_id,
            cycle_id,
            start_total_cycles,
            reason: reason.to_string(),
            performed_by,
            started_at: Utc::now(),
            completed_total_cycles: None,
            completed_at: None,
            completed_by: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.completed_total_cycles.is_none()
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// 记录完成边界
    pub fn close(&mut self, total_cycles: i64, completed_by: i64) {
        self.completed_total_cycles = Some(total_cycles);
        self.completed_at = Some(Utc::now());
        self.completed_by = Some(completed_by);
    }
}
