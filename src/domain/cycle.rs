// ==========================================
// 压机工具管理系统 - 冲次台账领域模型
// ==========================================
// 职责: 冲次台账条目 (不可变)
// 红线: 条目创建后不可修改
// ==========================================

use crate::domain::types::{
    is_valid_press_number, CycleId, DomainValidationError, Position, PressNumber, ToolId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Cycle - 冲次台账条目
// ==========================================
// 对齐: press_cycles 表
// total_cycles 为压机计数器读数,同一压机上单调不减;
// partial_cycles 为与同压机同工位上一条读数的差值,读取时注入,不落库。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: CycleId,
    pub press_number: PressNumber,
    pub tool_id: ToolId,
    pub tool_position: Position,
    pub total_cycles: i64,
    pub date: DateTime<Utc>,
    pub performed_by: i64,

    #[serde(default)]
    pub partial_cycles: i64,
}

impl Cycle {
    /// 创建新台账条目 (id 由存储层分配)
    pub fn new(
        press_number: PressNumber,
        tool_id: ToolId,
        tool_position: Position,
        total_cycles: i64,
        performed_by: i64,
    ) -> Self {
        Self {
            id: 0,
            press_number,
            tool_id,
            tool_position,
            total_cycles,
            date: Utc::now(),
            performed_by,
            partial_cycles: 0,
        }
    }

    pub fn validate(&self) -> Result<(), DomainValidationError> {
        if !is_valid_press_number(self.press_number) {
            return Err(DomainValidationError::new(
                "press_number",
                format!("无效的压机编号: {}", self.press_number),
            ));
        }
        if self.tool_id <= 0 {
            return Err(DomainValidationError::new(
                "tool_id",
                format!("无效的工具ID: {}", self.tool_id),
            ));
        }
        if self.total_cycles < 0 {
            return Err(DomainValidationError::new(
                "total_cycles",
                format!("冲次读数不能为负: {}", self.total_cycles),
            ));
        }
        Ok(())
    }
}
