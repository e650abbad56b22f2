// ==========================================
// 压机工具管理系统 - 冲次核算引擎
// ==========================================
// 职责: 由台账推导工具累计冲次 / 修复后冲次 / 磨损等级
// 输入: 冲次台账 + 最近一次已完成的修复边界
// 输出: total / partial / CycleStatus
// 红线: 只读, 不修改台账; 无台账时冲次为 0 而非错误
// ==========================================

use crate::config::CycleThresholds;
use crate::domain::{Cycle, CycleId, CycleStatus, ToolId};
use crate::engine::error::EngineResult;
use crate::repository::PersistenceGateway;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 工具冲次汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub tool_id: ToolId,
    pub total_cycles: i64,
    pub partial_cycles: i64,
    pub status: CycleStatus,
    pub last_cycle_id: Option<CycleId>,
}

// ==========================================
// CycleAccountant - 冲次核算
// ==========================================
pub struct CycleAccountant {
    gateway: Arc<dyn PersistenceGateway>,
    thresholds: CycleThresholds,
}

impl CycleAccountant {
    /// 使用默认阈值创建
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self::with_thresholds(gateway, CycleThresholds::default())
    }

    pub fn with_thresholds(gateway: Arc<dyn PersistenceGateway>, thresholds: CycleThresholds) -> Self {
        Self {
            gateway,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> CycleThresholds {
        self.thresholds
    }

    /// 工具累计冲次
    ///
    /// # 规则
    /// - 每条台账贡献 partial_cycles (与同压机同工位上一条读数的差值)
    /// - 累计冲次 = 全部贡献之和
    pub fn total_cycles(&self, tool_id: ToolId) -> EngineResult<i64> {
        let cycles = self.gateway.list_cycles_for_tool(tool_id)?;
        Ok(sum_partials(&cycles))
    }

    /// 上次修复完成后的冲次
    ///
    /// 从未完成修复时等于累计冲次。
    pub fn partial_cycles(&self, tool_id: ToolId) -> EngineResult<i64> {
        let total = self.total_cycles(tool_id)?;
        let baseline = self
            .gateway
            .get_last_closed_regeneration(tool_id)?
            .and_then(|r| r.completed_total_cycles)
            .unwrap_or(0);
        Ok(total - baseline)
    }

    /// 按阈值分级 (纯函数)
    pub fn classify(&self, partial_cycles: i64) -> CycleStatus {
        self.thresholds.classify(partial_cycles)
    }

    /// 工具最新一条台账 (当前边界)
    pub fn last_cycle(&self, tool_id: ToolId) -> EngineResult<Option<Cycle>> {
        let cycles = self.gateway.list_cycles_for_tool(tool_id)?;
        Ok(cycles.into_iter().last())
    }

    /// 冲次汇总
    pub fn summary(&self, tool_id: ToolId) -> EngineResult<CycleSummary> {
        let cycles = self.gateway.list_cycles_for_tool(tool_id)?;
        let total_cycles = sum_partials(&cycles);
        let baseline = self
            .gateway
            .get_last_closed_regeneration(tool_id)?
            .and_then(|r| r.completed_total_cycles)
            .unwrap_or(0);
        let partial_cycles = total_cycles - baseline;

        Ok(CycleSummary {
            tool_id,
            total_cycles,
            partial_cycles,
            status: self.classify(partial_cycles),
            last_cycle_id: cycles.last().map(|c| c.id),
        })
    }
}

fn sum_partials(cycles: &[Cycle]) -> i64 {
    cycles.iter().map(|c| c.partial_cycles).sum()
}
