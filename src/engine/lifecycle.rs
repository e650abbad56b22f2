// ==========================================
// 压机工具管理系统 - 工具生命周期服务
// ==========================================
// 职责: 工具/卡匣登记、上下机、报废/恢复、冲次登记、变更回滚
// 红线: 每次状态变化都追加变更记录
// 红线: 压机计数器读数在同压机同计数器上不得回退
// 红线: 绑定的卡匣不单独上下机, 压机编号跟随其上模工具
// ==========================================

use crate::domain::{
    Actor, Cycle, CycleStatus, Position, PressNumber, Tool, ToolId, ToolStatus,
};
use crate::engine::cycle_accountant::{CycleAccountant, CycleSummary};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{PersistenceGateway, RepositoryError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// 工具状态概览
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverview {
    pub tool_id: ToolId,
    pub status: ToolStatus,
    pub press: Option<PressNumber>,
    pub binding: Option<ToolId>,
    pub cycles: CycleSummary,
}

impl ToolOverview {
    /// 是否需要关注 (冲次预警或超限)
    pub fn needs_attention(&self) -> bool {
        self.cycles.status >= CycleStatus::Warning
    }
}

// ==========================================
// ToolLifecycleService - 生命周期服务
// ==========================================
pub struct ToolLifecycleService {
    gateway: Arc<dyn PersistenceGateway>,
    accountant: Arc<CycleAccountant>,
    lock: Mutex<()>,
}

impl ToolLifecycleService {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, accountant: Arc<CycleAccountant>) -> Self {
        Self {
            gateway,
            accountant,
            lock: Mutex::new(()),
        }
    }

    fn acquire(&self) -> EngineResult<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|e| {
            EngineError::Storage(RepositoryError::LockError(format!("生命周期锁获取失败: {}", e)))
        })
    }

    fn load_tool(&self, tool_id: ToolId) -> EngineResult<Tool> {
        self.gateway
            .get_tool(tool_id)?
            .ok_or_else(|| EngineError::not_found("Tool", tool_id))
    }

    // ==========================================
    // 登记
    // ==========================================

    /// 登记新工具 (含卡匣)
    ///
    /// # 规则
    /// - 字段校验 (编码必填, 卡匣带厚度范围)
    /// - position + format + code 唯一, 重复 → Conflict
    /// - 初始状态写入第一条变更记录
    pub fn create_tool(&self, mut tool: Tool, actor: &Actor) -> EngineResult<Tool> {
        actor.validate()?;
        tool.validate()?;

        let _guard = self.acquire()?;

        if self
            .gateway
            .tool_exists_with(tool.position, tool.format, &tool.code, 0)?
        {
            return Err(EngineError::Conflict(format!("工具已存在: {} ({})", tool, tool.position)));
        }

        tool.record_modification(Some(actor))?;
        tool.id = self.gateway.insert_tool(&tool)?;

        info!(tool_id = tool.id, tool = %tool, actor = %actor.name, "工具已登记");
        Ok(tool)
    }

    /// 登记新卡匣
    pub fn create_cassette(&self, cassette: Tool, actor: &Actor) -> EngineResult<Tool> {
        if !cassette.is_cassette() {
            return Err(EngineError::Validation(format!(
                "卡匣工位必须为 {}, 实际为 {}",
                Position::TopCassette,
                cassette.position
            )));
        }
        self.create_tool(cassette, actor)
    }

    // ==========================================
    // 上下机 / 报废
    // ==========================================

    /// 设置工具所在压机 (None 表示下机)
    ///
    /// # 规则
    /// - 已报废或修复中的工具不能上机 → Conflict
    /// - 已绑定的卡匣不能单独上下机 → Conflict
    /// - 绑定的卡匣随工具一同上下机
    pub fn assign_press(
        &self,
        tool_id: ToolId,
        press: Option<PressNumber>,
        actor: &Actor,
    ) -> EngineResult<Tool> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut tool = self.load_tool(tool_id)?;
        if tool.is_cassette() {
            if let Some(owner) = tool.binding {
                return Err(EngineError::Conflict(format!(
                    "卡匣 {} 已绑定工具 {}, 压机编号跟随工具",
                    tool_id, owner
                )));
            }
        }
        if press.is_some() {
            match tool.status() {
                ToolStatus::Dead => {
                    return Err(EngineError::Conflict(format!("工具 {} 已报废", tool_id)))
                }
                ToolStatus::Regenerating => {
                    return Err(EngineError::Conflict(format!("工具 {} 正在修复中", tool_id)))
                }
                _ => {}
            }
        }
        if tool.press == press {
            debug!(tool_id, ?press, "压机编号未变化");
            return Ok(tool);
        }

        tool.set_press(press)?;
        tool.record_modification(Some(actor))?;

        self.save_with_cassette_press(&mut tool, press, actor)?;

        info!(tool_id, ?press, actor = %actor.name, "工具压机编号已更新");
        Ok(tool)
    }

    /// 保存上模工具, 其绑定卡匣 (反向引用一致时) 同步压机编号
    fn save_with_cassette_press(
        &self,
        tool: &mut Tool,
        press: Option<PressNumber>,
        actor: &Actor,
    ) -> EngineResult<()> {
        let bound = match tool.bound_cassette() {
            Some(cassette_id) => self
                .gateway
                .get_cassette(cassette_id)?
                .filter(|c| c.binding == Some(tool.id)),
            None => None,
        };
        match bound {
            Some(mut cassette) if cassette.press != press => {
                cassette.press = press;
                cassette.record_modification(Some(actor))?;
                self.gateway.save_binding(tool, &mut cassette)?;
            }
            _ => self.gateway.save_tool(tool)?,
        }
        Ok(())
    }

    /// 报废工具 (同时下机)
    ///
    /// # 规则
    /// - 修复中 → Conflict
    /// - 已绑定的卡匣需先解绑 → Conflict
    /// - 上模工具报废时, 绑定的卡匣一同下机 (绑定关系保留)
    pub fn mark_dead(&self, tool_id: ToolId, actor: &Actor) -> EngineResult<Tool> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut tool = self.load_tool(tool_id)?;
        if tool.is_dead {
            return Ok(tool);
        }
        if tool.regenerating {
            return Err(EngineError::Conflict(format!(
                "工具 {} 正在修复中, 请先完成或取消修复",
                tool_id
            )));
        }
        if tool.is_cassette() {
            if let Some(owner) = tool.binding {
                return Err(EngineError::Conflict(format!(
                    "卡匣 {} 已绑定工具 {}, 请先解绑",
                    tool_id, owner
                )));
            }
        }

        tool.is_dead = true;
        tool.press = None;
        tool.record_modification(Some(actor))?;
        self.save_with_cassette_press(&mut tool, None, actor)?;

        info!(tool_id, actor = %actor.name, "工具已报废");
        Ok(tool)
    }

    /// 恢复已报废的工具
    pub fn revive(&self, tool_id: ToolId, actor: &Actor) -> EngineResult<Tool> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut tool = self.load_tool(tool_id)?;
        if !tool.is_dead {
            return Ok(tool);
        }

        tool.is_dead = false;
        tool.record_modification(Some(actor))?;
        self.gateway.save_tool(&mut tool)?;

        info!(tool_id, actor = %actor.name, "工具已恢复");
        Ok(tool)
    }

    /// 工具状态概览
    pub fn status(&self, tool_id: ToolId) -> EngineResult<ToolOverview> {
        let tool = self.load_tool(tool_id)?;
        let cycles = self.accountant.summary(tool_id)?;

        Ok(ToolOverview {
            tool_id,
            status: tool.status(),
            press: tool.press,
            binding: tool.binding,
            cycles,
        })
    }

    // ==========================================
    // 冲次登记
    // ==========================================

    /// 登记压机计数器读数
    ///
    /// # 返回
    /// - Ok(Cycle): 已落库的条目 (含 id 与 partial_cycles)
    /// - Err(Validation): 读数低于同压机同计数器上一条读数, 或工位与工具不符
    /// - Err(Conflict): 工具已报废
    pub fn record_cycle(&self, mut entry: Cycle, actor: &Actor) -> EngineResult<Cycle> {
        actor.validate()?;
        entry.validate()?;

        let _guard = self.acquire()?;

        let tool = self.load_tool(entry.tool_id)?;
        if tool.is_dead {
            return Err(EngineError::Conflict(format!("工具 {} 已报废", tool.id)));
        }
        if entry.tool_position != tool.position {
            return Err(EngineError::Validation(format!(
                "工位不符: 台账为 {}, 工具为 {}",
                entry.tool_position, tool.position
            )));
        }

        let previous = self
            .gateway
            .last_press_reading(entry.press_number, entry.tool_position)?;
        if let Some(previous) = previous {
            if entry.total_cycles < previous {
                return Err(EngineError::Validation(format!(
                    "压机 {} 读数回退: {} < {}",
                    entry.press_number, entry.total_cycles, previous
                )));
            }
        }

        entry.performed_by = actor.id;
        let id = self.gateway.append_cycle(&entry)?;
        let entry = self
            .gateway
            .get_cycle(id)?
            .ok_or_else(|| EngineError::not_found("Cycle", id))?;

        info!(
            cycle_id = entry.id,
            tool_id = entry.tool_id,
            press = entry.press_number,
            total_cycles = entry.total_cycles,
            partial_cycles = entry.partial_cycles,
            "冲次已登记"
        );
        Ok(entry)
    }

    // ==========================================
    // 回滚
    // ==========================================

    /// 回滚工具到指定变更记录 (按记录序号 seq 定位)
    ///
    /// # 规则
    /// - 只恢复可编辑字段 (position / format / type / code / thickness / linked_notes)
    /// - 回滚本身追加为新的变更记录, 不删除历史
    pub fn rollback_to(&self, tool_id: ToolId, seq: u64, actor: &Actor) -> EngineResult<Tool> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut tool = self.load_tool(tool_id)?;
        let snapshot = tool
            .mods
            .get_by_seq(seq)
            .map(|r| r.data.clone())
            .ok_or_else(|| EngineError::not_found("ModificationRecord", seq))?;

        tool.apply_editable(&snapshot);
        tool.validate()?;
        if self
            .gateway
            .tool_exists_with(tool.position, tool.format, &tool.code, tool.id)?
        {
            return Err(EngineError::Conflict(format!("回滚后与已有工具重复: {}", tool)));
        }

        tool.record_modification(Some(actor))?;
        self.gateway.save_tool(&mut tool)?;

        info!(tool_id, seq, actor = %actor.name, "工具已回滚");
        Ok(tool)
    }
}
