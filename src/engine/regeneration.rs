// ==========================================
// 压机工具管理系统 - 修复状态机
// ==========================================
// 职责: 驱动工具 可用 → 修复中 → 可用/已取消
// 输入: 工具ID + 操作人
// 输出: 修复记录 (起始边界 = 最新台账, 完成边界 = 当时累计冲次)
// 红线: 每个工具最多一条进行中的修复记录
// 红线: 开始修复的两次写入对调用方表现为原子 (失败时补偿撤销标志)
// ==========================================

use crate::domain::{Actor, CycleId, Regeneration, RegenerationId, Tool, ToolId};
use crate::engine::cycle_accountant::CycleAccountant;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{Notification, OptionalNotifier};
use crate::repository::{PersistenceGateway, RepositoryError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

// ==========================================
// RegenerationStateMachine - 修复状态机
// ==========================================
pub struct RegenerationStateMachine {
    gateway: Arc<dyn PersistenceGateway>,
    accountant: Arc<CycleAccountant>,
    notifier: OptionalNotifier,
    lock: Mutex<()>,
}

impl RegenerationStateMachine {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        accountant: Arc<CycleAccountant>,
        notifier: OptionalNotifier,
    ) -> Self {
        Self {
            gateway,
            accountant,
            notifier,
            lock: Mutex::new(()),
        }
    }

    /// 获取修复子系统锁 (与绑定锁相互独立)
    fn acquire(&self) -> EngineResult<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|e| {
            EngineError::Storage(RepositoryError::LockError(format!("修复锁获取失败: {}", e)))
        })
    }

    fn load_tool(&self, tool_id: ToolId) -> EngineResult<Tool> {
        self.gateway
            .get_tool(tool_id)?
            .ok_or_else(|| EngineError::not_found("Tool", tool_id))
    }

    // ==========================================
    // 开始修复
    // ==========================================

    /// 开始修复
    ///
    /// # 流程
    /// 1. 校验操作人与输入
    /// 2. 加锁, 读取工具; 已在修复中或已报废 → Conflict
    /// 3. 以最新台账与当前累计冲次作为起始边界
    /// 4. 第一阶段: 置 regenerating 标志并保存工具
    /// 5. 第二阶段: 插入进行中的修复记录
    /// 6. 第二阶段失败时撤销标志, 返回 StartRolledBack 或 CompensationFailed
    /// 7. 成功后尽力发送通知
    pub fn start(&self, tool_id: ToolId, reason: &str, actor: &Actor) -> EngineResult<Regeneration> {
        actor.validate()?;
        if tool_id <= 0 {
            return Err(EngineError::Validation(format!("无效的工具ID: {}", tool_id)));
        }

        let _guard = self.acquire()?;

        let mut tool = self.load_tool(tool_id)?;
        if tool.regenerating {
            return Err(EngineError::Conflict(format!("工具 {} 已在修复中", tool_id)));
        }
        if tool.is_dead {
            return Err(EngineError::Conflict(format!("工具 {} 已报废, 不能修复", tool_id)));
        }

        let boundary = self.accountant.last_cycle(tool_id)?;
        let start_total = self.accountant.total_cycles(tool_id)?;

        // 第一阶段
        tool.regenerating = true;
        tool.record_modification(Some(actor))?;
        self.gateway.save_tool(&mut tool)?;

        // 第二阶段
        let mut regeneration = Regeneration::open(
            tool_id,
            boundary.map(|c| c.id),
            start_total,
            reason.trim(),
            actor.id,
        );
        match self.gateway.insert_regeneration(&regeneration) {
            Ok(id) => regeneration.id = id,
            Err(e) => return Err(self.compensate_start(tool_id, actor, e.into())),
        }

        info!(
            tool_id,
            regeneration_id = regeneration.id,
            start_total_cycles = start_total,
            actor = %actor.name,
            "工具开始修复"
        );
        self.notifier.notify(&Notification::new(
            "工具修复开始",
            format!("{} 开始修复: {}", tool, regeneration.reason),
            actor.id,
        ));

        Ok(regeneration)
    }

    /// 撤销第一阶段写入 (只尝试一次)
    ///
    /// 重新读取工具后只清除 regenerating 标志, 不覆盖期间其他子系统的修改;
    /// 读取后又被修改时按乐观锁失败处理。
    fn compensate_start(&self, tool_id: ToolId, actor: &Actor, cause: EngineError) -> EngineError {
        warn!(tool_id, error = %cause, "插入修复记录失败, 撤销修复标志");

        let revert = self.load_tool(tool_id).and_then(|mut tool| {
            tool.regenerating = false;
            tool.record_modification(Some(actor))?;
            self.gateway.save_tool(&mut tool)?;
            Ok(())
        });

        match revert {
            Ok(()) => EngineError::StartRolledBack {
                cause: Box::new(cause),
            },
            Err(revert) => {
                error!(
                    tool_id,
                    cause = %cause,
                    revert = %revert,
                    "修复标志撤销失败, 工具处于修复中但无修复记录"
                );
                EngineError::CompensationFailed {
                    cause: Box::new(cause),
                    revert: Box::new(revert),
                }
            }
        }
    }

    // ==========================================
    // 完成修复
    // ==========================================

    /// 完成修复
    ///
    /// # 返回
    /// - Ok(Regeneration): 已完成的修复记录
    /// - Err(ConsistencyFault): 工具标记修复中但无进行中的记录
    /// - Err(NotFound): 工具不存在, 或工具未在修复中
    pub fn stop(&self, tool_id: ToolId, actor: &Actor) -> EngineResult<Regeneration> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut tool = self.load_tool(tool_id)?;
        let mut regeneration = self.require_open(&tool)?;
        if !tool.regenerating {
            warn!(tool_id, regeneration_id = regeneration.id, "存在进行中的修复记录但工具未标记修复中");
        }

        let completed_total = self.accountant.total_cycles(tool_id)?;
        regeneration.close(completed_total, actor.id);

        tool.regenerating = false;
        tool.record_modification(Some(actor))?;
        self.gateway.complete_regeneration(&mut tool, &regeneration)?;

        info!(
            tool_id,
            regeneration_id = regeneration.id,
            completed_total_cycles = completed_total,
            actor = %actor.name,
            "工具修复完成"
        );
        self.notifier.notify(&Notification::new(
            "工具修复完成",
            format!("{} 修复完成, 冲次计数重置", tool),
            actor.id,
        ));

        Ok(regeneration)
    }

    // ==========================================
    // 取消修复
    // ==========================================

    /// 取消修复 (删除进行中的修复记录)
    ///
    /// # 返回
    /// - Err(ConsistencyFault): 工具标记修复中但无进行中的记录
    /// - Err(Conflict): 最近一次修复已完成
    /// - Err(NotFound): 工具从未修复过
    pub fn abort(&self, tool_id: ToolId, actor: &Actor) -> EngineResult<()> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut tool = self.load_tool(tool_id)?;
        let open = match self.gateway.get_open_regeneration(tool_id)? {
            Some(open) => open,
            None if tool.regenerating => return Err(inconsistent_flag(tool_id)),
            None => {
                return match self.gateway.get_last_regeneration(tool_id)? {
                    Some(last) => Err(EngineError::Conflict(format!(
                        "工具 {} 的最近一次修复 {} 已完成, 不能取消",
                        tool_id, last.id
                    ))),
                    None => Err(EngineError::not_found("Regeneration", tool_id)),
                };
            }
        };

        tool.regenerating = false;
        tool.record_modification(Some(actor))?;
        self.gateway.discard_regeneration(&mut tool, open.id)?;

        info!(tool_id, regeneration_id = open.id, actor = %actor.name, "工具修复已取消");
        self.notifier.notify(&Notification::new(
            "工具修复取消",
            format!("{} 的修复已取消", tool),
            actor.id,
        ));
        Ok(())
    }

    /// 进行中的修复记录; 缺失时区分一致性故障与普通未找到
    fn require_open(&self, tool: &Tool) -> EngineResult<Regeneration> {
        match self.gateway.get_open_regeneration(tool.id)? {
            Some(open) => Ok(open),
            None if tool.regenerating => Err(inconsistent_flag(tool.id)),
            None => Err(EngineError::not_found("Regeneration", tool.id)),
        }
    }

    // ==========================================
    // 查询与维护
    // ==========================================

    /// 工具修复历史 (最新在前)
    pub fn history(&self, tool_id: ToolId) -> EngineResult<Vec<Regeneration>> {
        self.load_tool(tool_id)?;
        Ok(self.gateway.list_regenerations_for_tool(tool_id)?)
    }

    /// 修改修复原因
    pub fn update_reason(
        &self,
        regeneration_id: RegenerationId,
        reason: &str,
        actor: &Actor,
    ) -> EngineResult<Regeneration> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut regeneration = self
            .gateway
            .get_regeneration(regeneration_id)?
            .ok_or_else(|| EngineError::not_found("Regeneration", regeneration_id))?;
        regeneration.reason = reason.trim().to_string();
        self.gateway.save_regeneration(&regeneration)?;

        info!(regeneration_id, actor = %actor.name, "修复原因已更新");
        Ok(regeneration)
    }

    /// 该台账条目是否为某次修复的起始边界
    pub fn is_cycle_boundary(&self, cycle_id: CycleId) -> EngineResult<bool> {
        Ok(self.gateway.count_regenerations_for_cycle(cycle_id)? > 0)
    }
}

fn inconsistent_flag(tool_id: ToolId) -> EngineError {
    EngineError::ConsistencyFault(format!(
        "工具 {} 标记为修复中, 但不存在进行中的修复记录",
        tool_id
    ))
}
