// ==========================================
// 压机工具管理系统 - 持久化网关接口
// ==========================================
// 职责: 引擎层所依赖的存储契约 (依赖倒置)
// 红线: 读操作未找到返回 Ok(None),与存储错误区分
// 红线: 冲突 (Conflict) 由引擎层判定,网关只报告乐观锁失败
// 红线: 工具写入按 revision 校验, 成功后回写新的 revision
// ==========================================

use crate::domain::{
    CassetteId, Cycle, CycleId, Format, Position, PressNumber, Regeneration, RegenerationId,
    Tool, ToolId,
};
use crate::repository::error::RepositoryResult;

/// 持久化网关
///
/// 引擎层只通过此 trait 访问存储; SQLite 实现见 `SqliteGateway`。
///
/// 组合写入 (`save_binding` / `complete_regeneration` / `discard_regeneration`)
/// 默认实现为顺序的两次单写; 支持事务的实现应覆盖为单个原子操作。
///
/// `save_tool` 及组合写入以 `tool.revision` 作为期望版本:
/// 行已被他人修改时返回 `OptimisticLockFailure`, 成功时把新版本写回 `tool.revision`。
pub trait PersistenceGateway: Send + Sync {
    // ==========================================
    // 工具
    // ==========================================
    fn get_tool(&self, id: ToolId) -> RepositoryResult<Option<Tool>>;

    /// 插入新工具, 返回分配的ID
    fn insert_tool(&self, tool: &Tool) -> RepositoryResult<ToolId>;

    /// 乐观锁保存
    fn save_tool(&self, tool: &mut Tool) -> RepositoryResult<()>;

    /// 指定工位的全部工具 (按ID升序)
    fn list_tools_at(&self, position: Position) -> RepositoryResult<Vec<Tool>>;

    /// 是否已存在 position/format/code 相同的其他工具
    fn tool_exists_with(
        &self,
        position: Position,
        format: Format,
        code: &str,
        exclude_id: ToolId,
    ) -> RepositoryResult<bool>;

    // ==========================================
    // 卡匣 (工位为 TopCassette 的工具)
    // ==========================================
    fn get_cassette(&self, id: CassetteId) -> RepositoryResult<Option<Tool>> {
        Ok(self.get_tool(id)?.filter(Tool::is_cassette))
    }

    fn list_cassettes(&self) -> RepositoryResult<Vec<Tool>> {
        self.list_tools_at(Position::TopCassette)
    }

    // ==========================================
    // 冲次台账
    // ==========================================
    /// 工具的全部台账 (按ID升序, 已注入 partial_cycles)
    fn list_cycles_for_tool(&self, tool_id: ToolId) -> RepositoryResult<Vec<Cycle>>;

    /// 按ID读取台账条目 (已注入 partial_cycles)
    fn get_cycle(&self, id: CycleId) -> RepositoryResult<Option<Cycle>>;

    /// 追加台账条目, 返回分配的ID
    fn append_cycle(&self, cycle: &Cycle) -> RepositoryResult<CycleId>;

    /// 同压机同计数器的最新读数 (卡匣工位含 TOP 工位读数)
    fn last_press_reading(
        &self,
        press: PressNumber,
        position: Position,
    ) -> RepositoryResult<Option<i64>>;

    // ==========================================
    // 修复记录
    // ==========================================
    fn get_regeneration(&self, id: RegenerationId) -> RepositoryResult<Option<Regeneration>>;

    /// 工具进行中的修复记录 (completed_total_cycles IS NULL)
    fn get_open_regeneration(&self, tool_id: ToolId) -> RepositoryResult<Option<Regeneration>>;

    /// 工具最近一条修复记录 (不论是否完成)
    fn get_last_regeneration(&self, tool_id: ToolId) -> RepositoryResult<Option<Regeneration>>;

    /// 工具最近一条已完成的修复记录
    fn get_last_closed_regeneration(
        &self,
        tool_id: ToolId,
    ) -> RepositoryResult<Option<Regeneration>>;

    fn insert_regeneration(&self, regeneration: &Regeneration) -> RepositoryResult<RegenerationId>;

    fn save_regeneration(&self, regeneration: &Regeneration) -> RepositoryResult<()>;

    fn delete_regeneration(&self, id: RegenerationId) -> RepositoryResult<()>;

    /// 工具修复历史 (最新在前)
    fn list_regenerations_for_tool(&self, tool_id: ToolId) -> RepositoryResult<Vec<Regeneration>>;

    /// 以该台账条目为起始边界的修复记录数
    fn count_regenerations_for_cycle(&self, cycle_id: CycleId) -> RepositoryResult<i64>;

    // ==========================================
    // 组合写入
    // ==========================================
    /// 同时保存绑定双方
    fn save_binding(&self, tool: &mut Tool, cassette: &mut Tool) -> RepositoryResult<()> {
        self.save_tool(tool)?;
        self.save_tool(cassette)
    }

    /// 保存已完成的修复记录与工具
    fn complete_regeneration(
        &self,
        tool: &mut Tool,
        regeneration: &Regeneration,
    ) -> RepositoryResult<()> {
        self.save_regeneration(regeneration)?;
        self.save_tool(tool)
    }

    /// 删除进行中的修复记录并保存工具
    fn discard_regeneration(
        &self,
        tool: &mut Tool,
        regeneration_id: RegenerationId,
    ) -> RepositoryResult<()> {
        self.delete_regeneration(regeneration_id)?;
        self.save_tool(tool)
    }
}
