// ==========================================
// 压机工具管理系统 - SQLite 持久化网关
// ==========================================
// 职责: 组合各仓储, 实现 PersistenceGateway
// 说明: 组合写入覆盖为单事务, 任一步失败整体回滚
// 说明: 事务提交后才回写 revision, 回滚时调用方的实体保持原版本
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::{
    Cycle, CycleId, Format, Position, PressNumber, Regeneration, RegenerationId, Tool, ToolId,
};
use crate::repository::cycle_repo::CycleRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::gateway::PersistenceGateway;
use crate::repository::regeneration_repo::{self, RegenerationRepository};
use crate::repository::tool_repo::{self, ToolRepository};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// SQLite 网关
///
/// 所有仓储共享同一个 `Arc<Mutex<Connection>>`。
pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
    tools: ToolRepository,
    cycles: CycleRepository,
    regenerations: RegenerationRepository,
}

impl SqliteGateway {
    /// 打开数据库文件并建表
    pub fn open(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(format!("{}: {}", db_path, e)))?;
        init_schema(&conn)?;
        Ok(Self::from_connection(Arc::new(Mutex::new(conn))))
    }

    /// 内存库 (测试用)
    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = crate::db::open_in_memory()?;
        Ok(Self::from_connection(Arc::new(Mutex::new(conn))))
    }

    /// 从已有连接创建 (连接需已建表)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            tools: ToolRepository::from_connection(conn.clone()),
            cycles: CycleRepository::from_connection(conn.clone()),
            regenerations: RegenerationRepository::from_connection(conn.clone()),
            conn,
        }
    }

    /// 共享连接 (供 ConfigManager 等复用)
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在单个事务中执行 `f`, 提交成功后返回其结果
    fn in_transaction<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&Connection) -> RepositoryResult<T>,
    {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(value)
    }
}

impl PersistenceGateway for SqliteGateway {
    fn get_tool(&self, id: ToolId) -> RepositoryResult<Option<Tool>> {
        self.tools.find_by_id(id)
    }

    fn insert_tool(&self, tool: &Tool) -> RepositoryResult<ToolId> {
        self.tools.insert(tool)
    }

    fn save_tool(&self, tool: &mut Tool) -> RepositoryResult<()> {
        tool.revision = self.tools.update(tool)?;
        Ok(())
    }

    fn list_tools_at(&self, position: Position) -> RepositoryResult<Vec<Tool>> {
        self.tools.list_by_position(position)
    }

    fn tool_exists_with(
        &self,
        position: Position,
        format: Format,
        code: &str,
        exclude_id: ToolId,
    ) -> RepositoryResult<bool> {
        self.tools.exists_with(position, format, code, exclude_id)
    }

    fn list_cycles_for_tool(&self, tool_id: ToolId) -> RepositoryResult<Vec<Cycle>> {
        self.cycles.list_for_tool(tool_id)
    }

    fn get_cycle(&self, id: CycleId) -> RepositoryResult<Option<Cycle>> {
        self.cycles.find_by_id(id)
    }

    fn append_cycle(&self, cycle: &Cycle) -> RepositoryResult<CycleId> {
        self.cycles.append(cycle)
    }

    fn last_press_reading(
        &self,
        press: PressNumber,
        position: Position,
    ) -> RepositoryResult<Option<i64>> {
        self.cycles.last_reading(press, position)
    }

    fn get_regeneration(&self, id: RegenerationId) -> RepositoryResult<Option<Regeneration>> {
        self.regenerations.find_by_id(id)
    }

    fn get_open_regeneration(&self, tool_id: ToolId) -> RepositoryResult<Option<Regeneration>> {
        self.regenerations.find_open(tool_id)
    }

    fn get_last_regeneration(&self, tool_id: ToolId) -> RepositoryResult<Option<Regeneration>> {
        self.regenerations.find_last(tool_id)
    }

    fn get_last_closed_regeneration(
        &self,
        tool_id: ToolId,
    ) -> RepositoryResult<Option<Regeneration>> {
        self.regenerations.find_last_closed(tool_id)
    }

    fn insert_regeneration(&self, regeneration: &Regeneration) -> RepositoryResult<RegenerationId> {
        self.regenerations.insert(regeneration)
    }

    fn save_regeneration(&self, regeneration: &Regeneration) -> RepositoryResult<()> {
        self.regenerations.update(regeneration)
    }

    fn delete_regeneration(&self, id: RegenerationId) -> RepositoryResult<()> {
        self.regenerations.delete(id)
    }

    fn list_regenerations_for_tool(&self, tool_id: ToolId) -> RepositoryResult<Vec<Regeneration>> {
        self.regenerations.list_for_tool(tool_id)
    }

    fn count_regenerations_for_cycle(&self, cycle_id: CycleId) -> RepositoryResult<i64> {
        self.regenerations.count_for_cycle(cycle_id)
    }

    fn save_binding(&self, tool: &mut Tool, cassette: &mut Tool) -> RepositoryResult<()> {
        let (tool_revision, cassette_revision) = self.in_transaction(|conn| {
            let tool_revision = tool_repo::update_tool(conn, tool)?;
            let cassette_revision = tool_repo::update_tool(conn, cassette)?;
            Ok((tool_revision, cassette_revision))
        })?;
        tool.revision = tool_revision;
        cassette.revision = cassette_revision;
        Ok(())
    }

    fn complete_regeneration(
        &self,
        tool: &mut Tool,
        regeneration: &Regeneration,
    ) -> RepositoryResult<()> {
        tool.revision = self.in_transaction(|conn| {
            regeneration_repo::update_regeneration(conn, regeneration)?;
            tool_repo::update_tool(conn, tool)
        })?;
        Ok(())
    }

    fn discard_regeneration(
        &self,
        tool: &mut Tool,
        regeneration_id: RegenerationId,
    ) -> RepositoryResult<()> {
        tool.revision = self.in_transaction(|conn| {
            regeneration_repo::delete_regeneration(conn, regeneration_id)?;
            tool_repo::update_tool(conn, tool)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Thickness;

    fn insert_tool(gateway: &SqliteGateway, code: &str) -> Tool {
        let mut tool = Tool::new(Position::Top, Format::new(120, 60), code, "FC");
        tool.id = gateway.insert_tool(&tool).unwrap();
        tool
    }

    fn insert_cassette(gateway: &SqliteGateway, code: &str) -> Tool {
        let mut cassette =
            Tool::new_cassette(Format::new(120, 60), code, "MASS", Thickness::new(6.0, 12.0));
        cassette.id = gateway.insert_tool(&cassette).unwrap();
        cassette
    }

    #[test]
    fn test_save_binding_rolls_back_on_failure() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let mut tool = insert_tool(&gateway, "G01");

        // 卡匣不存在 -> 第二步失败, 工具的修改也不应落库
        let mut ghost =
            Tool::new_cassette(Format::new(120, 60), "K77", "MASS", Thickness::new(6.0, 12.0));
        ghost.id = 77;
        tool.binding = Some(ghost.id);
        ghost.binding = Some(tool.id);

        assert!(gateway.save_binding(&mut tool, &mut ghost).is_err());
        let stored = gateway.get_tool(tool.id).unwrap().unwrap();
        assert_eq!(stored.binding, None);
        assert_eq!(stored.revision, 0);
        assert_eq!(tool.revision, 0);
    }

    #[test]
    fn test_save_binding_stale_cassette_keeps_both_rows() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let mut tool = insert_tool(&gateway, "G01");
        let mut cassette = insert_cassette(&gateway, "K01");

        // 卡匣已被其他调用方修改
        let mut other = gateway.get_tool(cassette.id).unwrap().unwrap();
        other.press = Some(1);
        gateway.save_tool(&mut other).unwrap();

        tool.binding = Some(cassette.id);
        cassette.binding = Some(tool.id);
        let err = gateway.save_binding(&mut tool, &mut cassette).unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));

        assert_eq!(gateway.get_tool(tool.id).unwrap().unwrap().binding, None);
        assert_eq!(gateway.get_tool(cassette.id).unwrap().unwrap().press, Some(1));
        assert_eq!(tool.revision, 0);
    }

    #[test]
    fn test_cassette_lookup_filters_position() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let tool = insert_tool(&gateway, "G01");
        let cassette = insert_cassette(&gateway, "K01");

        assert!(gateway.get_cassette(tool.id).unwrap().is_none());
        assert_eq!(gateway.get_cassette(cassette.id).unwrap().unwrap().id, cassette.id);
        assert_eq!(gateway.list_cassettes().unwrap().len(), 1);
    }

    #[test]
    fn test_complete_regeneration_is_atomic() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let mut tool = insert_tool(&gateway, "G01");
        tool.regenerating = true;
        gateway.save_tool(&mut tool).unwrap();
        assert_eq!(tool.revision, 1);

        let mut regeneration = Regeneration::open(tool.id, None, 0, "", 1);
        regeneration.id = gateway.insert_regeneration(&regeneration).unwrap();
        regeneration.close(0, 1);

        tool.regenerating = false;
        gateway.complete_regeneration(&mut tool, &regeneration).unwrap();
        assert_eq!(tool.revision, 2);

        assert!(!gateway.get_tool(tool.id).unwrap().unwrap().regenerating);
        assert!(gateway.get_open_regeneration(tool.id).unwrap().is_none());
        assert!(gateway.get_regeneration(regeneration.id).unwrap().unwrap().is_closed());
    }

    #[test]
    fn test_discard_regeneration_missing_record_keeps_tool() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let mut tool = insert_tool(&gateway, "G01");
        tool.regenerating = true;
        gateway.save_tool(&mut tool).unwrap();

        tool.regenerating = false;
        assert!(gateway.discard_regeneration(&mut tool, 404).is_err());
        assert!(gateway.get_tool(tool.id).unwrap().unwrap().regenerating);
    }
}
