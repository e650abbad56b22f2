// ==========================================
// 压机工具管理系统 - 修复记录仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: idx_tool_regenerations_open 保证每个工具最多一条进行中的记录
// ==========================================

use crate::domain::{CycleId, Regeneration, RegenerationId, ToolId};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const REGENERATION_COLUMNS: &str = "id, tool_id, cycle_id, start_total_cycles, reason, \
                                    performed_by, started_at, completed_total_cycles, \
                                    completed_at, completed_by";

/// 修复记录仓储
pub struct RegenerationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RegenerationRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, id: RegenerationId) -> RepositoryResult<Option<Regeneration>> {
        let conn = self.get_conn()?;
        let regeneration = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tool_regenerations WHERE id = ?1",
                    REGENERATION_COLUMNS
                ),
                params![id],
                map_regeneration_row,
            )
            .optional()?;
        Ok(regeneration)
    }

    /// 进行中的修复记录
    pub fn find_open(&self, tool_id: ToolId) -> RepositoryResult<Option<Regeneration>> {
        self.find_latest_where(tool_id, "AND completed_total_cycles IS NULL")
    }

    /// 最近一条修复记录 (不论状态)
    pub fn find_last(&self, tool_id: ToolId) -> RepositoryResult<Option<Regeneration>> {
        self.find_latest_where(tool_id, "")
    }

    /// 最近一条已完成的修复记录
    pub fn find_last_closed(&self, tool_id: ToolId) -> RepositoryResult<Option<Regeneration>> {
        self.find_latest_where(tool_id, "AND completed_total_cycles IS NOT NULL")
    }

    fn find_latest_where(
        &self,
        tool_id: ToolId,
        extra_filter: &str,
    ) -> RepositoryResult<Option<Regeneration>> {
        let conn = self.get_conn()?;
        let regeneration = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tool_regenerations WHERE tool_id = ?1 {} ORDER BY id DESC LIMIT 1",
                    REGENERATION_COLUMNS, extra_filter
                ),
                params![tool_id],
                map_regeneration_row,
            )
            .optional()?;
        Ok(regeneration)
    }

    /// 插入修复记录
    ///
    /// # 返回
    /// - Err(UniqueConstraintViolation): 该工具已有进行中的记录
    pub fn insert(&self, regeneration: &Regeneration) -> RepositoryResult<RegenerationId> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO tool_regenerations (
                tool_id, cycle_id, start_total_cycles, reason, performed_by, started_at,
                completed_total_cycles, completed_at, completed_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                regeneration.tool_id,
                regeneration.cycle_id,
                regeneration.start_total_cycles,
                regeneration.reason,
                regeneration.performed_by,
                regeneration.started_at,
                regeneration.completed_total_cycles,
                regeneration.completed_at,
                regeneration.completed_by,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(&self, regeneration: &Regeneration) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        update_regeneration(&conn, regeneration)
    }

    pub fn delete(&self, id: RegenerationId) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        delete_regeneration(&conn, id)
    }

    /// 工具修复历史 (最新在前)
    pub fn list_for_tool(&self, tool_id: ToolId) -> RepositoryResult<Vec<Regeneration>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tool_regenerations WHERE tool_id = ?1 ORDER BY id DESC",
            REGENERATION_COLUMNS
        ))?;
        let regenerations = stmt
            .query_map(params![tool_id], map_regeneration_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(regenerations)
    }

    /// 以该台账条目为起始边界的修复记录数
    pub fn count_for_cycle(&self, cycle_id: CycleId) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tool_regenerations WHERE cycle_id = ?1",
            params![cycle_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

pub(crate) fn update_regeneration(conn: &Connection, regeneration: &Regeneration) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"
        UPDATE tool_regenerations SET
            cycle_id = ?1, start_total_cycles = ?2, reason = ?3,
            performed_by = ?4, started_at = ?5,
            completed_total_cycles = ?6, completed_at = ?7, completed_by = ?8
        WHERE id = ?9
        "#,
        params![
            regeneration.cycle_id,
            regeneration.start_total_cycles,
            regeneration.reason,
            regeneration.performed_by,
            regeneration.started_at,
            regeneration.completed_total_cycles,
            regeneration.completed_at,
            regeneration.completed_by,
            regeneration.id,
        ],
    )?;

    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "Regeneration".to_string(),
            id: regeneration.id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn delete_regeneration(conn: &Connection, id: RegenerationId) -> RepositoryResult<()> {
    let affected = conn.execute("DELETE FROM tool_regenerations WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "Regeneration".to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn map_regeneration_row(row: &Row) -> rusqlite::Result<Regeneration> {
    Ok(Regeneration {
        id: row.get(0)?,
        tool_id: row.get(1)?,
        cycle_id: row.get(2)?,
        start_total_cycles: row.get(3)?,
        reason: row.get(4)?,
        performed_by: row.get(5)?,
        started_at: row.get(6)?,
        completed_total_cycles: row.get(7)?,
        completed_at: row.get(8)?,
        completed_by: row.get(9)?,
    })
}
