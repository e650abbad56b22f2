// ==========================================
// 压机工具管理系统 - 工具数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: mods / linked_notes 以 JSON 文本存储在实体行中
// 说明: 卡匣与工具同表, 以 position = TOP_CASSETTE 区分
// 并发: revision 乐观锁, 更新时 WHERE id = ? AND revision = ?
// ==========================================

use crate::domain::{Format, Position, Thickness, Tool, ToolId};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const TOOL_COLUMNS: &str = "id, position, width, height, type, code, min_thickness, max_thickness, \
                            regenerating, is_dead, press, binding, linked_notes, revision, mods";

// ==========================================
// ToolRepository - 工具仓储
// ==========================================
/// 工具仓储
/// 职责: 管理 tools 表的读写
pub struct ToolRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ToolRepository {
    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按ID查询工具
    ///
    /// # 返回
    /// - Ok(Some(Tool)): 找到
    /// - Ok(None): 未找到
    pub fn find_by_id(&self, id: ToolId) -> RepositoryResult<Option<Tool>> {
        let conn = self.get_conn()?;
        find_tool(&conn, id)
    }

    /// 插入工具, 返回新ID
    pub fn insert(&self, tool: &Tool) -> RepositoryResult<ToolId> {
        let conn = self.get_conn()?;
        insert_tool(&conn, tool)
    }

    /// 整行更新 (乐观锁), 返回新的 revision
    pub fn update(&self, tool: &Tool) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        update_tool(&conn, tool)
    }

    /// 指定工位的全部工具 (按ID升序)
    pub fn list_by_position(&self, position: Position) -> RepositoryResult<Vec<Tool>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tools WHERE position = ?1 ORDER BY id ASC",
            TOOL_COLUMNS
        ))?;
        let tools = stmt
            .query_map(params![position.to_db_str()], map_tool_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tools)
    }

    /// 是否存在 position/format/code 相同的其他工具
    pub fn exists_with(
        &self,
        position: Position,
        format: Format,
        code: &str,
        exclude_id: ToolId,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let exists: bool = conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM tools
                WHERE position = ?1 AND width = ?2 AND height = ?3 AND code = ?4 AND id != ?5
            )
            "#,
            params![position.to_db_str(), format.width, format.height, code, exclude_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

// ==========================================
// 连接级辅助函数 (供事务内复用)
// ==========================================

pub(crate) fn find_tool(conn: &Connection, id: ToolId) -> RepositoryResult<Option<Tool>> {
    let tool = conn
        .query_row(
            &format!("SELECT {} FROM tools WHERE id = ?1", TOOL_COLUMNS),
            params![id],
            map_tool_row,
        )
        .optional()?;
    Ok(tool)
}

pub(crate) fn insert_tool(conn: &Connection, tool: &Tool) -> RepositoryResult<ToolId> {
    let linked_notes = serde_json::to_string(&tool.linked_notes)?;
    let mods = serde_json::to_string(&tool.mods)?;
    conn.execute(
        r#"
        INSERT INTO tools (
            position, width, height, type, code, min_thickness, max_thickness,
            regenerating, is_dead, press, binding,
            linked_notes, mods
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            tool.position.to_db_str(),
            tool.format.width,
            tool.format.height,
            tool.type_name,
            tool.code,
            tool.thickness.map(|t| t.min),
            tool.thickness.map(|t| t.max),
            tool.regenerating,
            tool.is_dead,
            tool.press,
            tool.binding,
            linked_notes,
            mods,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 乐观锁更新
///
/// # 返回
/// - Ok(i64): 新的 revision
/// - Err(OptimisticLockFailure): 行已被他人修改 (revision 不匹配)
/// - Err(NotFound): 行不存在
pub(crate) fn update_tool(conn: &Connection, tool: &Tool) -> RepositoryResult<i64> {
    let linked_notes = serde_json::to_string(&tool.linked_notes)?;
    let mods = serde_json::to_string(&tool.mods)?;
    let affected = conn.execute(
        r#"
        UPDATE tools SET
            position = ?1, width = ?2, height = ?3, type = ?4, code = ?5,
            min_thickness = ?6, max_thickness = ?7,
            regenerating = ?8, is_dead = ?9, press = ?10, binding = ?11,
            linked_notes = ?12, mods = ?13,
            revision = revision + 1
        WHERE id = ?14 AND revision = ?15
        "#,
        params![
            tool.position.to_db_str(),
            tool.format.width,
            tool.format.height,
            tool.type_name,
            tool.code,
            tool.thickness.map(|t| t.min),
            tool.thickness.map(|t| t.max),
            tool.regenerating,
            tool.is_dead,
            tool.press,
            tool.binding,
            linked_notes,
            mods,
            tool.id,
            tool.revision,
        ],
    )?;

    if affected == 0 {
        let actual: Option<i64> = conn
            .query_row(
                "SELECT revision FROM tools WHERE id = ?1",
                params![tool.id],
                |row| row.get(0),
            )
            .optional()?;

        return Err(match actual {
            Some(actual) => RepositoryError::OptimisticLockFailure {
                entity: "Tool".to_string(),
                id: tool.id.to_string(),
                expected: tool.revision,
                actual,
            },
            None => RepositoryError::NotFound {
                entity: "Tool".to_string(),
                id: tool.id.to_string(),
            },
        });
    }
    Ok(tool.revision + 1)
}

fn map_tool_row(row: &Row) -> rusqlite::Result<Tool> {
    let position_raw: String = row.get(1)?;
    let position = parse_position(1, &position_raw)?;

    let min_thickness: Option<f32> = row.get(6)?;
    let max_thickness: Option<f32> = row.get(7)?;
    let thickness = match (min_thickness, max_thickness) {
        (Some(min), Some(max)) => Some(Thickness::new(min, max)),
        _ => None,
    };

    let linked_notes_raw: String = row.get(12)?;
    let linked_notes = serde_json::from_str(&linked_notes_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e)))?;

    let mods_raw: String = row.get(14)?;
    let mods = serde_json::from_str(&mods_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Tool {
        id: row.get(0)?,
        position,
        format: Format::new(row.get(2)?, row.get(3)?),
        type_name: row.get(4)?,
        code: row.get(5)?,
        thickness,
        regenerating: row.get(8)?,
        is_dead: row.get(9)?,
        press: row.get(10)?,
        binding: row.get(11)?,
        linked_notes,
        revision: row.get(13)?,
        mods,
    })
}

/// 解析工位列 (未知取值视为数据损坏)
pub(crate) fn parse_position(idx: usize, raw: &str) -> rusqlite::Result<Position> {
    Position::from_str(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("未知工位: {}", raw).into(),
        )
    })
}
