// ==========================================
// 压机工具管理系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 提供幂等建表 (init_schema)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并建表 (测试/演示用)
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 幂等建表
///
/// 表:
/// - tools: 工具与卡匣 (position = TOP_CASSETTE) 共用一张表, mods 列为 JSON 变更历史,
///   revision 列用于乐观锁
/// - press_cycles: 冲次台账 (只追加)
/// - tool_regenerations: 修复记录, completed_total_cycles 为 NULL 表示进行中
/// - config_kv: 全局配置
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS tools (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            position TEXT NOT NULL,
            width INTEGER NOT NULL DEFAULT 0,
            height INTEGER NOT NULL DEFAULT 0,
            type TEXT NOT NULL DEFAULT '',
            code TEXT NOT NULL,
            min_thickness REAL,
            max_thickness REAL,
            regenerating INTEGER NOT NULL DEFAULT 0,
            is_dead INTEGER NOT NULL DEFAULT 0,
            press INTEGER CHECK(press IS NULL OR (press >= 0 AND press <= 5)),
            binding INTEGER,
            linked_notes TEXT NOT NULL DEFAULT '[]',
            revision INTEGER NOT NULL DEFAULT 0,
            mods TEXT NOT NULL DEFAULT '[]',
            CHECK((position = 'TOP_CASSETTE') = (min_thickness IS NOT NULL AND max_thickness IS NOT NULL))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tools_binding
            ON tools(binding) WHERE binding IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_tools_position ON tools(position);

        CREATE TABLE IF NOT EXISTS press_cycles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            press_number INTEGER NOT NULL CHECK(press_number >= 0 AND press_number <= 5),
            tool_id INTEGER NOT NULL,
            tool_position TEXT NOT NULL,
            total_cycles INTEGER NOT NULL DEFAULT 0,
            date TEXT NOT NULL,
            performed_by INTEGER NOT NULL,
            FOREIGN KEY (tool_id) REFERENCES tools(id)
        );
        CREATE INDEX IF NOT EXISTS idx_press_cycles_tool_id ON press_cycles(tool_id);
        CREATE INDEX IF NOT EXISTS idx_press_cycles_press_position
            ON press_cycles(press_number, tool_position);

        CREATE TABLE IF NOT EXISTS tool_regenerations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_id INTEGER NOT NULL,
            cycle_id INTEGER,
            start_total_cycles INTEGER NOT NULL DEFAULT 0,
            reason TEXT NOT NULL DEFAULT '',
            performed_by INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            completed_total_cycles INTEGER,
            completed_at TEXT,
            completed_by INTEGER,
            FOREIGN KEY (tool_id) REFERENCES tools(id) ON DELETE CASCADE,
            FOREIGN KEY (cycle_id) REFERENCES press_cycles(id) ON DELETE SET NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_regenerations_tool_id ON tool_regenerations(tool_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tool_regenerations_open
            ON tool_regenerations(tool_id) WHERE completed_total_cycles IS NULL;

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_version_absent_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
