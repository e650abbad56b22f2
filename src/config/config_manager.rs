// ==========================================
// 压机工具管理系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::cycle_thresholds::CycleThresholds;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_global_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    // ===== 冲次阈值配置 =====

    /// 获取冲次阈值
    ///
    /// # 返回
    /// - CycleThresholds: 配置不存在、格式错误或 warning ≥ error 时回退默认值 (800000 / 1000000)
    pub fn get_cycle_thresholds(&self) -> Result<CycleThresholds, Box<dyn Error>> {
        let defaults = CycleThresholds::default();

        let warning_raw =
            self.get_config_or_default(config_keys::TOOL_CYCLES_WARNING, &defaults.warning.to_string())?;
        let error_raw =
            self.get_config_or_default(config_keys::TOOL_CYCLES_ERROR, &defaults.error.to_string())?;

        let parsed = match (warning_raw.trim().parse::<i64>(), error_raw.trim().parse::<i64>()) {
            (Ok(warning), Ok(error)) => CycleThresholds::new(warning, error),
            _ => None,
        };

        Ok(parsed.unwrap_or_else(|| {
            tracing::warn!(
                warning = %warning_raw,
                error = %error_raw,
                "冲次阈值配置无效，使用默认值"
            );
            defaults
        }))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 冲次阈值
    pub const TOOL_CYCLES_WARNING: &str = "tool_cycles_warning";
    pub const TOOL_CYCLES_ERROR: &str = "tool_cycles_error";
}
