// ==========================================
// 压机工具管理系统 - 应用层
// ==========================================
// 职责: 组装引擎, 供上层处理器共享
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
