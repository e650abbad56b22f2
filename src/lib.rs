// ==========================================
// 压机工具管理系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 工具生命周期与变更审计引擎
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 应用层 - 引擎组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{CycleStatus, Format, Position, PressNumber, ToolStatus};

// 领域实体
pub use domain::{Actor, Cycle, ModificationLog, ModificationRecord, Regeneration, Tool};

// 引擎
pub use engine::{
    BindingCoordinator, CycleAccountant, EngineError, EngineResult, RegenerationStateMachine,
    ToolLifecycleService,
};

// 仓储
pub use repository::{PersistenceGateway, SqliteGateway};

// 应用
pub use app::AppState;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "压机工具管理系统";
