// ==========================================
// 压机工具管理系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod cycle_repo;
pub mod error;
pub mod gateway;
pub mod regeneration_repo;
pub mod sqlite_gateway;
pub mod tool_repo;

// 重导出核心仓储
pub use cycle_repo::CycleRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use gateway::PersistenceGateway;
pub use regeneration_repo::RegenerationRepository;
pub use sqlite_gateway::SqliteGateway;
pub use tool_repo::ToolRepository;
