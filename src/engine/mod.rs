// ==========================================
// 压机工具管理系统 - 引擎层
// ==========================================
// 职责: 实现业务规则引擎,不拼 SQL
// 红线: Engine 只通过 PersistenceGateway 访问存储
// 红线: 绑定 / 修复 / 生命周期各自持有独立的锁
// ==========================================

pub mod binding;
pub mod cycle_accountant;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod regeneration;

// 重导出核心引擎
pub use binding::BindingCoordinator;
pub use cycle_accountant::{CycleAccountant, CycleSummary};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use events::{NoOpNotificationSink, Notification, NotificationSink, OptionalNotifier, SinkError};
pub use lifecycle::{ToolLifecycleService, ToolOverview};
pub use regeneration::RegenerationStateMachine;
