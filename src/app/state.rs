// ==========================================
// 压机工具管理系统 - 应用状态
// ==========================================
// 职责: 组装网关、配置与各引擎, 供上层 (HTTP/CLI) 共享
// ==========================================

use std::sync::Arc;

use crate::config::{ConfigManager, CycleThresholds};
use crate::engine::{
    BindingCoordinator, CycleAccountant, OptionalNotifier, RegenerationStateMachine,
    ToolLifecycleService,
};
use crate::repository::{PersistenceGateway, SqliteGateway};

/// 应用状态
///
/// 各引擎共享同一个网关; 冲次阈值在启动时从 config_kv 读取一次。
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    pub gateway: Arc<dyn PersistenceGateway>,
    pub accountant: Arc<CycleAccountant>,
    pub binding: Arc<BindingCoordinator>,
    pub regeneration: Arc<RegenerationStateMachine>,
    pub lifecycle: Arc<ToolLifecycleService>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    /// - notifier: 通知接收方 (可为空)
    ///
    /// # 返回
    /// - Ok(AppState): 初始化成功
    /// - Err(String): 初始化错误
    pub fn new(db_path: String, notifier: OptionalNotifier) -> Result<Self, String> {
        tracing::info!(
            app = crate::APP_NAME,
            version = crate::VERSION,
            "初始化AppState，数据库路径: {}",
            db_path
        );

        let gateway = SqliteGateway::open(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;

        let thresholds = match ConfigManager::from_connection(gateway.connection()) {
            Ok(config) => config.get_cycle_thresholds().unwrap_or_else(|e| {
                tracing::warn!("冲次阈值读取失败，使用默认值: {}", e);
                CycleThresholds::default()
            }),
            Err(e) => {
                tracing::warn!("配置管理器初始化失败，使用默认阈值: {}", e);
                CycleThresholds::default()
            }
        };

        let mut state = Self::with_gateway(Arc::new(gateway), thresholds, notifier);
        state.db_path = db_path;
        Ok(state)
    }

    /// 基于已有网关组装 (测试或自定义存储)
    pub fn with_gateway(
        gateway: Arc<dyn PersistenceGateway>,
        thresholds: CycleThresholds,
        notifier: OptionalNotifier,
    ) -> Self {
        tracing::debug!(
            warning = thresholds.warning,
            error = thresholds.error,
            notifier = notifier.is_configured(),
            "组装引擎"
        );

        let accountant = Arc::new(CycleAccountant::with_thresholds(gateway.clone(), thresholds));
        let binding = Arc::new(BindingCoordinator::new(gateway.clone()));
        let regeneration = Arc::new(RegenerationStateMachine::new(
            gateway.clone(),
            accountant.clone(),
            notifier,
        ));
        let lifecycle = Arc::new(ToolLifecycleService::new(gateway.clone(), accountant.clone()));

        Self {
            db_path: String::new(),
            gateway,
            accountant,
            binding,
            regeneration,
            lifecycle,
        }
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 PRESS_TOOLING_DB_PATH (非空时)
/// - 否则 ./press_tooling.db
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("PRESS_TOOLING_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    "./press_tooling.db".to_string()
}
