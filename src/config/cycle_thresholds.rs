use crate::domain::{CycleStatus, TOOL_CYCLES_ERROR, TOOL_CYCLES_WARNING};
use serde::{Deserialize, Serialize};

/// 冲次阈值
///
/// 存储位置：config_kv（scope_id='global'，key='tool_cycles_warning' / 'tool_cycles_error'）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleThresholds {
    /// 预警阈值（含）
    pub warning: i64,

    /// 超限阈值（含）
    pub error: i64,
}

impl CycleThresholds {
    /// 构造（要求 0 < warning < error）
    pub fn new(warning: i64, error: i64) -> Option<Self> {
        if warning > 0 && warning < error {
            Some(Self { warning, error })
        } else {
            None
        }
    }

    /// 按阈值分级
    ///
    /// # 规则
    /// - partial < warning → Normal
    /// - warning ≤ partial < error → Warning
    /// - partial ≥ error → Critical
    pub fn classify(&self, partial_cycles: i64) -> CycleStatus {
        if partial_cycles >= self.error {
            CycleStatus::Critical
        } else if partial_cycles >= self.warning {
            CycleStatus::Warning
        } else {
            CycleStatus::Normal
        }
    }
}

impl Default for CycleThresholds {
    fn default() -> Self {
        Self {
            warning: TOOL_CYCLES_WARNING,
            error: TOOL_CYCLES_ERROR,
        }
    }
}
