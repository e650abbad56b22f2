// ==========================================
// 压机工具管理系统 - 领域类型定义
// ==========================================
// 职责: 标识符、工位、状态等基础类型
// 红线: 工具状态只能推导,不能冗余存储
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ==========================================
// 标识符
// ==========================================
pub type ToolId = i64;
/// 卡匣也是 tools 表中的一行 (工位 TopCassette), 与 ToolId 同一ID空间
pub type CassetteId = ToolId;
pub type CycleId = i64;
pub type RegenerationId = i64;

/// 压机编号 (0-5)
pub type PressNumber = u8;

/// 压机编号上限 (含)
pub const MAX_PRESS_NUMBER: PressNumber = 5;

/// 校验压机编号
pub fn is_valid_press_number(press: PressNumber) -> bool {
    press <= MAX_PRESS_NUMBER
}

// ==========================================
// 工位 (Position)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Top,         // 上模
    TopCassette, // 上模卡匣
    Bottom,      // 下模
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Top => write!(f, "TOP"),
            Position::TopCassette => write!(f, "TOP_CASSETTE"),
            Position::Bottom => write!(f, "BOTTOM"),
        }
    }
}

impl Position {
    /// 从字符串解析工位
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TOP" => Some(Position::Top),
            "TOP_CASSETTE" => Some(Position::TopCassette),
            "BOTTOM" => Some(Position::Bottom),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Position::Top => "TOP",
            Position::TopCassette => "TOP_CASSETTE",
            Position::Bottom => "BOTTOM",
        }
    }
}

// ==========================================
// 工具状态 (Tool Status)
// ==========================================
// 优先级: Dead > Regenerating > Active > Available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Available,    // 可用 (未上机)
    Active,       // 在压机上
    Regenerating, // 修复中
    Dead,         // 报废
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolStatus::Available => write!(f, "AVAILABLE"),
            ToolStatus::Active => write!(f, "ACTIVE"),
            ToolStatus::Regenerating => write!(f, "REGENERATING"),
            ToolStatus::Dead => write!(f, "DEAD"),
        }
    }
}

impl ToolStatus {
    /// 由标志位推导有效状态
    pub fn derive(is_dead: bool, regenerating: bool, press: Option<PressNumber>) -> Self {
        if is_dead {
            ToolStatus::Dead
        } else if regenerating {
            ToolStatus::Regenerating
        } else if press.is_some() {
            ToolStatus::Active
        } else {
            ToolStatus::Available
        }
    }
}

// ==========================================
// 冲次状态 (Cycle Status)
// ==========================================
// 顺序: Normal < Warning < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Normal,   // 正常
    Warning,  // 预警 (橙)
    Critical, // 超限 (红)
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStatus::Normal => write!(f, "NORMAL"),
            CycleStatus::Warning => write!(f, "WARNING"),
            CycleStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}

// ==========================================
// 规格 (Format)
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    pub width: i32,  // 宽
    pub height: i32, // 高
}

impl Format {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 0 && self.height == 0 {
            return Ok(());
        }
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ==========================================
// 领域校验错误
// ==========================================
/// 实体自身字段校验失败 (不涉及存储)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("字段校验失败 (field={field}): {message}")]
pub struct DomainValidationError {
    pub field: &'static str,
    pub message: String,
}

impl DomainValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}
