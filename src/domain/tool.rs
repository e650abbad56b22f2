// ==========================================
// 压机工具管理系统 - 工具领域模型
// ==========================================
// 职责: Tool 实体及其变更快照 (卡匣 = 工位为 TopCassette 的工具)
// 红线: 状态由标志位推导 (Dead > Regenerating > Active > Available)
// 红线: 绑定关系双向且唯一
// 红线: revision 只由存储层递增 (乐观锁)
// ==========================================

use crate::domain::modification::{Actor, AuditError, ModificationLog};
use crate::domain::types::{
    is_valid_press_number, CassetteId, DomainValidationError, Format, Position, PressNumber,
    ToolId, ToolStatus,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 冲次预警阈值 (橙)
pub const TOOL_CYCLES_WARNING: i64 = 800_000;
/// 冲次超限阈值 (红)
pub const TOOL_CYCLES_ERROR: i64 = 1_000_000;

// ==========================================
// Thickness - 卡匣适用厚度范围 (mm)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thickness {
    pub min: f32,
    pub max: f32,
}

impl Thickness {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// 0 < min < max
    pub fn validate(&self) -> Result<(), DomainValidationError> {
        if self.min <= 0.0 {
            return Err(DomainValidationError::new(
                "min_thickness",
                format!("最小厚度必须为正: {:.1}", self.min),
            ));
        }
        if self.max <= 0.0 {
            return Err(DomainValidationError::new(
                "max_thickness",
                format!("最大厚度必须为正: {:.1}", self.max),
            ));
        }
        if self.min >= self.max {
            return Err(DomainValidationError::new(
                "thickness",
                format!("最小厚度 {:.1} 必须小于最大厚度 {:.1}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Thickness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}-{:.1}mm", self.min, self.max)
    }
}

// ==========================================
// ToolMod - 工具变更快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMod {
    pub position: Position,
    pub format: Format,
    pub type_name: String,
    pub code: String,
    #[serde(default)]
    pub thickness: Option<Thickness>,
    pub press: Option<PressNumber>,
    pub regenerating: bool,
    pub is_dead: bool,
    pub binding: Option<ToolId>,
    pub linked_notes: Vec<i64>,
}

// ==========================================
// Tool - 压机工具
// ==========================================
// 对齐: tools 表 (mods 列存储 JSON 变更历史)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    // ===== 主键 =====
    pub id: ToolId,

    // ===== 基本属性 =====
    pub position: Position,
    pub format: Format,
    pub type_name: String, // 类型, 如 FC / GTC / MASS
    pub code: String,      // 编码, 如 G01 / G02
    pub thickness: Option<Thickness>, // 仅卡匣

    // ===== 状态标志 =====
    pub regenerating: bool,
    pub is_dead: bool,
    pub press: Option<PressNumber>, // 上机时的压机编号

    // ===== 关联 =====
    /// 上模工具 → 卡匣, 卡匣 → 上模工具
    pub binding: Option<ToolId>,
    pub linked_notes: Vec<i64>,

    // ===== 并发控制 =====
    #[serde(default)]
    pub revision: i64,

    // ===== 审计 =====
    pub mods: ModificationLog<ToolMod>,
}

impl Tool {
    /// 创建新工具 (id 由存储层分配)
    pub fn new(position: Position, format: Format, code: &str, type_name: &str) -> Self {
        Self {
            id: 0,
            position,
            format,
            type_name: type_name.to_string(),
            code: code.to_string(),
            thickness: None,
            regenerating: false,
            is_dead: false,
            press: None,
            binding: None,
            linked_notes: Vec::new(),
            revision: 0,
            mods: ModificationLog::new(),
        }
    }

    /// 创建卡匣
    pub fn new_cassette(format: Format, code: &str, type_name: &str, thickness: Thickness) -> Self {
        let mut cassette = Self::new(Position::TopCassette, format, code, type_name);
        cassette.thickness = Some(thickness);
        cassette
    }

    /// 有效状态 (推导值)
    pub fn status(&self) -> ToolStatus {
        ToolStatus::derive(self.is_dead, self.regenerating, self.press)
    }

    pub fn is_cassette(&self) -> bool {
        self.position == Position::TopCassette
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// 绑定的卡匣 (仅对上模工具有意义)
    pub fn bound_cassette(&self) -> Option<CassetteId> {
        if self.position == Position::Top {
            self.binding
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == ToolStatus::Active
    }

    /// 当前可变字段的快照
    pub fn snapshot(&self) -> ToolMod {
        ToolMod {
            position: self.position,
            format: self.format,
            type_name: self.type_name.clone(),
            code: self.code.clone(),
            thickness: self.thickness,
            press: self.press,
            regenerating: self.regenerating,
            is_dead: self.is_dead,
            binding: self.binding,
            linked_notes: self.linked_notes.clone(),
        }
    }

    /// 以当前状态追加一条变更记录
    pub fn record_modification(&mut self, actor: Option<&Actor>) -> Result<u64, AuditError> {
        let snapshot = self.snapshot();
        self.mods.add(actor, snapshot)
    }

    /// 从快照恢复可编辑字段 (回滚)
    ///
    /// 状态标志 (regenerating / is_dead / press / binding) 不随回滚恢复,
    /// 它们只能由各自的状态机修改。
    pub fn apply_editable(&mut self, snapshot: &ToolMod) {
        self.position = snapshot.position;
        self.format = snapshot.format;
        self.type_name = snapshot.type_name.clone();
        self.code = snapshot.code.clone();
        self.thickness = snapshot.thickness;
        self.linked_notes = snapshot.linked_notes.clone();
    }

    /// 设置压机编号 (带校验)
    pub fn set_press(&mut self, press: Option<PressNumber>) -> Result<(), DomainValidationError> {
        if let Some(p) = press {
            if !is_valid_press_number(p) {
                return Err(DomainValidationError::new(
                    "press",
                    format!("无效的压机编号: {}", p),
                ));
            }
        }
        self.press = press;
        Ok(())
    }

    /// 字段校验
    ///
    /// # 规则
    /// - 编码必填
    /// - 卡匣必须带厚度范围, 其他工位不能带
    pub fn validate(&self) -> Result<(), DomainValidationError> {
        if self.code.trim().is_empty() {
            return Err(DomainValidationError::new("code", "编码不能为空"));
        }
        if self.format.width < 0 || self.format.height < 0 {
            return Err(DomainValidationError::new(
                "format",
                format!("规格不能为负: {}", self.format),
            ));
        }
        match (self.is_cassette(), self.thickness) {
            (true, Some(thickness)) => thickness.validate()?,
            (true, None) => {
                return Err(DomainValidationError::new("thickness", "卡匣必须指定厚度范围"))
            }
            (false, Some(_)) => {
                return Err(DomainValidationError::new(
                    "thickness",
                    format!("{} 工位不支持厚度范围", self.position),
                ))
            }
            (false, None) => {}
        }
        if let Some(p) = self.press {
            if !is_valid_press_number(p) {
                return Err(DomainValidationError::new(
                    "press",
                    format!("无效的压机编号: {}", p),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.type_name.is_empty() {
            write!(f, "{} {}", self.format, self.code)?;
        } else {
            write!(f, "{} {} {}", self.format, self.code, self.type_name)?;
        }
        if let Some(thickness) = self.thickness {
            write!(f, " ({})", thickness)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tool() -> Tool {
        Tool::new(Position::Top, Format::new(120, 60), "G01", "FC")
    }

    fn test_cassette() -> Tool {
        Tool::new_cassette(Format::new(120, 60), "K01", "MASS", Thickness::new(6.0, 12.0))
    }

    #[test]
    fn test_new_tool_is_available() {
        let tool = test_tool();
        assert_eq!(tool.status(), ToolStatus::Available);
        assert!(!tool.is_bound());
        assert!(tool.mods.is_empty());
        assert_eq!(tool.revision, 0);
        assert_eq!(tool.to_string(), "120x60 G01 FC");
    }

    #[test]
    fn test_tool_validate() {
        assert!(test_tool().validate().is_ok());

        let mut tool = test_tool();
        tool.code = " ".to_string();
        assert_eq!(tool.validate().unwrap_err().field, "code");

        // 上模卡匣工位缺少厚度范围
        let mut tool = test_tool();
        tool.position = Position::TopCassette;
        assert_eq!(tool.validate().unwrap_err().field, "thickness");

        let mut tool = test_tool();
        tool.thickness = Some(Thickness::new(6.0, 12.0));
        assert_eq!(tool.validate().unwrap_err().field, "thickness");
    }

    #[test]
    fn test_set_press_rejects_out_of_range() {
        let mut tool = test_tool();
        assert!(tool.set_press(Some(6)).is_err());
        assert_eq!(tool.press, None);

        tool.set_press(Some(5)).unwrap();
        assert!(tool.is_active());
    }

    #[test]
    fn test_record_modification_captures_snapshot() {
        let mut tool = test_tool();
        tool.regenerating = true;
        tool.record_modification(Some(&Actor::new(3, "op"))).unwrap();

        let current = tool.mods.current().unwrap();
        assert!(current.data.regenerating);
        assert_eq!(current.data.code, "G01");
        assert_eq!(current.actor.name, "op");
    }

    #[test]
    fn test_apply_editable_keeps_flags() {
        let mut tool = test_tool();
        let old = tool.snapshot();

        tool.code = "G99".to_string();
        tool.regenerating = true;
        tool.apply_editable(&old);

        assert_eq!(tool.code, "G01");
        assert!(tool.regenerating);
    }

    #[test]
    fn test_cassette_is_a_tool() {
        let cassette = test_cassette();
        assert!(cassette.validate().is_ok());
        assert!(cassette.is_cassette());
        assert_eq!(cassette.bound_cassette(), None);
        assert_eq!(cassette.to_string(), "120x60 K01 MASS (6.0-12.0mm)");

        let mut resized = cassette.clone();
        resized.thickness = Some(Thickness::new(8.0, 10.0));
        resized.apply_editable(&cassette.snapshot());
        assert_eq!(resized.thickness, Some(Thickness::new(6.0, 12.0)));
    }

    #[test]
    fn test_cassette_thickness_validation() {
        let inverted = Tool::new_cassette(Format::new(120, 60), "K01", "MASS", Thickness::new(12.0, 6.0));
        assert_eq!(inverted.validate().unwrap_err().field, "thickness");

        let zero = Tool::new_cassette(Format::new(120, 60), "K01", "MASS", Thickness::new(0.0, 6.0));
        assert_eq!(zero.validate().unwrap_err().field, "min_thickness");
    }

    #[test]
    fn test_old_snapshot_without_thickness_deserializes() {
        let raw = r#"{"position":"TOP","format":{"width":120,"height":60},"type_name":"FC",
            "code":"G01","press":null,"regenerating":false,"is_dead":false,"binding":null,
            "linked_notes":[]}"#;
        let snapshot: ToolMod = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.thickness, None);
    }
}
