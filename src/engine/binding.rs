// ==========================================
// 压机工具管理系统 - 工具/卡匣绑定协调
// ==========================================
// 职责: 维护上模工具与卡匣之间的双向绑定
// 红线: 绑定检查与写入在同一把锁内完成 (检查-写入不可被穿插)
// 红线: 已绑定的工具不会被隐式改绑
// 并发: 与其他子系统对同一工具的写入靠 revision 乐观锁检出 (→ Conflict)
// ==========================================

use crate::domain::{Actor, CassetteId, Position, Tool, ToolId};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{PersistenceGateway, RepositoryError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ==========================================
// BindingCoordinator - 绑定协调器
// ==========================================
pub struct BindingCoordinator {
    gateway: Arc<dyn PersistenceGateway>,
    lock: Mutex<()>,
}

impl BindingCoordinator {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            gateway,
            lock: Mutex::new(()),
        }
    }

    /// 获取绑定子系统锁
    fn acquire(&self) -> EngineResult<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|e| {
            EngineError::Storage(RepositoryError::LockError(format!("绑定锁获取失败: {}", e)))
        })
    }

    /// 绑定卡匣到上模工具
    ///
    /// # 参数
    /// - `tool_id`: 上模工具
    /// - `cassette_id`: 卡匣
    /// - `actor`: 操作人
    ///
    /// # 返回
    /// - Err(NotFound): 卡匣或工具不存在
    /// - Err(Conflict): 工具已绑定 / 卡匣已绑定其他工具 / 任一方已报废 / 并发修改
    /// - Err(Validation): 非上模工具, 非卡匣, 或规格不一致
    ///
    /// # 规则
    /// - 双方同时写入绑定引用, 卡匣继承工具的压机编号
    /// - 双方各追加一条变更记录
    pub fn bind(&self, tool_id: ToolId, cassette_id: CassetteId, actor: &Actor) -> EngineResult<()> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut cassette = self
            .gateway
            .get_tool(cassette_id)?
            .ok_or_else(|| EngineError::not_found("Cassette", cassette_id))?;
        let mut tool = self
            .gateway
            .get_tool(tool_id)?
            .ok_or_else(|| EngineError::not_found("Tool", tool_id))?;

        if let Some(current) = tool.binding {
            return Err(EngineError::Conflict(format!(
                "工具 {} 已绑定卡匣 {}",
                tool_id, current
            )));
        }
        check_bindable(&tool, &cassette)?;

        tool.binding = Some(cassette.id);
        cassette.binding = Some(tool.id);
        cassette.press = tool.press;

        tool.record_modification(Some(actor))?;
        cassette.record_modification(Some(actor))?;

        self.gateway.save_binding(&mut tool, &mut cassette)?;

        info!(
            tool_id = tool.id,
            cassette_id = cassette.id,
            actor = %actor.name,
            "卡匣绑定完成"
        );
        Ok(())
    }

    /// 解除工具的卡匣绑定
    ///
    /// 工具未绑定时为无操作成功。
    pub fn unbind(&self, tool_id: ToolId, actor: &Actor) -> EngineResult<()> {
        actor.validate()?;

        let _guard = self.acquire()?;

        let mut tool = self
            .gateway
            .get_tool(tool_id)?
            .ok_or_else(|| EngineError::not_found("Tool", tool_id))?;

        let cassette_id = match tool.binding {
            Some(id) => id,
            None => {
                debug!(tool_id, "工具未绑定卡匣, 跳过解绑");
                return Ok(());
            }
        };

        tool.binding = None;
        tool.record_modification(Some(actor))?;

        match self.gateway.get_cassette(cassette_id)? {
            Some(mut cassette) if cassette.binding == Some(tool.id) => {
                cassette.binding = None;
                cassette.record_modification(Some(actor))?;
                self.gateway.save_binding(&mut tool, &mut cassette)?;
            }
            other => {
                // 反向引用缺失: 只清理工具一侧
                warn!(
                    tool_id,
                    cassette_id,
                    cassette_binding = ?other.and_then(|c| c.binding),
                    "卡匣反向绑定不一致, 仅解除工具侧绑定"
                );
                self.gateway.save_tool(&mut tool)?;
            }
        }

        info!(tool_id, cassette_id, actor = %actor.name, "卡匣解绑完成");
        Ok(())
    }

    /// 可绑定到该工具的卡匣
    ///
    /// # 规则
    /// - 未报废, 未绑定
    /// - 规格与工具一致
    pub fn available_cassettes(&self, tool_id: ToolId) -> EngineResult<Vec<Tool>> {
        let tool = self
            .gateway
            .get_tool(tool_id)?
            .ok_or_else(|| EngineError::not_found("Tool", tool_id))?;

        let cassettes = self
            .gateway
            .list_cassettes()?
            .into_iter()
            .filter(|c| !c.is_dead && !c.is_bound() && c.format == tool.format)
            .collect();
        Ok(cassettes)
    }
}

/// 绑定前置校验 (工具侧已绑定的冲突由调用方先行检查)
fn check_bindable(tool: &Tool, cassette: &Tool) -> EngineResult<()> {
    if tool.position != Position::Top {
        return Err(EngineError::Validation(format!(
            "只有上模工具可以绑定卡匣: tool_id={}, position={}",
            tool.id, tool.position
        )));
    }
    if !cassette.is_cassette() {
        return Err(EngineError::Validation(format!(
            "绑定目标不是卡匣: id={}, position={}",
            cassette.id, cassette.position
        )));
    }
    if tool.is_dead {
        return Err(EngineError::Conflict(format!("工具 {} 已报废", tool.id)));
    }
    if cassette.is_dead {
        return Err(EngineError::Conflict(format!("卡匣 {} 已报废", cassette.id)));
    }
    if let Some(other) = cassette.binding {
        if other != tool.id {
            return Err(EngineError::Conflict(format!(
                "卡匣 {} 已绑定工具 {}",
                cassette.id, other
            )));
        }
    }
    if cassette.format != tool.format {
        return Err(EngineError::Validation(format!(
            "规格不一致: 工具 {} / 卡匣 {}",
            tool.format, cassette.format
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Format, Thickness};
    use crate::engine::error::ErrorKind;
    use crate::repository::SqliteGateway;

    struct Fixture {
        gateway: Arc<SqliteGateway>,
        coordinator: BindingCoordinator,
        tool_id: ToolId,
        cassette_id: CassetteId,
        actor: Actor,
    }

    fn cassette(format: Format, code: &str) -> Tool {
        Tool::new_cassette(format, code, "MASS", Thickness::new(6.0, 12.0))
    }

    fn setup() -> Fixture {
        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        let mut tool = Tool::new(Position::Top, Format::new(120, 60), "G01", "FC");
        tool.press = Some(2);
        let tool_id = gateway.insert_tool(&tool).unwrap();
        let cassette_id = gateway
            .insert_tool(&cassette(Format::new(120, 60), "K01"))
            .unwrap();

        Fixture {
            coordinator: BindingCoordinator::new(gateway.clone()),
            gateway,
            tool_id,
            cassette_id,
            actor: Actor::new(7, "meister"),
        }
    }

    #[test]
    fn test_bind_is_symmetric_and_audited() {
        let f = setup();
        f.coordinator.bind(f.tool_id, f.cassette_id, &f.actor).unwrap();

        let tool = f.gateway.get_tool(f.tool_id).unwrap().unwrap();
        let cassette = f.gateway.get_cassette(f.cassette_id).unwrap().unwrap();
        assert_eq!(tool.binding, Some(f.cassette_id));
        assert_eq!(cassette.binding, Some(f.tool_id));
        assert_eq!(cassette.press, Some(2));
        assert_eq!(tool.mods.current().unwrap().actor.name, "meister");
        assert_eq!(cassette.mods.len(), 1);
        assert_eq!(tool.revision, 1);
        assert_eq!(cassette.revision, 1);
    }

    #[test]
    fn test_bind_missing_cassette_is_not_found() {
        let f = setup();
        let err = f.coordinator.bind(f.tool_id, 999, &f.actor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_bind_format_mismatch() {
        let f = setup();
        let other = f
            .gateway
            .insert_tool(&cassette(Format::new(100, 50), "K02"))
            .unwrap();
        let err = f.coordinator.bind(f.tool_id, other, &f.actor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_bind_bottom_tool_rejected() {
        let f = setup();
        let bottom = f
            .gateway
            .insert_tool(&Tool::new(Position::Bottom, Format::new(120, 60), "G01", "FC"))
            .unwrap();
        let err = f.coordinator.bind(bottom, f.cassette_id, &f.actor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_bind_to_non_cassette_rejected() {
        let f = setup();
        let other_top = f
            .gateway
            .insert_tool(&Tool::new(Position::Top, Format::new(120, 60), "G02", "FC"))
            .unwrap();
        let err = f.coordinator.bind(f.tool_id, other_top, &f.actor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.gateway.get_tool(f.tool_id).unwrap().unwrap().binding, None);
    }

    #[test]
    fn test_unbind_clears_both_sides() {
        let f = setup();
        f.coordinator.bind(f.tool_id, f.cassette_id, &f.actor).unwrap();
        f.coordinator.unbind(f.tool_id, &f.actor).unwrap();

        assert_eq!(f.gateway.get_tool(f.tool_id).unwrap().unwrap().binding, None);
        assert_eq!(f.gateway.get_cassette(f.cassette_id).unwrap().unwrap().binding, None);
        assert_eq!(f.coordinator.available_cassettes(f.tool_id).unwrap().len(), 1);
    }

    #[test]
    fn test_unbind_unbound_tool_is_noop() {
        let f = setup();
        f.coordinator.unbind(f.tool_id, &f.actor).unwrap();
        assert!(f.gateway.get_tool(f.tool_id).unwrap().unwrap().mods.is_empty());
    }

    #[test]
    fn test_available_cassettes_excludes_bound() {
        let f = setup();
        assert_eq!(f.coordinator.available_cassettes(f.tool_id).unwrap().len(), 1);

        f.coordinator.bind(f.tool_id, f.cassette_id, &f.actor).unwrap();
        assert!(f.coordinator.available_cassettes(f.tool_id).unwrap().is_empty());
    }
}
