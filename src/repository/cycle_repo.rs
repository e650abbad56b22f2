// ==========================================
// 压机工具管理系统 - 冲次台账仓储
// ==========================================
// 红线: 台账只追加, 不提供更新/删除
// 说明: partial_cycles 在读取时计算 = 本条读数 - 同压机同计数器上一条读数
// 计数器: 卡匣 (TOP_CASSETTE) 与其上模工具共用上模计数器,
//         卡匣条目的上一条读数可取自 TOP 条目 (严格小于本条读数)
// ==========================================

use crate::domain::{Cycle, CycleId, Position, PressNumber, ToolId};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::tool_repo::parse_position;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

/// 台账查询 (带 partial_cycles 计算列), 调用方追加 WHERE / ORDER BY
const CYCLE_SELECT: &str = r#"
    SELECT
        c.id, c.press_number, c.tool_id, c.tool_position,
        c.total_cycles, c.date, c.performed_by,
        c.total_cycles - COALESCE((
            SELECT p.total_cycles FROM press_cycles p
            WHERE p.press_number = c.press_number
              AND p.id < c.id
              AND (
                    p.tool_position = c.tool_position
                 OR (c.tool_position = 'TOP_CASSETTE'
                     AND p.tool_position = 'TOP'
                     AND p.total_cycles < c.total_cycles)
              )
            ORDER BY p.total_cycles DESC, p.id DESC
            LIMIT 1
        ), 0) AS partial_cycles
    FROM press_cycles c
"#;

/// 冲次台账仓储
pub struct CycleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CycleRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加台账条目
    ///
    /// # 返回
    /// - Ok(CycleId): 新条目ID
    /// - Err(ForeignKeyViolation): 工具不存在
    pub fn append(&self, cycle: &Cycle) -> RepositoryResult<CycleId> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO press_cycles (
                press_number, tool_id, tool_position, total_cycles, date, performed_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                cycle.press_number,
                cycle.tool_id,
                cycle.tool_position.to_db_str(),
                cycle.total_cycles,
                cycle.date,
                cycle.performed_by,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按ID读取台账条目 (已注入 partial_cycles)
    pub fn find_by_id(&self, id: CycleId) -> RepositoryResult<Option<Cycle>> {
        let conn = self.get_conn()?;
        let cycle = conn
            .query_row(
                &format!("{} WHERE c.id = ?1", CYCLE_SELECT),
                params![id],
                map_cycle_row,
            )
            .optional()?;
        Ok(cycle)
    }

    /// 工具的全部台账条目 (按ID升序, 已注入 partial_cycles)
    pub fn list_for_tool(&self, tool_id: ToolId) -> RepositoryResult<Vec<Cycle>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE c.tool_id = ?1 ORDER BY c.id ASC",
            CYCLE_SELECT
        ))?;

        let cycles = stmt
            .query_map(params![tool_id], map_cycle_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cycles)
    }

    /// 同压机同计数器的最大读数 (回退校验用)
    ///
    /// 卡匣工位同时参考 TOP 工位的读数。
    pub fn last_reading(
        &self,
        press: PressNumber,
        position: Position,
    ) -> RepositoryResult<Option<i64>> {
        let conn = self.get_conn()?;
        let reading = conn.query_row(
            r#"
            SELECT MAX(total_cycles) FROM press_cycles
            WHERE press_number = ?1
              AND (tool_position = ?2 OR (?2 = 'TOP_CASSETTE' AND tool_position = 'TOP'))
            "#,
            params![press, position.to_db_str()],
            |row| row.get(0),
        )?;
        Ok(reading)
    }
}

fn map_cycle_row(row: &Row) -> rusqlite::Result<Cycle> {
    let position_raw: String = row.get(3)?;
    Ok(Cycle {
        id: row.get(0)?,
        press_number: row.get(1)?,
        tool_id: row.get(2)?,
        tool_position: parse_position(3, &position_raw)?,
        total_cycles: row.get(4)?,
        date: row.get(5)?,
        performed_by: row.get(6)?,
        partial_cycles: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::{Format, Thickness, Tool};
    use crate::repository::tool_repo::insert_tool;

    fn setup() -> (CycleRepository, ToolId, ToolId) {
        let conn = open_in_memory().unwrap();
        let a = insert_tool(&conn, &Tool::new(Position::Top, Format::new(120, 60), "G01", "")).unwrap();
        let b = insert_tool(&conn, &Tool::new(Position::Top, Format::new(120, 60), "G02", "")).unwrap();
        (CycleRepository::from_connection(Arc::new(Mutex::new(conn))), a, b)
    }

    #[test]
    fn test_partial_cycles_are_deltas_per_press_and_position() {
        let (repo, a, b) = setup();

        repo.append(&Cycle::new(1, a, Position::Top, 1_000, 9)).unwrap();
        repo.append(&Cycle::new(1, a, Position::Top, 3_500, 9)).unwrap();
        // 换上工具 b, 计数器继续累加
        repo.append(&Cycle::new(1, b, Position::Top, 4_000, 9)).unwrap();
        // 不同工位互不影响
        repo.append(&Cycle::new(1, a, Position::Bottom, 200, 9)).unwrap();

        let a_cycles = repo.list_for_tool(a).unwrap();
        let partials: Vec<i64> = a_cycles.iter().map(|c| c.partial_cycles).collect();
        assert_eq!(partials, vec![1_000, 2_500, 200]);

        let b_cycles = repo.list_for_tool(b).unwrap();
        assert_eq!(b_cycles[0].partial_cycles, 500);
    }

    #[test]
    fn test_cassette_shares_top_counter() {
        let (repo, a, _) = setup();
        let conn = repo.get_conn().unwrap();
        let cassette = insert_tool(
            &conn,
            &Tool::new_cassette(Format::new(120, 60), "K01", "MASS", Thickness::new(6.0, 12.0)),
        )
        .unwrap();
        drop(conn);

        // 上模工具与卡匣在同一压机上同时读数
        repo.append(&Cycle::new(3, a, Position::Top, 10_000, 9)).unwrap();
        repo.append(&Cycle::new(3, cassette, Position::TopCassette, 10_000, 9)).unwrap();
        repo.append(&Cycle::new(3, a, Position::Top, 25_000, 9)).unwrap();
        let last = repo
            .append(&Cycle::new(3, cassette, Position::TopCassette, 25_000, 9))
            .unwrap();

        let partials: Vec<i64> = repo
            .list_for_tool(cassette)
            .unwrap()
            .iter()
            .map(|c| c.partial_cycles)
            .collect();
        assert_eq!(partials, vec![10_000, 15_000]);
        assert_eq!(repo.find_by_id(last).unwrap().unwrap().partial_cycles, 15_000);

        // 上模工具的上一条读数只看 TOP 工位
        let tool_partials: Vec<i64> =
            repo.list_for_tool(a).unwrap().iter().map(|c| c.partial_cycles).collect();
        assert_eq!(tool_partials, vec![10_000, 15_000]);

        assert_eq!(repo.last_reading(3, Position::TopCassette).unwrap(), Some(25_000));
    }

    #[test]
    fn test_cassette_reading_after_top_only_history() {
        let (repo, a, _) = setup();
        let conn = repo.get_conn().unwrap();
        let cassette = insert_tool(
            &conn,
            &Tool::new_cassette(Format::new(120, 60), "K01", "MASS", Thickness::new(6.0, 12.0)),
        )
        .unwrap();
        drop(conn);

        // 卡匣第一次读数之前只有上模工具的读数
        repo.append(&Cycle::new(4, a, Position::Top, 40_000, 9)).unwrap();
        let id = repo
            .append(&Cycle::new(4, cassette, Position::TopCassette, 46_000, 9))
            .unwrap();
        assert_eq!(repo.find_by_id(id).unwrap().unwrap().partial_cycles, 6_000);
        assert_eq!(repo.last_reading(4, Position::Top).unwrap(), Some(40_000));
    }

    #[test]
    fn test_last_reading() {
        let (repo, a, _) = setup();
        assert_eq!(repo.last_reading(2, Position::Top).unwrap(), None);

        repo.append(&Cycle::new(2, a, Position::Top, 700, 9)).unwrap();
        repo.append(&Cycle::new(2, a, Position::Top, 900, 9)).unwrap();
        assert_eq!(repo.last_reading(2, Position::Top).unwrap(), Some(900));
    }

    #[test]
    fn test_append_for_unknown_tool_fails() {
        let (repo, _, _) = setup();
        let err = repo.append(&Cycle::new(2, 999, Position::Top, 10, 9)).unwrap_err();
        assert!(matches!(err, RepositoryError::ForeignKeyViolation(_)));
    }
}
