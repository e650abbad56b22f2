// ==========================================
// 修复状态机集成测试
// ==========================================
// 职责: 验证 开始/完成/取消 修复的状态迁移、并发互斥与补偿回滚
// ==========================================


#[cfg(test)]
mod regeneration_test {
    use press_tooling::domain::{Actor, ToolStatus};
    use press_tooling::engine::{EngineError, ErrorKind, OptionalNotifier};
    use press_tooling::repository::PersistenceGateway;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::test_helpers::{
        create_cassette, create_top_tool, record_reading, setup_app, setup_app_with, user_a,
        user_b, BrokenSink, FaultyGateway, RecordingSink,
    };

    // ==========================================
    // 完整流程
    // ==========================================

    #[test]
    fn test_start_then_stop_resets_partial_cycles() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        record_reading(&state, tool.id, 1, 500_000);

        let started = state.regeneration.start(tool.id, "worn edge", &user_a()).unwrap();
        assert!(started.is_open());
        assert_eq!(started.start_total_cycles, 500_000);
        assert_eq!(started.reason, "worn edge");

        let regenerating = state.gateway.get_tool(tool.id).unwrap().unwrap();
        assert!(regenerating.regenerating);
        assert_eq!(regenerating.status(), ToolStatus::Regenerating);

        let stopped = state.regeneration.stop(tool.id, &user_a()).unwrap();
        assert_eq!(stopped.id, started.id);
        assert_eq!(stopped.completed_total_cycles, Some(500_000));
        assert_eq!(stopped.completed_by, Some(user_a().id));

        let after = state.gateway.get_tool(tool.id).unwrap().unwrap();
        assert!(!after.regenerating);
        assert_eq!(state.accountant.partial_cycles(tool.id).unwrap(), 0);
        assert_eq!(state.accountant.total_cycles(tool.id).unwrap(), 500_000);
    }

    #[test]
    fn test_start_references_latest_cycle_as_boundary() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        record_reading(&state, tool.id, 1, 100_000);
        let latest = record_reading(&state, tool.id, 1, 250_000);

        let started = state.regeneration.start(tool.id, "", &user_a()).unwrap();
        assert_eq!(started.cycle_id, Some(latest.id));
        assert!(state.regeneration.is_cycle_boundary(latest.id).unwrap());
    }

    #[test]
    fn test_cycles_after_stop_count_towards_partial() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        record_reading(&state, tool.id, 1, 300_000);

        state.regeneration.start(tool.id, "", &user_a()).unwrap();
        state.regeneration.stop(tool.id, &user_a()).unwrap();

        record_reading(&state, tool.id, 1, 340_000);
        assert_eq!(state.accountant.partial_cycles(tool.id).unwrap(), 40_000);
        assert_eq!(state.accountant.total_cycles(tool.id).unwrap(), 340_000);
    }

    // ==========================================
    // 非法迁移
    // ==========================================

    #[test]
    fn test_start_twice_conflicts() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");

        state.regeneration.start(tool.id, "", &user_a()).unwrap();
        let err = state.regeneration.start(tool.id, "", &user_b()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(state.regeneration.history(tool.id).unwrap().len(), 1);
    }

    #[test]
    fn test_abort_without_any_regeneration_is_not_found() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        let mods_before = state.gateway.get_tool(tool.id).unwrap().unwrap().mods.len();

        let err = state.regeneration.abort(tool.id, &user_a()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let after = state.gateway.get_tool(tool.id).unwrap().unwrap();
        assert_eq!(after.mods.len(), mods_before);
        assert!(!after.regenerating);
    }

    #[test]
    fn test_abort_after_stop_conflicts() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");

        state.regeneration.start(tool.id, "", &user_a()).unwrap();
        let stopped = state.regeneration.stop(tool.id, &user_a()).unwrap();

        let err = state.regeneration.abort(tool.id, &user_a()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let history = state.regeneration.history(tool.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, stopped.id);
        assert!(history[0].is_closed());
    }

    #[test]
    fn test_flag_without_open_record_is_consistency_fault() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");

        // 直接写入不一致状态
        let mut broken = state.gateway.get_tool(tool.id).unwrap().unwrap();
        broken.regenerating = true;
        state.gateway.save_tool(&mut broken).unwrap();

        let err = state.regeneration.stop(tool.id, &user_a()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsistencyFault);
        let err = state.regeneration.abort(tool.id, &user_a()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsistencyFault);
    }

    #[test]
    fn test_cassette_regeneration_resets_its_own_count() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        let cassette = create_cassette(&state);
        state.binding.bind(tool.id, cassette.id, &user_a()).unwrap();
        state.lifecycle.assign_press(tool.id, Some(2), &user_a()).unwrap();

        // 上模工具与卡匣共用 2 号压机的上模计数器
        record_reading(&state, tool.id, 2, 300_000);
        record_reading(&state, cassette.id, 2, 300_000);
        assert_eq!(state.accountant.partial_cycles(cassette.id).unwrap(), 300_000);

        state.regeneration.start(cassette.id, "卡匣修复", &user_b()).unwrap();
        let stored = state.gateway.get_tool(cassette.id).unwrap().unwrap();
        assert_eq!(stored.status(), ToolStatus::Regenerating);
        state.regeneration.stop(cassette.id, &user_b()).unwrap();

        assert_eq!(state.accountant.partial_cycles(cassette.id).unwrap(), 0);
        assert_eq!(state.accountant.total_cycles(cassette.id).unwrap(), 300_000);
        // 上模工具的计数不受卡匣修复影响
        assert_eq!(state.accountant.partial_cycles(tool.id).unwrap(), 300_000);

        record_reading(&state, tool.id, 2, 340_000);
        record_reading(&state, cassette.id, 2, 340_000);
        assert_eq!(state.accountant.partial_cycles(cassette.id).unwrap(), 40_000);
    }

    #[test]
    fn test_start_on_dead_tool_conflicts() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        state.lifecycle.mark_dead(tool.id, &user_a()).unwrap();

        let err = state.regeneration.start(tool.id, "", &user_a()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    // ==========================================
    // 往返: 开始 + 取消
    // ==========================================

    #[test]
    fn test_start_then_abort_leaves_no_residue() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        let mods_before = state.gateway.get_tool(tool.id).unwrap().unwrap().mods.len();

        state.regeneration.start(tool.id, "trial", &user_a()).unwrap();
        state.regeneration.abort(tool.id, &user_b()).unwrap();

        let after = state.gateway.get_tool(tool.id).unwrap().unwrap();
        assert!(!after.regenerating);
        assert!(state.regeneration.history(tool.id).unwrap().is_empty());
        assert!(state.gateway.get_open_regeneration(tool.id).unwrap().is_none());

        // 只多出开始与取消两条审计记录
        assert_eq!(after.mods.len(), mods_before + 2);
        let newest = after.mods.reversed();
        assert_eq!(newest[0].actor, user_b());
        assert!(!newest[0].data.regenerating);
        assert_eq!(newest[1].actor, user_a());
        assert!(newest[1].data.regenerating);
        after.mods.verify().unwrap();
    }

    // ==========================================
    // 并发
    // ==========================================

    #[test]
    fn test_concurrent_start_only_one_succeeds() {
        let (_file, state) = setup_app();
        let state = Arc::new(state);
        let tool_id = create_top_tool(&state, "G01").id;

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let state = state.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let actor = Actor::new(2000 + i as i64, format!("worker{}", i));
                    state.regeneration.start(tool_id, "race", &actor)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.kind(), ErrorKind::Conflict);
        }

        let history = state.regeneration.history(tool_id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_open());
    }

    // ==========================================
    // 补偿回滚
    // ==========================================

    #[test]
    fn test_failed_insert_reverts_flag() {
        let gateway = Arc::new(FaultyGateway::new());
        let state = setup_app_with(gateway.clone(), OptionalNotifier::none());
        let tool = create_top_tool(&state, "G01");

        gateway.fail_insert_regeneration.store(true, Ordering::SeqCst);
        let err = state.regeneration.start(tool.id, "", &user_a()).unwrap_err();
        assert!(matches!(err, EngineError::StartRolledBack { .. }));

        let after = gateway.get_tool(tool.id).unwrap().unwrap();
        assert!(!after.regenerating);
        assert!(gateway.get_open_regeneration(tool.id).unwrap().is_none());

        // 故障解除后可以正常开始
        gateway.fail_insert_regeneration.store(false, Ordering::SeqCst);
        state.regeneration.start(tool.id, "", &user_a()).unwrap();
    }

    #[test]
    fn test_failed_revert_is_reported_to_caller() {
        let gateway = Arc::new(FaultyGateway::new());
        let state = setup_app_with(gateway.clone(), OptionalNotifier::none());
        let tool = create_top_tool(&state, "G01");

        gateway.fail_insert_regeneration.store(true, Ordering::SeqCst);
        // 第一阶段保存放行, 撤销保存失败
        gateway.fail_save_tool_after(1);

        let err = state.regeneration.start(tool.id, "", &user_a()).unwrap_err();
        match err {
            EngineError::CompensationFailed { cause, revert } => {
                assert_eq!(cause.kind(), ErrorKind::Storage);
                assert_eq!(revert.kind(), ErrorKind::Storage);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // 标志残留, 后续完成/取消报告一致性故障
        let stuck = gateway.get_tool(tool.id).unwrap().unwrap();
        assert!(stuck.regenerating);
        let err = state.regeneration.abort(tool.id, &user_a()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsistencyFault);
    }

    // ==========================================
    // 通知
    // ==========================================

    #[test]
    fn test_notifications_sent_on_transitions() {
        let sink = Arc::new(RecordingSink::default());
        let gateway = Arc::new(FaultyGateway::new());
        let state = setup_app_with(gateway, OptionalNotifier::with_sink(sink.clone()));
        let tool = create_top_tool(&state, "G01");

        state.regeneration.start(tool.id, "", &user_a()).unwrap();
        state.regeneration.abort(tool.id, &user_a()).unwrap();
        state.regeneration.start(tool.id, "", &user_a()).unwrap();
        state.regeneration.stop(tool.id, &user_a()).unwrap();

        assert_eq!(
            sink.titles(),
            vec!["工具修复开始", "工具修复取消", "工具修复开始", "工具修复完成"]
        );
    }

    #[test]
    fn test_notification_failure_does_not_fail_transition() {
        let gateway = Arc::new(FaultyGateway::new());
        let state = setup_app_with(gateway.clone(), OptionalNotifier::with_sink(Arc::new(BrokenSink)));
        let tool = create_top_tool(&state, "G01");

        state.regeneration.start(tool.id, "", &user_a()).unwrap();
        state.regeneration.stop(tool.id, &user_a()).unwrap();

        let history = state.regeneration.history(tool.id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_closed());
    }

    // ==========================================
    // 维护
    // ==========================================

    #[test]
    fn test_update_reason_keeps_boundaries() {
        let (_file, state) = setup_app();
        let tool = create_top_tool(&state, "G01");
        record_reading(&state, tool.id, 2, 10_000);

        state.regeneration.start(tool.id, "", &user_a()).unwrap();
        let stopped = state.regeneration.stop(tool.id, &user_a()).unwrap();

        let edited = state
            .regeneration
            .update_reason(stopped.id, "  chipped punch ", &user_b())
            .unwrap();
        assert_eq!(edited.reason, "chipped punch");
        assert_eq!(edited.completed_total_cycles, stopped.completed_total_cycles);
        assert_eq!(edited.start_total_cycles, stopped.start_total_cycles);

        let err = state
            .regeneration
            .update_reason(9999, "x", &user_b())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
