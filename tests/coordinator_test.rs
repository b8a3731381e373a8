mod common;

use craft_queue::agent::MockAgentBinding;
use craft_queue::coordinator::NewItem;
use craft_queue::cq_error::CqError;
use craft_queue::orchestrator::SessionState;
use craft_queue::types::{AgentCommand, DispatchMode, ItemId, ItemStatus, RecipeEvent};

// =============================================================================
// Queue editing through the handle
// =============================================================================

#[tokio::test]
async fn add_item_resolves_name_and_materials_from_catalog() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);

    let id = handle.add_item(NewItem::new(100, 2)).await.unwrap();
    let snapshot = handle.get_snapshot().await.unwrap();
    let item = snapshot.item(id).unwrap();

    assert_eq!(item.display_name, "Bronze Ingot");
    assert_eq!(item.quantity, 2);
    assert_eq!(item.materials.len(), 2);
    assert_eq!(item.materials[0].low_grade, 3);
    assert_eq!(item.materials[0].high_grade, 0);
}

#[tokio::test]
async fn add_item_unknown_recipe_gets_placeholder() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);

    let id = handle.add_item(NewItem::new(999, 1)).await.unwrap();
    let snapshot = handle.get_snapshot().await.unwrap();

    assert_eq!(snapshot.item(id).unwrap().display_name, "Recipe #999");
    assert!(snapshot.item(id).unwrap().materials.is_empty());
}

#[tokio::test]
async fn add_item_explicit_fields_win_over_catalog() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);

    let id = handle
        .add_item(NewItem {
            display_name: Some("Custom".to_string()),
            materials: Some(Vec::new()),
            ..NewItem::new(100, 1)
        })
        .await
        .unwrap();
    let snapshot = handle.get_snapshot().await.unwrap();

    assert_eq!(snapshot.item(id).unwrap().display_name, "Custom");
    assert!(snapshot.item(id).unwrap().materials.is_empty());
}

#[tokio::test]
async fn rejected_edits_report_typed_errors() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);
    let id = handle.add_item(NewItem::new(100, 1)).await.unwrap();
    let missing = ItemId(42);

    assert_eq!(
        handle.remove_item(missing).await,
        Err(CqError::ItemNotFound(missing))
    );
    assert_eq!(
        handle.move_item(id, 3).await,
        Err(CqError::IndexOutOfRange {
            id,
            index: 3,
            len: 1
        })
    );
    assert_eq!(
        handle.move_item(missing, 0).await,
        Err(CqError::ItemNotFound(missing))
    );
    assert_eq!(
        handle.set_quantity(missing, 3).await,
        Err(CqError::ItemNotFound(missing))
    );
    assert_eq!(
        handle.set_high_grade(id, 77, 1).await,
        Err(CqError::MaterialNotFound {
            id,
            material_id: 77
        })
    );
}

#[tokio::test]
async fn high_grade_split_is_stored_and_sent_with_the_craft() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);
    let id = handle.add_item(NewItem::new(100, 1)).await.unwrap();

    handle.set_high_grade(id, 5, 2).await.unwrap();
    handle.start(None).await.unwrap();

    match &agent.commands()[0] {
        AgentCommand::CraftItem { materials, .. } => {
            assert_eq!(materials[0].high_grade, 2);
            assert_eq!(materials[0].low_grade, 1);
        }
        other => panic!("expected CraftItem, got {:?}", other),
    }
}

#[tokio::test]
async fn subscribers_see_mutations_made_through_the_handle() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);
    let mut changes = handle.subscribe();

    handle.add_item(NewItem::new(100, 1)).await.unwrap();

    changes.changed().await.unwrap();
    assert_eq!(*changes.borrow_and_update(), 1);
}

// =============================================================================
// Start / tick / stop
// =============================================================================

#[tokio::test]
async fn start_on_empty_queue_dispatches_nothing() {
    let agent = MockAgentBinding::new();
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::keep_completed(),
        DispatchMode::SequentialAll,
    );

    assert_eq!(handle.start(None).await, Err(CqError::NothingPending));
    assert_eq!(agent.dispatch_count(), 0);
}

#[tokio::test]
async fn start_with_unreachable_agent_is_rejected() {
    let agent = MockAgentBinding::new();
    agent.set_responding(false);
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::keep_completed(),
        DispatchMode::SequentialAll,
    );
    handle.add_item(NewItem::new(100, 1)).await.unwrap();

    assert_eq!(handle.start(None).await, Err(CqError::AgentUnavailable));
    assert_eq!(agent.dispatch_count(), 0);
}

#[tokio::test]
async fn start_while_agent_busy_leaves_queue_untouched() {
    let agent = MockAgentBinding::new();
    agent.set_busy(true);
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::keep_completed(),
        DispatchMode::SequentialAll,
    );
    handle.add_item(NewItem::new(100, 1)).await.unwrap();
    let before = handle.get_snapshot().await.unwrap();

    assert_eq!(handle.start(None).await, Err(CqError::AgentBusy));

    let after = handle.get_snapshot().await.unwrap();
    assert_eq!(after.items, before.items);
    assert_eq!(after.revision, before.revision);
    assert_eq!(after.session, SessionState::Idle);
    assert_eq!(agent.dispatch_count(), 0);
}

#[tokio::test]
async fn sequential_run_crafts_every_item_in_queue_order() {
    let agent = MockAgentBinding::new();
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::remove_completed(),
        DispatchMode::SequentialAll,
    );
    handle.add_item(NewItem::new(100, 1)).await.unwrap();
    handle.add_item(NewItem::new(200, 1)).await.unwrap();
    let last = handle.add_item(NewItem::new(300, 1)).await.unwrap();
    handle.move_item(last, 0).await.unwrap();

    handle.start(None).await.unwrap();
    assert_eq!(agent.dispatched_recipes(), vec![300]);

    // Still working: nothing moves
    let outcome = handle.tick().await.unwrap();
    assert!(matches!(outcome.session, SessionState::Dispatching { .. }));
    assert!(!outcome.finished);
    assert_eq!(agent.dispatch_count(), 1);

    for _ in 0..3 {
        agent.finish_craft();
        handle.tick().await.unwrap();
    }

    assert_eq!(agent.dispatched_recipes(), vec![300, 100, 200]);
    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.session, SessionState::Idle);
    assert!(snapshot.items.is_empty(), "completed items are auto-removed");
}

#[tokio::test]
async fn default_single_mode_crafts_one_item() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);
    let first = handle.add_item(NewItem::new(100, 1)).await.unwrap();
    let second = handle.add_item(NewItem::new(200, 1)).await.unwrap();

    assert_eq!(handle.start(None).await, Ok(first));
    agent.finish_craft();
    let outcome = handle.tick().await.unwrap();
    assert_eq!(outcome.session, SessionState::Idle);
    assert!(outcome.finished, "finishing tick reports the session end");

    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.item(first).unwrap().status, ItemStatus::Completed);
    assert_eq!(snapshot.item(second).unwrap().status, ItemStatus::Pending);
    assert_eq!(agent.dispatch_count(), 1);

    assert_eq!(handle.clear_completed().await, Ok(1));
}

#[tokio::test]
async fn explicit_mode_overrides_default() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);
    handle.add_item(NewItem::new(100, 1)).await.unwrap();
    handle.add_item(NewItem::new(200, 1)).await.unwrap();

    handle.start(Some(DispatchMode::SequentialAll)).await.unwrap();
    agent.finish_craft();
    handle.tick().await.unwrap();

    assert_eq!(agent.dispatched_recipes(), vec![100, 200]);
}

#[tokio::test]
async fn start_single_crafts_the_chosen_item() {
    let agent = MockAgentBinding::new();
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::keep_completed(),
        DispatchMode::SequentialAll,
    );
    handle.add_item(NewItem::new(100, 1)).await.unwrap();
    let chosen = handle.add_item(NewItem::new(200, 1)).await.unwrap();

    handle.start_single(chosen).await.unwrap();
    agent.finish_craft();
    handle.tick().await.unwrap();

    assert_eq!(agent.dispatched_recipes(), vec![200]);
    assert_eq!(
        handle.get_snapshot().await.unwrap().session,
        SessionState::Idle
    );
}

#[tokio::test]
async fn removing_the_active_item_mid_flight_moves_on() {
    let agent = MockAgentBinding::new();
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::keep_completed(),
        DispatchMode::SequentialAll,
    );
    let first = handle.add_item(NewItem::new(100, 1)).await.unwrap();
    handle.add_item(NewItem::new(200, 1)).await.unwrap();

    handle.start(None).await.unwrap();
    handle.remove_item(first).await.unwrap();
    agent.finish_craft();
    handle.tick().await.unwrap();

    assert_eq!(agent.dispatched_recipes(), vec![100, 200]);
}

#[tokio::test]
async fn agent_outage_mid_flight_keeps_the_session() {
    let agent = MockAgentBinding::new();
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::keep_completed(),
        DispatchMode::SequentialAll,
    );
    let id = handle.add_item(NewItem::new(100, 1)).await.unwrap();
    handle.start(None).await.unwrap();

    agent.set_responding(false);
    agent.finish_craft();
    handle.tick().await.unwrap();

    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(snapshot.is_running());
    assert!(!snapshot.agent.available);
    assert_eq!(snapshot.item(id).unwrap().status, ItemStatus::Active);

    agent.set_responding(true);
    assert_eq!(handle.tick().await.unwrap().session, SessionState::Idle);
}

#[tokio::test]
async fn stop_disengages_and_asks_agent_to_stop() {
    let agent = MockAgentBinding::new();
    let (handle, _task) = common::spawn_test_coordinator(
        &agent,
        common::keep_completed(),
        DispatchMode::SequentialAll,
    );
    handle.add_item(NewItem::new(100, 1)).await.unwrap();
    handle.add_item(NewItem::new(200, 1)).await.unwrap();
    handle.start(None).await.unwrap();

    handle.stop().await.unwrap();
    agent.finish_craft();
    handle.tick().await.unwrap();

    assert!(agent.stop_requested());
    assert_eq!(agent.dispatch_count(), 1, "stopped session never advances");
    assert!(!handle.get_snapshot().await.unwrap().is_running());
}

// =============================================================================
// Pause / resume
// =============================================================================

#[tokio::test]
async fn pause_and_resume_forward_to_agent() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);
    handle.tick().await.unwrap();

    handle.pause().await.unwrap();
    assert!(agent.is_paused());
    handle.resume().await.unwrap();
    assert!(!agent.is_paused());
}

#[tokio::test]
async fn pause_before_agent_seen_is_rejected() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);

    assert_eq!(handle.pause().await, Err(CqError::AgentUnavailable));
    assert!(!agent.is_paused());
}

// =============================================================================
// Recipe selection
// =============================================================================

#[tokio::test]
async fn add_selected_uses_the_crafting_log_selection() {
    let agent = MockAgentBinding::new();
    let (handle, _task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);

    assert_eq!(
        handle.add_selected(1).await,
        Err(CqError::NoRecipeSelected)
    );

    handle.recipe_event(RecipeEvent::LogOpened).await.unwrap();
    assert_eq!(
        handle
            .recipe_event(RecipeEvent::RecipeChanged(200))
            .await
            .unwrap(),
        Some(200)
    );
    let id = handle.add_selected(4).await.unwrap();

    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.selected_recipe, Some(200));
    assert!(snapshot.log_open);
    assert_eq!(snapshot.item(id).unwrap().display_name, "Iron Ingot");
    assert_eq!(snapshot.item(id).unwrap().quantity, 4);

    handle.recipe_event(RecipeEvent::LogClosed).await.unwrap();
    assert_eq!(
        handle.add_selected(1).await,
        Err(CqError::NoRecipeSelected)
    );
}

// =============================================================================
// Requeue and shutdown
// =============================================================================

#[tokio::test]
async fn requeue_returns_failed_item_to_pending() {
    let agent = MockAgentBinding::new();
    let policy = craft_queue::orchestrator::OrchestratorPolicy {
        auto_remove_completed: false,
        stall_ticks: 1,
    };
    let (handle, _task) = common::spawn_test_coordinator(&agent, policy, DispatchMode::Single);
    let id = handle.add_item(NewItem::new(100, 1)).await.unwrap();

    handle.start(None).await.unwrap();
    handle.tick().await.unwrap();
    assert_eq!(
        handle.get_snapshot().await.unwrap().item(id).unwrap().status,
        ItemStatus::Failed
    );

    handle.requeue_item(id).await.unwrap();
    assert_eq!(
        handle.get_snapshot().await.unwrap().item(id).unwrap().status,
        ItemStatus::Pending
    );
}

#[tokio::test]
async fn handle_reports_closed_coordinator() {
    let agent = MockAgentBinding::new();
    let (handle, task) =
        common::spawn_test_coordinator(&agent, common::keep_completed(), DispatchMode::Single);

    task.abort();
    let _ = task.await;

    assert_eq!(
        handle.get_snapshot().await.map(|_| ()),
        Err(CqError::CoordinatorClosed)
    );
}
