use agora_core::{
    CoordError, Coordinator, CoordinationConfig, OperationKind, RecordDraft, RecordKind,
    RecordRef, TaskStatus,
};
use serde_json::json;

const ORCH: &str = "orchestrator";

fn coordinator() -> Coordinator {
    Coordinator::open_in_memory(&CoordinationConfig::builtin().unwrap()).unwrap()
}

fn task(coord: &Coordinator, key: &str) -> RecordRef {
    coord
        .write(
            ORCH,
            ORCH,
            key,
            &RecordDraft::new(RecordKind::Task, json!({ "title": key })),
            0,
        )
        .unwrap();
    RecordRef::new(ORCH, key)
}

fn status(coord: &Coordinator, target: &RecordRef) -> TaskStatus {
    coord
        .read("planner", &target.domain, &target.key)
        .unwrap()
        .task_status
        .unwrap()
}

#[test]
fn reverse_edge_is_a_cycle_and_graph_keeps_one_edge() {
    let coord = coordinator();
    let t1 = task(&coord, "T1");
    let t2 = task(&coord, "T2");

    coord.add_dependency(ORCH, &t1, &t2).unwrap();
    let err = coord.add_dependency(ORCH, &t2, &t1).unwrap_err();
    assert!(matches!(err, CoordError::CycleDetected { .. }));

    assert_eq!(coord.dependencies(&t1).unwrap(), vec![t2.clone()]);
    assert!(coord.dependencies(&t2).unwrap().is_empty());
    assert_eq!(coord.dependents(&t2).unwrap(), vec![t1.clone()]);
}

#[test]
fn longer_cycles_are_detected() {
    let coord = coordinator();
    let a = task(&coord, "A");
    let b = task(&coord, "B");
    let c = task(&coord, "C");

    coord.add_dependency(ORCH, &a, &b).unwrap();
    coord.add_dependency(ORCH, &b, &c).unwrap();
    assert!(matches!(
        coord.add_dependency(ORCH, &c, &a),
        Err(CoordError::CycleDetected { .. })
    ));
}

#[test]
fn task_becomes_ready_only_when_all_dependencies_complete() {
    let coord = coordinator();
    let build = task(&coord, "build");
    let test = task(&coord, "test");
    let ship = task(&coord, "ship");

    coord.add_dependency(ORCH, &ship, &build).unwrap();
    let after_edges = coord.add_dependency(ORCH, &ship, &test).unwrap();
    assert_eq!(after_edges.task_status, Some(TaskStatus::Pending));

    coord.mark_completed(ORCH, &build).unwrap();
    assert_eq!(status(&coord, &ship), TaskStatus::Pending);

    coord.start_task(ORCH, &test).unwrap();
    coord.mark_completed(ORCH, &test).unwrap();
    assert_eq!(status(&coord, &ship), TaskStatus::Ready);
}

#[test]
fn cancel_on_completed_task_is_rejected() {
    let coord = coordinator();
    let t1 = task(&coord, "T1");
    coord.mark_completed(ORCH, &t1).unwrap();

    let err = coord.cancel(ORCH, &t1).unwrap_err();
    assert!(matches!(
        err,
        CoordError::InvalidTaskTransition {
            from: TaskStatus::Completed,
            to: TaskStatus::Cancelled,
            ..
        }
    ));
    assert_eq!(status(&coord, &t1), TaskStatus::Completed);
}

#[test]
fn cancelled_dependency_blocks_dependents_transitively() {
    let coord = coordinator();
    let base = task(&coord, "base");
    let mid = task(&coord, "mid");
    let top = task(&coord, "top");
    coord.add_dependency(ORCH, &mid, &base).unwrap();
    coord.add_dependency(ORCH, &top, &mid).unwrap();

    coord.cancel(ORCH, &base).unwrap();
    assert_eq!(status(&coord, &base), TaskStatus::Cancelled);
    assert_eq!(status(&coord, &mid), TaskStatus::Blocked);
    assert_eq!(status(&coord, &top), TaskStatus::Blocked);

    // Dropping the cancelled prerequisite unblocks the chain.
    let mid_after = coord.remove_dependency(ORCH, &mid, &base).unwrap();
    assert_eq!(mid_after.task_status, Some(TaskStatus::Ready));
    assert_eq!(status(&coord, &top), TaskStatus::Pending);
}

#[test]
fn cascades_are_audited_as_separate_writes() {
    let coord = coordinator();
    let base = task(&coord, "base");
    let dependent = task(&coord, "dependent");
    coord.add_dependency(ORCH, &dependent, &base).unwrap();
    coord.mark_completed(ORCH, &base).unwrap();

    let operations: Vec<OperationKind> = coord
        .entries_since(ORCH, 0)
        .unwrap()
        .map(|entry| entry.unwrap().operation)
        .collect();
    assert_eq!(
        operations,
        vec![
            OperationKind::Create,
            OperationKind::Create,
            OperationKind::AddDependency,
            OperationKind::StatusChange,
            OperationKind::Cascade,
        ]
    );
    assert_eq!(status(&coord, &dependent), TaskStatus::Ready);
}

#[test]
fn ready_tasks_are_ordered_by_creation() {
    let coord = coordinator();
    let first = task(&coord, "a-first");
    let second = task(&coord, "b-second");
    let gated = task(&coord, "c-gated");
    coord.add_dependency(ORCH, &gated, &first).unwrap();

    let ready: Vec<String> = coord
        .ready_tasks()
        .unwrap()
        .into_iter()
        .map(|record| record.key)
        .collect();
    assert_eq!(ready, vec![first.key.clone(), second.key.clone()]);

    coord.start_task(ORCH, &first).unwrap();
    assert_eq!(coord.ready_tasks().unwrap().len(), 1);
}

#[test]
fn dependencies_freeze_once_work_starts() {
    let coord = coordinator();
    let t1 = task(&coord, "T1");
    let t2 = task(&coord, "T2");
    coord.start_task(ORCH, &t1).unwrap();

    assert!(matches!(
        coord.add_dependency(ORCH, &t1, &t2),
        Err(CoordError::DependencyLocked {
            status: TaskStatus::InProgress,
            ..
        })
    ));
    assert!(matches!(
        coord.start_task(ORCH, &t1),
        Err(CoordError::InvalidTaskTransition { .. })
    ));
}

#[test]
fn graph_operations_check_targets_and_ownership() {
    let coord = coordinator();
    let t1 = task(&coord, "T1");
    coord
        .write(
            "architect",
            "specs",
            "auth",
            &RecordDraft::new(RecordKind::Specification, json!({ "title": "auth" })),
            0,
        )
        .unwrap();

    assert!(matches!(
        coord.add_dependency(ORCH, &t1, &RecordRef::new("specs", "auth")),
        Err(CoordError::NotATask(_))
    ));
    assert!(matches!(
        coord.add_dependency(ORCH, &t1, &RecordRef::new(ORCH, "missing")),
        Err(CoordError::NotFound(_))
    ));
    assert!(matches!(
        coord.remove_dependency(ORCH, &t1, &RecordRef::new(ORCH, "missing")),
        Err(CoordError::DependencyNotFound { .. })
    ));
    assert!(matches!(
        coord.mark_completed("implementer", &t1),
        Err(CoordError::PermissionDenied { .. })
    ));
    assert_eq!(status(&coord, &t1), TaskStatus::Ready);
}
