//! Property-based checks: a constructed [`Plan`]'s `execution_order` is
//! always a valid topological order of its dependency graph, and every
//! [`Message`] round-trips through its wire envelope.

use std::collections::{HashMap, HashSet};

use agent_mesh_core::message::{Context, Message};
use agent_mesh_core::plan::{Plan, Task, TaskId};
use proptest::prelude::*;

/// Builds a DAG of `n` tasks where task `i` may depend on any task `j < i`,
/// guaranteeing acyclicity by construction.
fn arbitrary_dag(n: usize, edge_bits: &[bool]) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(n);
    let mut bit = 0;
    for i in 0..n {
        let mut dependencies = HashSet::new();
        for j in 0..i {
            if edge_bits.get(bit).copied().unwrap_or(false) {
                dependencies.insert(TaskId::new(format!("task-{j}")));
            }
            bit += 1;
        }
        tasks.push(Task::new(
            TaskId::new(format!("task-{i}")),
            format!("step {i}"),
            HashSet::new(),
            dependencies,
        ));
    }
    tasks
}

proptest! {
    #[test]
    fn execution_order_always_respects_dependencies(
        n in 1usize..8,
        edge_bits in prop::collection::vec(any::<bool>(), 0..28),
    ) {
        let tasks = arbitrary_dag(n, &edge_bits);
        let plan = Plan::new("generated", tasks, HashMap::new()).unwrap();

        let position: HashMap<&TaskId, usize> = plan
            .execution_order
            .iter()
            .enumerate()
            .map(|(idx, id)| (id, idx))
            .collect();

        for task in plan.tasks.values() {
            for dep in &task.dependencies {
                prop_assert!(position[dep] < position[&task.task_id]);
            }
        }
        prop_assert_eq!(plan.execution_order.len(), plan.tasks.len());
    }

    #[test]
    fn message_round_trips_through_its_envelope(
        sender in "[a-z]{1,10}",
        receiver in "[a-z]{1,10}",
        content in ".{0,100}",
    ) {
        let message = Message::request(sender, receiver, content, Context::new());
        let envelope = message.to_envelope();
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: agent_mesh_core::message::MessageEnvelope = serde_json::from_str(&json).unwrap();
        let roundtripped = Message::from_envelope(parsed);

        prop_assert_eq!(roundtripped.sender_id, message.sender_id);
        prop_assert_eq!(roundtripped.receiver_id, message.receiver_id);
        prop_assert_eq!(roundtripped.content, message.content);
        prop_assert_eq!(roundtripped.message_id, message.message_id);
    }
}
