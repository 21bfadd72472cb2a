//! Wire-format tests for the CI server payloads.

use fleet_core::{Agent, QueueInfo};

#[test]
fn test_agent_from_registry_payload() {
    let json = r#"{
        "id": 12,
        "created": 1700000000,
        "updated": 1700000500,
        "name": "pool-1-agent-k3j9x0ab",
        "owner_id": -1,
        "token": "abc",
        "last_contact": 1700000400,
        "last_work": 1700000300,
        "platform": "linux/amd64",
        "backend": "docker",
        "capacity": 2,
        "version": "3.0.0",
        "no_schedule": true
    }"#;

    let agent: Agent = serde_json::from_str(json).expect("deserialize");
    assert_eq!(agent.id, 12);
    assert_eq!(agent.name, "pool-1-agent-k3j9x0ab");
    assert_eq!(agent.token, "abc");
    assert!(agent.no_schedule);
    assert_eq!(agent.last_contact, 1700000400);
    assert_eq!(agent.last_work, 1700000300);
    assert_eq!(agent.created, 1700000000);
}

#[test]
fn test_new_agent_payload_omits_empty_token() {
    let json = serde_json::to_value(Agent::named("pool-1-agent-abcd")).expect("serialize");
    assert_eq!(json["name"], "pool-1-agent-abcd");
    assert!(json.get("token").is_none());
    assert_eq!(json["no_schedule"], false);
}

#[test]
fn test_queue_info_with_missing_lists() {
    let json = r#"{"stats": {"worker_count": 4, "pending_count": 3, "running_count": 1}}"#;

    let info: QueueInfo = serde_json::from_str(json).expect("deserialize");
    assert_eq!(info.stats.workers, 4);
    assert_eq!(info.stats.pending, 3);
    assert_eq!(info.stats.waiting_on_deps, 0);
    assert!(info.pending.is_empty());
    assert!(!info.paused);
}
