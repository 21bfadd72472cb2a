//! `ServerClient` against a mocked CI server.

use fleet_client::{PER_PAGE, ServerClient};
use fleet_core::{Agent, Client, Error};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "secret-token";

async fn setup() -> (MockServer, ServerClient) {
    let server = MockServer::start().await;
    let client = ServerClient::new(&server.uri(), TOKEN).unwrap();
    (server, client)
}

fn agent_json(id: usize) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("pool-1-agent-{:08}", id),
        "no_schedule": false,
        "last_contact": 1700000000,
        "last_work": 0,
        "created": 1690000000,
    })
}

#[tokio::test]
async fn test_agent_list_follows_pages() {
    let (server, client) = setup().await;

    let first: Vec<_> = (1..=PER_PAGE).map(agent_json).collect();
    Mock::given(method("GET"))
        .and(path("/api/agents"))
        .and(query_param("page", "1"))
        .and(header("Authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(first))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/agents"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![agent_json(PER_PAGE + 1)]))
        .expect(1)
        .mount(&server)
        .await;

    let agents = client.agent_list().await.unwrap();

    assert_eq!(agents.len(), PER_PAGE + 1);
    assert_eq!(agents[0].name, "pool-1-agent-00000001");
    assert_eq!(agents[0].last_contact, 1700000000);
}

#[tokio::test]
async fn test_agent_list_accepts_null() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    assert!(client.agent_list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_agent_create_returns_token() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/agents"))
        .and(body_partial_json(json!({ "name": "pool-1-agent-abcd1234" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12,
            "name": "pool-1-agent-abcd1234",
            "token": "agent-token",
            "created": 1700000000,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = client
        .agent_create(&Agent::named("pool-1-agent-abcd1234"))
        .await
        .unwrap();

    assert_eq!(agent.id, 12);
    assert_eq!(agent.token, "agent-token");
}

#[tokio::test]
async fn test_agent_create_maps_conflict() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/agents"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = client
        .agent_create(&Agent::named("pool-1-agent-abcd1234"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_agent_update_patches_no_schedule() {
    let (server, client) = setup().await;
    Mock::given(method("PATCH"))
        .and(path("/api/agents/7"))
        .and(body_partial_json(json!({ "no_schedule": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "name": "pool-1-agent-abcd1234",
            "no_schedule": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = Agent {
        id: 7,
        no_schedule: true,
        ..Agent::named("pool-1-agent-abcd1234")
    };
    let updated = client.agent_update(&agent).await.unwrap();
    assert!(updated.no_schedule);
}

#[tokio::test]
async fn test_agent_delete_maps_not_found() {
    let (server, client) = setup().await;
    Mock::given(method("DELETE"))
        .and(path("/api/agents/3"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/agents/4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    client.agent_delete(3).await.unwrap();
    assert!(client.agent_delete(4).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_agent_tasks_list() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/agents/5/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "42", "labels": { "arch": "amd64" }, "agent_id": 5 }
        ])))
        .mount(&server)
        .await;

    let tasks = client.agent_tasks_list(5).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].labels["arch"], "amd64");
}

#[tokio::test]
async fn test_queue_info() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/queue/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pending": [{ "id": "1", "labels": {} }],
            "running": null,
            "stats": {
                "worker_count": 2,
                "pending_count": 1,
                "waiting_on_deps_count": 0,
                "running_count": 0
            },
            "paused": false
        })))
        .mount(&server)
        .await;

    let info = client.queue_info().await.unwrap();
    assert_eq!(info.pending.len(), 1);
    assert!(info.running.is_empty());
    assert_eq!(info.stats.workers, 2);
}

#[tokio::test]
async fn test_server_error_includes_body() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/queue/info"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database is locked"))
        .mount(&server)
        .await;

    match client.queue_info().await.unwrap_err() {
        Error::Http(msg) => assert!(msg.contains("database is locked"), "{msg}"),
        other => panic!("unexpected error {other}"),
    }
}
