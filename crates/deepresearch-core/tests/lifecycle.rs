use std::sync::Arc;
use std::time::Duration;

use deepresearch_core::{
    DeepResearchArgs, JobStatus, PollingPolicy, ResearchError, ResearchJobManager, ResearchTools,
    SessionRegistry, Sessions, StubJobClient, ToolStatus,
};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const AGENT: &str = "deep-research-pro-preview-12-2025";

fn manager(client: &Arc<StubJobClient>) -> ResearchJobManager {
    ResearchJobManager::new(client.clone(), AGENT)
}

fn sessions(entries: &[(&str, &str)]) -> Sessions {
    entries
        .iter()
        .map(|(id, label)| (id.to_string(), label.to_string()))
        .collect()
}

#[tokio::test]
async fn new_research_records_exactly_one_labelled_session() {
    let client = Arc::new(
        StubJobClient::new()
            .with_job_ids(["J1"])
            .with_report(Some("Quantum computing uses...")),
    );
    let tools = ResearchTools::new(manager(&client));
    let registry = SessionRegistry::in_memory();

    let response = tools
        .deep_research(
            &registry,
            DeepResearchArgs::new("What is quantum computing?", None),
        )
        .await;

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "status": "success",
            "report": "Quantum computing uses...",
            "current_interaction_id": "J1",
            "active_sessions": {"J1": "What is quantum computing?..."}
        })
    );

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].agent, AGENT);
    assert_eq!(requests[0].input, "What is quantum computing?");
    assert_eq!(requests[0].previous_interaction_id, None);
    assert!(requests[0].background);
}

#[tokio::test]
async fn long_queries_are_labelled_by_their_first_fifty_characters() {
    let client = Arc::new(StubJobClient::new().with_job_ids(["J1"]));
    let registry = SessionRegistry::in_memory();
    let query = "Compare the economic impact of solid-state batteries versus lithium iron phosphate";

    manager(&client)
        .run_research(&registry, query, None)
        .await
        .unwrap();

    let label = registry.get("J1").await.unwrap().unwrap();
    assert_eq!(label, format!("{}...", &query[..50]));
}

#[tokio::test]
async fn resumed_research_leaves_registry_unchanged() {
    let client = Arc::new(
        StubJobClient::new()
            .with_job_ids(["J1", "J2"])
            .with_report(Some("Follow-up findings")),
    );
    let manager = manager(&client);
    let registry = SessionRegistry::in_memory();

    manager
        .run_research(&registry, "What is quantum computing?", None)
        .await
        .unwrap();
    let before = registry.list().await.unwrap();

    let outcome = manager
        .run_research(&registry, "Now focus on error correction", Some("J1"))
        .await
        .unwrap();

    assert!(outcome.resumed);
    assert_eq!(outcome.report, "Follow-up findings");
    assert_eq!(
        outcome.sessions,
        sessions(&[("J1", "What is quantum computing?...")])
    );
    assert_eq!(registry.list().await.unwrap(), before);
    assert_eq!(
        client.requests()[1].previous_interaction_id.as_deref(),
        Some("J1")
    );
}

#[tokio::test]
async fn unknown_resume_id_fails_without_provider_call() {
    let client = Arc::new(StubJobClient::new());
    let tools = ResearchTools::new(manager(&client));
    let registry = SessionRegistry::in_memory();
    registry.put("J1", "existing...").await.unwrap();

    let response = tools
        .deep_research(
            &registry,
            DeepResearchArgs::new("anything", Some("J9".into())),
        )
        .await;

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"status": "error", "message": "Interaction ID J9 not found in history."})
    );
    assert_eq!(client.create_calls(), 0);
    assert_eq!(client.get_calls(), 0);
    assert_eq!(
        registry.list().await.unwrap(),
        sessions(&[("J1", "existing...")])
    );
}

#[tokio::test]
async fn provider_rejection_is_passed_through_verbatim() {
    let client = Arc::new(StubJobClient::new().rejecting_create("Quota exceeded for agent"));
    let registry = SessionRegistry::in_memory();

    let err = manager(&client)
        .run_research(&registry, "topic", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ResearchError::Provider(_)));
    assert_eq!(err.to_string(), "Quota exceeded for agent");
    assert_eq!(client.get_calls(), 0);
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_and_cancelled_jobs_are_not_recorded() {
    for status in [JobStatus::Failed, JobStatus::Cancelled] {
        let client = Arc::new(StubJobClient::new().with_terminal_status(status.clone()));
        let tools = ResearchTools::new(manager(&client));
        let registry = SessionRegistry::in_memory();

        let response = tools
            .deep_research(&registry, DeepResearchArgs::new("topic", None))
            .await;

        assert_eq!(response.status, ToolStatus::Error);
        assert_eq!(
            response.message.unwrap(),
            format!("Research failed: {status}")
        );
        assert!(registry.list().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn failed_resume_keeps_the_existing_entry() {
    let client = Arc::new(StubJobClient::new().with_terminal_status(JobStatus::Failed));
    let registry = SessionRegistry::in_memory();
    registry.put("J1", "original...").await.unwrap();

    let err = manager(&client)
        .run_research(&registry, "continue", Some("J1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ResearchError::ResearchFailed { .. }));
    assert_eq!(
        registry.list().await.unwrap(),
        sessions(&[("J1", "original...")])
    );
}

#[tokio::test(start_paused = true)]
async fn never_finishing_job_times_out_after_budget() {
    let client = Arc::new(StubJobClient::new().with_job_ids(["J1"]).never_finishing());
    let tools = ResearchTools::new(manager(&client));
    let registry = SessionRegistry::in_memory();

    let started = Instant::now();
    let response = tools
        .deep_research(&registry, DeepResearchArgs::new("slow topic", None))
        .await;

    assert_eq!(started.elapsed(), Duration::from_secs(600));
    assert_eq!(client.get_calls(), 61);
    assert_eq!(client.cancel_calls(), 0);
    assert_eq!(response.status, ToolStatus::Error);
    assert_eq!(
        response.message.as_deref(),
        Some(
            "Research timed out after 600s; interaction J1 is still running on the provider."
        )
    );
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn configured_budget_bounds_the_wait() {
    let client = Arc::new(StubJobClient::new().never_finishing());
    let manager = manager(&client).with_policy(PollingPolicy {
        timeout: Duration::from_secs(30),
        interval: Duration::from_secs(5),
    });
    let registry = SessionRegistry::in_memory();

    let started = Instant::now();
    let err = manager
        .run_research(&registry, "topic", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ResearchError::Timeout { elapsed, .. } if elapsed == Duration::from_secs(30)));
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(client.get_calls(), 7);
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_wait_stops_polling_without_mutation() {
    let client = Arc::new(StubJobClient::new().with_job_ids(["J1"]).never_finishing());
    let manager = manager(&client);
    let registry = SessionRegistry::in_memory();
    let cancel = CancellationToken::new();

    let task = {
        let registry = registry.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            manager
                .run_research_until_cancelled(&registry, "topic", None, &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel.cancel();
    let err = task.await.unwrap().unwrap_err();

    assert!(matches!(err, ResearchError::Cancelled { ref job_id } if job_id == "J1"));
    let polls = client.get_calls();
    assert_eq!(polls, 3);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(client.get_calls(), polls);
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn list_sessions_is_idempotent() {
    let client = Arc::new(StubJobClient::new().with_job_ids(["J1", "J2"]));
    let tools = ResearchTools::new(manager(&client));
    let registry = SessionRegistry::in_memory();
    tools
        .deep_research(&registry, DeepResearchArgs::new("first", None))
        .await;
    tools
        .deep_research(&registry, DeepResearchArgs::new("second", None))
        .await;

    let first = tools.list_research_sessions(&registry).await;
    let second = tools.list_research_sessions(&registry).await;

    assert_eq!(first, second);
    assert_eq!(
        first.active_sessions.unwrap(),
        sessions(&[("J1", "first..."), ("J2", "second...")])
    );
}

#[tokio::test]
async fn clearing_one_session_removes_only_that_id() {
    let client = Arc::new(StubJobClient::new());
    let manager = manager(&client);
    let registry = SessionRegistry::in_memory();
    registry.put("J1", "a...").await.unwrap();
    registry.put("J2", "b...").await.unwrap();

    let present = manager.clear_session(&registry, "J1").await.unwrap();
    assert!(present.found);
    assert_eq!(registry.list().await.unwrap(), sessions(&[("J2", "b...")]));

    let absent = manager.clear_session(&registry, "J1").await.unwrap();
    assert!(!absent.found);
    assert_eq!(registry.list().await.unwrap(), sessions(&[("J2", "b...")]));
}

#[tokio::test]
async fn clear_tools_report_outcome_in_status() {
    let client = Arc::new(StubJobClient::new());
    let tools = ResearchTools::new(manager(&client));
    let registry = SessionRegistry::in_memory();
    registry.put("J1", "a...").await.unwrap();

    let cleared = tools.clear_research_session(&registry, "J1").await;
    assert_eq!(
        serde_json::to_value(&cleared).unwrap(),
        json!({"status": "success", "message": "Research session J1 cleared."})
    );

    let missing = tools.clear_research_session(&registry, "J1").await;
    assert_eq!(missing.status, ToolStatus::NotFound);
}

#[tokio::test]
async fn clear_all_empties_registry_regardless_of_contents() {
    let client = Arc::new(StubJobClient::new());
    let tools = ResearchTools::new(manager(&client));

    for count in [0usize, 1, 5] {
        let registry = SessionRegistry::in_memory();
        for idx in 0..count {
            registry.put(format!("J{idx}"), "t...").await.unwrap();
        }

        let response = tools.clear_all_research_sessions(&registry).await;
        assert!(response.is_success());
        assert_eq!(
            response.message.unwrap(),
            format!("Cleared {count} research session(s).")
        );
        assert!(registry.list().await.unwrap().is_empty());
    }
}
