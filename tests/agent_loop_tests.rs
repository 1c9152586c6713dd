//! Agent loop: drain, resubmit, reject, cancel, and dispatch failure.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{text_turn, tool_turn, Reply, ScriptedDispatcher, ScriptedProvider};
use sandrun::agent::{AgentDriver, AgentEvent, TurnOutcome};
use sandrun::error::SandrunError;
use sandrun::types::{ModelMessage, Role};

fn tool_results(messages: &[ModelMessage]) -> Vec<(String, String, bool)> {
    messages
        .iter()
        .filter_map(|m| m.tool_result_part())
        .map(|r| (r.tool_call_id.clone(), r.content.clone(), r.is_error))
        .collect()
}

fn ok(stdout: &str) -> Reply {
    Reply::Exit {
        stdout: stdout.to_string(),
        exit_code: 0,
    }
}

#[tokio::test]
async fn tool_result_is_resubmitted_until_the_model_answers() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[("call_1", "whois_lookup", r#"{"domain":"example.com"}"#)]),
        text_turn("Registered through RESERVED-IANA."),
    ]);
    let dispatcher = ScriptedDispatcher::new(vec![ok("Registrar: RESERVED-IANA\n")]);
    let mut driver = AgentDriver::new(provider.clone(), dispatcher.clone()).with_system_prompt("be brief");

    let outcome = driver.run_turn("who owns example.com?", &CancellationToken::new()).await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "Registered through RESERVED-IANA.".into(),
            resubmissions: 1
        }
    );
    assert_eq!(dispatcher.dispatched(), vec!["whois example.com"]);
    assert_eq!(provider.request_count(), 2);

    let requests = provider.requests.lock().unwrap();
    let second = &requests[1];
    let roles: Vec<Role> = second.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::Tool]);
    let results = tool_results(&second.messages);
    assert_eq!(results[0].0, "call_1");
    assert!(results[0].1.starts_with("[whois_lookup] `whois example.com` completed successfully"));
    assert!(results[0].1.contains("Registrar: RESERVED-IANA"));
    assert!(!results[0].2);
    assert!(driver.queue().is_empty());
}

#[tokio::test]
async fn all_calls_of_a_turn_run_in_order_before_one_resubmission() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[
            ("a", "ping_host", r#"{"target":"10.0.0.1","count":1}"#),
            ("b", "dns_lookup", r#"{"domain":"example.com"}"#),
        ]),
        text_turn("Both are up."),
    ]);
    let dispatcher = ScriptedDispatcher::new(vec![ok("1 received\n"), ok("93.184.216.34\n")]);
    let mut driver = AgentDriver::new(provider.clone(), dispatcher.clone());

    let outcome = driver.run_turn("check them", &CancellationToken::new()).await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { resubmissions: 1, .. }));
    let dispatched = dispatcher.dispatched();
    assert_eq!(dispatched[0], "ping -c 1 10.0.0.1");
    assert!(dispatched[1].starts_with("dig example.com"));
    let ids: Vec<String> = tool_results(driver.messages()).into_iter().map(|r| r.0).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn rejected_call_never_reaches_the_dispatcher() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[("danger", "execute_command", r#"{"command":"sudo rm -rf /"}"#)]),
        text_turn("I can't do that."),
    ]);
    let dispatcher = ScriptedDispatcher::new(vec![]);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let mut driver = AgentDriver::new(provider, dispatcher.clone())
        .with_event_sink(Arc::new(move |event: AgentEvent| sink_events.lock().unwrap().push(event)));

    driver.run_turn("wipe it", &CancellationToken::new()).await.unwrap();

    assert!(dispatcher.dispatched().is_empty());
    let results = tool_results(driver.messages());
    assert!(results[0].1.starts_with("[execute_command] rejected before execution:"));
    assert!(results[0].2);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolRejected { call_id, .. } if call_id == "danger")));
}

#[tokio::test]
async fn dispatch_failure_flushes_the_queue_and_answers_every_call() {
    let provider = ScriptedProvider::new(vec![tool_turn(&[
        ("a", "whois_lookup", r#"{"domain":"example.com"}"#),
        ("b", "whois_lookup", r#"{"domain":"example.org"}"#),
        ("c", "whois_lookup", r#"{"domain":"example.net"}"#),
    ])]);
    let dispatcher = ScriptedDispatcher::new(vec![ok("first\n"), Reply::Fail(|| SandrunError::ConnectionLost)]);
    let mut driver = AgentDriver::new(provider.clone(), dispatcher.clone());

    let error = driver.run_turn("look them up", &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(error, SandrunError::ConnectionLost));
    assert_eq!(dispatcher.dispatched().len(), 2);
    assert!(driver.queue().is_empty());
    let results = tool_results(driver.messages());
    let ids: Vec<&str> = results.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(results[1].1.contains("not executed"));
    assert!(results[2].1.contains("not executed"));
    assert_eq!(provider.request_count(), 1);

    // The conversation stays usable.
    let outcome = driver.run_turn("try again later", &CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
}

#[tokio::test]
async fn cancelled_drain_keeps_remaining_calls_for_resume() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[
            ("slow", "nmap_scan", r#"{"target":"10.0.0.5","scan_type":"full"}"#),
            ("next", "whois_lookup", r#"{"domain":"example.com"}"#),
        ]),
        text_turn("Done."),
    ]);
    let dispatcher = ScriptedDispatcher::new(vec![Reply::BlockUntilCancelled, ok("Registrar: X\n")]);
    let mut driver = AgentDriver::new(provider.clone(), dispatcher.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let outcome = driver.run_turn("scan it", &cancel).await.unwrap();
    assert_eq!(outcome, TurnOutcome::Cancelled { pending: 1 });
    assert_eq!(driver.pending(), 1);

    let blocked = driver.run_turn("something else", &CancellationToken::new()).await;
    assert!(matches!(blocked, Err(SandrunError::InvalidState(_))));

    let outcome = driver.resume(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "Done.".into(),
            resubmissions: 1
        }
    );
    assert_eq!(dispatcher.dispatched().len(), 2);
    let results = tool_results(driver.messages());
    assert!(results[0].1.contains("cancelled by the user"));
    assert_eq!(results[1].0, "next");
}

#[tokio::test]
async fn discard_pending_records_skipped_calls() {
    let provider = ScriptedProvider::new(vec![tool_turn(&[
        ("slow", "nmap_scan", r#"{"target":"10.0.0.5"}"#),
        ("x", "whois_lookup", r#"{"domain":"example.com"}"#),
        ("y", "whois_lookup", r#"{"domain":"example.org"}"#),
    ])]);
    let dispatcher = ScriptedDispatcher::new(vec![Reply::BlockUntilCancelled]);
    let mut driver = AgentDriver::new(provider, dispatcher);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    assert_eq!(
        driver.run_turn("scan", &cancel).await.unwrap(),
        TurnOutcome::Cancelled { pending: 2 }
    );

    assert_eq!(driver.discard_pending(), 2);
    assert_eq!(driver.pending(), 0);
    let results = tool_results(driver.messages());
    assert_eq!(results.len(), 3);
    assert!(results[1].1.contains("skipped"));
    assert!(results[2].1.contains("skipped"));
}

#[tokio::test]
async fn events_follow_the_loop() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[("w", "whois_lookup", r#"{"domain":"example.com"}"#)]),
        text_turn("ok"),
    ]);
    let dispatcher = ScriptedDispatcher::new(vec![ok("Registrar: X\n")]);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let mut driver = AgentDriver::new(provider, dispatcher)
        .with_event_sink(Arc::new(move |event: AgentEvent| sink_events.lock().unwrap().push(event)));

    driver.run_turn("go", &CancellationToken::new()).await.unwrap();

    let kinds: Vec<&'static str> = events
        .lock()
        .unwrap()
        .iter()
        .map(|e| match e {
            AgentEvent::TextDelta { .. } => "text",
            AgentEvent::ToolInvoking { .. } => "invoking",
            AgentEvent::ToolOutput { .. } => "output",
            AgentEvent::ToolFinished { .. } => "finished",
            AgentEvent::ToolRejected { .. } => "rejected",
            AgentEvent::Error { .. } => "error",
            AgentEvent::TurnComplete { .. } => "complete",
        })
        .collect();
    assert_eq!(kinds, vec!["invoking", "output", "finished", "text", "complete"]);
}

#[tokio::test]
async fn provider_failure_is_reported_and_returned() {
    struct Down;

    #[async_trait::async_trait]
    impl sandrun::provider::ModelProvider for Down {
        fn provider_name(&self) -> &str {
            "down"
        }
        fn model_id(&self) -> &str {
            "down"
        }
        async fn stream_chat(
            &self,
            _request: &sandrun::provider::ProviderRequest,
        ) -> Result<sandrun::provider::EventStream, SandrunError> {
            Err(SandrunError::api(503, "overloaded"))
        }
    }

    let mut driver = AgentDriver::new(Arc::new(Down), ScriptedDispatcher::new(vec![]));
    let error = driver.run_turn("hi", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(error, SandrunError::Api { status: 503, .. }));
}
