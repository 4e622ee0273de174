//! End-to-end engine tests: expression, escalation snapshot, pool and report.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use fleetexec::escalation::{EscalationManager, EscalationMode};
use fleetexec::executor::{Engine, NoProbe, RunRequest};
use fleetexec::Error;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}

#[tokio::test]
async fn test_echo_scenario_with_unreachable_host() {
    let connector = Arc::new(MockConnector::responding(0, "hi\n"));
    let prober = Arc::new(MockProber::failing(["b"]));
    let engine = mock_engine(
        connector.clone(),
        prober,
        2,
        Arc::new(EscalationManager::new("deploy")),
    );

    let output = engine
        .run(&RunRequest::new("a,b,c", "echo hi"), CancellationToken::new())
        .await
        .unwrap();
    let report = output.report;

    assert_eq!(sorted(report.success.clone()), vec!["a", "c"]);
    assert!(report.error.is_empty());
    assert_eq!(report.stopped, 1);
    assert_eq!(report.stopped_hosts[0].host, "b");
    assert_eq!(report.outputs.len(), 1);
    assert_eq!(sorted(report.outputs["hi\n"].clone()), vec!["a", "c"]);
    assert_eq!(report.summary(), "Hosts processed: 2, success: 2, error: 0");
    assert_eq!(report.exit_code(), 2);
    assert_eq!(connector.connect_count(), 2);
    assert!(connector.max_open() <= 2);
}

#[tokio::test]
async fn test_every_host_is_accounted_for() {
    let connector = Arc::new(
        MockConnector::responding(0, "ok\n")
            .with_host("h2", HostBehavior::output(3, "bad\n"))
            .with_host("h3", HostBehavior::ConnectFails("refused".into()))
            .with_host("h4", HostBehavior::Hang),
    );
    let prober = Arc::new(MockProber::failing(["h5"]));
    let engine = mock_engine(connector, prober, 3, Arc::new(EscalationManager::new("deploy")));

    let request = RunRequest::new("h1,h2,h3,h4,h5,h6", "uptime")
        .with_timeout(Some(Duration::from_millis(100)));
    let report = engine
        .run(&request, CancellationToken::new())
        .await
        .unwrap()
        .report;

    assert_eq!(report.success.len() + report.error.len() + report.stopped, 6);
    assert_eq!(sorted(report.success.clone()), vec!["h1", "h6"]);
    assert_eq!(report.error, vec!["h2"]);
    assert_eq!(report.codes["h2"], 3);
    assert_eq!(report.stopped, 3);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_escalation_change_only_affects_later_dispatches() {
    let connector = Arc::new(MockConnector::new(HostBehavior::delayed(
        0,
        "",
        Duration::from_millis(50),
    )));
    let escalation = Arc::new(EscalationManager::new("deploy"));
    let engine = mock_engine(connector.clone(), Arc::new(NoProbe), 4, escalation.clone());

    let request = RunRequest::new("a,b", "id");
    let first = engine.run(&request, CancellationToken::new());
    let change = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        escalation.set_mode(EscalationMode::Sudo);
        escalation.set_secret("hunter2");
    };
    let (first, ()) = tokio::join!(first, change);
    assert!(first.unwrap().report.is_success());

    let commands = connector.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| c.options.is_none()));

    engine
        .run(&request, CancellationToken::new())
        .await
        .unwrap();
    let commands = connector.commands();
    assert_eq!(commands.len(), 4);
    assert!(commands[2..].iter().all(|c| c
        .options
        .as_ref()
        .is_some_and(|o| o.escalate_method == EscalationMode::Sudo && o.feeds_password())));
}

#[tokio::test]
async fn test_invalid_escalation_fails_before_dispatch() {
    let connector = Arc::new(MockConnector::responding(0, ""));
    let engine = mock_engine(
        connector.clone(),
        Arc::new(NoProbe),
        4,
        Arc::new(EscalationManager::new("deploy")),
    );

    let request = RunRequest::new("a", "id").with_mode(Some(EscalationMode::Su));
    let err = engine
        .run(&request, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConfigurationInvalid(_)));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn test_group_expression_with_exclusion() {
    let client = Arc::new(CountingInventoryClient::new().with_group("web", &["web1", "web2", "web3"]));
    let connector = Arc::new(MockConnector::responding(0, "ok\n"));
    let engine = Engine::new(
        Arc::new(mock_resolver(client.clone())),
        Arc::new(EscalationManager::new("deploy")),
        mock_pool(connector.clone(), 4, Arc::new(NoProbe)),
    );

    let output = engine
        .run(&RunRequest::new("%web,-web2,db1", "uptime"), CancellationToken::new())
        .await
        .unwrap();

    assert!(output.stale.is_empty());
    assert_eq!(sorted(output.report.success), vec!["db1", "web1", "web3"]);
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_inventory_unavailable_aborts_run() {
    let client = Arc::new(CountingInventoryClient::new());
    client.set_failing(true);
    let connector = Arc::new(MockConnector::responding(0, ""));
    let engine = Engine::new(
        Arc::new(mock_resolver(client)),
        Arc::new(EscalationManager::new("deploy")),
        mock_pool(connector.clone(), 4, Arc::new(NoProbe)),
    );

    let err = engine
        .run(&RunRequest::new("%web", "uptime"), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InventoryUnavailable { ref group, .. } if group == "web"));
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn test_observer_sees_every_outcome() {
    let connector = Arc::new(MockConnector::responding(0, "ok\n"));
    let engine = mock_engine(
        connector,
        Arc::new(NoProbe),
        4,
        Arc::new(EscalationManager::new("deploy")),
    );

    let mut seen = Vec::new();
    engine
        .run_observed(
            &RunRequest::new("a,b,c", "true"),
            CancellationToken::new(),
            |outcome| seen.push(outcome.host.name()),
        )
        .await
        .unwrap();
    assert_eq!(sorted(seen), vec!["a", "b", "c"]);
}
