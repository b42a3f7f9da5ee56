mod common;

use std::time::Duration;
use common::{harness, masscan_line, nmap_report, ScriptedRunner};
use malsift::models::{ScanKind, Target, TargetErrorKind};
use malsift::orchestrator::{ScanRequest, ScanState};

fn request(addrs: &[&str], kind: ScanKind, engine: &str) -> ScanRequest {
    let targets = addrs.iter().map(|a| Target::parse(a, kind).unwrap()).collect();
    ScanRequest::new(targets, kind, engine, Duration::from_secs(5))
}

#[tokio::test]
async fn port_scan_two_targets_end_to_end() {
    let runner = ScriptedRunner::new()
        .respond("10.0.0.5", &masscan_line("10.0.0.5", 22))
        .respond("10.0.0.6", &masscan_line("10.0.0.6", 443));
    let h = harness(runner);

    let id = h.orchestrator.create(request(&["10.0.0.5", "10.0.0.6"], ScanKind::PortScan, "masscan")).unwrap();
    let status = h.orchestrator.execute(&id).await.unwrap();

    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.progress, 1.0);
    assert_eq!(h.orchestrator.results(&id, 100, 0).await.unwrap().len(), 2);

    let devices = h.aggregator.list(100, 0).unwrap();
    assert_eq!(devices.len(), 2);
    for d in &devices {
        assert!(d.last_seen >= d.first_seen);
        assert!(d.engine_results.contains_key("masscan"));
    }
    let web = h.aggregator.get("10.0.0.6").unwrap().unwrap();
    assert_eq!(web.ports[0].port, 443);
}

#[tokio::test]
async fn merging_same_job_twice_changes_nothing() {
    let out = nmap_report("10.0.0.7", "db01", &[(5432, "postgresql", "PostgreSQL DB 14")], Some(("Linux 5.4", 90)));
    let h = harness(ScriptedRunner::new().respond("10.0.0.7", &out));

    let id = h.orchestrator.create(request(&["10.0.0.7"], ScanKind::OsDetect, "nmap")).unwrap();
    h.orchestrator.execute(&id).await.unwrap();
    let first = h.aggregator.get("10.0.0.7").unwrap().unwrap();
    assert_eq!(first.hostname.as_deref(), Some("db01"));
    assert_eq!(first.operating_system, "Linux 5.4");
    assert!((first.confidence - 0.9).abs() < 1e-9);

    let results = h.db.list_raw_results(&id, 100, 0).unwrap();
    h.aggregator.merge(&results).await.unwrap();
    let second = h.aggregator.get("10.0.0.7").unwrap().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn higher_confidence_engine_wins_regardless_of_order() {
    let low = nmap_report("10.0.0.8", "edge", &[(22, "ssh", "OpenSSH 8.9")], Some(("Linux 3.x", 30)));
    let high = nmap_report("10.0.0.8", "edge", &[(3389, "ms-wbt-server", "")], Some(("Windows Server 2019", 80)));

    for outputs in [[&low, &high], [&high, &low]] {
        let h = harness(ScriptedRunner::new().respond("10.0.0.8", outputs[0]));
        let id = h.orchestrator.create(request(&["10.0.0.8"], ScanKind::OsDetect, "nmap")).unwrap();
        h.orchestrator.execute(&id).await.unwrap();

        // second pass through a differently scripted runner, same database
        let second = malsift::scanner::EngineRegistry::with_runner(
            std::sync::Arc::new(ScriptedRunner::new().respond("10.0.0.8", outputs[1])),
            &malsift::config::MalsiftConfig::default(),
        );
        let orch = malsift::orchestrator::ScanOrchestrator::new(
            h.db.clone(),
            second,
            h.aggregator.clone(),
            &malsift::config::OrchestratorConfig::default(),
        );
        let id = orch.create(request(&["10.0.0.8"], ScanKind::OsDetect, "nmap")).unwrap();
        orch.execute(&id).await.unwrap();

        let d = h.aggregator.get("10.0.0.8").unwrap().unwrap();
        assert_eq!(d.operating_system, "Windows Server 2019");
        assert!((d.confidence - 0.8).abs() < 1e-9);
        let ports: Vec<u16> = d.ports.iter().map(|p| p.port).collect();
        assert!(ports.contains(&22) && ports.contains(&3389));
    }
}

#[tokio::test]
async fn cancelling_queued_job_yields_no_results() {
    let h = harness(ScriptedRunner::new());
    let id = h.orchestrator.create(request(&["10.0.0.5"], ScanKind::PortScan, "masscan")).unwrap();

    let status = h.orchestrator.cancel(&id).await.unwrap();
    assert_eq!(status.state, ScanState::Cancelled);
    assert_eq!(status.result_count, 0);
    h.orchestrator.execute(&id).await.unwrap();
    assert!(h.orchestrator.results(&id, 10, 0).await.unwrap().is_empty());
    assert_eq!(h.aggregator.list(10, 0).unwrap().len(), 0);
}

#[tokio::test]
async fn unreachable_host_is_recorded_not_merged() {
    let down = "Starting Nmap 7.94\nNote: Host seems down. If it is really up, but blocking our ping probes, try -Pn\nNmap done: 1 IP address (0 hosts up) scanned in 3.02 seconds\n";
    let h = harness(ScriptedRunner::new().respond("10.0.0.9", down));
    let id = h.orchestrator.create(request(&["10.0.0.9"], ScanKind::Sweep, "nmap")).unwrap();

    let status = h.orchestrator.execute(&id).await.unwrap();
    assert_eq!(status.state, ScanState::Completed);
    let results = h.orchestrator.results(&id, 10, 0).await.unwrap();
    assert_eq!(results[0].error.as_ref().unwrap().kind, TargetErrorKind::Unreachable);
    assert!(h.aggregator.get("10.0.0.9").unwrap().is_none());
}

#[tokio::test]
async fn jobs_are_listed_newest_first() {
    let h = harness(ScriptedRunner::new());
    let first = h.orchestrator.create(request(&["10.0.0.5"], ScanKind::Sweep, "nmap").with_owner("alice")).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h.orchestrator.create(request(&["10.0.0.6"], ScanKind::Sweep, "nmap")).unwrap();

    let jobs = h.orchestrator.list(None, None, 10, 0).unwrap();
    assert_eq!(jobs[0].id, second);
    assert_eq!(jobs[1].id, first);
    let alice = h.orchestrator.list(Some(ScanState::Queued), Some("alice"), 10, 0).unwrap();
    assert_eq!(alice.len(), 1);
}
