//! Whole-cycle tests against in-memory repository and chat collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use planwatch::notify::{ChatClient, ChatMessage, DeliveryReceipt, NotificationPublisher};
use planwatch::observe::{Change, ProgressObserver, ReferencePoint, RepositoryHost};
use planwatch::orchestrator::{CycleOptions, Orchestrator};
use planwatch::plan::{PlanStore, StepKey};
use planwatch::retry::RetryPolicy;
use planwatch::{Error, Result};

const DOCS: &str = "\
# Product requirements

## Functional Implementation

- Implement login
- Implement logout
";

/// Host whose answer can be changed between cycles.
struct ScriptedHost {
    changes: Mutex<Vec<Change>>,
    timeout: Mutex<bool>,
    calls: AtomicUsize,
}

impl ScriptedHost {
    fn new(changes: Vec<Change>) -> Self {
        Self {
            changes: Mutex::new(changes),
            timeout: Mutex::new(false),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RepositoryHost for ScriptedHost {
    async fn list_changes(&self, _since: &ReferencePoint) -> Result<Vec<Change>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.timeout.lock().unwrap() {
            return Err(Error::observation_transient("git log timed out after 30s"));
        }
        Ok(self.changes.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Chat client that can be switched into failing.
#[derive(Default)]
struct ScriptedChat {
    sent: Mutex<Vec<ChatMessage>>,
    down: Mutex<bool>,
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn post_message(&self, channel: &str, message: &ChatMessage) -> Result<DeliveryReceipt> {
        if *self.down.lock().unwrap() {
            return Err(Error::delivery("channel_not_found"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(DeliveryReceipt {
            channel: channel.to_string(),
            message_id: format!("1697450000.{:06}", sent.len()),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Fixture {
    dir: TempDir,
    host: Arc<ScriptedHost>,
    chat: Arc<ScriptedChat>,
}

impl Fixture {
    fn new(changes: Vec<Change>) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs).expect("failed to create docs");
        std::fs::write(docs.join("requirements.md"), DOCS).expect("failed to write docs");

        Self {
            dir,
            host: Arc::new(ScriptedHost::new(changes)),
            chat: Arc::new(ScriptedChat::default()),
        }
    }

    fn plan_path(&self) -> std::path::PathBuf {
        self.dir.path().join("implementation_plans").join("implementation_plan.md")
    }

    fn orchestrator(&self) -> Orchestrator {
        let observer = ProgressObserver::new(self.host.clone()).with_retry(RetryPolicy::none());
        let publisher =
            NotificationPublisher::new(self.chat.clone(), "general").with_retry(RetryPolicy::none());
        Orchestrator::new(self.dir.path().join("docs"), PlanStore::new(self.plan_path()))
            .with_observer(observer)
            .with_publisher(publisher)
    }
}

fn login_commit() -> Change {
    Change::new("1111111111111111", "Implement login with session cookies")
        .with_paths(["src/auth/login.rs"])
}

fn logout_commit() -> Change {
    Change::new("2222222222222222", "Implement logout endpoint").with_paths(["src/auth/logout.rs"])
}

#[tokio::test]
async fn completed_steps_reach_full_progress() {
    let fixture = Fixture::new(vec![login_commit()]);
    let mut orchestrator = fixture.orchestrator();

    let first = orchestrator.run_cycle(CycleOptions::full()).await.unwrap();
    assert_eq!(first.progress().percent(), 50);

    *fixture.host.changes.lock().unwrap() = vec![logout_commit(), login_commit()];
    let second = orchestrator.run_cycle(CycleOptions::full()).await.unwrap();

    assert_eq!(second.completed.len(), 1);
    assert_eq!(second.completed[0].text, "Implement logout");
    assert_eq!(second.progress().percent(), 100);
    assert!(second.pending.is_empty());

    let content = std::fs::read_to_string(fixture.plan_path()).unwrap();
    assert!(content.contains("[x] Implement login"));
    assert!(content.contains("[x] Implement logout"));
}

#[tokio::test]
async fn host_timeout_keeps_statuses_and_skips_publication() {
    let fixture = Fixture::new(vec![login_commit()]);
    let mut orchestrator = fixture.orchestrator();
    orchestrator.run_cycle(CycleOptions::update()).await.unwrap();
    let before = std::fs::read_to_string(fixture.plan_path()).unwrap();

    *fixture.host.timeout.lock().unwrap() = true;
    *fixture.host.changes.lock().unwrap() = vec![logout_commit()];
    let report = orchestrator.run_cycle(CycleOptions::full()).await.unwrap();

    assert!(report.is_degraded());
    assert!(report.completed.is_empty());
    assert!(fixture.chat.sent.lock().unwrap().is_empty());

    let after = std::fs::read_to_string(fixture.plan_path()).unwrap();
    let statuses = |content: &str| -> Vec<String> {
        content
            .lines()
            .filter(|l| l.starts_with('['))
            .map(|l| l[..3].to_string())
            .collect()
    };
    assert_eq!(statuses(&before), statuses(&after));
    assert_eq!(statuses(&after), vec!["[x]", "[ ]"]);
}

#[tokio::test]
async fn failed_delivery_does_not_repeat_completions() {
    let fixture = Fixture::new(vec![login_commit()]);
    let mut orchestrator = fixture.orchestrator();

    *fixture.chat.down.lock().unwrap() = true;
    let first = orchestrator.run_cycle(CycleOptions::full()).await.unwrap();
    assert_eq!(first.completed.len(), 1);
    assert!(first.receipts.is_empty());
    assert!(first.is_degraded());

    let persisted = PlanStore::new(fixture.plan_path()).load().unwrap();
    assert!(persisted
        .find(&StepKey::new("Functional Implementation", "Implement login"))
        .unwrap()
        .is_done());

    *fixture.chat.down.lock().unwrap() = false;
    let second = orchestrator.run_cycle(CycleOptions::full()).await.unwrap();
    assert!(second.completed.is_empty());
    assert_eq!(second.receipts.len(), 2);

    let sent = fixture.chat.sent.lock().unwrap();
    assert_eq!(sent[0].fallback, "Implementation Progress: 50% complete");
    assert_eq!(sent[1].fallback, "Implementation Request: Implement logout");
}

#[tokio::test]
async fn identical_events_are_sent_once_per_process() {
    let fixture = Fixture::new(vec![]);
    let mut orchestrator = fixture.orchestrator();

    orchestrator.run_cycle(CycleOptions::full()).await.unwrap();
    let second = orchestrator.run_cycle(CycleOptions::full()).await.unwrap();

    assert!(second.receipts.is_empty());
    assert_eq!(fixture.chat.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn done_steps_are_not_observed_again() {
    let fixture = Fixture::new(vec![login_commit()]);
    let mut orchestrator = fixture.orchestrator();
    orchestrator.run_cycle(CycleOptions::update()).await.unwrap();

    std::fs::write(
        fixture.dir.path().join("docs").join("requirements.md"),
        "## Functional Implementation\n\n- Implement login\n",
    )
    .unwrap();
    let calls_before = fixture.host.calls.load(Ordering::SeqCst);
    let report = orchestrator.run_cycle(CycleOptions::update()).await.unwrap();

    assert_eq!(fixture.host.calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(report.progress().done, 1);
    assert_eq!(report.progress().stale, 1);
}

#[tokio::test]
async fn removed_docs_keep_history_as_stale() {
    let fixture = Fixture::new(vec![login_commit()]);
    let mut orchestrator = fixture.orchestrator();
    orchestrator.run_cycle(CycleOptions::update()).await.unwrap();

    std::fs::remove_file(fixture.dir.path().join("docs").join("requirements.md")).unwrap();
    let report = orchestrator.run_cycle(CycleOptions::analyze()).await.unwrap();

    assert_eq!(report.plan.step_count(), 2);
    assert!(report.plan.steps().all(|s| s.stale));
    let login = report
        .plan
        .find(&StepKey::new("Functional Implementation", "Implement login"))
        .unwrap();
    assert!(login.is_done());
    assert_eq!(report.progress().percent(), 0);
}
