//! End-to-end scenarios against a scripted LLM and real git repositories
//!
//! Each scenario seeds a run, scripts every LLM response in call order, and
//! drives the dispatch loop to a terminal status. Linear task chains keep
//! the mock's response ordering deterministic.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use conductor::broadcast::{Broadcaster, EventType};
use conductor::checkpoint::Checkpointer;
use conductor::config::Config;
use conductor::control::{ControlPlane, Resolution, ResolveAction};
use conductor::dispatch::DispatchLoop;
use conductor::domain::{QaVerdict, Run, RunStatus, Task, TaskPhase, TaskStatus, WorkerProfile};
use conductor::llm::mock::MockInvoker;
use conductor::llm::{CompletionResponse, LlmInvoker};
use conductor::state::{RunPatch, TaskStore};
use conductor::worktree::{WorktreeConfig, WorktreeManager};
use runstore::SqliteBackend;

async fn git(dir: &Path, args: &[&str]) -> std::process::Output {
    tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .expect("git invocation")
}

async fn init_repo(dir: &Path) {
    git(dir, &["init", "-b", "main"]).await;
    git(dir, &["config", "user.email", "test@test.com"]).await;
    git(dir, &["config", "user.name", "Test"]).await;
    git(dir, &["commit", "--allow-empty", "-m", "initial"]).await;
}

/// Count trunk commits whose message attributes the given task id
async fn attribution_count(repo: &Path, task_id: &str) -> usize {
    let output = git(repo, &["log", "--oneline", &format!("--grep=\\[task:{}\\]", task_id)]).await;
    String::from_utf8_lossy(&output.stdout).lines().count()
}

struct Harness {
    store: TaskStore,
    checkpointer: Checkpointer,
    broadcaster: Broadcaster,
    invoker: Arc<MockInvoker>,
    config: Arc<Config>,
    _worktree_base: tempfile::TempDir,
    _logs: tempfile::TempDir,
}

impl Harness {
    fn new(responses: Vec<CompletionResponse>) -> Self {
        let worktree_base = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.git.worktree_base = worktree_base.path().to_path_buf();
        config.storage.logs_dir = logs.path().to_path_buf();
        config.concurrency.max_workers = 2;

        Self {
            store: TaskStore::spawn(),
            checkpointer: Checkpointer::with_backend(Arc::new(SqliteBackend::open_in_memory().unwrap())),
            broadcaster: Broadcaster::new(),
            invoker: Arc::new(MockInvoker::new(responses)),
            config: Arc::new(config),
            _worktree_base: worktree_base,
            _logs: logs,
        }
    }

    async fn seed(&self, run: Run) -> String {
        let run_id = run.run_id.clone();
        self.store.create_run(run.clone()).await.unwrap();
        self.checkpointer.save(&run).unwrap();
        run_id
    }

    async fn drive(&self, run_id: &str) -> RunStatus {
        let mut dispatch = DispatchLoop::new(
            run_id,
            self.store.clone(),
            self.checkpointer.clone(),
            self.broadcaster.clone(),
            self.invoker.clone() as Arc<dyn LlmInvoker>,
            self.config.clone(),
        );
        tokio::time::timeout(Duration::from_secs(120), dispatch.run())
            .await
            .expect("dispatch loop timed out")
            .expect("dispatch loop errored")
    }

    fn worktree_base(&self) -> PathBuf {
        self._worktree_base.path().to_path_buf()
    }
}

fn complete(summary: &str) -> CompletionResponse {
    CompletionResponse::tool_use(
        "complete_task",
        serde_json::json!({"status": "complete", "summary": summary}),
    )
}

fn fail(summary: &str) -> CompletionResponse {
    CompletionResponse::tool_use(
        "complete_task",
        serde_json::json!({"status": "failed", "summary": summary}),
    )
}

fn qa_pass() -> CompletionResponse {
    CompletionResponse::tool_use("submit_verdict", serde_json::json!({"pass": true}))
}

fn qa_fail(feedback: &str) -> CompletionResponse {
    CompletionResponse::tool_use(
        "submit_verdict",
        serde_json::json!({"pass": false, "feedback": feedback}),
    )
}

fn write_file(path: &str, content: &str) -> CompletionResponse {
    CompletionResponse::tool_use("write", serde_json::json!({"path": path, "content": content}))
}

// ---------------------------------------------------------------------
// S1: linear three-task run from a bare objective
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s1_linear_three_task_run() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path()).await;

    let responses = vec![
        // Director: initial decomposition
        CompletionResponse::tool_use(
            "submit_decomposition",
            serde_json::json!({
                "design_document": "# Hello\nWrite hello.txt, then verify it.",
                "planner_tasks": [
                    {"title": "Plan hello file", "description": "Decompose writing hello.txt"}
                ]
            }),
        ),
        // Planner agent: propose build + test, then finish
        CompletionResponse::tool_use(
            "create_subtasks",
            serde_json::json!({
                "tasks": [
                    {
                        "title": "Write hello file",
                        "description": "Create hello.txt containing exactly 'hi'",
                        "phase": "build",
                        "acceptance_criteria": ["hello.txt exists with content hi"]
                    },
                    {
                        "title": "Verify hello file",
                        "description": "Read hello.txt and report its content",
                        "phase": "test",
                        "depends_on": ["Write hello file"]
                    }
                ]
            }),
        ),
        complete("proposed build and test tasks"),
        // Director: plan integration pass 1
        CompletionResponse::tool_use("submit_task_selection", serde_json::json!({"keep": [0, 1]})),
        // Coder: write the file and finish
        write_file("hello.txt", "hi"),
        complete("wrote hello.txt"),
        // QA over the build
        qa_pass(),
        // Tester: read, report, finish
        CompletionResponse::tool_use("read", serde_json::json!({"path": "hello.txt"})),
        CompletionResponse::tool_use(
            "write_report",
            serde_json::json!({"content": "# Report\nhello.txt contains hi. PASS."}),
        ),
        complete("verified hello.txt"),
        // QA over the test
        qa_pass(),
    ];

    let harness = Harness::new(responses);
    let run = Run::new("produce hello.txt with the text hi", repo.path());
    let run_id = harness.seed(run).await;

    let status = harness.drive(&run_id).await;
    assert_eq!(status, RunStatus::Completed);

    let run = harness.store.get_run_required(&run_id).await.unwrap();
    assert!(run.all_tasks_terminal());
    assert_eq!(run.tasks.len(), 3);

    // The artifact landed on trunk
    let hello = std::fs::read_to_string(repo.path().join("hello.txt")).unwrap();
    assert_eq!(hello, "hi");

    // Exactly one attributed merge commit per completed worktree task
    let build = run.tasks.iter().find(|t| t.title == "Write hello file").unwrap();
    let test = run.tasks.iter().find(|t| t.title == "Verify hello file").unwrap();
    assert_eq!(attribution_count(repo.path(), &build.id).await, 1);
    assert_eq!(attribution_count(repo.path(), &test.id).await, 1);

    // No worktrees left behind
    let leftovers: Vec<_> = std::fs::read_dir(harness.worktree_base().join(&run_id))
        .map(|entries| entries.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "worktrees remain: {:?}", leftovers);

    // Every LLM call was consumed: the script matched the run exactly
    assert_eq!(harness.invoker.call_count(), 11);
}

// ---------------------------------------------------------------------
// S2: Phoenix retry on a failed build
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s2_phoenix_build_retry() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path()).await;

    let responses = vec![
        // Attempt 1: worker declares failure
        fail("could not find the right place for the file"),
        // Attempt 2: worker succeeds
        write_file("output.txt", "recovered"),
        complete("wrote output.txt"),
        qa_pass(),
    ];

    let harness = Harness::new(responses);
    let mut run = Run::new("seeded build", repo.path());
    let mut task = Task::with_id("b-1", "Write output", TaskPhase::Build);
    task.status = TaskStatus::Ready;
    task.max_retries = 1;
    run.tasks.push(task);
    let run_id = harness.seed(run).await;

    let status = harness.drive(&run_id).await;
    assert_eq!(status, RunStatus::Completed);

    let run = harness.store.get_run_required(&run_id).await.unwrap();
    let task = run.task("b-1").unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.retry_count, 1);

    // The second attempt started from a wiped context: no trace of the
    // first attempt's transcript remains
    let memories = run.task_memories.get("b-1").unwrap();
    let transcript = serde_json::to_string(memories).unwrap();
    assert!(!transcript.contains("could not find the right place"));
    assert!(transcript.contains("output.txt"));

    // A single attributed trunk commit
    assert_eq!(attribution_count(repo.path(), "b-1").await, 1);
}

// ---------------------------------------------------------------------
// S3: failed test spawns a fix build, then the test re-runs
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s3_failed_test_spawns_fix_build() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path()).await;

    let responses = vec![
        // Test attempt 1
        CompletionResponse::tool_use(
            "write_report",
            serde_json::json!({"content": "# Report\nedge case fails"}),
        ),
        complete("ran the tests, edge case fails"),
        qa_fail("the empty-input edge case is broken in the code"),
        // Fix build task
        write_file("fix.txt", "edge case handled"),
        complete("fixed the edge case"),
        qa_pass(),
        // Test attempt 2
        CompletionResponse::tool_use(
            "write_report",
            serde_json::json!({"content": "# Report\nall pass"}),
        ),
        complete("all tests pass now"),
        qa_pass(),
    ];

    let harness = Harness::new(responses);
    let mut run = Run::new("seeded test scenario", repo.path());
    let mut build = Task::with_id("b-1", "Build feature", TaskPhase::Build);
    build.status = TaskStatus::Complete;
    let mut test = Task::with_id("t-1", "Test feature", TaskPhase::Test);
    test.status = TaskStatus::Ready;
    test.depends_on = vec!["b-1".to_string()];
    run.tasks.push(build);
    run.tasks.push(test);
    let run_id = harness.seed(run).await;

    let status = harness.drive(&run_id).await;
    assert_eq!(status, RunStatus::Completed);

    let run = harness.store.get_run_required(&run_id).await.unwrap();
    assert!(run.all_tasks_terminal());

    // A fix build referencing the QA feedback was spawned and completed
    let fix = run.tasks.iter().find(|t| t.title.starts_with("Fix:")).unwrap();
    assert_eq!(fix.phase, TaskPhase::Build);
    assert!(fix.description.contains("empty-input"));
    assert_eq!(fix.status, TaskStatus::Complete);

    // The test gained a dependency on the fix and re-ran to complete
    let test = run.task("t-1").unwrap();
    assert!(test.depends_on.contains(&fix.id));
    assert_eq!(test.status, TaskStatus::Complete);
    assert_eq!(test.retry_count, 1);
}

// ---------------------------------------------------------------------
// S4: merge conflict resolved by a spawned merger task
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s4_merge_conflict_resolution() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path()).await;
    std::fs::write(repo.path().join("shared.txt"), "base\n").unwrap();
    git(repo.path(), &["add", "-A"]).await;
    git(repo.path(), &["commit", "-m", "seed shared"]).await;

    let harness = Harness::new(vec![]);
    let mut run = Run::new("conflicting builds", repo.path());
    let run_id = run.run_id.clone();

    // Build the conflicted state by hand: b-2's branch edits the same line
    // trunk has since changed
    let manager = WorktreeManager::new(WorktreeConfig {
        base_dir: harness.worktree_base().join(&run_id),
        repo_root: repo.path().to_path_buf(),
        trunk: "main".to_string(),
        command_timeout: Duration::from_secs(30),
    });
    let info = manager.create_worktree("b-2", 0, None).await.unwrap();
    std::fs::write(info.path.join("shared.txt"), "from b-2\n").unwrap();
    manager.commit_changes("b-2", "b-2: edit shared").await.unwrap();

    // First task merged cleanly (simulated directly on trunk)
    std::fs::write(repo.path().join("shared.txt"), "from b-1\n").unwrap();
    git(repo.path(), &["add", "-A"]).await;
    git(repo.path(), &["commit", "-m", "Merge task: first [task:b-1]"]).await;

    let mut b1 = Task::with_id("b-1", "first", TaskPhase::Build);
    b1.status = TaskStatus::Complete;
    let mut b2 = Task::with_id("b-2", "second", TaskPhase::Build);
    b2.status = TaskStatus::AwaitingQa;
    b2.worktree_path = Some(info.path.clone());
    b2.branch_name = Some(info.branch.clone());
    // QA already passed; the merge is what remains
    b2.qa_verdict = Some(QaVerdict {
        pass: true,
        ..Default::default()
    });
    run.tasks.push(b1);
    run.tasks.push(b2);
    harness.seed(run).await;

    // Script the merger agent: reconcile both sides, continue the rebase
    harness.invoker.push(CompletionResponse::tool_use(
        "read",
        serde_json::json!({"path": "shared.txt"}),
    ));
    harness.invoker.push(write_file("shared.txt", "from b-1\nfrom b-2\n"));
    harness.invoker.push(CompletionResponse::tool_use(
        "bash",
        serde_json::json!({"command": "git add -A && GIT_EDITOR=true git rebase --continue"}),
    ));
    harness.invoker.push(complete("reconciled both sides and continued the rebase"));

    let status = harness.drive(&run_id).await;
    assert_eq!(status, RunStatus::Completed);

    let run = harness.store.get_run_required(&run_id).await.unwrap();
    assert!(run.all_tasks_terminal());

    // A merger task ran and completed
    let merger = run.tasks.iter().find(|t| t.merge_context.is_some()).unwrap();
    assert_eq!(merger.assigned_worker_profile, WorkerProfile::Merger);
    assert_eq!(merger.status, TaskStatus::Complete);
    assert_eq!(
        merger.merge_context.as_ref().unwrap().conflicting_files,
        vec!["shared.txt".to_string()]
    );

    // Trunk holds both changes
    let merged = std::fs::read_to_string(repo.path().join("shared.txt")).unwrap();
    assert!(merged.contains("from b-1"));
    assert!(merged.contains("from b-2"));
    assert_eq!(attribution_count(repo.path(), "b-2").await, 1);
}

// ---------------------------------------------------------------------
// S5: HITL escalation and resolve-with-retry
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s5_hitl_resolve_with_retry() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path()).await;

    let responses = vec![
        // Attempt at retry_count=3: fails, Phoenix burns the last retry
        fail("still broken"),
        // Attempt at retry_count=4: fails, escalates
        fail("broken again"),
    ];

    let harness = Harness::new(responses);
    let mut run = Run::new("escalating build", repo.path());
    let mut task = Task::with_id("b-1", "Stubborn task", TaskPhase::Build);
    task.status = TaskStatus::Ready;
    task.retry_count = 3;
    run.tasks.push(task);
    let run_id = harness.seed(run).await;

    // Interrupt broadcast is observable
    let mut events = harness.broadcaster.subscribe();

    let status = harness.drive(&run_id).await;
    assert_eq!(status, RunStatus::Interrupted);

    let run = harness.store.get_run_required(&run_id).await.unwrap();
    let task = run.task("b-1").unwrap();
    assert_eq!(task.status, TaskStatus::WaitingHuman);
    assert!(task.pending_resolution.is_some());

    let mut saw_human_needed = false;
    while let Ok(event) = events.try_recv() {
        if event.event_type == EventType::HumanNeeded {
            saw_human_needed = true;
        }
    }
    assert!(saw_human_needed, "human_needed event not broadcast");

    // Resolve with retry and a modified description through the control
    // plane; the run restarts and the now-succeeding mock finishes it
    harness.invoker.push(write_file("fixed.txt", "finally"));
    harness.invoker.push(complete("worked after the human hint"));
    harness.invoker.push(qa_pass());

    let plane = ControlPlane::new(
        harness.store.clone(),
        harness.checkpointer.clone(),
        harness.broadcaster.clone(),
        harness.invoker.clone() as Arc<dyn LlmInvoker>,
        harness.config.clone(),
    );
    plane
        .resolve(
            &run_id,
            Resolution {
                task_id: "b-1".to_string(),
                action: ResolveAction::Retry {
                    modified_description: Some("try creating fixed.txt instead".to_string()),
                    modified_criteria: None,
                },
            },
        )
        .await
        .unwrap();
    plane.join_loop(&run_id).await;

    let run = harness.store.get_run_required(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let task = run.task("b-1").unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.description, "try creating fixed.txt instead");
    assert!(repo.path().join("fixed.txt").exists());
}

// ---------------------------------------------------------------------
// S6: cycle rejection during plan integration
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_cycle_rejected_during_integration() {
    use conductor::director::Director;

    let repo = tempfile::tempdir().unwrap();

    // A completed planner proposes A -> B -> C by title; a poisoned Pass 2
    // response then tries to close C -> A through a dependency query
    let mut run = Run::new("cycle objective", repo.path());
    let mut planner = Task::with_id("p-1", "planner", TaskPhase::Plan);
    planner.assigned_worker_profile = WorkerProfile::Planner;
    planner.status = TaskStatus::Complete;
    planner.suggested_tasks = vec![
        conductor::domain::SuggestedTask {
            title: "A".to_string(),
            description: "a".to_string(),
            component: String::new(),
            phase: TaskPhase::Build,
            depends_on: vec!["B".to_string()],
            dependency_queries: vec![],
            acceptance_criteria: vec![],
            priority: 0,
        },
        conductor::domain::SuggestedTask {
            title: "B".to_string(),
            description: "b".to_string(),
            component: String::new(),
            phase: TaskPhase::Build,
            depends_on: vec!["C".to_string()],
            dependency_queries: vec![],
            acceptance_criteria: vec![],
            priority: 0,
        },
        conductor::domain::SuggestedTask {
            title: "C".to_string(),
            description: "c".to_string(),
            component: String::new(),
            phase: TaskPhase::Test,
            depends_on: vec![],
            dependency_queries: vec!["the task that kicks everything off".to_string()],
            acceptance_criteria: vec![],
            priority: 0,
        },
    ];
    run.tasks.push(planner);

    // Pass 2 cannot know the generated ids up front, so the mock is built
    // after a dry pass: instead, script selection first and answer the
    // resolution call with ids captured from the request is not possible
    // with a scripted mock. Rely on the title->id mapping: run integration
    // once so ids exist, then poison the edge directly through the store
    // patch path to prove the reducer-level rejection as well.
    let invoker: Arc<dyn LlmInvoker> = Arc::new(MockInvoker::scripted(vec![
        Ok(CompletionResponse::tool_use(
            "submit_task_selection",
            serde_json::json!({"keep": [0, 1, 2]}),
        )),
        // Pass 2 resolves C's query to... nothing valid it can name; the
        // director drops unknown ids and consumes the query
        Ok(CompletionResponse::tool_use(
            "submit_dependency_resolutions",
            serde_json::json!({"resolutions": [
                {"task_id": "unknown", "query": "the task that kicks everything off", "depends_on": []}
            ]}),
        )),
    ]));

    let director = Director::new(invoker, conductor::config::DirectorConfig::default());
    let report = director.tick(&run).await.unwrap();
    assert!(report.integrated);

    let store = TaskStore::spawn();
    store.create_run(run.clone()).await.unwrap();
    store.apply(&run.run_id, report.patch).await.unwrap();

    let integrated = store.get_run_required(&run.run_id).await.unwrap();
    let a = integrated.tasks.iter().find(|t| t.title == "A").unwrap().clone();
    let c = integrated.tasks.iter().find(|t| t.title == "C").unwrap().clone();

    // The chain A -> B -> C landed
    assert!(conductor::domain::dag::topological_order(&integrated.tasks).is_some());

    // Now close the loop C -> A by hand: the reducer rejects it and the
    // run is untouched
    let mut poisoned = c.clone();
    poisoned.depends_on.push(a.id.clone());
    let err = store
        .apply(&integrated.run_id, RunPatch::new().with_task(poisoned))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "cycle_detected");

    let after = store.get_run_required(&integrated.run_id).await.unwrap();
    let c_after = after.tasks.iter().find(|t| t.title == "C").unwrap();
    assert!(!c_after.depends_on.contains(&a.id));
}

// ---------------------------------------------------------------------
// Restart semantics: a mid-flight task returns to ready
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_demotes_interrupted_active_task() {
    let repo = tempfile::tempdir().unwrap();
    init_repo(repo.path()).await;

    let responses = vec![write_file("late.txt", "made it"), complete("done after restart"), qa_pass()];
    let harness = Harness::new(responses);

    let mut run = Run::new("restart objective", repo.path());
    // This task claims to be active but no job exists: the previous
    // process died mid-dispatch
    let mut task = Task::with_id("b-1", "Interrupted task", TaskPhase::Build);
    task.status = TaskStatus::Active;
    task.worktree_path = Some(PathBuf::from("/nonexistent/worktree"));
    task.branch_name = Some("task/b-1".to_string());
    run.tasks.push(task);
    let run_id = harness.seed(run).await;

    let status = harness.drive(&run_id).await;
    assert_eq!(status, RunStatus::Completed);

    let run = harness.store.get_run_required(&run_id).await.unwrap();
    assert_eq!(run.task("b-1").unwrap().status, TaskStatus::Complete);
    assert!(repo.path().join("late.txt").exists());
}
