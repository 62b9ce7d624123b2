//! CLI tests for the default git-ref backend and commit linking.

use std::path::Path;
use std::process::{Command, Output};

use vtask::io::git::Git;
use vtask::test_support::temp_git_repo;

fn vtask(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vtask"))
        .current_dir(dir)
        .args(args)
        .env_remove("VTASK_AGENT_MODE")
        .env_remove("CLAUDECODE")
        .env_remove("CODEX_SANDBOX")
        .env_remove("VTASK_BRANCH")
        .env_remove("VTASK_ACTOR")
        .output()
        .expect("spawn vtask")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn tasks_live_in_a_branch_ref() {
    let temp = temp_git_repo();
    let git = Git::new(temp.path());

    let out = vtask(temp.path(), &["add", "write tests"]);
    assert!(out.status.success(), "add failed: {out:?}");
    let id = stdout(&out).trim().to_string();

    let oid = git
        .resolve_ref("refs/vtask/main")
        .expect("resolve")
        .expect("ref exists");
    let blob = String::from_utf8(git.cat_blob(&oid).expect("cat")).expect("utf-8");
    assert!(blob.contains(&format!("\"id\":\"{id}\"")));
    assert!(blob.contains("\"created_by\":\"vtask tests\""));
}

#[test]
fn done_with_commit_links_the_new_commit() {
    let temp = temp_git_repo();
    let git = Git::new(temp.path());
    let id = stdout(&vtask(temp.path(), &["add", "write tests"]))
        .trim()
        .to_string();

    std::fs::write(temp.path().join("tests.txt"), "ok\n").expect("write");
    let out = vtask(temp.path(), &["done", &id, "--commit", "test: add tests"]);
    assert!(out.status.success(), "done failed: {out:?}");

    let head = git.head_sha().expect("head");
    let show = stdout(&vtask(temp.path(), &["--json", "show", &id]));
    let record: serde_json::Value = serde_json::from_str(show.trim()).expect("json");
    assert_eq!(record["status"], "done");
    assert_eq!(record["closed_commit"], head.as_str());
    assert_eq!(
        last_commit_message(temp.path()),
        format!("test: add tests\n\nTask: {id}")
    );
}

fn last_commit_message(dir: &Path) -> String {
    let out = Command::new("git")
        .args(["log", "-1", "--format=%B"])
        .current_dir(dir)
        .output()
        .expect("git log");
    assert!(out.status.success());
    stdout(&out).trim().to_string()
}

#[test]
fn branches_have_separate_queues() {
    let temp = temp_git_repo();
    let id = stdout(&vtask(temp.path(), &["add", "on main"]))
        .trim()
        .to_string();

    let status = Command::new("git")
        .args(["checkout", "--quiet", "-b", "feature"])
        .current_dir(temp.path())
        .status()
        .expect("git checkout");
    assert!(status.success());

    let listed = stdout(&vtask(temp.path(), &["list", "--all"]));
    assert!(!listed.contains(&id));
}

#[cfg(unix)]
mod agent_runs {
    use super::*;

    /// Write `body` as an agent script outside the repository so it never gets committed.
    fn write_agent(scripts: &Path, body: &str) -> String {
        let script = scripts.join("agent.sh");
        std::fs::write(&script, format!("#!/bin/sh\nset -e\n{body}")).expect("write agent");
        format!("sh {}", script.display())
    }

    fn run(root: &Path, runner: &str) -> Output {
        Command::new(env!("CARGO_BIN_EXE_vtask"))
            .current_dir(root)
            .args(["run", "--runner", runner])
            .env_remove("VTASK_AGENT_MODE")
            .env_remove("CLAUDECODE")
            .env_remove("CODEX_SANDBOX")
            .env_remove("VTASK_BRANCH")
            .env_remove("VTASK_ACTOR")
            .env("VTASK_BIN", env!("CARGO_BIN_EXE_vtask"))
            .output()
            .expect("spawn vtask run")
    }

    fn closed_commit(root: &Path, id: &str) -> serde_json::Value {
        let show = stdout(&vtask(root, &["--json", "show", id]));
        let record: serde_json::Value = serde_json::from_str(show.trim()).expect("json");
        assert_eq!(record["status"], "done");
        record["closed_commit"].clone()
    }

    #[test]
    fn agent_commit_before_done_is_linked() {
        let temp = temp_git_repo();
        let scripts = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        let id = stdout(&vtask(temp.path(), &["add", "write tests"]))
            .trim()
            .to_string();
        let runner = write_agent(
            scripts.path(),
            "echo ok > work.txt\n\
             git add work.txt\n\
             git commit --quiet -m \"feat: work\"\n\
             \"$VTASK_BIN\" done \"$VTASK_TASK_ID\"\n",
        );

        let out = run(temp.path(), &runner);

        assert!(out.status.success(), "run failed: {out:?}");
        let head = git.head_sha().expect("head");
        assert_eq!(closed_commit(temp.path(), &id), head.as_str());
        assert_eq!(last_commit_message(temp.path()), "feat: work");
    }

    #[test]
    fn uncommitted_work_is_committed_and_linked() {
        let temp = temp_git_repo();
        let scripts = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        let id = stdout(&vtask(temp.path(), &["add", "write tests"]))
            .trim()
            .to_string();
        let runner = write_agent(
            scripts.path(),
            "echo ok > work.txt\n\"$VTASK_BIN\" done \"$VTASK_TASK_ID\"\n",
        );

        let out = run(temp.path(), &runner);

        assert!(out.status.success(), "run failed: {out:?}");
        assert!(stdout(&out).contains(&format!("vtask: {id} closed by ")));
        let head = git.head_sha().expect("head");
        assert_eq!(closed_commit(temp.path(), &id), head.as_str());
        assert_eq!(
            last_commit_message(temp.path()),
            format!("vtask: write tests\n\nTask: {id}")
        );
        let tracked = Command::new("git")
            .args(["ls-files"])
            .current_dir(temp.path())
            .output()
            .expect("git ls-files");
        let tracked = stdout(&tracked);
        assert!(tracked.contains("work.txt"));
        assert!(!tracked.contains(".vtask/logs"));
    }

    #[test]
    fn agent_done_with_commit_is_kept() {
        let temp = temp_git_repo();
        let scripts = tempfile::tempdir().expect("tempdir");
        let id = stdout(&vtask(temp.path(), &["add", "write tests"]))
            .trim()
            .to_string();
        let runner = write_agent(
            scripts.path(),
            "echo ok > work.txt\n\
             \"$VTASK_BIN\" done \"$VTASK_TASK_ID\" --commit \"test: add tests\"\n",
        );

        let out = run(temp.path(), &runner);

        assert!(out.status.success(), "run failed: {out:?}");
        let git = Git::new(temp.path());
        assert_eq!(
            closed_commit(temp.path(), &id),
            git.head_sha().expect("head").as_str()
        );
        assert_eq!(
            last_commit_message(temp.path()),
            format!("test: add tests\n\nTask: {id}")
        );
    }
}
