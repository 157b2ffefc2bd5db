use tokio::process::Command;

/// Current branch name in `dir`, or `None` outside a git repo / on any
/// failure — used by the PR-created handler, which has no transcript to
/// read a branch from (spec.md §4.5).
pub async fn branch_in(dir: &str) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(["branch", "--show-current"]);
    cmd.current_dir(dir);
    let out = cmd.output().await.ok()?;
    if out.status.success() {
        let branch = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if branch.is_empty() {
            None
        } else {
            Some(branch)
        }
    } else {
        None
    }
}
