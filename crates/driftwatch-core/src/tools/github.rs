use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::Tool;

/// An out-of-process lookup helper. Lookups run as isolated child processes
/// so a wedged or crashing helper can never take the worker down with it.
#[derive(Debug, Clone)]
pub struct HelperCommand {
    program: String,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl HelperCommand {
    /// Split a configured command line into program + leading arguments.
    pub fn parse(command: &str, timeout_secs: u64) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("helper command is empty"))?;
        Ok(Self {
            program,
            leading_args: parts.collect(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Run the helper with `--flag value` pairs appended.
    ///
    /// Exit 0 returns stdout as-is. Anything else is reported through the
    /// error-string convention (`exit_code=…`, `stderr=…`) so the caller can
    /// fold it into context instead of crashing.
    pub async fn run(&self, flags: &[(&str, &str)]) -> String {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        for (flag, value) in flags {
            cmd.arg(flag).arg(value);
        }
        debug!(program = %self.program, ?flags, "Running lookup helper");

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).into_owned()
            }
            Ok(Ok(output)) => {
                let code = output.status.code().unwrap_or(-1);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stdout = String::from_utf8_lossy(&output.stdout);

                let mut message = format!("exit_code={code}\n");
                if stderr.trim().is_empty() {
                    message.push_str("stderr is empty.\n");
                } else {
                    message.push_str(&format!("stderr={stderr}"));
                }
                if !stdout.trim().is_empty() {
                    message.push_str(&format!("stdout={stdout}"));
                }
                message
            }
            Ok(Err(e)) => format!(
                "exit_code=-1\nstderr=failed to start helper '{}': {e}",
                self.program
            ),
            Err(_) => format!(
                "exit_code=-1\nstderr=helper '{}' timed out after {}s",
                self.program,
                self.timeout.as_secs()
            ),
        }
    }
}

/// Lists every file path in a repository branch, one per line.
pub struct ListRepoFilesTool {
    helper: HelperCommand,
}

impl ListRepoFilesTool {
    pub fn new(helper: HelperCommand) -> Self {
        Self { helper }
    }
}

#[async_trait]
impl Tool for ListRepoFilesTool {
    fn name(&self) -> &str {
        "list_repo_files"
    }

    fn description(&self) -> &str {
        "List all file paths in the given GitHub repository and branch, one per line."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repoName": {
                    "type": "string",
                    "description": "Full repository name in the format \"owner/repo\""
                },
                "branch": {
                    "type": "string",
                    "description": "Branch name to list files from (default: main)"
                }
            },
            "required": ["repoName"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let repo = args
            .get("repoName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: repoName"))?;
        let branch = args.get("branch").and_then(|v| v.as_str()).unwrap_or("main");

        Ok(self
            .helper
            .run(&[("--repo-name", repo), ("--branch", branch)])
            .await)
    }
}

/// Retrieves the raw content of one file from a repository branch.
pub struct FileContentTool {
    helper: HelperCommand,
}

impl FileContentTool {
    pub fn new(helper: HelperCommand) -> Self {
        Self { helper }
    }
}

#[async_trait]
impl Tool for FileContentTool {
    fn name(&self) -> &str {
        "get_file_content"
    }

    fn description(&self) -> &str {
        "Retrieve the raw content of a file from the given GitHub repository and branch."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repoName": {
                    "type": "string",
                    "description": "Full repository name in the format \"owner/repo\""
                },
                "filePath": {
                    "type": "string",
                    "description": "Path to the file within the repository"
                },
                "branch": {
                    "type": "string",
                    "description": "Branch name to read from (default: main)"
                }
            },
            "required": ["repoName", "filePath"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let repo = args
            .get("repoName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: repoName"))?;
        let file_path = args
            .get("filePath")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: filePath"))?;
        let branch = args.get("branch").and_then(|v| v.as_str()).unwrap_or("main");

        Ok(self
            .helper
            .run(&[
                ("--repo-name", repo),
                ("--file-path", file_path),
                ("--branch", branch),
            ])
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script_helper(dir: &tempfile::TempDir, body: &str, timeout_secs: u64) -> HelperCommand {
        let path = dir.path().join("helper.sh");
        std::fs::write(&path, body).unwrap();
        HelperCommand::parse(&format!("sh {}", path.display()), timeout_secs).unwrap()
    }

    #[test]
    fn empty_command_rejected() {
        assert!(HelperCommand::parse("", 5).is_err());
        assert!(HelperCommand::parse("   ", 5).is_err());
    }

    #[test]
    fn command_line_split_into_program_and_args() {
        let helper = HelperCommand::parse("uv run scripts/list.py", 5).unwrap();
        assert_eq!(helper.program, "uv");
        assert_eq!(helper.leading_args, vec!["run", "scripts/list.py"]);
    }

    #[tokio::test]
    async fn success_passes_stdout_through() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script_helper(&dir, "printf 'README.md\\nsrc/main.rs\\n'", 5);
        let out = helper.run(&[]).await;
        assert_eq!(out, "README.md\nsrc/main.rs\n");
    }

    #[tokio::test]
    async fn failure_uses_error_string_convention() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script_helper(&dir, "echo 'repo not found' >&2; exit 1", 5);
        let out = helper.run(&[]).await;
        assert!(out.starts_with("exit_code=1\n"));
        assert!(out.contains("stderr=repo not found"));
    }

    #[tokio::test]
    async fn failure_with_silent_stderr_notes_it() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script_helper(&dir, "echo 'partial output'; exit 3", 5);
        let out = helper.run(&[]).await;
        assert!(out.contains("exit_code=3"));
        assert!(out.contains("stderr is empty."));
        assert!(out.contains("stdout=partial output"));
    }

    #[tokio::test]
    async fn flags_reach_the_helper() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script_helper(&dir, "echo \"$@\"", 5);
        let out = helper
            .run(&[("--repo-name", "acme/widgets"), ("--branch", "main")])
            .await;
        assert!(out.contains("--repo-name acme/widgets --branch main"));
    }

    #[tokio::test]
    async fn timeout_reports_instead_of_hanging() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script_helper(&dir, "sleep 10", 1);
        let out = helper.run(&[]).await;
        assert!(out.contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_failure() {
        let helper = HelperCommand::parse("definitely-not-a-real-binary-xyz", 5).unwrap();
        let out = helper.run(&[]).await;
        assert!(out.contains("failed to start helper"));
    }

    #[tokio::test]
    async fn list_tool_defaults_branch_to_main() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListRepoFilesTool::new(script_helper(&dir, "echo \"$@\"", 5));
        let out = tool
            .execute(serde_json::json!({"repoName": "acme/widgets"}))
            .await
            .unwrap();
        assert!(out.contains("--repo-name acme/widgets"));
        assert!(out.contains("--branch main"));
    }

    #[tokio::test]
    async fn content_tool_forwards_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileContentTool::new(script_helper(&dir, "echo \"$@\"", 5));
        let out = tool
            .execute(serde_json::json!({
                "repoName": "acme/widgets",
                "filePath": "docs/usage.md",
                "branch": "dev"
            }))
            .await
            .unwrap();
        assert!(out.contains("--file-path docs/usage.md"));
        assert!(out.contains("--branch dev"));
    }
}
