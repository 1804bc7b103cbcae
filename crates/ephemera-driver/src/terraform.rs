use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ephemera_domain::{IacTool, Layer, OutputSet, Vars};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engine::IacEngine;
use crate::error::DriverError;

// ── TerraformCli ──────────────────────────────────────────────────────────────

/// Executes layers by invoking the `terraform`, `terragrunt`, or `tofu`
/// binary in the layer's module directory.
///
/// Responsibilities:
/// - Run `init` + `apply -auto-approve` (or `destroy`) in the module dir
/// - Pass variables as `-var 'key=<hcl>'` arguments, so shared module
///   directories are never mutated and concurrent scenarios cannot collide
///   on disk
/// - Capture combined stdout+stderr, mirroring each line to tracing
/// - Parse declared outputs from `output -json`
pub struct TerraformCli {
    default_tool: IacTool,
    /// Resolved binary path override. None resolves the tool name from PATH.
    binary_path: Option<PathBuf>,
    /// Hard per-command timeout; the child is killed when it elapses.
    timeout: Duration,
    /// Extra environment for the subprocess (cloud auth, usually ARM_*).
    env: HashMap<String, String>,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new()
    }
}

impl TerraformCli {
    pub fn new() -> Self {
        Self {
            default_tool: IacTool::Terraform,
            binary_path: None,
            timeout: Duration::from_secs(1800),
            env: HashMap::new(),
        }
    }

    /// Default tool for layers that carry no override.
    pub fn default_tool(mut self, tool: IacTool) -> Self {
        self.default_tool = tool;
        self
    }

    /// Use an explicit binary path for every layer instead of resolving the
    /// tool name from PATH.
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set an environment variable on every subprocess this engine spawns.
    /// Cloud auth (e.g. `ARM_CLIENT_ID`) travels this way and is never
    /// written to disk.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn binary(&self, layer: &Layer) -> String {
        match &self.binary_path {
            Some(path) => path.display().to_string(),
            None => layer.tool.unwrap_or(self.default_tool).binary().to_string(),
        }
    }

    // ── Process execution ─────────────────────────────────────────────────────

    /// Run one subcommand, capturing combined stdout+stderr.
    /// Returns (exit_code, combined_log).
    async fn run(
        &self,
        binary: &str,
        dir: &Path,
        args: &[String],
    ) -> Result<(i32, String), DriverError> {
        info!(binary, ?args, dir = %dir.display(), "running IaC command");

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .current_dir(dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // Disable interactive prompts and colour
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .envs(&self.env);

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::Internal(format!("spawn {}: {}", binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Internal("stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DriverError::Internal("stderr not piped".into()))?;

        // Merge stdout and stderr by reading them concurrently into a shared
        // log buffer. Each line is also mirrored to tracing.
        let mut log = String::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let tx1 = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx1.send(line);
            }
        });

        let tx2 = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx2.send(line);
            }
        });

        drop(tx); // close our own sender so rx finishes when both tasks finish

        let collect = async {
            while let Some(line) = rx.recv().await {
                debug!(target: "ephemera::iac", "{}", line);
                log.push_str(&line);
                log.push('\n');
            }
        };
        let timed_out = tokio::time::timeout(self.timeout, collect).await.is_err();

        stdout_task.await.ok();
        stderr_task.await.ok();

        if timed_out {
            let _ = child.kill().await;
            return Err(DriverError::ProvisionFailed(format!(
                "{} {} timed out after {}s",
                binary,
                args.first().map(String::as_str).unwrap_or(""),
                self.timeout.as_secs(),
            )));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DriverError::Internal(format!("wait {}: {}", binary, e)))?;

        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!(binary, code, "IaC command exited non-zero");
        }
        Ok((code, log))
    }

    /// Run `output -json` and parse the full output map.
    ///
    /// Unlike apply/destroy, streams are kept separate here: terragrunt logs
    /// to stderr and stdout must stay clean JSON.
    async fn read_outputs(&self, binary: &str, dir: &Path) -> Result<OutputSet, DriverError> {
        let mut cmd = Command::new(binary);
        cmd.args(["output", "-json", "-no-color"])
            .current_dir(dir)
            .stdin(std::process::Stdio::null())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .envs(&self.env);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                DriverError::ProvisionFailed(format!(
                    "{} output timed out after {}s",
                    binary,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| DriverError::Internal(format!("spawn {}: {}", binary, e)))?;

        if !output.status.success() {
            return Err(DriverError::ProvisionFailed(format!(
                "{} output exited with code {}: {}",
                binary,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim(),
            )));
        }

        let map: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            DriverError::ProvisionFailed(format!("parse {} output: {}", binary, e))
        })?;
        let obj = map.as_object().ok_or_else(|| {
            DriverError::ProvisionFailed(format!("{} output is not a JSON object", binary))
        })?;

        // Each entry is { "value": ..., "type": ..., "sensitive": ... }.
        let outputs = obj
            .iter()
            .map(|(k, v)| (k.clone(), v.get("value").cloned().unwrap_or(Value::Null)))
            .collect();
        Ok(outputs)
    }
}

#[async_trait]
impl IacEngine for TerraformCli {
    fn name(&self) -> &'static str {
        "terraform-cli"
    }

    async fn apply(&self, layer: &Layer, vars: &Vars) -> Result<OutputSet, DriverError> {
        let binary = self.binary(layer);

        let init_args: Vec<String> = ["init", "-input=false", "-no-color"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (code, log) = self.run(&binary, &layer.dir, &init_args).await?;
        if code != 0 {
            return Err(DriverError::ProvisionFailed(format!(
                "{} init exited with code {} in {}:\n{}",
                binary,
                code,
                layer.dir.display(),
                log,
            )));
        }

        let mut apply_args: Vec<String> = ["apply", "-auto-approve", "-input=false", "-no-color"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        apply_args.extend(var_args(vars));
        let (code, log) = self.run(&binary, &layer.dir, &apply_args).await?;
        if code != 0 {
            return Err(DriverError::ProvisionFailed(format!(
                "{} apply exited with code {} in {}:\n{}",
                binary,
                code,
                layer.dir.display(),
                log,
            )));
        }

        self.read_outputs(&binary, &layer.dir).await
    }

    async fn outputs(&self, layer: &Layer) -> Result<OutputSet, DriverError> {
        let binary = self.binary(layer);
        self.read_outputs(&binary, &layer.dir).await
    }

    async fn destroy(&self, layer: &Layer, vars: &Vars) -> Result<(), DriverError> {
        let binary = self.binary(layer);

        let mut args: Vec<String> = ["destroy", "-auto-approve", "-input=false", "-no-color"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(var_args(vars));

        let (code, log) = match self.run(&binary, &layer.dir, &args).await {
            Ok(out) => out,
            Err(DriverError::ProvisionFailed(msg)) => {
                return Err(DriverError::TeardownFailed(msg))
            }
            Err(e) => return Err(e),
        };
        if code != 0 {
            return Err(DriverError::TeardownFailed(format!(
                "{} destroy exited with code {} in {}:\n{}",
                binary,
                code,
                layer.dir.display(),
                log,
            )));
        }
        Ok(())
    }
}

// ── Variable serialization ────────────────────────────────────────────────────

/// Render the variable map as `-var key=<expr>` argument pairs, keys sorted
/// for a stable command line.
fn var_args(vars: &Vars) -> Vec<String> {
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();
    let mut args = Vec::with_capacity(keys.len() * 2);
    for key in keys {
        args.push("-var".to_string());
        args.push(format!("{}={}", key, hcl_value(&vars[key.as_str()])));
    }
    args
}

/// Serialize a JSON-shaped value as an HCL expression, as accepted by
/// `-var` for scalars, lists, and nested maps.
fn hcl_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => hcl_string(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(hcl_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .iter()
                .map(|k| format!("{} = {}", hcl_string(k), hcl_value(&map[k.as_str()])))
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
    }
}

/// Quote a string for HCL: escape backslashes and double-quotes, and defuse
/// the `${` / `%{` template sequences.
fn hcl_string(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "$${")
        .replace("%{", "%%{");
    format!("\"{}\"", escaped)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── hcl_value (pure) ──────────────────────────────────────────────────────

    #[test]
    fn hcl_scalars() {
        assert_eq!(hcl_value(&json!("East US")), "\"East US\"");
        assert_eq!(hcl_value(&json!(true)), "true");
        assert_eq!(hcl_value(&json!(7)), "7");
        assert_eq!(hcl_value(&json!(null)), "null");
    }

    #[test]
    fn hcl_string_escaping() {
        assert_eq!(hcl_value(&json!(r#"a"b\c"#)), r#""a\"b\\c""#);
        assert_eq!(hcl_value(&json!("${injected}")), "\"$${injected}\"");
    }

    #[test]
    fn hcl_list() {
        assert_eq!(
            hcl_value(&json!(["10.10.0.0/16", "10.20.0.0/16"])),
            "[\"10.10.0.0/16\", \"10.20.0.0/16\"]"
        );
    }

    #[test]
    fn hcl_nested_map() {
        let v = json!({
            "test-subnet": { "address_prefix": "10.10.1.0/24" }
        });
        assert_eq!(
            hcl_value(&v),
            "{ \"test-subnet\" = { \"address_prefix\" = \"10.10.1.0/24\" } }"
        );
    }

    #[test]
    fn var_args_sorted_pairs() {
        let mut vars = Vars::new();
        vars.insert("resource_group_name".into(), json!("rg-test-x"));
        vars.insert("create_network_security_group".into(), json!(true));
        let args = var_args(&vars);
        assert_eq!(
            args,
            vec![
                "-var".to_string(),
                "create_network_security_group=true".to_string(),
                "-var".to_string(),
                "resource_group_name=\"rg-test-x\"".to_string(),
            ]
        );
    }

    // ── Subprocess behaviour (stub binary) ────────────────────────────────────

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable stub that logs its invocations and plays the
        /// part of terraform.
        fn write_stub(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
            let path = dir.join("stub-terraform");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        fn ok_stub(dir: &std::path::Path) -> std::path::PathBuf {
            write_stub(
                dir,
                r#"echo "$@" >> "$PWD/calls.log"
case "$1" in
  output) printf '{"name":{"value":"rg-test-x"},"subnet_ids":{"value":{"test-subnet":"sub-id"}}}' ;;
  *) echo "$1 complete" ;;
esac"#,
            )
        }

        fn layer(dir: &std::path::Path) -> Layer {
            Layer::new("resource_group", dir)
        }

        #[tokio::test]
        async fn apply_runs_init_apply_output_and_parses_outputs() {
            let tmp = tempfile::tempdir().unwrap();
            let stub = ok_stub(tmp.path());
            let engine = TerraformCli::new().binary_path(&stub);

            let mut vars = Vars::new();
            vars.insert("resource_group_name".into(), json!("rg-test-x"));

            let outputs = engine.apply(&layer(tmp.path()), &vars).await.unwrap();
            assert_eq!(outputs.str_value("name"), Some("rg-test-x"));
            assert!(outputs.contains_entry("subnet_ids", "test-subnet"));

            let calls = std::fs::read_to_string(tmp.path().join("calls.log")).unwrap();
            let lines: Vec<&str> = calls.lines().collect();
            assert!(lines[0].starts_with("init"));
            assert!(lines[1].starts_with("apply -auto-approve"));
            assert!(
                lines[1].contains("-var resource_group_name=\"rg-test-x\""),
                "vars must travel as -var args: {}",
                lines[1]
            );
            assert!(lines[2].starts_with("output -json"));
        }

        #[tokio::test]
        async fn apply_failure_is_fatal_with_diagnostics() {
            let tmp = tempfile::tempdir().unwrap();
            let stub = write_stub(
                tmp.path(),
                r#"case "$1" in
  init) echo "Initializing..." ;;
  apply) echo "Error: building plan"; exit 1 ;;
esac"#,
            );
            let engine = TerraformCli::new().binary_path(&stub);

            let err = engine
                .apply(&layer(tmp.path()), &Vars::new())
                .await
                .unwrap_err();
            match err {
                DriverError::ProvisionFailed(msg) => {
                    assert!(msg.contains("apply exited with code 1"), "got: {}", msg);
                    assert!(msg.contains("Error: building plan"), "got: {}", msg);
                }
                other => panic!("expected ProvisionFailed, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn destroy_failure_maps_to_teardown_error() {
            let tmp = tempfile::tempdir().unwrap();
            let stub = write_stub(tmp.path(), r#"echo "cannot destroy"; exit 1"#);
            let engine = TerraformCli::new().binary_path(&stub);

            let err = engine
                .destroy(&layer(tmp.path()), &Vars::new())
                .await
                .unwrap_err();
            assert!(matches!(err, DriverError::TeardownFailed(_)), "got {:?}", err);
        }

        #[tokio::test]
        async fn stuck_command_is_killed_on_timeout() {
            let tmp = tempfile::tempdir().unwrap();
            let stub = write_stub(tmp.path(), "sleep 30");
            let engine = TerraformCli::new()
                .binary_path(&stub)
                .timeout(Duration::from_millis(200));

            let err = engine
                .apply(&layer(tmp.path()), &Vars::new())
                .await
                .unwrap_err();
            match err {
                DriverError::ProvisionFailed(msg) => {
                    assert!(msg.contains("timed out"), "got: {}", msg)
                }
                other => panic!("expected ProvisionFailed, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn outputs_tolerates_stderr_noise() {
            // Terragrunt writes its own log lines to stderr; stdout must
            // still parse as clean JSON.
            let tmp = tempfile::tempdir().unwrap();
            let stub = write_stub(
                tmp.path(),
                r#"echo "time=12:00 level=info msg=reading" >&2
printf '{"vnet_id":{"value":"vnet-123"}}'"#,
            );
            let engine = TerraformCli::new().binary_path(&stub);

            let outputs = engine.outputs(&layer(tmp.path())).await.unwrap();
            assert_eq!(outputs.str_value("vnet_id"), Some("vnet-123"));
        }

        #[tokio::test]
        async fn missing_binary_is_an_internal_error() {
            let tmp = tempfile::tempdir().unwrap();
            let engine = TerraformCli::new().binary_path("/nonexistent/terraform");
            let err = engine
                .apply(&layer(tmp.path()), &Vars::new())
                .await
                .unwrap_err();
            assert!(matches!(err, DriverError::Internal(_)), "got {:?}", err);
        }
    }
}
