//! Resources backed by executables on disk.
//!
//! Every executable file in the scripts directory is one resource, named
//! after its file stem (`nxFile.sh` serves `nxFile`). An operation runs the
//! executable with the host method name (`Test`, `Set` or `Get`) as its only
//! argument. The arguments arrive on stdin as a JSON object and the script
//! answers on stdout with:
//!
//! ```json
//! {"code": 0, "outputs": {"Name": "value"}}
//! ```
//!
//! `outputs` may be omitted. A script that exits non-zero or prints anything
//! else is a handler error.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Map;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::bridge::{ArgMap, OperationKind, Value, ValueType};
use crate::config::OMI_HOME_ENV;
use crate::registry::Registry;
use crate::resource::{Arguments, Resource, ResourceContext, ResourceError, ResourceResult};

const SPAWN_ATTEMPTS: u32 = 5;

#[derive(Debug, Deserialize)]
struct ScriptReply {
    code: i32,
    #[serde(default)]
    outputs: Option<Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub struct ScriptResource {
    name: String,
    path: PathBuf,
}

impl ScriptResource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run(
        &self,
        operation: OperationKind,
        ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        let input = serde_json::to_vec(&args)
            .map_err(|e| ResourceError::failed(format!("failed to encode arguments: {e}")))?;

        let mut child = self.spawn(operation, ctx).await?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ResourceError::failed("script stdin not captured"))?;

        // Feed stdin while collecting output so a chatty script cannot stall
        // on a full pipe.
        let feed = async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            tracing::debug!(resource = %self.name, %stderr, "Script stderr");
        }

        if !output.status.success() {
            return Err(ResourceError::failed(format!(
                "script {} exited with {}{}",
                self.path.display(),
                output.status,
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {stderr}")
                }
            )));
        }
        if let Err(e) = written {
            // A script may legitimately exit without reading its input.
            tracing::debug!(resource = %self.name, error = %e, "Script did not consume arguments");
        }

        let reply: ScriptReply = serde_json::from_slice(&output.stdout).map_err(|e| {
            ResourceError::failed(format!(
                "script {} printed an invalid reply: {e}",
                self.path.display()
            ))
        })?;
        let outputs = reply.outputs.map(json_to_arg_map).transpose()?;

        tracing::trace!(resource = %self.name, code = reply.code, "Script finished");
        Ok(ResourceResult {
            code: reply.code,
            outputs,
        })
    }

    async fn spawn(
        &self,
        operation: OperationKind,
        ctx: &ResourceContext,
    ) -> Result<Child, ResourceError> {
        let mut attempt = 1;
        loop {
            let spawned = Command::new(&self.path)
                .arg(operation.method_name())
                .env(OMI_HOME_ENV, &ctx.config().omi_home)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(child) => return Ok(child),
                // ETXTBSY while the script is still being written out.
                Err(e)
                    if e.kind() == io::ErrorKind::ExecutableFileBusy
                        && attempt < SPAWN_ATTEMPTS =>
                {
                    tracing::debug!(resource = %self.name, attempt, "Script busy, retrying");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        resource = %self.name,
                        path = %self.path.display(),
                        error = %e,
                        "Failed to start script"
                    );
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Resource for ScriptResource {
    async fn verify(
        &self,
        ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        self.run(OperationKind::Verify, ctx, args).await
    }

    async fn apply(
        &self,
        ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        self.run(OperationKind::Apply, ctx, args).await
    }

    async fn query(
        &self,
        ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        self.run(OperationKind::Query, ctx, args).await
    }
}

/// Lists the executable files in `dir` as resources, sorted by name.
pub fn discover(dir: &Path) -> io::Result<Vec<ScriptResource>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Ok(metadata) = std::fs::metadata(&path) else {
            tracing::warn!(path = %path.display(), "Skipping unreadable script entry");
            continue;
        };
        if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            tracing::warn!(path = %path.display(), "Skipping script with a non UTF-8 name");
            continue;
        };
        scripts.push(ScriptResource::new(name, &path));
    }
    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scripts)
}

/// Registers every script found in `dir`. A missing directory registers
/// nothing.
pub fn register_scripts(registry: &mut Registry, dir: &Path) -> io::Result<usize> {
    let scripts = match discover(dir) {
        Ok(scripts) => scripts,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(dir = %dir.display(), "Scripts directory does not exist");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };
    let count = scripts.len();
    for script in scripts {
        registry.register(script.name.clone(), Arc::new(script));
    }
    tracing::info!(dir = %dir.display(), count, "Loaded script resources");
    Ok(count)
}

/// Converts a script's JSON outputs into an argument map.
pub fn json_to_arg_map(object: Map<String, serde_json::Value>) -> Result<ArgMap, ResourceError> {
    object
        .into_iter()
        .map(|(name, json)| {
            let value = json_to_value(json)
                .map_err(|reason| ResourceError::failed(format!("output '{name}': {reason}")))?;
            Ok((name, value))
        })
        .collect()
}

/// Maps one JSON value onto the closest wire type.
///
/// Arrays must be homogeneous; an empty array becomes an empty string array.
pub fn json_to_value(json: serde_json::Value) -> Result<Value, String> {
    use serde_json::Value as Json;

    match json {
        Json::Null => Ok(Value::Null(ValueType::String)),
        Json::Bool(b) => Ok(Value::Boolean(b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i32::try_from(i).map_or(Value::Sint64(i), Value::Sint32))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::Uint64(u))
            } else {
                n.as_f64()
                    .map(Value::Real64)
                    .ok_or_else(|| format!("unrepresentable number {n}"))
            }
        }
        Json::String(s) => Ok(Value::String(s)),
        Json::Object(_) => Err("objects are only supported inside arrays".to_string()),
        Json::Array(items) => json_array_to_value(items),
    }
}

fn json_array_to_value(items: Vec<serde_json::Value>) -> Result<Value, String> {
    use serde_json::Value as Json;

    let Some(first) = items.first() else {
        return Ok(Value::StringA(Vec::new()));
    };
    let mismatch = || "array elements must all have the same type".to_string();

    match first {
        Json::String(_) => items
            .into_iter()
            .map(|item| match item {
                Json::String(s) => Ok(s),
                _ => Err(mismatch()),
            })
            .collect::<Result<_, _>>()
            .map(Value::StringA),
        Json::Bool(_) => items
            .iter()
            .map(|item| item.as_bool().ok_or_else(mismatch))
            .collect::<Result<_, _>>()
            .map(Value::BooleanA),
        Json::Object(_) => items
            .into_iter()
            .map(|item| match item {
                Json::Object(object) => json_to_arg_map(object).map_err(|e| e.to_string()),
                _ => Err(mismatch()),
            })
            .collect::<Result<_, _>>()
            .map(Value::InstanceA),
        Json::Number(_) => {
            if items.iter().all(|item| item.as_i64().is_some()) {
                Ok(Value::Sint64A(
                    items.iter().filter_map(serde_json::Value::as_i64).collect(),
                ))
            } else {
                items
                    .iter()
                    .map(|item| item.as_f64().ok_or_else(mismatch))
                    .collect::<Result<_, _>>()
                    .map(Value::Real64A)
            }
        }
        Json::Null | Json::Array(_) => {
            Err("arrays may not contain null or nested arrays".to_string())
        }
    }
}
