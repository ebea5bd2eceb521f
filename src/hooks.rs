//! Intent hooks: per-type capabilities evaluated before a create opens its
//! transaction. A hook may edit the candidate or reject it.
//!
//! Hooks are not transactional with the write that follows. An external
//! effect a hook performs is not undone if the create later fails.

use crate::auth::AuthContext;
use crate::error::{ConfigError, StoreError};
use crate::model::Resource;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// What a hook sees besides the candidate.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub resource_type: String,
    pub auth: AuthContext,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// The hook evaluated the candidate and declined it.
    #[error("{0}")]
    Rejected(String),
    /// The hook could not run.
    #[error("hook failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait IntentHook: Send + Sync {
    async fn evaluate(&self, ctx: &HookContext, candidate: &mut Resource) -> Result<(), HookError>;
}

/// Type name → hook. Populated at startup, read-only afterwards.
#[derive(Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn IntentHook>>,
    timeout: Duration,
}

impl Default for HookRegistry {
    fn default() -> Self {
        HookRegistry::new(DEFAULT_HOOK_TIMEOUT)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.hooks.keys().collect();
        types.sort();
        f.debug_struct("HookRegistry")
            .field("types", &types)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HookRegistry {
    pub fn new(timeout: Duration) -> Self {
        HookRegistry {
            hooks: HashMap::new(),
            timeout,
        }
    }

    /// Bind `hook` to `resource_type`. One hook per type.
    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        hook: Arc<dyn IntentHook>,
    ) -> Result<(), ConfigError> {
        let resource_type = resource_type.into();
        if self.hooks.contains_key(&resource_type) {
            return Err(ConfigError::DuplicateHook(resource_type));
        }
        self.hooks.insert(resource_type, hook);
        Ok(())
    }

    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn IntentHook>> {
        self.hooks.get(resource_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Evaluate the hook registered for `ctx.resource_type`, if any. Failure,
    /// error and timeout all surface as `HookRejected`.
    pub async fn run(&self, ctx: &HookContext, candidate: &mut Resource) -> Result<(), StoreError> {
        let Some(hook) = self.hooks.get(&ctx.resource_type) else {
            return Ok(());
        };
        let rejected = |reason: String| StoreError::HookRejected {
            resource_type: ctx.resource_type.clone(),
            reason,
        };
        let outcome = tokio::time::timeout(self.timeout, hook.evaluate(ctx, candidate)).await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::info!(resource_type = %ctx.resource_type, uuid = %candidate.uuid, error = %e, "intent hook rejected candidate");
                Err(rejected(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(resource_type = %ctx.resource_type, uuid = %candidate.uuid, timeout = ?self.timeout, "intent hook timed out");
                Err(rejected(format!("hook timed out after {:?}", self.timeout)))
            }
        }
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("static placeholder pattern"))
}

/// Runs an external program for each candidate. Arguments may contain
/// `{uuid}`, `{name}`, `{type}`, `{fq_name}` (colon-joined) or any
/// type-specific field name. A non-zero exit rejects the candidate. The
/// child is killed when the evaluation is dropped, e.g. on timeout.
#[derive(Clone, Debug)]
pub struct CommandHook {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandHook {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandHook {
            program: program.into(),
            args,
        }
    }

    /// Expand placeholders in one argument. Unknown names and non-scalar
    /// values are an error.
    pub fn render(&self, template: &str, ctx: &HookContext, candidate: &Resource) -> Result<String, HookError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in placeholder_re().captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            let value = match name.as_str() {
                "uuid" => candidate.uuid.clone(),
                "name" => candidate.name().to_string(),
                "type" => ctx.resource_type.clone(),
                "fq_name" => candidate.fq_name.join(":"),
                field => match candidate.properties.get(field) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    Some(Value::Bool(b)) => b.to_string(),
                    Some(_) => return Err(HookError::Rejected(format!("field '{}' is not a scalar", field))),
                    None => return Err(HookError::Rejected(format!("field '{}' is not set", field))),
                },
            };
            out.push_str(&value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

#[async_trait]
impl IntentHook for CommandHook {
    async fn evaluate(&self, ctx: &HookContext, candidate: &mut Resource) -> Result<(), HookError> {
        let snapshot: &Resource = candidate;
        let args = self
            .args
            .iter()
            .map(|a| self.render(a, ctx, snapshot))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(program = %self.program, args = ?args, uuid = %candidate.uuid, "running command hook");
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HookError::Failed(format!("{}: {}", self.program, e)))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        Err(HookError::Rejected(if stderr.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            format!("{} exited with {}: {}", self.program, output.status, stderr)
        }))
    }
}

/// One entry of a hooks file.
#[derive(Clone, Debug, Deserialize)]
pub struct HookDefinition {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

pub fn parse_hooks(json: &str) -> Result<Vec<HookDefinition>, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(format!("hooks: {}", e)))
}

/// Read command hook definitions and register them on `registry`.
pub async fn load_hooks(path: impl AsRef<Path>, registry: &mut HookRegistry) -> Result<usize, ConfigError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let defs = parse_hooks(&content)?;
    let n = defs.len();
    for def in defs {
        tracing::info!(resource_type = %def.resource_type, program = %def.program, "registering command hook");
        registry.register(def.resource_type, Arc::new(CommandHook::new(def.program, def.args)))?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Reject;

    #[async_trait]
    impl IntentHook for Reject {
        async fn evaluate(&self, _ctx: &HookContext, _candidate: &mut Resource) -> Result<(), HookError> {
            Err(HookError::Rejected("not today".into()))
        }
    }

    struct Stamp;

    #[async_trait]
    impl IntentHook for Stamp {
        async fn evaluate(&self, _ctx: &HookContext, candidate: &mut Resource) -> Result<(), HookError> {
            candidate.display_name = "stamped".into();
            Ok(())
        }
    }

    struct Hang;

    #[async_trait]
    impl IntentHook for Hang {
        async fn evaluate(&self, _ctx: &HookContext, _candidate: &mut Resource) -> Result<(), HookError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn ctx(t: &str) -> HookContext {
        HookContext {
            resource_type: t.into(),
            auth: AuthContext::admin(),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = HookRegistry::default();
        reg.register("youtube", Arc::new(Reject)).unwrap();
        let err = reg.register("youtube", Arc::new(Stamp)).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateHook(t) if t == "youtube"));
    }

    #[tokio::test]
    async fn unhooked_types_pass_and_hooks_may_edit() {
        let mut reg = HookRegistry::default();
        reg.register("project", Arc::new(Stamp)).unwrap();
        let mut r = Resource::new("u", &["a"]);
        reg.run(&ctx("domain"), &mut r).await.unwrap();
        assert_eq!(r.display_name, "");
        reg.run(&ctx("project"), &mut r).await.unwrap();
        assert_eq!(r.display_name, "stamped");
    }

    #[tokio::test]
    async fn rejection_carries_type_and_reason() {
        let mut reg = HookRegistry::default();
        reg.register("youtube", Arc::new(Reject)).unwrap();
        let err = reg.run(&ctx("youtube"), &mut Resource::default()).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::HookRejected {
                resource_type: "youtube".into(),
                reason: "not today".into()
            }
        );
    }

    #[tokio::test]
    async fn hung_hook_times_out() {
        let mut reg = HookRegistry::new(Duration::from_millis(50));
        reg.register("youtube", Arc::new(Hang)).unwrap();
        let err = reg.run(&ctx("youtube"), &mut Resource::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::HookRejected { reason, .. } if reason.contains("timed out")));
    }

    #[test]
    fn render_expands_placeholders() {
        let hook = CommandHook::new("echo", vec![]);
        let r = Resource::new("u1", &["d", "p", "clip"]).with_property("url", json!("https://example.test/v"));
        assert_eq!(
            hook.render("{type} {uuid} {name} {fq_name} {url}", &ctx("youtube"), &r).unwrap(),
            "youtube u1 clip d:p:clip https://example.test/v"
        );
        assert!(hook.render("{missing}", &ctx("youtube"), &r).is_err());
        assert_eq!(hook.render("plain", &ctx("youtube"), &r).unwrap(), "plain");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_exit_status_decides() {
        let mut r = Resource::new("u1", &["clip"]);
        let ok = CommandHook::new("sh", vec!["-c".into(), "exit 0".into()]);
        assert!(ok.evaluate(&ctx("youtube"), &mut r).await.is_ok());

        let fail = CommandHook::new("sh", vec!["-c".into(), "echo nope >&2; exit 3".into()]);
        let err = fail.evaluate(&ctx("youtube"), &mut r).await.unwrap_err();
        assert!(matches!(err, HookError::Rejected(m) if m.contains("nope")));

        let missing = CommandHook::new("/nonexistent/program", vec![]);
        assert!(matches!(
            missing.evaluate(&ctx("youtube"), &mut r).await,
            Err(HookError::Failed(_))
        ));
    }

    #[test]
    fn hooks_file_parses() {
        let defs = parse_hooks(r#"[{ "type": "youtube", "program": "chromium-browser", "args": ["{url}"] }]"#).unwrap();
        assert_eq!(defs[0].resource_type, "youtube");
        assert_eq!(defs[0].args, vec!["{url}".to_string()]);
        assert!(parse_hooks("{").is_err());
    }
}
