use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::cq_error::CqError;
use crate::log_debug;
use crate::types::{AgentCommand, AgentQuery};

/// Global shutdown flag shared with signal handlers.
fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

/// Check if a shutdown has been requested via signal.
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Install signal handlers for SIGTERM and SIGINT that set the shutdown flag.
///
/// Call once at program startup. Subsequent calls are safe (re-registers handlers).
pub fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(())
}

/// Low-level call boundary into the external agent.
///
/// Implementations may fail in any way; they must not panic. Bounding the
/// call duration is the bridge's job, so a slow implementation is tolerated.
pub trait AgentBinding: Send + Sync {
    /// Whether the binding was set up at all. A registered binding says
    /// nothing about whether anything answers on the other side.
    fn is_registered(&self) -> bool {
        true
    }

    fn query(
        &self,
        query: AgentQuery,
    ) -> impl std::future::Future<Output = Result<bool, CqError>> + Send;

    fn command(
        &self,
        command: AgentCommand,
    ) -> impl std::future::Future<Output = Result<(), CqError>> + Send;
}

/// Binding that talks to the agent through a control executable.
///
/// Queries run `<program> [args..] query <name>` and expect `true` or
/// `false` on stdout. Commands run `<program> [args..] <name> <params..>`
/// and succeed on a zero exit status.
pub struct CliAgentBinding {
    pub program: String,
    pub args: Vec<String>,
}

impl CliAgentBinding {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }

    fn build_command(&self, call_args: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(call_args);
        // stdin closed so the control program can never block on the terminal
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, call: &str, call_args: Vec<String>) -> Result<String, CqError> {
        if !self.is_registered() {
            return Err(CqError::BindingMissing);
        }
        let output = self
            .build_command(&call_args)
            .output()
            .await
            .map_err(|e| CqError::BindingFailed {
                call: call.to_string(),
                reason: format!("failed to spawn {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CqError::BindingFailed {
                call: call.to_string(),
                reason: format!("exit code {:?}: {}", output.status.code(), stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse a boolean answer printed by the control program.
pub fn parse_bool_reply(call: &str, stdout: &str) -> Result<bool, CqError> {
    match stdout.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(CqError::BindingFailed {
            call: call.to_string(),
            reason: format!("unexpected reply '{}'", other),
        }),
    }
}

impl AgentBinding for CliAgentBinding {
    fn is_registered(&self) -> bool {
        !self.program.trim().is_empty()
    }

    async fn query(&self, query: AgentQuery) -> Result<bool, CqError> {
        let call = query.wire_name();
        let stdout = self
            .run(call, vec!["query".to_string(), call.to_string()])
            .await?;
        parse_bool_reply(call, &stdout)
    }

    async fn command(&self, command: AgentCommand) -> Result<(), CqError> {
        let call = command.wire_name();
        let mut call_args = vec![call.to_string()];
        call_args.extend(command.wire_args());
        log_debug!("[agent] {} {}", self.program, call_args.join(" "));
        self.run(call, call_args).await.map(|_| ())
    }
}

// --- Mock ---

/// Observable state behind a `MockAgentBinding`.
#[derive(Debug, Default)]
pub struct MockAgentState {
    pub responding: bool,
    pub busy: bool,
    pub list_running: bool,
    pub paused: bool,
    pub endurance: bool,
    pub stop_requested: bool,
    /// When set, a `CraftItem` flips `busy` and `list_running` on.
    pub accept_crafts: bool,
    pub queries: Vec<AgentQuery>,
    pub commands: Vec<AgentCommand>,
}

/// Scripted agent for tests. Clones share state, so a test can keep one
/// clone to steer the agent while the bridge owns another.
#[derive(Clone, Debug)]
pub struct MockAgentBinding {
    state: Arc<Mutex<MockAgentState>>,
    registered: bool,
}

impl Default for MockAgentBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentBinding {
    /// A responding, idle agent that starts working on every craft it receives.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockAgentState {
                responding: true,
                accept_crafts: true,
                ..MockAgentState::default()
            })),
            registered: true,
        }
    }

    /// A binding that was never set up.
    pub fn unregistered() -> Self {
        Self {
            registered: false,
            ..Self::new()
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockAgentState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn set_responding(&self, responding: bool) {
        self.with_state(|s| s.responding = responding);
    }

    pub fn set_busy(&self, busy: bool) {
        self.with_state(|s| s.busy = busy);
    }

    pub fn set_list_running(&self, list_running: bool) {
        self.with_state(|s| s.list_running = list_running);
    }

    pub fn set_accept_crafts(&self, accept: bool) {
        self.with_state(|s| s.accept_crafts = accept);
    }

    /// Pretend the agent finished whatever it was doing.
    pub fn finish_craft(&self) {
        self.with_state(|s| {
            s.busy = false;
            s.list_running = false;
        });
    }

    pub fn commands(&self) -> Vec<AgentCommand> {
        self.with_state(|s| s.commands.clone())
    }

    pub fn queries(&self) -> Vec<AgentQuery> {
        self.with_state(|s| s.queries.clone())
    }

    /// Recipe ids of every craft dispatched so far, in order.
    pub fn dispatched_recipes(&self) -> Vec<u32> {
        self.with_state(|s| {
            s.commands
                .iter()
                .filter_map(|c| match c {
                    AgentCommand::CraftItem { recipe_id, .. } => Some(*recipe_id),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched_recipes().len()
    }

    pub fn is_paused(&self) -> bool {
        self.with_state(|s| s.paused)
    }

    pub fn stop_requested(&self) -> bool {
        self.with_state(|s| s.stop_requested)
    }
}

impl AgentBinding for MockAgentBinding {
    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn query(&self, query: AgentQuery) -> Result<bool, CqError> {
        self.with_state(|s| {
            s.queries.push(query);
            if !s.responding {
                return Err(CqError::BindingFailed {
                    call: query.wire_name().to_string(),
                    reason: "no responder".to_string(),
                });
            }
            Ok(match query {
                AgentQuery::IsBusy => s.busy,
                AgentQuery::IsListRunning => s.list_running,
                AgentQuery::IsListPaused => s.paused,
                AgentQuery::GetEnduranceStatus => s.endurance,
                AgentQuery::GetStopRequest => s.stop_requested,
            })
        })
    }

    async fn command(&self, command: AgentCommand) -> Result<(), CqError> {
        self.with_state(|s| {
            if !s.responding {
                return Err(CqError::BindingFailed {
                    call: command.wire_name().to_string(),
                    reason: "no responder".to_string(),
                });
            }
            match &command {
                AgentCommand::CraftItem { .. } if s.accept_crafts => {
                    s.busy = true;
                    s.list_running = true;
                }
                AgentCommand::CraftItem { .. } => {}
                AgentCommand::SetListPause(v) => s.paused = *v,
                AgentCommand::SetStopRequest(v) => s.stop_requested = *v,
                AgentCommand::SetEnduranceStatus(v) => s.endurance = *v,
            }
            s.commands.push(command);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_reply_accepts_common_spellings() {
        assert!(parse_bool_reply("is-busy", "true\n").unwrap());
        assert!(parse_bool_reply("is-busy", " YES ").unwrap());
        assert!(!parse_bool_reply("is-busy", "0").unwrap());
        let err = parse_bool_reply("is-busy", "maybe").unwrap_err();
        assert!(err.is_binding_failure());
    }

    #[test]
    fn empty_program_is_not_registered() {
        assert!(!CliAgentBinding::new("  ", vec![]).is_registered());
        assert!(CliAgentBinding::new("artisan-ctl", vec![]).is_registered());
    }
}
