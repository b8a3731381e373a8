use std::time::Duration;

use crate::agent::AgentBinding;
use crate::cq_error::CqError;
use crate::types::{AgentCommand, AgentQuery, AgentStatus, MaterialOverride};
use crate::{log_debug, log_error, log_info};

/// Default upper bound on a single call into the agent.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(300);

/// Failure-absorbing wrapper around an `AgentBinding`.
///
/// Owns the `available` flag, which only a real round trip in `probe` can
/// set. Every call is bounded by `call_timeout`; failures and timeouts
/// degrade to `false` for queries and to a logged no-op for commands.
pub struct AgentBridge<B: AgentBinding> {
    binding: B,
    available: bool,
    last_status: AgentStatus,
    call_timeout: Duration,
}

impl<B: AgentBinding> AgentBridge<B> {
    /// Wrap a binding. The agent counts as unavailable until the first probe.
    pub fn new(binding: B, call_timeout: Duration) -> Self {
        Self {
            binding,
            available: false,
            last_status: AgentStatus::default(),
            call_timeout,
        }
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn last_status(&self) -> AgentStatus {
        self.last_status
    }

    /// Make one real call to the agent and update `available` from it.
    ///
    /// Only transitions are logged; repeated identical results are silent.
    pub async fn probe(&mut self) -> bool {
        let alive = if self.binding.is_registered() {
            match self.call_query(AgentQuery::IsBusy).await {
                Ok(_) => true,
                Err(e) => {
                    log_debug!("[bridge] Probe failed: {}", e);
                    false
                }
            }
        } else {
            false
        };

        if alive != self.available {
            self.available = alive;
            if alive {
                log_info!("[bridge] Agent is now available.");
            } else {
                log_info!("[bridge] Agent is no longer available.");
            }
        }
        self.last_status.available = self.available;
        self.available
    }

    /// Ask the agent one question. Returns `false` when unavailable or on failure.
    pub async fn query(&self, query: AgentQuery) -> bool {
        if !self.available {
            return false;
        }
        match self.call_query(query).await {
            Ok(answer) => answer,
            Err(e) => {
                log_debug!("[bridge] Agent call failed. {}", e);
                false
            }
        }
    }

    /// Read the `(busy, list_running, paused)` triple and remember it.
    pub async fn refresh_status(&mut self) -> AgentStatus {
        self.last_status = if self.available {
            AgentStatus {
                available: true,
                busy: self.query(AgentQuery::IsBusy).await,
                list_running: self.query(AgentQuery::IsListRunning).await,
                paused: self.query(AgentQuery::IsListPaused).await,
            }
        } else {
            AgentStatus::default()
        };
        self.last_status
    }

    /// Send a craft order. There is no acknowledgement channel.
    pub async fn dispatch(&self, recipe_id: u32, quantity: u32, materials: Vec<MaterialOverride>) {
        if !self.available {
            log_error!("[bridge] Cannot craft: agent not available.");
            return;
        }
        let command = AgentCommand::CraftItem {
            recipe_id,
            quantity,
            materials,
        };
        if self.send(command).await {
            log_info!(
                "[bridge] Sent craft-item(recipe={}, qty={})",
                recipe_id,
                quantity
            );
        }
    }

    pub async fn set_pause(&self, paused: bool) {
        self.send_if_available(AgentCommand::SetListPause(paused))
            .await;
    }

    pub async fn request_stop(&self, stop: bool) {
        self.send_if_available(AgentCommand::SetStopRequest(stop))
            .await;
    }

    pub async fn set_endurance(&self, enabled: bool) {
        self.send_if_available(AgentCommand::SetEnduranceStatus(enabled))
            .await;
    }

    async fn send_if_available(&self, command: AgentCommand) {
        if self.available {
            self.send(command).await;
        }
    }

    async fn send(&self, command: AgentCommand) -> bool {
        let call = command.wire_name();
        let result = tokio::time::timeout(self.call_timeout, self.binding.command(command))
            .await
            .unwrap_or_else(|_| {
                Err(CqError::BindingTimeout {
                    call: call.to_string(),
                    timeout: self.call_timeout,
                })
            });
        match result {
            Ok(()) => true,
            Err(e) => {
                log_error!("[bridge] Agent command failed. {}", e);
                false
            }
        }
    }

    async fn call_query(&self, query: AgentQuery) -> Result<bool, CqError> {
        tokio::time::timeout(self.call_timeout, self.binding.query(query))
            .await
            .unwrap_or_else(|_| {
                Err(CqError::BindingTimeout {
                    call: query.wire_name().to_string(),
                    timeout: self.call_timeout,
                })
            })
    }
}
