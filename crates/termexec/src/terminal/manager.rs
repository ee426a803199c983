use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use termexec_protocol::TerminalProvider;

use super::{Terminal, TerminalId};
use crate::backend::{DetachedBackend, HostShellBackend, ProcessBackend};
use crate::cancellation::CancellationRegistry;
use crate::config::TerminalConfig;
use crate::errors::TerminalError;
use crate::process::{CommandCallbacks, ProcessHandle, truncate_lines};

type BackendFactory = Box<dyn Fn(TerminalProvider) -> Arc<dyn ProcessBackend> + Send + Sync>;

/// Owns every terminal in the application.
///
/// Terminals are handed out one per concurrent command: callers ask for a
/// terminal in a working directory and get an idle one back, reused when
/// possible. Processes started through the manager are registered with the
/// cancellation registry until they finish, including commands that were
/// continued in the background.
pub struct TerminalManager {
    terminals: HashMap<TerminalId, Arc<Terminal>>,
    config: TerminalConfig,
    next_id: TerminalId,
    registry: CancellationRegistry,
    backend_factory: BackendFactory,
}

impl TerminalManager {
    pub fn new(config: TerminalConfig, registry: CancellationRegistry) -> Self {
        let factory_config = config.clone();
        Self::with_backend_factory(config, registry, move |provider| {
            let backend: Arc<dyn ProcessBackend> = match provider {
                TerminalProvider::DetachedSubprocess => {
                    Arc::new(DetachedBackend::new(&factory_config))
                }
                TerminalProvider::HostIntegrated => {
                    Arc::new(HostShellBackend::new(&factory_config))
                }
            };
            backend
        })
    }

    /// Build terminals over backends produced by `factory`.
    pub fn with_backend_factory(
        config: TerminalConfig,
        registry: CancellationRegistry,
        factory: impl Fn(TerminalProvider) -> Arc<dyn ProcessBackend> + Send + Sync + 'static,
    ) -> Self {
        Self {
            terminals: HashMap::new(),
            config,
            next_id: 1,
            registry,
            backend_factory: Box::new(factory),
        }
    }

    /// Create a new terminal, regardless of what is already available.
    pub fn create_terminal(&mut self, cwd: &Path, provider: TerminalProvider) -> Arc<Terminal> {
        let id = self.next_id;
        self.next_id += 1;

        let backend = (self.backend_factory)(provider);
        let terminal = Arc::new(Terminal::with_backend(
            id,
            cwd,
            self.config.clone(),
            backend,
        ));
        self.terminals.insert(id, terminal.clone());

        info!(
            event = "termexec.manager.terminal_created",
            terminal_id = id,
            provider = %provider,
            cwd = %cwd.display(),
        );
        terminal
    }

    /// An idle, open terminal with this cwd and provider, or a fresh one.
    ///
    /// Closed terminals found along the way are dropped.
    pub fn get_or_create_terminal(
        &mut self,
        cwd: &Path,
        provider: TerminalProvider,
    ) -> Arc<Terminal> {
        self.prune_closed();

        let mut candidates: Vec<&Arc<Terminal>> = self
            .terminals
            .values()
            .filter(|t| t.provider() == provider && t.cwd() == cwd)
            .filter(|t| !t.is_busy() && !t.is_running())
            .collect();
        candidates.sort_by_key(|t| t.id());

        if let Some(terminal) = candidates.first() {
            debug!(
                event = "termexec.manager.terminal_reused",
                terminal_id = terminal.id(),
            );
            return Arc::clone(terminal);
        }
        self.create_terminal(cwd, provider)
    }

    pub fn get_terminal(&self, id: TerminalId) -> Result<Arc<Terminal>, TerminalError> {
        self.terminals
            .get(&id)
            .cloned()
            .ok_or(TerminalError::TerminalNotFound(id))
    }

    /// Terminals whose busy flag equals `busy`, ordered by id.
    pub fn terminals(&self, busy: bool) -> Vec<Arc<Terminal>> {
        let mut list: Vec<Arc<Terminal>> = self
            .terminals
            .values()
            .filter(|t| t.is_busy() == busy)
            .cloned()
            .collect();
        list.sort_by_key(|t| t.id());
        list
    }

    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// Run `command` on terminal `id` and track it for bulk cancellation.
    pub fn run_command(
        &self,
        id: TerminalId,
        command: &str,
        callbacks: CommandCallbacks,
    ) -> Result<ProcessHandle, TerminalError> {
        let terminal = self.get_terminal(id)?;
        let handle = terminal.run_command(command, callbacks)?;

        let task_id = self.registry.register(Arc::new(handle.process().clone()));
        let registry = self.registry.clone();
        let process = handle.process().clone();
        tokio::spawn(async move {
            process.wait_finished().await;
            registry.unregister(task_id);
        });
        Ok(handle)
    }

    /// Close a terminal and forget it. Running commands are aborted.
    pub fn remove_terminal(&mut self, id: TerminalId) -> Result<(), TerminalError> {
        let terminal = self
            .terminals
            .remove(&id)
            .ok_or(TerminalError::TerminalNotFound(id))?;
        terminal.close();
        info!(event = "termexec.manager.terminal_removed", terminal_id = id);
        Ok(())
    }

    /// Unretrieved output of terminal `id`, truncated to the configured
    /// line limit by keeping its head and tail.
    pub fn get_unretrieved_output(&self, id: TerminalId) -> Result<String, TerminalError> {
        let terminal = self.get_terminal(id)?;
        let output = terminal.get_unretrieved_output();
        Ok(truncate_lines(&output, self.config.output_line_limit))
    }

    pub fn is_process_hot(&self, id: TerminalId) -> bool {
        self.terminals.get(&id).is_some_and(|t| t.is_hot())
    }

    /// Abort all running commands and close every terminal.
    pub fn dispose_all(&mut self) {
        info!(
            event = "termexec.manager.dispose_started",
            count = self.terminals.len(),
        );
        for (id, terminal) in self.terminals.drain() {
            if terminal.is_running() {
                warn!(
                    event = "termexec.manager.dispose_aborting",
                    terminal_id = id,
                    command = ?terminal.get_last_command(),
                );
            }
            terminal.close();
        }
        info!(event = "termexec.manager.dispose_completed");
    }

    fn prune_closed(&mut self) {
        self.terminals.retain(|id, terminal| {
            let closed = terminal.is_closed();
            if closed {
                debug!(event = "termexec.manager.closed_terminal_pruned", terminal_id = id);
            }
            !closed
        });
    }
}

impl std::fmt::Debug for TerminalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalManager")
            .field("terminals", &self.terminals.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
