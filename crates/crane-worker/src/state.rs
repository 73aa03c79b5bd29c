//! Shared worker state.

use std::sync::Arc;

use crane_provider::Provider;

use crate::config::WorkerConfig;
use crate::dispatch::CommandDispatcher;
use crate::logs::BuildLogs;
use crate::script::ScriptGenerator;

/// Everything a processor needs beyond its own job source.
///
/// Cheap to clone; all members are shared. Built once by the daemon shell
/// and handed to the pool.
#[derive(Clone)]
pub struct WorkerState {
    /// Worker configuration.
    pub config: Arc<WorkerConfig>,
    /// Provider backend instances are provisioned with.
    pub provider: Arc<dyn Provider>,
    /// Build-script generator.
    pub script_generator: Arc<dyn ScriptGenerator>,
    /// Per-job log sinks.
    pub logs: Arc<dyn BuildLogs>,
    /// Cancel-command dispatcher.
    pub dispatcher: Arc<CommandDispatcher>,
}

impl WorkerState {
    /// Assemble worker state from its parts.
    pub fn new(
        config: WorkerConfig,
        provider: Arc<dyn Provider>,
        script_generator: Arc<dyn ScriptGenerator>,
        logs: Arc<dyn BuildLogs>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            script_generator,
            logs,
            dispatcher: Arc::new(CommandDispatcher::new()),
        }
    }
}

impl std::fmt::Debug for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerState")
            .field("config", &self.config)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}
