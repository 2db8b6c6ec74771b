//! Shared application state for the server.

use std::path::PathBuf;
use std::sync::Arc;

use genesis::io::progress::ProgressHub;
use genesis::io::sessions::SessionRepository;
use genesis::pipeline::Orchestrator;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Completed games are listed from here.
    pub output_dir: PathBuf,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, output_dir: PathBuf) -> Self {
        Self {
            orchestrator,
            output_dir,
        }
    }

    pub fn hub(&self) -> &ProgressHub {
        self.orchestrator.hub()
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRepository> {
        self.orchestrator.sessions()
    }
}
