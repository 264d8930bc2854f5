use std::sync::Arc;

use crate::services::workflow::Workflow;

/// Shared application state passed to all route handlers. The workflow owns
/// every external client; handlers contain no business logic.
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<Workflow>,
}

impl AppState {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow: Arc::new(workflow),
        }
    }
}
