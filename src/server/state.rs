use std::sync::Arc;
use std::time::Instant;

use super::service::AccountService;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    /// Account operations and admission gates.
    pub service: Arc<AccountService>,
    /// When the server started; reported by the health route.
    pub started_at: Instant,
}

impl AppState {
    /// Wraps a service for use as router state.
    pub fn new(service: AccountService) -> Self {
        Self {
            service: Arc::new(service),
            started_at: Instant::now(),
        }
    }
}
