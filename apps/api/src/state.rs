use tenantguard_application::{BruteForceService, ReplayGuard};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub lockouts: BruteForceService,
    pub replay_guard: ReplayGuard,
}
