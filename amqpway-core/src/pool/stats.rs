use serde::Serialize;

/// Point-in-time view of the pool, for the status endpoint.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct PoolStats {
    pub idle_sessions: usize,
    pub connections: usize,
    pub busy_sessions: usize,
    pub waiting_requests: usize,
}

/// Readiness signal. The pool is ready while it is open and the last dial succeeded.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct PoolHealth {
    pub ready: bool,
    pub closed: bool,
    pub connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
