//! Candidate server endpoints with failover priorities.
//!
//! Pure state, no I/O. The connection manager calls `select()` before
//! each dial and `demote()` after each failure; with the usual two
//! endpoints this alternates primary/secondary under repeated failure.

/// One candidate backend. Identity is `(host, port)`; the set is fixed
/// at startup and entries are never removed.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
    pub priority: u32,
    pub last_known_healthy: bool,
}

/// Ordered set of candidate endpoints.
pub struct ServerRegistry {
    endpoints: Vec<ServerEndpoint>,
}

impl ServerRegistry {
    /// Build a registry from `(host, port)` pairs; registration order
    /// sets the initial preference (first entry is most preferred).
    pub fn new(candidates: impl IntoIterator<Item = (String, u16)>) -> Self {
        let endpoints = candidates
            .into_iter()
            .enumerate()
            .map(|(i, (host, port))| ServerEndpoint {
                host,
                port,
                priority: i as u32 + 1,
                last_known_healthy: false,
            })
            .collect();
        Self { endpoints }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn endpoints(&self) -> &[ServerEndpoint] {
        &self.endpoints
    }

    /// The endpoint with the numerically lowest priority; ties break by
    /// registration order.
    pub fn select(&self) -> Option<&ServerEndpoint> {
        self.endpoints
            .iter()
            .min_by_key(|e| e.priority)
    }

    /// Push a failed endpoint below the current best.
    ///
    /// With exactly two endpoints the two priorities are swapped, so
    /// repeated failures alternate between them. With more, the failed
    /// endpoint's priority becomes `max(existing priorities) + 1`.
    pub fn demote(&mut self, host: &str, port: u16) {
        let Some(idx) = self.position(host, port) else {
            return;
        };
        self.endpoints[idx].last_known_healthy = false;

        if self.endpoints.len() == 2 {
            let other = 1 - idx;
            let tmp = self.endpoints[idx].priority;
            self.endpoints[idx].priority = self.endpoints[other].priority;
            self.endpoints[other].priority = tmp;
        } else if self.endpoints.len() > 2 {
            let max = self
                .endpoints
                .iter()
                .map(|e| e.priority)
                .max()
                .unwrap_or(0);
            self.endpoints[idx].priority = max + 1;
        }
        // A single endpoint has nowhere to go.
    }

    /// Record a successful open.
    pub fn mark_healthy(&mut self, host: &str, port: u16) {
        if let Some(idx) = self.position(host, port) {
            self.endpoints[idx].last_known_healthy = true;
        }
    }

    fn position(&self, host: &str, port: u16) -> Option<usize> {
        self.endpoints
            .iter()
            .position(|e| e.host == host && e.port == port)
    }
}
