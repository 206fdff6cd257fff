// ABOUTME: TCP port reservations for review apps over the range 3001-9000.
// ABOUTME: Candidate ports are probed with a throwaway bind before being claimed.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Mutex;

pub const MIN_PORT: u16 = 3001;
pub const MAX_PORT: u16 = 9000;

pub struct PortAllocator {
    assigned: Mutex<HashMap<u16, String>>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    pub fn new() -> PortAllocator {
        PortAllocator {
            assigned: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the lowest free port for the app. Idempotent: an app that
    /// already holds a port gets the same port back.
    ///
    /// A port races an external bind between the probe and the actual
    /// process start; that surfaces later as a start failure.
    pub fn allocate(&self, app_id: &str) -> Result<u16> {
        let mut assigned = self.assigned.lock().unwrap();

        if let Some(port) = find_reservation(&assigned, app_id) {
            return Ok(port);
        }

        for port in MIN_PORT..=MAX_PORT {
            if assigned.contains_key(&port) {
                continue;
            }
            if !probe(port) {
                continue;
            }
            assigned.insert(port, app_id.to_string());
            return Ok(port);
        }

        Err(Error::NoFreePort(MIN_PORT, MAX_PORT))
    }

    /// Record a binding without probing. Used at startup to replay
    /// reservations from persisted state.
    pub fn reserve(&self, app_id: &str, port: u16) {
        self.assigned
            .lock()
            .unwrap()
            .insert(port, app_id.to_string());
    }

    pub fn release(&self, app_id: &str) {
        let mut assigned = self.assigned.lock().unwrap();
        if let Some(port) = find_reservation(&assigned, app_id) {
            assigned.remove(&port);
        }
    }

    pub fn get_port(&self, app_id: &str) -> Option<u16> {
        find_reservation(&self.assigned.lock().unwrap(), app_id)
    }
}

fn find_reservation(assigned: &HashMap<u16, String>, app_id: &str) -> Option<u16> {
    assigned
        .iter()
        .find(|(_, id)| id.as_str() == app_id)
        .map(|(port, _)| *port)
}

fn probe(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_idempotent_per_app() {
        let alloc = PortAllocator::new();
        let first = alloc.allocate("pr-1").unwrap();
        let second = alloc.allocate("pr-1").unwrap();
        assert_eq!(first, second);
        assert!((MIN_PORT..=MAX_PORT).contains(&first));
    }

    #[test]
    fn distinct_apps_get_distinct_ports() {
        let alloc = PortAllocator::new();
        let a = alloc.allocate("pr-1").unwrap();
        let b = alloc.allocate("pr-2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn release_frees_the_port() {
        let alloc = PortAllocator::new();
        let port = alloc.allocate("pr-1").unwrap();
        alloc.release("pr-1");
        assert_eq!(alloc.get_port("pr-1"), None);
        // The freed port is the lowest candidate again.
        assert_eq!(alloc.allocate("pr-2").unwrap(), port);
    }

    #[test]
    fn reserve_replays_persisted_binding() {
        let alloc = PortAllocator::new();
        alloc.reserve("pr-1", 4242);
        assert_eq!(alloc.get_port("pr-1"), Some(4242));
        // allocate returns the reservation rather than scanning.
        assert_eq!(alloc.allocate("pr-1").unwrap(), 4242);
    }

    #[test]
    fn reserved_port_is_skipped_for_others() {
        let alloc = PortAllocator::new();
        alloc.reserve("pr-1", MIN_PORT);
        let other = alloc.allocate("pr-2").unwrap();
        assert_ne!(other, MIN_PORT);
    }
}
