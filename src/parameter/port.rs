use crate::config::{Manifest, PortRange};
use crate::error::{Error, Result};
use crate::platform::NetworkDialer;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// `service -> port name -> port`
pub type PortMap = BTreeMap<String, BTreeMap<String, u16>>;

/// Port allocator for every named port request in a bundle.
///
/// Candidates are verified by binding `127.0.0.1:port` through the network
/// capability and releasing it straight away. The finished map is stored
/// once and only read afterwards.
pub struct PortAllocator {
    network: Arc<dyn NetworkDialer>,
    default_range: PortRange,
    reserved: BTreeSet<u16>,
    allocated: RwLock<PortMap>,
}

impl PortAllocator {
    pub fn new(manifest: &Manifest, network: Arc<dyn NetworkDialer>) -> Self {
        Self {
            network,
            default_range: manifest.default_port_range(),
            reserved: manifest.reserved_ports(),
            allocated: RwLock::new(PortMap::new()),
        }
    }

    /// Allocate ports for every service, in manifest order, port names in
    /// lexical order. Either every request is satisfied or nothing is stored.
    pub fn allocate(&self, manifest: &Manifest) -> Result<PortMap> {
        let mut cursors: HashMap<PortRange, u32> = HashMap::new();
        let mut claimed: HashSet<u16> = HashSet::new();
        let mut map = PortMap::new();

        for service in &manifest.services {
            let mut requests: Vec<_> = service.ports.requested.iter().collect();
            requests.sort_by(|a, b| a.name.cmp(&b.name));

            for request in requests {
                let range = request.range.unwrap_or(self.default_range);
                let port_error = |reason: String| Error::Port {
                    service: service.id.clone(),
                    port_name: request.name.clone(),
                    range: range.to_string(),
                    reason,
                };

                if let Some(reason) = range.malformed_reason() {
                    return Err(port_error(reason.to_string()));
                }

                let cursor = cursors.entry(range).or_insert(range.min);
                let port = self
                    .scan(range, cursor, &claimed)
                    .ok_or_else(|| port_error("no free port left in range".to_string()))?;

                claimed.insert(port);
                map.entry(service.id.clone())
                    .or_default()
                    .insert(request.name.clone(), port);
                tracing::debug!("Allocated port {} for '{}.{}'", port, service.id, request.name);
            }
        }

        *self.allocated.write() = map.clone();
        Ok(map)
    }

    fn scan(&self, range: PortRange, cursor: &mut u32, claimed: &HashSet<u16>) -> Option<u16> {
        while *cursor <= range.max {
            let candidate = *cursor as u16;
            *cursor += 1;

            if self.reserved.contains(&candidate) || claimed.contains(&candidate) {
                continue;
            }

            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, candidate));
            match self.network.try_bind(addr) {
                Ok(()) => return Some(candidate),
                Err(e) => tracing::debug!("Port {} unavailable: {}", candidate, e),
            }
        }
        None
    }

    pub fn resolve(&self, service: &str, name: &str) -> Option<u16> {
        self.allocated.read().get(service)?.get(name).copied()
    }

    /// Copy of the allocated map.
    pub fn map(&self) -> PortMap {
        self.allocated.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ManifestFormat, Parser};
    use async_trait::async_trait;
    use std::io;
    use std::time::Duration;

    /// Every port binds except the listed ones.
    struct BusyPorts(HashSet<u16>);

    #[async_trait]
    impl NetworkDialer for BusyPorts {
        fn try_bind(&self, addr: SocketAddr) -> io::Result<()> {
            if self.0.contains(&addr.port()) {
                Err(io::Error::new(io::ErrorKind::AddrInUse, "busy"))
            } else {
                Ok(())
            }
        }

        async fn connect(&self, _addr: SocketAddr, _timeout: Duration) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "fake"))
        }
    }

    fn manifest(json: &str) -> Manifest {
        Parser::new()
            .parse_manifest(json, ManifestFormat::Json)
            .unwrap()
    }

    fn allocator(m: &Manifest, busy: &[u16]) -> PortAllocator {
        PortAllocator::new(m, Arc::new(BusyPorts(busy.iter().copied().collect())))
    }

    #[test]
    fn test_allocates_lexically_within_service() {
        let m = manifest(
            r#"{"app": {"name": "a", "version": "1"},
                "ports": {"default_range": {"min": 5000, "max": 5010}},
                "services": [{"id": "api", "ports": {"requested": [{"name": "metrics"}, {"name": "http"}]}}]}"#,
        );
        let alloc = allocator(&m, &[]);
        let map = alloc.allocate(&m).unwrap();

        assert_eq!(map["api"]["http"], 5000);
        assert_eq!(map["api"]["metrics"], 5001);
        assert_eq!(alloc.resolve("api", "http"), Some(5000));
        assert_eq!(alloc.resolve("api", "grpc"), None);
        assert_eq!(alloc.map(), map);
    }

    #[test]
    fn test_skips_reserved_and_busy_ports() {
        let m = manifest(
            r#"{"app": {"name": "a", "version": "1"},
                "ipc": {"port": 5002},
                "ports": {"default_range": {"min": 5000, "max": 5010}, "reserved": [5000]},
                "services": [
                    {"id": "a", "ports": {"requested": [{"name": "p"}]}},
                    {"id": "b", "ports": {"requested": [{"name": "p"}]}}
                ]}"#,
        );
        let map = allocator(&m, &[5001]).allocate(&m).unwrap();

        assert_eq!(map["a"]["p"], 5003);
        assert_eq!(map["b"]["p"], 5004);
    }

    #[test]
    fn test_exhausted_range_names_request() {
        let m = manifest(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "db", "ports": {"requested": [
                    {"name": "main", "range": {"min": 6000, "max": 6001}},
                    {"name": "replica", "range": {"min": 6000, "max": 6001}},
                    {"name": "spare", "range": {"min": 6000, "max": 6001}}
                ]}}]}"#,
        );
        let alloc = allocator(&m, &[]);
        match alloc.allocate(&m) {
            Err(Error::Port {
                service,
                port_name,
                range,
                ..
            }) => {
                assert_eq!(service, "db");
                assert_eq!(port_name, "spare");
                assert_eq!(range, "6000-6001");
            }
            other => panic!("expected port error, got {:?}", other),
        }
        assert!(alloc.map().is_empty());
    }

    #[test]
    fn test_malformed_range_rejected() {
        let m = manifest(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "api", "ports": {"requested": [
                    {"name": "http", "range": {"min": 7000, "max": 6000}}
                ]}}]}"#,
        );
        let err = allocator(&m, &[]).allocate(&m).unwrap_err();
        assert!(matches!(err, Error::Port { ref reason, .. } if reason.contains("below")));
    }

    #[test]
    fn test_uses_builtin_default_range() {
        let m = manifest(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "api", "ports": {"requested": [{"name": "http"}]}}]}"#,
        );
        let map = allocator(&m, &[]).allocate(&m).unwrap();
        assert_eq!(map["api"]["http"], 47000);
    }
}
