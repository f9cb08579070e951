//! Local network observation.
//!
//! HTTPDNS answers are IPv4-only, so lookups are gated on the device's
//! current address family. A change of local address (e.g. WiFi to
//! cellular) means cached answers may no longer be the best route.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Source of the device's current local address.
pub trait NetworkMonitor: Send + Sync {
    /// The address outbound traffic would currently leave from, if known.
    fn current_address(&self) -> Option<IpAddr>;
}

impl<M: NetworkMonitor + ?Sized> NetworkMonitor for Arc<M> {
    fn current_address(&self) -> Option<IpAddr> {
        (**self).current_address()
    }
}

/// A monitor reporting a fixed address that can be swapped at runtime.
#[derive(Debug)]
pub struct StaticNetwork {
    address: RwLock<Option<IpAddr>>,
}

impl StaticNetwork {
    pub fn new(address: Option<IpAddr>) -> Self {
        Self {
            address: RwLock::new(address),
        }
    }

    /// Any IPv4 address; enough to open the gate.
    pub fn ipv4() -> Self {
        Self::new(Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2))))
    }

    pub fn ipv6() -> Self {
        Self::new(Some(IpAddr::V6(Ipv6Addr::new(
            0xfe80, 0, 0, 0, 0, 0, 0, 2,
        ))))
    }

    /// Replace the reported address. The next query observes the change.
    pub fn set_address(&self, address: Option<IpAddr>) {
        *self.address.write().unwrap_or_else(|e| e.into_inner()) = address;
    }
}

impl NetworkMonitor for StaticNetwork {
    fn current_address(&self) -> Option<IpAddr> {
        *self.address.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Reads the local address the OS would route a datagram from.
///
/// `connect` on a UDP socket only selects a route; nothing is sent. IPv4 is
/// probed first, then IPv6. The address is probed once on construction and
/// then served from memory; a stale value is refreshed on a blocking task
/// while the old one keeps answering. Call [`refresh`](Self::refresh) on a
/// platform change notification to pick up a new network at once.
#[derive(Debug, Clone)]
pub struct UdpProbeMonitor {
    v4_probe: SocketAddr,
    v6_probe: SocketAddr,
    refresh_interval: Duration,
    state: Arc<ProbeState>,
}

#[derive(Debug)]
struct ProbeState {
    address: RwLock<Option<IpAddr>>,
    probed_at: Mutex<Instant>,
    refreshing: AtomicBool,
    probes: AtomicUsize,
}

/// Default age after which a probed address is refreshed.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

impl UdpProbeMonitor {
    pub fn new() -> Self {
        Self::with_probes(
            SocketAddr::from((Ipv4Addr::new(8, 8, 8, 8), 53)),
            SocketAddr::from((Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888), 53)),
        )
    }

    /// Probe towards custom addresses, e.g. the HTTPDNS server itself.
    pub fn with_probes(v4_probe: SocketAddr, v6_probe: SocketAddr) -> Self {
        let monitor = Self {
            v4_probe,
            v6_probe,
            refresh_interval: DEFAULT_PROBE_INTERVAL,
            state: Arc::new(ProbeState {
                address: RwLock::new(None),
                probed_at: Mutex::new(Instant::now()),
                refreshing: AtomicBool::new(false),
                probes: AtomicUsize::new(0),
            }),
        };
        monitor.refresh();
        monitor
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Probes now and stores the result.
    pub fn refresh(&self) {
        Self::store(&self.state, Self::probe_both(self.v4_probe, self.v6_probe));
    }

    /// Number of probes run so far.
    pub fn probe_count(&self) -> usize {
        self.state.probes.load(Ordering::Relaxed)
    }

    fn store(state: &ProbeState, address: Option<IpAddr>) {
        state.probes.fetch_add(1, Ordering::Relaxed);
        *state.address.write().unwrap_or_else(|e| e.into_inner()) = address;
        *state.probed_at.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn probe_both(v4_probe: SocketAddr, v6_probe: SocketAddr) -> Option<IpAddr> {
        Self::probe(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)), v4_probe)
            .or_else(|| Self::probe(SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)), v6_probe))
    }

    fn probe(bind: SocketAddr, target: SocketAddr) -> Option<IpAddr> {
        let socket = UdpSocket::bind(bind).ok()?;
        socket.connect(target).ok()?;
        let local = socket.local_addr().ok()?.ip();
        (!local.is_unspecified()).then_some(local)
    }

    fn is_stale(&self) -> bool {
        self.state
            .probed_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
            >= self.refresh_interval
    }
}

impl Default for UdpProbeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor for UdpProbeMonitor {
    fn current_address(&self) -> Option<IpAddr> {
        if self.is_stale() && !self.state.refreshing.swap(true, Ordering::SeqCst) {
            let state = Arc::clone(&self.state);
            let (v4_probe, v6_probe) = (self.v4_probe, self.v6_probe);
            let refresh = move || {
                Self::store(&state, Self::probe_both(v4_probe, v6_probe));
                state.refreshing.store(false, Ordering::SeqCst);
            };
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(refresh);
                }
                Err(_) => refresh(),
            }
        }
        *self.state.address.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of one gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkObservation {
    /// IPv4 available. `changed` is set when the address differs from the
    /// previous observation.
    Ipv4 { changed: bool },
    /// IPv6-only or unknown; HTTPDNS is unusable.
    Unsupported { changed: bool },
}

impl NetworkObservation {
    pub fn changed(&self) -> bool {
        match *self {
            NetworkObservation::Ipv4 { changed } | NetworkObservation::Unsupported { changed } => {
                changed
            }
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, NetworkObservation::Ipv4 { .. })
    }
}

/// Remembers the last observed address to detect changes.
#[derive(Debug, Default)]
pub struct AddressTracker {
    last: Mutex<Option<IpAddr>>,
}

impl AddressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `current`. The first observation never counts as a change.
    pub fn observe(&self, current: Option<IpAddr>) -> NetworkObservation {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let previous = *last;
        let changed = match (previous, current) {
            (Some(previous), Some(now)) => previous != now,
            (Some(_), None) => true,
            (None, _) => false,
        };
        *last = current;
        if changed {
            tracing::debug!(
                previous = ?previous,
                current = ?current,
                "local network address changed"
            );
        }

        match current {
            Some(IpAddr::V4(_)) => NetworkObservation::Ipv4 { changed },
            _ => NetworkObservation::Unsupported { changed },
        }
    }
}
