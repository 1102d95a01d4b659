//! The proxy engine: owns the interfaces, the group manager and the
//! neighbor cache, dispatches inbound frames, and enforces the RFC 4389
//! loop-suppression rules.
//!
//! Everything runs on one cooperative event loop. [`run`] registers a
//! watcher task per interface socket plus a single timer loop; all of
//! them funnel into the engine behind one `Rc<RefCell<_>>`, and no
//! handler awaits while holding the borrow.

use std::{cell::RefCell, rc::Rc, time::Duration, time::Instant};

use fxhash::FxHashMap;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;

use ndproxy_types::ether::Ipv6EtherHeader;
use ndproxy_types::ip::multicast_ll_address;
use ndproxy_types::ndmsg::{
    type_name, NdMessage, ND_NEIGHBOR_ADVERT, ND_NEIGHBOR_SOLICIT, ND_ROUTER_ADVERT,
};

use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::group::GroupManager;
use crate::iface::ProxyInterface;
use crate::neighbor::{NeighborCache, NeighborEntry, NudState};
use crate::timer::{TimerCtrl, TimerToken};

/// How long an interface stays disabled after a loop condition,
/// RFC 4389 section 4.1.3.3.
const LOOP_SUPPRESSION_TIME: Duration = Duration::from_secs(60 * 60);

/// Default period of the neighbor-cache expiry sweep.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// What a readable-socket handler did with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// A frame was consumed; the socket may hold more.
    Processed,
    /// Nothing was read; wait for the next readiness event.
    Empty,
}

/// The Neighbor Discovery proxy engine.
pub struct NdProxy {
    /// In nested mode, proxied RAs arriving on the upstream are
    /// legitimate and forwarded instead of tripping loop suppression.
    nested: bool,
    sweep_interval: Duration,
    ifaces: FxHashMap<String, ProxyInterface>,
    groups: GroupManager,
    neighbors: NeighborCache,
    timers: TimerCtrl,
    timer_wakeup: Rc<Notify>,
    watchers: FxHashMap<String, Vec<JoinHandle<()>>>,
}

impl NdProxy {
    pub fn new(nested: bool) -> NdProxy {
        NdProxy {
            nested,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            ifaces: FxHashMap::default(),
            groups: GroupManager::new(),
            neighbors: NeighborCache::new(),
            timers: TimerCtrl::new(),
            timer_wakeup: Rc::new(Notify::new()),
            watchers: FxHashMap::default(),
        }
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn set_nested(&mut self, nested: bool) {
        self.nested = nested;
    }

    pub fn set_sweep_interval(&mut self, interval: Duration) {
        self.sweep_interval = interval;
    }

    pub fn neighbor_cache(&self) -> &NeighborCache {
        &self.neighbors
    }

    pub fn neighbor_cache_mut(&mut self) -> &mut NeighborCache {
        &mut self.neighbors
    }

    pub fn group_manager(&self) -> &GroupManager {
        &self.groups
    }

    pub fn interface(&self, if_name: &str) -> Option<&ProxyInterface> {
        self.ifaces.get(if_name)
    }

    // Control-plane verbs.

    /// Takes over a network interface for proxying.
    pub fn bind_interface(&mut self, if_name: &str) -> Result<()> {
        if self.ifaces.contains_key(if_name) {
            return Err(Error::with(
                ErrorKind::AlreadyExists,
                format!("the interface {if_name} is already being managed"),
            ));
        }
        let iface = ProxyInterface::init(if_name)
            .context(format!("failed to create proxy interface {if_name}"))?;
        self.ifaces.insert(if_name.to_string(), iface);
        tracing::info!(IFACE = %if_name, "now managing interface");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn bind_test_interface(
        &mut self,
        if_name: &str,
        ll_address: ndproxy_types::lladdr::LLAddress,
        mtu: u32,
        addresses: Vec<std::net::Ipv6Addr>,
    ) {
        let iface = ProxyInterface::new_for_tests(if_name, ll_address, mtu, addresses);
        self.ifaces.insert(if_name.to_string(), iface);
    }

    /// Stops managing an interface: leaves its group, cancels its
    /// watcher tasks and pending loop timer, flushes its cache entries
    /// and closes its sockets.
    pub fn release_interface(&mut self, if_name: &str) -> Result<()> {
        let Some(mut iface) = self.ifaces.remove(if_name) else {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("the interface {if_name} is not being managed"),
            ));
        };

        if iface.has_group() {
            let _ = self.groups.remove_member(if_name);
            iface.post_leave_group();
        }
        for handle in self.watchers.remove(if_name).unwrap_or_default() {
            handle.abort();
        }
        self.timers.cancel_loop_clear(if_name);
        self.timer_wakeup.notify_one();
        self.neighbors.clear_for_interface(if_name);
        iface.deinitialize();
        tracing::info!(IFACE = %if_name, "stopped managing interface");
        Ok(())
    }

    pub fn is_managing(&self, if_name: &str) -> bool {
        self.ifaces.contains_key(if_name)
    }

    pub fn create_group(&mut self, pg_name: &str) -> Result<()> {
        self.groups.create_group(pg_name)?;
        tracing::info!(GROUP = %pg_name, "created proxy group");
        Ok(())
    }

    /// Destroys a group. Members leave it first, firing their leave
    /// hooks, and their pending loop timers die with the membership.
    pub fn release_group(&mut self, pg_name: &str) -> Result<()> {
        let removed = self.groups.release_group(pg_name)?;
        for member in removed {
            if let Some(iface) = self.ifaces.get_mut(&member) {
                iface.post_leave_group();
            }
            self.timers.cancel_loop_clear(&member);
        }
        self.neighbors.clear_for_group(pg_name);
        self.timer_wakeup.notify_one();
        tracing::info!(GROUP = %pg_name, "released proxy group");
        Ok(())
    }

    pub fn has_group(&self, pg_name: &str) -> bool {
        self.groups.has_group(pg_name)
    }

    pub fn add_to_group(&mut self, if_name: &str, pg_name: &str, as_upstream: bool) -> Result<()> {
        let Some(iface) = self.ifaces.get(if_name) else {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("interface {if_name} does not exist"),
            ));
        };
        if !self.groups.has_group(pg_name) {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("proxy group {pg_name} does not exist"),
            ));
        }
        if let Some(current) = iface.group() {
            return Err(Error::with(
                ErrorKind::AlreadyExists,
                format!("interface {if_name} is already a member of group {current}"),
            ));
        }

        self.groups.add_member(if_name, pg_name)?;
        self.ifaces
            .get_mut(if_name)
            .unwrap()
            .post_join_group(pg_name);
        if as_upstream {
            self.groups.set_upstream(if_name)?;
        }
        Ok(())
    }

    pub fn remove_from_group(&mut self, if_name: &str) -> Result<()> {
        if !self.ifaces.contains_key(if_name) {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("interface {if_name} does not exist"),
            ));
        }
        let pg_name = self.groups.remove_member(if_name)?;
        self.ifaces.get_mut(if_name).unwrap().post_leave_group();
        // The membership is gone, so a pending clear could only ever
        // re-enable an interface in a since-changed configuration.
        self.timers.cancel_loop_clear(if_name);
        self.timer_wakeup.notify_one();
        self.neighbors.clear_for_interface(if_name);
        tracing::debug!(IFACE = %if_name, GROUP = %pg_name, "left proxy group");
        Ok(())
    }

    pub fn set_upstream(&mut self, if_name: &str) -> Result<()> {
        if !self.ifaces.contains_key(if_name) {
            return Err(Error::with(
                ErrorKind::DoesNotExist,
                format!("interface {if_name} does not exist"),
            ));
        }
        self.groups.set_upstream(if_name)
    }

    pub fn unset_upstream(&mut self, pg_name: &str) -> Result<()> {
        self.groups.unset_upstream(pg_name)
    }

    /// Tears everything down in reverse order of construction.
    pub fn shutdown(&mut self) {
        for pg_name in self.groups.group_names() {
            let _ = self.release_group(&pg_name);
        }
        let names: Vec<String> = self.ifaces.keys().cloned().collect();
        for if_name in names {
            let _ = self.release_interface(&if_name);
        }
    }

    // Packet-plane handlers.

    pub(crate) fn handle_nd_readable(&mut self, if_name: &str) -> ReadOutcome {
        let Some(iface) = self.ifaces.get_mut(if_name) else {
            // Released while the wake-up was in flight.
            return ReadOutcome::Empty;
        };
        if !iface.is_enabled() {
            return match iface.discard_nd_input() {
                Ok(()) => ReadOutcome::Processed,
                Err(_) => ReadOutcome::Empty,
            };
        }
        if !iface.has_group() {
            tracing::warn!(IFACE = %if_name, "interface was enabled but not part of a group");
            iface.post_leave_group();
            let _ = self.ifaces.get_mut(if_name).unwrap().discard_nd_input();
            return ReadOutcome::Processed;
        }

        match iface.receive_nd() {
            Ok(Some((header, msg))) => {
                self.process_nd(if_name, header, msg);
                ReadOutcome::Processed
            }
            // A frame was drained but dropped silently.
            Ok(None) => ReadOutcome::Processed,
            Err(e) if e.kind() == ErrorKind::ResultUnavailable => ReadOutcome::Empty,
            Err(e) if e.kind() == ErrorKind::MalformedPacket => {
                tracing::debug!(IFACE = %if_name, "dropping malformed ND message: {e}");
                ReadOutcome::Processed
            }
            Err(e) => {
                tracing::error!(IFACE = %if_name, "failed to receive ND message: {e}");
                ReadOutcome::Empty
            }
        }
    }

    pub(crate) fn handle_ipv6_readable(&mut self, if_name: &str) -> ReadOutcome {
        let Some(iface) = self.ifaces.get_mut(if_name) else {
            return ReadOutcome::Empty;
        };
        if !iface.is_enabled() {
            return match iface.discard_ipv6_input() {
                Ok(()) => ReadOutcome::Processed,
                Err(_) => ReadOutcome::Empty,
            };
        }
        if !iface.has_group() {
            tracing::warn!(IFACE = %if_name, "interface was enabled but not part of a group");
            iface.post_leave_group();
            let _ = self.ifaces.get_mut(if_name).unwrap().discard_ipv6_input();
            return ReadOutcome::Processed;
        }

        match iface.receive_ipv6() {
            Ok((header, payload)) => {
                self.process_ipv6(if_name, header, payload);
                ReadOutcome::Processed
            }
            Err(e) if e.kind() == ErrorKind::ResultUnavailable => ReadOutcome::Empty,
            Err(e) if e.kind() == ErrorKind::MalformedPacket => {
                tracing::debug!(IFACE = %if_name, "dropping malformed IPv6 packet: {e}");
                ReadOutcome::Processed
            }
            Err(e) => {
                tracing::error!(IFACE = %if_name, "failed to receive IPv6 packet: {e}");
                ReadOutcome::Empty
            }
        }
    }

    /// Dispatches one inbound ND message.
    pub(crate) fn process_nd(&mut self, ingress: &str, header: Ipv6EtherHeader, msg: NdMessage) {
        let Some(iface) = self.ifaces.get(ingress) else {
            return;
        };
        // Locally destined traffic is the host's business, not ours.
        if iface.has_ipv6_address(header.dst) {
            return;
        }
        let Some(pg_name) = iface.group().map(str::to_string) else {
            return;
        };

        // Loop prevention, RFC 4389 section 4.1.3.
        if msg.nd_type() == ND_ROUTER_ADVERT {
            if !self.groups.is_upstream(ingress, &pg_name) {
                tracing::warn!(
                    IFACE = %ingress,
                    "router advertisement received on a downstream interface"
                );
                self.handle_loop_detection(ingress);
                return;
            }
            if msg.proxy_flag() == Some(true) && !self.nested {
                tracing::warn!(
                    IFACE = %ingress,
                    "already-proxied router advertisement received"
                );
                self.handle_loop_detection(ingress);
                return;
            }
        }

        self.learn_neighbor(ingress, &pg_name, &header, &msg);

        if header.dst.is_multicast() {
            let destination_ll = multicast_ll_address(header.dst);
            tracing::trace!(
                IFACE = %ingress,
                TYPE = %type_name(msg.nd_type()),
                SRC = %header.src,
                "proxying multicast ND message"
            );
            let members = match self.groups.group(&pg_name) {
                Some(group) => group.members().to_vec(),
                None => return,
            };
            for member in members {
                if member == ingress {
                    continue;
                }
                let Some(egress) = self.ifaces.get_mut(&member) else {
                    continue;
                };
                if !egress.is_enabled() {
                    continue;
                }
                if let Err(e) = egress.proxy_nd(header.clone(), &destination_ll, msg.clone()) {
                    tracing::error!(IFACE = %member, "failed to proxy ND message: {e}");
                }
            }
            return;
        }

        // Unicast: the neighbor cache picks the egress and MAC.
        let Some(entry) = self.neighbors.get(header.dst, &pg_name) else {
            tracing::debug!(DST = %header.dst, "no neighbor entry, dropping ND message");
            return;
        };
        let egress_name = entry.if_name.clone();
        let destination_ll = entry.ll_address.clone();
        if egress_name == ingress {
            // Never hairpin a frame back out its ingress.
            return;
        }
        let Some(egress) = self.ifaces.get_mut(&egress_name) else {
            return;
        };
        if !egress.is_enabled() {
            return;
        }
        tracing::trace!(
            IFACE = %ingress,
            TYPE = %type_name(msg.nd_type()),
            OUT = %egress_name,
            DST = %header.dst,
            "proxying unicast ND message"
        );
        if let Err(e) = egress.proxy_nd(header, &destination_ll, msg) {
            tracing::error!(
                IFACE = %egress_name,
                "failed to proxy ND message from {ingress}: {e}"
            );
        }
    }

    /// Dispatches one inbound non-ND IPv6 packet. Same shape as the ND
    /// path, minus loop suppression and message rewriting.
    pub(crate) fn process_ipv6(&mut self, ingress: &str, header: Ipv6EtherHeader, payload: Vec<u8>) {
        let Some(iface) = self.ifaces.get(ingress) else {
            return;
        };
        if iface.has_ipv6_address(header.dst) {
            return;
        }
        let Some(pg_name) = iface.group().map(str::to_string) else {
            return;
        };

        if header.dst.is_multicast() {
            let destination_ll = multicast_ll_address(header.dst);
            let members = match self.groups.group(&pg_name) {
                Some(group) => group.members().to_vec(),
                None => return,
            };
            for member in members {
                if member == ingress {
                    continue;
                }
                let Some(egress) = self.ifaces.get_mut(&member) else {
                    continue;
                };
                if !egress.is_enabled() {
                    continue;
                }
                if let Err(e) = egress.send_ipv6(header.clone(), &destination_ll, &payload) {
                    tracing::error!(IFACE = %member, "failed to proxy IPv6 packet: {e}");
                }
            }
            return;
        }

        let Some(entry) = self.neighbors.get(header.dst, &pg_name) else {
            tracing::debug!(DST = %header.dst, "no neighbor entry, dropping IPv6 packet");
            return;
        };
        let egress_name = entry.if_name.clone();
        let destination_ll = entry.ll_address.clone();
        if egress_name == ingress {
            return;
        }
        let Some(egress) = self.ifaces.get_mut(&egress_name) else {
            return;
        };
        if !egress.is_enabled() {
            return;
        }
        let egress_mtu = egress.mtu();
        match egress.send_ipv6(header.clone(), &destination_ll, &payload) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::MtuExceeded => {
                tracing::debug!(
                    IFACE = %egress_name,
                    MTU = egress_mtu,
                    "packet too big for egress link, reporting to sender"
                );
                if let Some(ingress_if) = self.ifaces.get_mut(ingress) {
                    if let Err(e) =
                        ingress_if.send_packet_too_big(header.src, egress_mtu, &header, &payload)
                    {
                        tracing::error!(IFACE = %ingress, "failed to send packet too big: {e}");
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    IFACE = %egress_name,
                    "failed to proxy IPv6 packet from {ingress}: {e}"
                );
            }
        }
    }

    /// Records the sender of an NS or the target of an NA so later
    /// unicast traffic can resolve an egress without a netlink feed.
    fn learn_neighbor(
        &mut self,
        ingress: &str,
        pg_name: &str,
        header: &Ipv6EtherHeader,
        msg: &NdMessage,
    ) {
        let now = Instant::now();
        let learned = match msg.nd_type() {
            ND_NEIGHBOR_SOLICIT => {
                if header.src.is_unspecified() {
                    // Duplicate address detection probes carry nothing
                    // to learn.
                    return;
                }
                let Some(source_ll) = msg.source_ll_address(0) else {
                    return;
                };
                let entry =
                    NeighborEntry::new(header.src, source_ll, ingress, false, NudState::Stale, now);
                self.neighbors.insert(pg_name, entry, now)
            }
            ND_NEIGHBOR_ADVERT => {
                let Some(target) = msg.target_address() else {
                    return;
                };
                let Some(target_ll) = msg.target_ll_address(0) else {
                    return;
                };
                let nud_state = if msg.solicited_flag() == Some(true) {
                    NudState::Reachable
                } else {
                    NudState::Stale
                };
                let is_router = msg.router_flag() == Some(true);
                let entry =
                    NeighborEntry::new(target, target_ll, ingress, is_router, nud_state, now);
                self.neighbors.insert(pg_name, entry, now)
            }
            _ => return,
        };
        if let Err(e) = learned {
            tracing::debug!(IFACE = %ingress, "not caching neighbor: {e}");
        }
    }

    /// Disables an interface that showed a loop condition and schedules
    /// the clear an hour out, replacing any pending clear.
    fn handle_loop_detection(&mut self, if_name: &str) {
        let Some(iface) = self.ifaces.get_mut(if_name) else {
            return;
        };
        let Some(pg_name) = iface.group().map(str::to_string) else {
            return;
        };
        iface.mark_loop_detected();
        self.timers.cancel_loop_clear(if_name);
        self.timers.schedule(
            TimerToken::LoopSuppressionClear {
                if_name: if_name.to_string(),
                pg_name,
            },
            TokioInstant::now() + LOOP_SUPPRESSION_TIME,
        );
        self.timer_wakeup.notify_one();
    }

    pub(crate) fn handle_timer(&mut self, token: TimerToken) {
        match token {
            TimerToken::LoopSuppressionClear { if_name, pg_name } => {
                let Some(iface) = self.ifaces.get_mut(&if_name) else {
                    return;
                };
                // A fire against a membership that changed since the
                // mark must not re-enable the interface.
                if iface.group() != Some(pg_name.as_str()) {
                    return;
                }
                tracing::debug!(IFACE = %if_name, "loop suppression period over");
                iface.clear_loop_detected();
            }
            TimerToken::NeighborSweep => {
                self.neighbors.clear_expired(Instant::now());
                self.timers.schedule(
                    TimerToken::NeighborSweep,
                    TokioInstant::now() + self.sweep_interval,
                );
                self.timer_wakeup.notify_one();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn timers(&mut self) -> &mut TimerCtrl {
        &mut self.timers
    }
}

/// `AsyncFd` needs an owner of the fd; the socket is shared between the
/// interface and its watcher task.
struct WatchedSocket(Rc<crate::sockets::EtherSocket>);

impl std::os::fd::AsRawFd for WatchedSocket {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        std::os::fd::AsRawFd::as_raw_fd(&*self.0)
    }
}

#[derive(Debug, Clone, Copy)]
enum WatchedPath {
    Nd,
    Ipv6,
}

/// Drives the engine until cancelled: spawns the socket watchers for
/// every bound interface and then services timers. Must run inside a
/// current-thread runtime's `LocalSet`.
pub async fn run(engine: Rc<RefCell<NdProxy>>) {
    let names: Vec<String> = engine.borrow().ifaces.keys().cloned().collect();
    for if_name in &names {
        spawn_watchers(&engine, if_name);
    }

    let wakeup = {
        let mut inner = engine.borrow_mut();
        let first_sweep = TokioInstant::now() + inner.sweep_interval;
        inner.timers.schedule(TimerToken::NeighborSweep, first_sweep);
        Rc::clone(&inner.timer_wakeup)
    };

    loop {
        let next = engine.borrow().timers.next();
        match next {
            None => wakeup.notified().await,
            Some(at) => {
                tokio::select! {
                    _ = wakeup.notified() => {}
                    _ = tokio::time::sleep_until(at) => {
                        let due = engine.borrow_mut().timers.due(TokioInstant::now());
                        for token in due {
                            engine.borrow_mut().handle_timer(token);
                        }
                    }
                }
            }
        }
    }
}

fn spawn_watchers(engine: &Rc<RefCell<NdProxy>>, if_name: &str) {
    let (nd, ipv6) = {
        let inner = engine.borrow();
        let Some(iface) = inner.ifaces.get(if_name) else {
            return;
        };
        (iface.nd_socket(), iface.ipv6_socket())
    };

    let mut handles = Vec::new();
    if let Some(sock) = nd {
        handles.push(spawn_socket_watcher(
            Rc::clone(engine),
            if_name.to_string(),
            sock,
            WatchedPath::Nd,
        ));
    }
    if let Some(sock) = ipv6 {
        handles.push(spawn_socket_watcher(
            Rc::clone(engine),
            if_name.to_string(),
            sock,
            WatchedPath::Ipv6,
        ));
    }
    engine
        .borrow_mut()
        .watchers
        .insert(if_name.to_string(), handles);
}

fn spawn_socket_watcher(
    engine: Rc<RefCell<NdProxy>>,
    if_name: String,
    sock: Rc<crate::sockets::EtherSocket>,
    path: WatchedPath,
) -> JoinHandle<()> {
    tokio::task::spawn_local(async move {
        let fd = match AsyncFd::with_interest(WatchedSocket(sock), Interest::READABLE) {
            Ok(fd) => fd,
            Err(e) => {
                tracing::error!(IFACE = %if_name, "cannot watch socket: {e}");
                return;
            }
        };
        loop {
            let mut guard = match fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!(IFACE = %if_name, "socket watch failed: {e}");
                    return;
                }
            };
            let outcome = {
                let mut inner = engine.borrow_mut();
                match path {
                    WatchedPath::Nd => inner.handle_nd_readable(&if_name),
                    WatchedPath::Ipv6 => inner.handle_ipv6_readable(&if_name),
                }
            };
            match outcome {
                // One frame consumed; poll again for more before
                // sleeping.
                ReadOutcome::Processed => {}
                ReadOutcome::Empty => guard.clear_ready(),
            }
        }
    })
}
