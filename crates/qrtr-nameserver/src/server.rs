// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Service registry and control-packet dispatch (§4.C).
//!
//! [`Registry`] holds no socket of its own: every `handle_*` method takes
//! the decoded event and returns the packets the caller should send. That
//! keeps the anti-spoof rules, lazy node creation and subscriber fan-out
//! testable without an `AF_QIPCRTR` socket, the way `hdds-discovery-server`'s
//! `server/registry.rs` separates the participant registry from the async
//! connection loop that drives it.

use qrtr_core::addr::{Addr, ServiceId};
use qrtr_core::containers::{IdMap, IntrusiveList};
use qrtr_core::ctrl;

/// A registered server: the `(service, instance)` it advertises and the
/// `(node, port)` it was registered at. `instance` is the full packed wire
/// value (instance ID in the high 24 bits, version in the low 8), since
/// matching operates on the packed value rather than the split pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Server {
    pub service: u32,
    pub instance: u32,
    pub addr: Addr,
}

#[derive(Default)]
pub struct NodeRecord {
    pub services: IdMap<u32, Server>,
}

#[derive(Debug, Clone, Copy)]
struct Subscription {
    subscriber: Addr,
    service: u32,
    instance: u32,
}

/// A control packet the caller should send after a dispatch call returns.
pub struct Outgoing {
    pub to: Addr,
    pub bytes: Vec<u8>,
}

impl Outgoing {
    fn new(to: Addr, bytes: Vec<u8>) -> Self {
        Self { to, bytes }
    }
}

fn service_matches(service: u32, instance: u32, filter_service: u32, filter_instance: u32) -> bool {
    if filter_service != 0 && service != filter_service {
        return false;
    }
    filter_instance == 0 || instance == filter_instance
}

fn server_id(server: &Server) -> ServiceId {
    let (instance, version) = ServiceId::unpack_instance(server.instance);
    ServiceId::new(server.service, instance, version)
}

pub struct Registry {
    nodes: IdMap<u32, NodeRecord>,
    lookups: IntrusiveList<Subscription>,
    local_node: u32,
}

impl Registry {
    pub fn new(local_node: u32) -> Self {
        Self {
            nodes: IdMap::new(),
            lookups: IntrusiveList::new(),
            local_node,
        }
    }

    pub fn local_node(&self) -> u32 {
        self.local_node
    }

    fn node_mut(&mut self, id: u32) -> &mut NodeRecord {
        self.nodes.get_or_insert_with(id, NodeRecord::default)
    }

    fn local_servers(&self) -> Vec<Server> {
        self.nodes
            .get(self.local_node)
            .map(|n| n.services.values().copied().collect())
            .unwrap_or_default()
    }

    fn server_add(&mut self, service: u32, instance: u32, node_id: u32, port: u32) -> Option<Server> {
        if service == 0 || port == 0 {
            return None;
        }
        let srv = Server {
            service,
            instance,
            addr: Addr::new(node_id, port),
        };
        self.node_mut(node_id).services.insert(port, srv);
        Some(srv)
    }

    /// Remove the server at `(node_id, port)`, returning it if present.
    fn server_del(&mut self, node_id: u32, port: u32) -> Option<Server> {
        self.nodes.get_mut(node_id)?.services.remove(port)
    }

    /// Removal side effects shared by BYE/DEL_CLIENT/DEL_SERVER: broadcast
    /// the removal if the server was local, then notify matching
    /// subscribers.
    fn announce_removal(&self, srv: Server, out: &mut Vec<Outgoing>) {
        if srv.addr.node == self.local_node {
            out.push(Outgoing::new(
                Addr::broadcast_ctrl(),
                ctrl::encode_del_server(server_id(&srv), srv.addr),
            ));
        }
        for sub in self.lookups.iter() {
            if service_matches(srv.service, srv.instance, sub.service, sub.instance) {
                out.push(Outgoing::new(
                    sub.subscriber,
                    ctrl::encode_del_server(server_id(&srv), srv.addr),
                ));
            }
        }
    }

    /// HELLO: echo it back, then announce every locally-registered server
    /// to the peer that just said hello.
    pub fn handle_hello(&self, from: Addr) -> Vec<Outgoing> {
        let mut out = vec![Outgoing::new(from, ctrl::encode_hello())];
        for srv in self.local_servers() {
            out.push(Outgoing::new(from, ctrl::encode_new_server(server_id(&srv), srv.addr)));
        }
        out
    }

    /// BYE: drop every server hosted on `from_node`, then tell every
    /// locally-registered server that node is gone. The set of servers to
    /// remove is snapshotted before any removal runs, since removing from
    /// the node's service map while iterating it would be unsound.
    pub fn handle_bye(&mut self, from_node: u32) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let ports: Vec<u32> = self
            .nodes
            .get(from_node)
            .map(|n| n.services.values().map(|s| s.addr.port).collect())
            .unwrap_or_default();
        for port in ports {
            if let Some(srv) = self.server_del(from_node, port) {
                self.announce_removal(srv, &mut out);
            }
        }

        let pkt = ctrl::encode_bye(from_node);
        for srv in self.local_servers() {
            out.push(Outgoing::new(srv.addr, pkt.clone()));
        }
        out
    }

    /// DEL_CLIENT `(node_id, port)`: rejects spoofed or non-self local
    /// requests. Drops matching lookups, removes the server at that
    /// address if any, and propagates DEL_CLIENT to every local server.
    pub fn handle_del_client(&mut self, from: Addr, node_id: u32, port: u32) -> Result<Vec<Outgoing>, ()> {
        if from.node != node_id {
            return Err(());
        }
        if from.node == self.local_node && from.port != port {
            return Err(());
        }

        let target = Addr::new(node_id, port);
        self.lookups.remove_matching(|sub| sub.subscriber == target);

        let mut out = Vec::new();
        if let Some(srv) = self.server_del(node_id, port) {
            self.announce_removal(srv, &mut out);
        }

        let pkt = ctrl::encode_del_client(node_id, port);
        for srv in self.local_servers() {
            out.push(Outgoing::new(srv.addr, pkt.clone()));
        }
        Ok(out)
    }

    /// NEW_SERVER: local advertisements have their `(node, port)` forced to
    /// the sender's own address (anti-spoof still applies to remote ones).
    pub fn handle_new_server(
        &mut self,
        from: Addr,
        service: u32,
        instance: u32,
        mut node_id: u32,
        mut port: u32,
    ) -> Result<Vec<Outgoing>, ()> {
        if from.node == self.local_node {
            node_id = from.node;
            port = from.port;
        }
        if from.node != node_id {
            return Err(());
        }
        let srv = self.server_add(service, instance, node_id, port).ok_or(())?;

        let mut out = Vec::new();
        if srv.addr.node == self.local_node {
            out.push(Outgoing::new(
                Addr::broadcast_ctrl(),
                ctrl::encode_new_server(server_id(&srv), srv.addr),
            ));
        }
        for sub in self.lookups.iter() {
            if service_matches(service, instance, sub.service, sub.instance) {
                out.push(Outgoing::new(
                    sub.subscriber,
                    ctrl::encode_new_server(server_id(&srv), srv.addr),
                ));
            }
        }
        Ok(out)
    }

    /// DEL_SERVER: symmetric to NEW_SERVER, plus "local servers may only
    /// unregister themselves".
    pub fn handle_del_server(
        &mut self,
        from: Addr,
        _service: u32,
        _instance: u32,
        mut node_id: u32,
        mut port: u32,
    ) -> Result<Vec<Outgoing>, ()> {
        if from.node == self.local_node {
            node_id = from.node;
            port = from.port;
        }
        if from.node != node_id {
            return Err(());
        }
        if from.node == self.local_node && from.port != port {
            return Err(());
        }

        let mut out = Vec::new();
        if let Some(srv) = self.server_del(node_id, port) {
            self.announce_removal(srv, &mut out);
        }
        Ok(out)
    }

    /// NEW_LOOKUP: local-only. Appends the subscription, replays every
    /// currently-matching server, then an end-of-enumeration marker.
    pub fn handle_new_lookup(&mut self, from: Addr, service: u32, instance: u32) -> Result<Vec<Outgoing>, ()> {
        if from.node != self.local_node {
            return Err(());
        }
        self.lookups.push(Subscription {
            subscriber: from,
            service,
            instance,
        });

        let mut out = Vec::new();
        for node in self.nodes.values() {
            for srv in node.services.values() {
                if service_matches(srv.service, srv.instance, service, instance) {
                    out.push(Outgoing::new(from, ctrl::encode_new_server(server_id(srv), srv.addr)));
                }
            }
        }
        out.push(Outgoing::new(
            from,
            ctrl::encode_new_server(ServiceId::new(0, 0, 0), Addr::new(0, 0)),
        ));
        Ok(out)
    }

    /// DEL_LOOKUP: removes subscriptions from `from` whose service matches
    /// exactly and whose instance is either wildcard or an exact match.
    pub fn handle_del_lookup(&mut self, from: Addr, service: u32, instance: u32) {
        self.lookups.remove_matching(|sub| {
            sub.subscriber == from && sub.service == service && (sub.instance == 0 || sub.instance == instance)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: u32 = 1;

    #[test]
    fn new_server_then_lookup_replays_match() {
        let mut reg = Registry::new(LOCAL);
        let remote = Addr::new(2, 100);
        reg.handle_new_server(remote, 15, 0x0100, 2, 100).unwrap();

        let subscriber = Addr::new(LOCAL, 5000);
        let out = reg.handle_new_lookup(subscriber, 15, 0).unwrap();
        assert_eq!(out.len(), 2); // one match + end marker
        assert!(out.iter().all(|o| o.to == subscriber));
    }

    #[test]
    fn anti_spoof_rejects_mismatched_node() {
        let mut reg = Registry::new(LOCAL);
        let spoofer = Addr::new(2, 100);
        let result = reg.handle_new_server(spoofer, 15, 0, 3, 100);
        assert!(result.is_err());
    }

    #[test]
    fn local_new_server_ignores_supplied_address() {
        let mut reg = Registry::new(LOCAL);
        let from = Addr::new(LOCAL, 777);
        let out = reg.handle_new_server(from, 15, 0, 99, 99).unwrap();
        // Broadcast to ctrl because it registered as a local server despite
        // the spoofed (node, port) in the request.
        assert!(out.iter().any(|o| o.to == Addr::broadcast_ctrl()));
    }

    #[test]
    fn bye_removes_all_servers_for_node_and_notifies_local() {
        let mut reg = Registry::new(LOCAL);
        reg.handle_new_server(Addr::new(LOCAL, 1), 10, 0, LOCAL, 1).unwrap();
        reg.handle_new_server(Addr::new(2, 50), 20, 0, 2, 50).unwrap();

        let out = reg.handle_bye(2);
        // local server at (LOCAL,1) should receive a BYE propagation
        assert!(out.iter().any(|o| o.to == Addr::new(LOCAL, 1)));
        assert!(reg.server_del(2, 50).is_none());
    }

    #[test]
    fn del_client_requires_self_for_local_port() {
        let mut reg = Registry::new(LOCAL);
        let result = reg.handle_del_client(Addr::new(LOCAL, 1), LOCAL, 2);
        assert!(result.is_err());
    }

    #[test]
    fn del_lookup_removes_wildcard_subscription() {
        let mut reg = Registry::new(LOCAL);
        let subscriber = Addr::new(LOCAL, 10);
        reg.handle_new_lookup(subscriber, 15, 0).unwrap();
        reg.handle_del_lookup(subscriber, 15, 99);
        assert!(reg.lookups.is_empty());
    }
}
