//! Registry of live managed proxies.
//!
//! The registry is the single owner of every [`ManagedProxy`]. Other
//! components hold a [`ProxyId`] and go through the registry to look a
//! proxy up; nothing else keeps a reference to one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::extra_info::extra_info_descriptor;
use super::proxy::{ManagedProxy, Phase, ProxySnapshot};
use super::record::{Role, Transport};

/// Stable handle to a proxy in a [`ProxyRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProxyId(u64);

impl std::fmt::Display for ProxyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proxy#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: BTreeMap<ProxyId, ManagedProxy>,
    next_id: u64,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` with the helper launched as `argv`.
    ///
    /// A helper that has not started negotiating yet is reused, so several
    /// transports served by one binary share a process. Otherwise a new
    /// proxy is created.
    pub fn launch(&mut self, role: Role, argv: &[String], transport: &str) -> ProxyId {
        let existing = self.proxies.iter_mut().find(|(_, mp)| {
            mp.role() == role && mp.argv() == argv && mp.phase() == Phase::Infant
        });
        if let Some((id, mp)) = existing {
            mp.request_transport(transport);
            debug!("Added transport {} to existing {}", transport, id);
            return *id;
        }

        let mut mp = ManagedProxy::new(role, argv.to_vec());
        mp.request_transport(transport);
        self.insert(mp)
    }

    /// Take ownership of an already built proxy.
    pub fn insert(&mut self, proxy: ManagedProxy) -> ProxyId {
        let id = ProxyId(self.next_id);
        self.next_id += 1;
        debug!("Registered managed proxy \"{}\" as {}", proxy.label(), id);
        self.proxies.insert(id, proxy);
        id
    }

    pub fn get(&self, id: ProxyId) -> Option<&ManagedProxy> {
        self.proxies.get(&id)
    }

    pub fn get_mut(&mut self, id: ProxyId) -> Option<&mut ManagedProxy> {
        self.proxies.get_mut(&id)
    }

    /// Tear a proxy down once its process has exited.
    pub fn remove(&mut self, id: ProxyId) -> Option<ManagedProxy> {
        self.proxies.remove(&id)
    }

    pub fn find_by_label(&self, label: &str) -> Option<ProxyId> {
        self.proxies
            .iter()
            .find(|(_, mp)| mp.label() == label)
            .map(|(id, _)| *id)
    }

    /// Ids in creation order.
    pub fn ids(&self) -> Vec<ProxyId> {
        self.proxies.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Proxies still negotiating (neither completed nor broken).
    pub fn unconfigured_count(&self) -> usize {
        self.proxies
            .values()
            .filter(|mp| !matches!(mp.phase(), Phase::Completed | Phase::Broken))
            .count()
    }

    /// Descriptor `transport` lines for every completed server proxy.
    pub fn extra_info_descriptor(&self) -> Option<String> {
        extra_info_descriptor(self.proxies.values())
    }

    /// First completed client transport called `name`.
    pub fn find_client_transport(&self, name: &str) -> Option<&Transport> {
        self.proxies
            .values()
            .filter(|mp| mp.role() == Role::Client && mp.phase() == Phase::Completed)
            .flat_map(|mp| mp.transports())
            .find(|t| t.name() == name)
    }

    pub fn snapshot(&self, id: ProxyId) -> Option<ProxySnapshot> {
        self.get(id).map(ManagedProxy::snapshot)
    }

    pub fn snapshots(&self) -> Vec<(ProxyId, ProxySnapshot)> {
        self.proxies
            .iter()
            .map(|(id, mp)| (*id, mp.snapshot()))
            .collect()
    }
}
