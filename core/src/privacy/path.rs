// Onion paths: guard selection and path building
//
// Guards are probed with a version check before use; they are the only nodes
// that see this client's address. The remaining hops are drawn unprobed from
// the reliable pool, never shared between paths and never a guard.
//
// Paths are persisted; guards are kept in memory and recovered from the
// persisted paths after a restart.

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::events::{Broadcaster, Event};
use crate::snode::{Snode, SnodeDirectory};
use crate::store::SnodeDatabase;
use crate::transport::http::{HttpClient, Verb};
use crate::util::random::{random_element, shuffled};

pub struct OnionPaths {
    directory: Arc<SnodeDirectory>,
    http: Arc<dyn HttpClient>,
    database: Arc<dyn SnodeDatabase>,
    broadcaster: Arc<dyn Broadcaster>,
    guards: RwLock<HashSet<Snode>>,
    /// Serializes rebuilds so concurrent misses build once
    build_lock: tokio::sync::Mutex<()>,
}

impl OnionPaths {
    pub fn new(
        directory: Arc<SnodeDirectory>,
        http: Arc<dyn HttpClient>,
        database: Arc<dyn SnodeDatabase>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            directory,
            http,
            database,
            broadcaster,
            guards: RwLock::new(HashSet::new()),
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Persisted paths, guard first
    pub fn paths(&self) -> Vec<Vec<Snode>> {
        self.database.onion_paths()
    }

    pub fn guard_nodes(&self) -> HashSet<Snode> {
        self.guards.read().clone()
    }

    /// Confirmed guards, probing new candidates until `path_count` are known
    pub async fn get_guard_nodes(&self) -> Result<HashSet<Snode>> {
        let target = self.directory.config().path_count;
        let mut accepted = self.guard_nodes();
        if accepted.len() >= target {
            return Ok(accepted);
        }

        self.directory.get_random_node().await?;
        let mut unused: HashSet<Snode> = self
            .directory
            .reliable_snode_pool()
            .difference(&accepted)
            .cloned()
            .collect();
        if unused.len() < target - accepted.len() {
            return Err(ApiError::InsufficientNodes);
        }

        while accepted.len() < target {
            if unused.is_empty() {
                warn!("Ran out of guard node candidates");
                return Err(ApiError::InsufficientNodes);
            }
            let needed = target - accepted.len();
            let candidates: Vec<Snode> = shuffled(unused.iter().cloned().collect())
                .into_iter()
                .take(needed)
                .collect();
            for candidate in &candidates {
                unused.remove(candidate);
            }

            let results = join_all(candidates.iter().map(|c| self.probe_guard(c))).await;
            for (candidate, usable) in candidates.into_iter().zip(results) {
                if usable {
                    accepted.insert(candidate);
                }
            }
        }

        info!("Selected {} guard nodes", accepted.len());
        *self.guards.write() = accepted.clone();
        Ok(accepted)
    }

    async fn probe_guard(&self, candidate: &Snode) -> bool {
        let minimum = &self.directory.config().minimum_snode_version;
        match self
            .http
            .execute(Verb::Get, &candidate.url("get_stats/v1"), None)
            .await
        {
            Ok(stats) => match stats.get("version").and_then(Value::as_str) {
                Some(version) if version_at_least(version, minimum) => true,
                Some(version) => {
                    debug!("Rejecting guard {} running version {}", candidate, version);
                    false
                }
                None => {
                    debug!("Guard {} reported no version", candidate);
                    false
                }
            },
            Err(e) => {
                debug!("Guard probe of {} failed: {}", candidate, e);
                false
            }
        }
    }

    /// Build one path per guard and persist them, replacing any previous set
    pub async fn build_paths(&self) -> Result<Vec<Vec<Snode>>> {
        info!("Building onion request paths");
        self.broadcaster.broadcast(Event::BuildingPaths);

        self.directory.get_random_node().await?;
        let guards = self.get_guard_nodes().await?;

        let hops_per_path = self.directory.config().path_size.saturating_sub(1);
        let mut unused: Vec<Snode> = shuffled(
            self.directory
                .reliable_snode_pool()
                .difference(&guards)
                .cloned()
                .collect(),
        );
        if unused.len() < hops_per_path * guards.len() {
            return Err(ApiError::InsufficientNodes);
        }

        let paths: Vec<Vec<Snode>> = guards
            .iter()
            .map(|guard| {
                let mut path = Vec::with_capacity(hops_per_path + 1);
                path.push(guard.clone());
                path.extend(unused.drain(..hops_per_path));
                path
            })
            .collect();

        info!("Built new onion request paths");
        self.database.set_onion_paths(&paths);
        self.broadcaster.broadcast(Event::PathsBuilt);
        Ok(paths)
    }

    fn select_path(&self, exclude: Option<&Snode>) -> Option<Vec<Snode>> {
        let paths = self.paths();
        if paths.len() < self.directory.config().path_count {
            return None;
        }

        {
            let mut guards = self.guards.write();
            if guards.is_empty() {
                *guards = paths.iter().filter_map(|p| p.first().cloned()).collect();
            }
        }

        let candidates: Vec<Vec<Snode>> = paths
            .into_iter()
            .filter(|path| exclude.map_or(true, |node| !path.contains(node)))
            .collect();
        random_element(&candidates).cloned()
    }

    /// A path not containing `exclude`, building new paths once if needed
    pub async fn get_path(&self, exclude: Option<&Snode>) -> Result<Vec<Snode>> {
        if let Some(path) = self.select_path(exclude) {
            return Ok(path);
        }

        let _building = self.build_lock.lock().await;
        if let Some(path) = self.select_path(exclude) {
            return Ok(path);
        }
        self.build_paths().await?;
        self.select_path(exclude).ok_or(ApiError::InsufficientNodes)
    }

    pub fn drop_guard(&self, node: &Snode) {
        if self.guards.write().remove(node) {
            debug!("Dropped guard {}", node);
        }
    }

    pub fn drop_path_containing(&self, node: &Snode) {
        let mut paths = self.paths();
        let before = paths.len();
        paths.retain(|path| !path.contains(node));
        if paths.len() != before {
            debug!("Dropped {} path(s) containing {}", before - paths.len(), node);
            self.database.set_onion_paths(&paths);
        }
    }
}

/// Dotted version comparison; missing or non-numeric components count as 0
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|c| c.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(version), parse(minimum));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x > y;
        }
    }
    true
}
