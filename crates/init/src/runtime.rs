//! The service manager's runtime state machine.
//!
//! One tick every 50 ms. Pending services whose conditions hold are
//! spawned (or moved to Waiting for their configured delay); readiness
//! reports arrive over the `init_notify` endpoint; filesystem services are
//! probed and mounted after they report ready; services that never become
//! ready time out; failures flow downstream; exited children are reaped
//! and respawned when configured.

use crate::config::{ServiceSet, StartMode};
use crate::graph::{self, DepKind, Graph, GraphError};
use crate::handles::{self, HandleError};
use crate::notify;
use crate::sys::{StartRequest, Sys};
use alloc::string::String;
use alloc::vec::Vec;
use xnix_abi::{Handle, HANDLE_INVALID};

pub const TICK_MS: u32 = 50;
pub const READY_TIMEOUT_MS: u32 = 5_000;
pub const MOUNT_PROBE_TIMEOUT_MS: u32 = 5_000;
pub const DIAG_INTERVAL_MS: u32 = 2_000;

/// Ordering matters: the dependency checks compare against `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SvcState {
    Pending,
    Waiting,
    Starting,
    Running,
    Stopped,
    Failed,
}

#[derive(Debug, Clone)]
struct SvcRuntime {
    state: SvcState,
    pid: i32,
    start_ms: u32,
    delay_start: u32,
    probe_start: u32,
    reported_ready: bool,
    ready: bool,
    mounted: bool,
}

impl SvcRuntime {
    fn new() -> Self {
        Self {
            state: SvcState::Pending,
            pid: -1,
            start_ms: 0,
            delay_start: 0,
            probe_start: 0,
            reported_ready: false,
            ready: false,
            mounted: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[derive(Debug)]
pub enum LoadError {
    Graph(GraphError),
    Handles(HandleError),
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LoadError::Graph(e) => write!(f, "{}", e),
            LoadError::Handles(e) => write!(f, "{}", e),
        }
    }
}

pub struct Manager<S: Sys> {
    set: ServiceSet,
    graph: Graph,
    rt: Vec<SvcRuntime>,
    sys: S,
    ms: u32,
    last_diag: u32,
    init_notify: Option<Handle>,
    quiet: bool,
}

impl<S: Sys> Manager<S> {
    /// Full resolution pipeline: parse, discovery, handle provisioning,
    /// dependency graph, builtin marking.
    pub fn load(conf: &str, mut sys: S, init_notify: Option<Handle>) -> Result<Self, LoadError> {
        let mut set = crate::config::parse(conf, |line| sys.log_line(line));

        handles::resolve_discovery(&mut set, |line| sys.log_line(line))
            .map_err(LoadError::Handles)?;
        handles::resolve_handles(&mut set, &mut sys).map_err(LoadError::Handles)?;
        let graph = graph::build(&set).map_err(|e| {
            sys.log_line(&alloc::format!("{}", e));
            LoadError::Graph(e)
        })?;

        let mut rt: Vec<SvcRuntime> = (0..set.services.len()).map(|_| SvcRuntime::new()).collect();
        for (i, svc) in set.services.iter().enumerate() {
            if svc.builtin {
                // Already running when init came up; nothing to spawn.
                rt[i].state = SvcState::Running;
            }
        }

        sys.log_line(&alloc::format!(
            "loaded {} services, {} levels",
            set.services.len(),
            graph.max_level + 1
        ));

        Ok(Self { set, graph, rt, sys, ms: 0, last_diag: 0, init_notify, quiet: false })
    }

    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn services(&self) -> &ServiceSet {
        &self.set
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn state_of(&self, idx: usize) -> SvcState {
        self.rt[idx].state
    }

    pub fn is_ready(&self, idx: usize) -> bool {
        self.rt[idx].ready
    }

    pub fn pid_of(&self, idx: usize) -> i32 {
        self.rt[idx].pid
    }

    /// One 50 ms step of the runtime loop.
    pub fn tick(&mut self) {
        self.ms += TICK_MS;

        self.process_delays();
        self.try_mounts();
        self.check_ready_timeouts();
        self.propagate_failures();
        self.reap_children();
        self.maybe_diagnostics();
        self.start_pending();
    }

    /// Milliseconds of manager uptime.
    pub fn uptime_ms(&self) -> u32 {
        self.ms
    }

    /// Start conditions for one Pending service: every `after` target at
    /// least Starting, every `ready` target ready, the `wait_path` present,
    /// and no `wants` target stuck mid-start.
    fn can_start(&mut self, idx: usize) -> bool {
        for &(target, kind) in &self.graph.deps[idx] {
            match kind {
                DepKind::After => {
                    if self.rt[target].state < SvcState::Starting {
                        return false;
                    }
                }
                DepKind::Ready => {
                    if !self.rt[target].ready {
                        return false;
                    }
                }
            }
        }

        // A wants target holds us back only while it is on its way up.
        for want in &self.set.services[idx].wants {
            if let Some(target) = self.set.find_service(want) {
                let rt = &self.rt[target];
                if rt.state == SvcState::Running && !rt.ready {
                    return false;
                }
            }
        }

        if let Some(path) = self.set.services[idx].wait_path.clone() {
            if !self.sys.path_exists(&path) {
                return false;
            }
        }

        true
    }

    fn start_pending(&mut self) {
        for n in 0..self.graph.topo_order.len() {
            let idx = self.graph.topo_order[n];
            if self.rt[idx].state != SvcState::Pending {
                continue;
            }
            if !self.can_start(idx) {
                continue;
            }

            if self.set.services[idx].delay_ms > 0 {
                self.rt[idx].state = SvcState::Waiting;
                self.rt[idx].delay_start = self.ms;
            } else {
                self.start_service(idx);
            }
        }
    }

    fn process_delays(&mut self) {
        for idx in 0..self.rt.len() {
            if self.rt[idx].state == SvcState::Waiting
                && self.ms - self.rt[idx].delay_start >= self.set.services[idx].delay_ms
            {
                self.start_service(idx);
            }
        }
    }

    fn start_service(&mut self, idx: usize) {
        let cfg = &self.set.services[idx];
        self.sys.log_line(&alloc::format!("starting {}...", cfg.name));
        self.rt[idx].state = SvcState::Starting;

        let mut handles: Vec<(String, Handle)> = cfg
            .handles
            .iter()
            .map(|h| (h.name.clone(), h.handle))
            .collect();
        if let Some(notify_ep) = self.init_notify {
            if handles.len() < crate::config::HANDLES_MAX {
                handles.push((String::from("init_notify"), notify_ep));
            }
        }

        let req = StartRequest {
            name: cfg.name.clone(),
            profile: cfg.profile.clone(),
            module_name: cfg.module_name.clone(),
            path: cfg.path.clone(),
            args: cfg.args.clone(),
            handles,
            use_path: cfg.mode == StartMode::Path,
        };

        match self.sys.spawn(&req) {
            Ok(pid) => {
                let name = self.set.services[idx].name.clone();
                self.sys.log_line(&alloc::format!("{} started (pid={})", name, pid));
                let rt = &mut self.rt[idx];
                rt.state = SvcState::Running;
                rt.pid = pid;
                rt.start_ms = self.ms;
                rt.probe_start = 0;
                rt.reported_ready = false;
                rt.ready = false;
                rt.mounted = false;
            }
            Err(err) => {
                let name = self.set.services[idx].name.clone();
                self.sys.log_line(&alloc::format!("failed to start {}: {}", name, err));
                self.rt[idx].state = SvcState::Failed;
            }
        }
    }

    /// Feed a message received on the `init_notify` endpoint.
    pub fn handle_notify_message(&mut self, regs: &[u32; xnix_abi::ipc::IPC_MSG_REGS], buffer: &[u8]) {
        if let Some((pid, name)) = notify::parse_ready(regs, buffer) {
            self.handle_ready(pid as i32, &name);
        }
    }

    /// A service reported ready; matched by pid and name.
    pub fn handle_ready(&mut self, pid: i32, name: &str) {
        let Some(idx) = self.set.find_service(name) else {
            return;
        };
        let rt = &mut self.rt[idx];
        if rt.state != SvcState::Running || rt.pid != pid {
            return;
        }
        rt.reported_ready = true;
        // Mounted services only count as ready once the mount succeeds.
        if self.set.services[idx].mount.is_none() {
            rt.ready = true;
        }
        self.sys.log_line(&alloc::format!("service '{}' reported ready", name));
    }

    /// Probe and mount filesystem services that have reported ready.
    fn try_mounts(&mut self) {
        for idx in 0..self.rt.len() {
            let Some(mount_path) = self.set.services[idx].mount.clone() else {
                continue;
            };
            {
                let rt = &self.rt[idx];
                if rt.state != SvcState::Running || !rt.reported_ready || rt.mounted {
                    continue;
                }
            }

            // The mount endpoint is the first provided endpoint.
            let name = self.set.services[idx].name.clone();
            let Some(ep_name) = self.set.services[idx].provides.first().cloned() else {
                self.sys.log_line(&alloc::format!("{}: mount requires a provides endpoint", name));
                self.rt[idx].state = SvcState::Failed;
                continue;
            };
            let ep = self.set.services[idx]
                .handles
                .iter()
                .find(|h| h.name == ep_name)
                .map_or(HANDLE_INVALID, |h| h.handle);
            if ep == HANDLE_INVALID {
                self.sys.log_line(&alloc::format!("{}: mount endpoint unresolved", name));
                self.rt[idx].state = SvcState::Failed;
                continue;
            }

            if self.rt[idx].probe_start == 0 {
                self.rt[idx].probe_start = self.ms;
            }

            if self.sys.probe_endpoint(ep) {
                match self.sys.vfs_mount(&mount_path, ep) {
                    Ok(()) => {
                        self.sys.log_line(&alloc::format!("{} mounted on {}", name, mount_path));
                        let rt = &mut self.rt[idx];
                        rt.mounted = true;
                        rt.ready = true;
                    }
                    Err(err) => {
                        self.sys
                            .log_line(&alloc::format!("failed to mount {}: {}", mount_path, err));
                        self.rt[idx].state = SvcState::Failed;
                    }
                }
            } else if self.ms - self.rt[idx].probe_start >= MOUNT_PROBE_TIMEOUT_MS {
                self.sys.log_line(&alloc::format!("timeout: {} did not answer probes", name));
                self.rt[idx].state = SvcState::Failed;
            }
        }
    }

    /// Does any other service list `idx` in its `ready` dependencies?
    fn is_ready_depended(&self, idx: usize) -> bool {
        let name = &self.set.services[idx].name;
        self.set
            .services
            .iter()
            .enumerate()
            .any(|(i, other)| i != idx && other.ready.iter().any(|d| d == name))
    }

    fn check_ready_timeouts(&mut self) {
        for idx in 0..self.rt.len() {
            {
                let rt = &self.rt[idx];
                if rt.state != SvcState::Running || rt.ready {
                    continue;
                }
                if self.ms - rt.start_ms < READY_TIMEOUT_MS {
                    continue;
                }
            }

            if !self.is_ready_depended(idx) {
                // Nobody cares; accept silently.
                self.rt[idx].ready = true;
                continue;
            }

            let name = self.set.services[idx].name.clone();
            let pid = self.rt[idx].pid;
            self.sys.log_line(&alloc::format!("timeout: {} not ready (pid={})", name, pid));
            self.rt[idx].state = SvcState::Failed;
        }
    }

    /// A failed dependency takes its Pending dependents down with it,
    /// through both `ready` and `after` edges.
    fn propagate_failures(&mut self) {
        loop {
            let mut changed = false;
            for idx in 0..self.rt.len() {
                if self.rt[idx].state != SvcState::Pending {
                    continue;
                }
                for &(target, _) in &self.graph.deps[idx] {
                    if self.rt[target].state == SvcState::Failed {
                        let name = self.set.services[idx].name.clone();
                        let dep = self.set.services[target].name.clone();
                        self.sys.log_line(&alloc::format!("failed: {} depends on {}", name, dep));
                        self.rt[idx].state = SvcState::Failed;
                        changed = true;
                        break;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn reap_children(&mut self) {
        while let Some((pid, status)) = self.sys.waitpid_nohang() {
            self.handle_exit(pid, status);
        }
    }

    /// A child exited: back to Pending when respawn is configured,
    /// Stopped otherwise.
    pub fn handle_exit(&mut self, pid: i32, status: i32) {
        for idx in 0..self.rt.len() {
            if self.rt[idx].pid != pid {
                continue;
            }
            let name = self.set.services[idx].name.clone();
            self.sys.log_line(&alloc::format!("{} exited (status={})", name, status));

            self.rt[idx].reset();
            if self.set.services[idx].respawn {
                self.sys.log_line(&alloc::format!("respawning {}...", name));
                self.rt[idx].state = SvcState::Pending;
            } else {
                self.rt[idx].state = SvcState::Stopped;
            }
            return;
        }
    }

    /// Mark a service failed from outside (e.g. a kernel-reported fault).
    pub fn mark_failed(&mut self, name: &str) {
        if let Some(idx) = self.set.find_service(name) {
            self.rt[idx].state = SvcState::Failed;
        }
    }

    fn maybe_diagnostics(&mut self) {
        if self.quiet || self.ms - self.last_diag < DIAG_INTERVAL_MS {
            return;
        }
        self.last_diag = self.ms;

        let mut lines: Vec<String> = Vec::new();
        for idx in 0..self.rt.len() {
            let cfg = &self.set.services[idx];
            let rt = &self.rt[idx];
            match rt.state {
                SvcState::Pending => {
                    let mut reason = String::from("conditions not met");
                    for &(target, kind) in &self.graph.deps[idx] {
                        let blocked = match kind {
                            DepKind::Ready => !self.rt[target].ready,
                            DepKind::After => self.rt[target].state < SvcState::Starting,
                        };
                        if blocked {
                            reason = alloc::format!(
                                "waiting {} {}",
                                if kind == DepKind::Ready { "ready" } else { "after" },
                                self.set.services[target].name
                            );
                            break;
                        }
                    }
                    lines.push(alloc::format!("  {}: PENDING ({})", cfg.name, reason));
                }
                SvcState::Waiting => {
                    lines.push(alloc::format!(
                        "  {}: WAITING ({}/{})",
                        cfg.name,
                        self.ms - rt.delay_start,
                        cfg.delay_ms
                    ));
                }
                SvcState::Running if !rt.ready => {
                    let what = if rt.reported_ready { "mount" } else { "ready" };
                    lines.push(alloc::format!(
                        "  {}: RUNNING (waiting {}, {})",
                        cfg.name,
                        what,
                        self.ms - rt.start_ms
                    ));
                }
                SvcState::Failed => {
                    lines.push(alloc::format!("  {}: FAILED", cfg.name));
                }
                _ => {}
            }
        }

        if !lines.is_empty() {
            self.sys.log_line("services waiting:");
            for line in lines {
                self.sys.log_line(&line);
            }
        }
    }
}
