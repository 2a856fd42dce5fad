//! Permission nodes and per-process permission state.
//!
//! Permission nodes are dotted names (`xnix.ipc.endpoint.vfs.send`)
//! interned into dense IDs by a global registry; a process's resolved
//! state is a grant bitmap indexed by ID, so the hot path (`check`) is a
//! single bit test. Resolution is the cold path: it walks the profile
//! inheritance chain, expands `*` wildcards against the registry and
//! applies per-process overrides. A dirty flag plus a registry-size
//! snapshot make resolution lazy and re-run it when new nodes appear.

use crate::sync::IrqMutex;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

pub type PermId = u32;
pub const PERM_ID_INVALID: PermId = u32::MAX;

/// Well-known permission node names checked by the syscall layer.
pub mod nodes {
    pub const IPC_SEND: &str = "xnix.ipc.send";
    pub const IPC_RECV: &str = "xnix.ipc.recv";
    pub const IPC_ENDPOINT_CREATE: &str = "xnix.ipc.endpoint.create";
    pub const PROC_SPAWN: &str = "xnix.proc.spawn";
    pub const PROC_KILL: &str = "xnix.proc.kill";
    pub const IO_PORT: &str = "xnix.io.port";
    pub const IO_IRQ: &str = "xnix.io.irq";
    pub const MEM_PHYS: &str = "xnix.mem.phys";
}

const MAX_INHERIT_DEPTH: usize = 8;

struct Registry {
    names: Vec<String>,
    index: BTreeMap<String, PermId>,
}

lazy_static::lazy_static! {
    static ref REGISTRY: IrqMutex<Registry> =
        IrqMutex::new(Registry { names: Vec::new(), index: BTreeMap::new() });
    static ref PROFILES: IrqMutex<Vec<ProfileDef>> = IrqMutex::new(Vec::new());
}

/// Intern a permission node name, returning its dense ID.
pub fn register(name: &str) -> PermId {
    let mut reg = REGISTRY.lock();
    if let Some(&id) = reg.index.get(name) {
        return id;
    }
    let id = reg.names.len() as PermId;
    reg.names.push(String::from(name));
    reg.index.insert(String::from(name), id);
    id
}

pub fn lookup(name: &str) -> Option<PermId> {
    REGISTRY.lock().index.get(name).copied()
}

pub fn registry_count() -> u32 {
    REGISTRY.lock().names.len() as u32
}

/// Names matching a `prefix.*` wildcard.
fn expand_wildcard(pattern: &str) -> Vec<PermId> {
    let prefix = match pattern.split_once('*') {
        Some((p, _)) => p,
        None => return Vec::new(),
    };
    let reg = REGISTRY.lock();
    reg.names
        .iter()
        .enumerate()
        .filter(|(_, name)| name.starts_with(prefix))
        .map(|(id, _)| id as PermId)
        .collect()
}

/// A named permission profile, as loaded from the init configuration.
pub struct ProfileDef {
    pub name: String,
    pub inherit: Option<String>,
    pub entries: Vec<(String, bool)>,
}

pub fn register_profile(name: &str, inherit: Option<&str>, entries: &[(&str, bool)]) {
    let mut profiles = PROFILES.lock();
    // Last registration wins; init may reload its configuration.
    profiles.retain(|p| p.name != name);
    profiles.push(ProfileDef {
        name: String::from(name),
        inherit: inherit.map(String::from),
        entries: entries
            .iter()
            .map(|(n, v)| (String::from(*n), *v))
            .collect(),
    });
}

pub fn profile_exists(name: &str) -> bool {
    PROFILES.lock().iter().any(|p| p.name == name)
}

struct StateInner {
    profile: Option<String>,
    overrides: Vec<(String, bool)>,
    grant_bitmap: Vec<u32>,
    registry_snapshot: u32,
    dirty: bool,
    /// Unrestricted states (kernel process, init, profile-less spawns)
    /// grant everything.
    restricted: bool,
}

pub struct PermState {
    inner: IrqMutex<StateInner>,
}

impl PermState {
    /// Everything allowed; used for the kernel process and for spawns
    /// without a profile.
    pub fn permissive() -> Self {
        Self {
            inner: IrqMutex::new(StateInner {
                profile: None,
                overrides: Vec::new(),
                grant_bitmap: Vec::new(),
                registry_snapshot: 0,
                dirty: false,
                restricted: false,
            }),
        }
    }

    pub fn with_profile(profile: &str) -> Self {
        Self {
            inner: IrqMutex::new(StateInner {
                profile: Some(String::from(profile)),
                overrides: Vec::new(),
                grant_bitmap: Vec::new(),
                registry_snapshot: 0,
                dirty: true,
                restricted: true,
            }),
        }
    }

    pub fn apply_profile(&self, profile: &str) {
        let mut inner = self.inner.lock();
        inner.profile = Some(String::from(profile));
        inner.restricted = true;
        inner.dirty = true;
    }

    /// Process-level override; `name` may carry a trailing wildcard.
    pub fn add_override(&self, name: &str, value: bool) {
        let mut inner = self.inner.lock();
        inner.overrides.push((String::from(name), value));
        inner.restricted = true;
        inner.dirty = true;
    }

    pub fn is_restricted(&self) -> bool {
        self.inner.lock().restricted
    }

    /// Fast path: bitmap bit test, resolving first if stale.
    pub fn check(&self, id: PermId) -> bool {
        if id == PERM_ID_INVALID {
            return false;
        }
        let mut inner = self.inner.lock();
        if !inner.restricted {
            return true;
        }
        if inner.dirty || inner.registry_snapshot != registry_count() {
            resolve(&mut inner);
        }
        let word = (id / 32) as usize;
        inner
            .grant_bitmap
            .get(word)
            .map_or(false, |w| w & (1 << (id % 32)) != 0)
    }

    pub fn check_name(&self, name: &str) -> bool {
        if !self.is_restricted() {
            return true;
        }
        match lookup(name) {
            Some(id) => self.check(id),
            None => false,
        }
    }
}

fn set_bit(bitmap: &mut [u32], id: PermId, value: bool) {
    let word = (id / 32) as usize;
    if let Some(w) = bitmap.get_mut(word) {
        if value {
            *w |= 1 << (id % 32);
        } else {
            *w &= !(1 << (id % 32));
        }
    }
}

fn apply_entry(bitmap: &mut [u32], name: &str, value: bool) {
    if name.contains('*') {
        for id in expand_wildcard(name) {
            set_bit(bitmap, id, value);
        }
    } else {
        // Profile entries may name nodes nothing has registered yet;
        // intern them so the grant is not lost.
        let id = register(name);
        set_bit(bitmap, id, value);
    }
}

fn apply_profile_chain(bitmap: &mut [u32], profile_name: &str, depth: usize) {
    if depth >= MAX_INHERIT_DEPTH {
        crate::warn!("perm: profile inherit chain too deep at '{}'", profile_name);
        return;
    }

    let (inherit, entries) = {
        let profiles = PROFILES.lock();
        match profiles.iter().find(|p| p.name == profile_name) {
            Some(p) => (p.inherit.clone(), p.entries.clone()),
            None => {
                return;
            }
        }
    };

    // Parent first, so the child's entries override it.
    if let Some(parent) = inherit {
        apply_profile_chain(bitmap, &parent, depth + 1);
    }
    for (name, value) in &entries {
        apply_entry(bitmap, name, *value);
    }
}

/// Cold path: rebuild the grant bitmap from profile chain plus overrides.
fn resolve(inner: &mut StateInner) {
    let count = registry_count();
    let words = ((count + 31) / 32) as usize;
    // Profiles can intern new nodes while resolving; leave headroom and
    // re-check the snapshot on the next check() if we still missed some.
    let mut bitmap = alloc::vec![0u32; words + 4];

    if let Some(profile) = inner.profile.clone() {
        apply_profile_chain(&mut bitmap, &profile, 0);
    }
    for (name, value) in inner.overrides.clone() {
        apply_entry(&mut bitmap, &name, value);
    }

    inner.grant_bitmap = bitmap;
    inner.registry_snapshot = registry_count();
    inner.dirty = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_state_allows_everything() {
        let s = PermState::permissive();
        let id = register("xnix.test.anything");
        assert!(s.check(id));
        assert!(s.check_name("xnix.never.registered"));
    }

    #[test]
    fn profile_grants_and_overrides() {
        register_profile("svc-base", None, &[("xnix.ipc.send", true), ("xnix.io.port", false)]);
        let send = register("xnix.ipc.send");
        let port = register("xnix.io.port");

        let s = PermState::with_profile("svc-base");
        assert!(s.check(send));
        assert!(!s.check(port));
        assert!(!s.check_name("xnix.unknown.node"));

        s.add_override("xnix.io.port", true);
        assert!(s.check(port));
    }

    #[test]
    fn profile_inheritance_applies_parent_then_child() {
        register_profile("parent-prof", None, &[("xnix.a.one", true), ("xnix.a.two", true)]);
        register_profile("child-prof", Some("parent-prof"), &[("xnix.a.two", false)]);

        let one = register("xnix.a.one");
        let two = register("xnix.a.two");

        let s = PermState::with_profile("child-prof");
        assert!(s.check(one));
        assert!(!s.check(two));
    }

    #[test]
    fn wildcard_expands_against_registry() {
        let r = register("xnix.wild.read");
        let w = register("xnix.wild.write");
        let other = register("xnix.tame.read");

        register_profile("wild-prof", None, &[("xnix.wild.*", true)]);
        let s = PermState::with_profile("wild-prof");
        assert!(s.check(r));
        assert!(s.check(w));
        assert!(!s.check(other));
    }

    #[test]
    fn resolution_follows_registry_growth() {
        register_profile("grow-prof", None, &[("xnix.grow.*", true)]);
        let s = PermState::with_profile("grow-prof");

        let first = register("xnix.grow.first");
        assert!(s.check(first));

        // A node registered after the first resolve is picked up because
        // the snapshot no longer matches.
        let late = register("xnix.grow.late");
        assert!(s.check(late));
    }
}
