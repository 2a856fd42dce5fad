//! Service configuration tables, filled from the INI file.
//!
//! Three section kinds are recognized: `[service.NAME]`, `[handle.NAME]`
//! and `[profile.NAME]`. Keys starting with `xnix.` inside service and
//! profile sections are boolean permission entries.

use crate::ini;
use alloc::string::String;
use alloc::vec::Vec;
use xnix_abi::{Handle, HANDLE_INVALID};

pub const MAX_SERVICES: usize = 32;
pub const MAX_HANDLE_DEFS: usize = 32;
pub const MAX_PROFILES: usize = 8;
pub const DEPS_MAX: usize = 8;
pub const HANDLES_MAX: usize = 16;
pub const PERMS_MAX: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Module,
    Path,
}

/// One handle a service receives at spawn, by name; the actual handle
/// value is filled in during resolution.
#[derive(Debug, Clone)]
pub struct HandleRef {
    pub name: String,
    pub handle: Handle,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub mode: StartMode,
    pub module_name: String,
    pub path: String,
    pub args: Vec<String>,
    /// Start-ordering dependencies: target must be at least Starting.
    pub after: Vec<String>,
    /// Strong readiness dependencies: target Running and reported ready.
    pub ready: Vec<String>,
    /// Weak dependencies, by service or endpoint name.
    pub wants: Vec<String>,
    pub wait_path: Option<String>,
    pub delay_ms: u32,
    pub builtin: bool,
    pub respawn: bool,
    pub handles: Vec<HandleRef>,
    pub mount: Option<String>,
    pub profile: Option<String>,
    /// Endpoint names this service creates and owns.
    pub provides: Vec<String>,
    /// Endpoint names this service needs; unresolvable ones are fatal.
    pub requires: Vec<String>,
    pub perms: Vec<(String, bool)>,
}

impl ServiceConfig {
    fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            mode: StartMode::Module,
            module_name: String::new(),
            path: String::new(),
            args: Vec::new(),
            after: Vec::new(),
            ready: Vec::new(),
            wants: Vec::new(),
            wait_path: None,
            delay_ms: 0,
            builtin: false,
            respawn: false,
            handles: Vec::new(),
            mount: None,
            profile: None,
            provides: Vec::new(),
            requires: Vec::new(),
            perms: Vec::new(),
        }
    }

    pub fn has_handle(&self, name: &str) -> bool {
        self.handles.iter().any(|h| h.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Not yet determined; defaulted during discovery.
    Unset,
    /// A fresh endpoint created by init.
    Endpoint,
    /// Located by name in init's own handle table (kernel-injected).
    Inherit,
}

#[derive(Debug, Clone)]
pub struct HandleDef {
    pub name: String,
    pub kind: HandleKind,
    pub handle: Handle,
    pub created: bool,
}

impl HandleDef {
    fn new(name: &str) -> Self {
        Self { name: String::from(name), kind: HandleKind::Unset, handle: HANDLE_INVALID, created: false }
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub inherit: Option<String>,
    pub perms: Vec<(String, bool)>,
}

#[derive(Debug, Default)]
pub struct ServiceSet {
    pub services: Vec<ServiceConfig>,
    pub handle_defs: Vec<HandleDef>,
    pub profiles: Vec<Profile>,
}

impl ServiceSet {
    pub fn find_service(&self, name: &str) -> Option<usize> {
        self.services.iter().position(|s| s.name == name)
    }

    pub fn find_handle_def(&self, name: &str) -> Option<usize> {
        self.handle_defs.iter().position(|h| h.name == name)
    }

    pub fn handle_def_get_or_add(&mut self, name: &str) -> Option<usize> {
        if let Some(idx) = self.find_handle_def(name) {
            return Some(idx);
        }
        if self.handle_defs.len() >= MAX_HANDLE_DEFS {
            return None;
        }
        self.handle_defs.push(HandleDef::new(name));
        Some(self.handle_defs.len() - 1)
    }

    fn service_get_or_add(&mut self, name: &str) -> Option<usize> {
        if let Some(idx) = self.find_service(name) {
            return Some(idx);
        }
        if self.services.len() >= MAX_SERVICES {
            return None;
        }
        self.services.push(ServiceConfig::new(name));
        Some(self.services.len() - 1)
    }

    fn profile_get_or_add(&mut self, name: &str) -> Option<usize> {
        if let Some(idx) = self.profiles.iter().position(|p| p.name == name) {
            return Some(idx);
        }
        if self.profiles.len() >= MAX_PROFILES {
            return None;
        }
        self.profiles.push(Profile {
            name: String::from(name),
            inherit: None,
            perms: Vec::new(),
        });
        Some(self.profiles.len() - 1)
    }
}

fn dep_list(value: &str) -> Vec<String> {
    ini::split_list(value).take(DEPS_MAX).map(String::from).collect()
}

/// Parse one `handles =` list entry set. The legacy `name:hint` colon
/// syntax is rejected; kernel-injected names default to inherit, the rest
/// to endpoint.
fn parse_handles(set: &mut ServiceSet, value: &str, out: &mut Vec<HandleRef>, log: &mut dyn FnMut(&str)) {
    for spec in ini::split_list(value) {
        if out.len() >= HANDLES_MAX {
            break;
        }
        if spec.contains(':') {
            log(&alloc::format!("invalid handle spec '{}' (':' syntax is not supported)", spec));
            continue;
        }

        if let Some(idx) = set.handle_def_get_or_add(spec) {
            if set.handle_defs[idx].kind == HandleKind::Unset {
                set.handle_defs[idx].kind = if spec.starts_with("module_")
                    || spec == "fb_mem"
                    || spec == "vga_mem"
                {
                    HandleKind::Inherit
                } else {
                    HandleKind::Endpoint
                };
            }
        }
        out.push(HandleRef { name: String::from(spec), handle: HANDLE_INVALID });
    }
}

/// Load a configuration buffer into the tables. Parsing never fails;
/// structural errors surface later during discovery and graph building.
pub fn parse(buf: &str, mut log: impl FnMut(&str)) -> ServiceSet {
    let mut set = ServiceSet::default();

    // Borrow discipline: handle lists are accumulated aside and attached
    // after each key, since `parse_handles` needs the whole set.
    ini::parse_buffer(buf, |section, key, value| {
        if let Some(name) = section.strip_prefix("service.") {
            let Some(idx) = set.service_get_or_add(name) else {
                log("too many services");
                return true;
            };

            match key {
                "type" => {
                    set.services[idx].mode = match value {
                        "path" => StartMode::Path,
                        _ => StartMode::Module,
                    };
                }
                "module_name" => set.services[idx].module_name = String::from(value),
                "path" => set.services[idx].path = String::from(value),
                "args" => {
                    set.services[idx].args = ini::split_list(value).map(String::from).collect();
                }
                "after" => set.services[idx].after = dep_list(value),
                "ready" => set.services[idx].ready = dep_list(value),
                "wants" => set.services[idx].wants = dep_list(value),
                "wait_path" => set.services[idx].wait_path = Some(String::from(value)),
                "delay" => set.services[idx].delay_ms = ini::parse_u32(value),
                "builtin" => set.services[idx].builtin = ini::parse_bool(value),
                "respawn" => set.services[idx].respawn = ini::parse_bool(value),
                "mount" => set.services[idx].mount = Some(String::from(value)),
                "profile" => set.services[idx].profile = Some(String::from(value)),
                "handles" => {
                    let mut refs = core::mem::take(&mut set.services[idx].handles);
                    parse_handles(&mut set, value, &mut refs, &mut log);
                    set.services[idx].handles = refs;
                }
                "provides" => set.services[idx].provides = dep_list(value),
                "requires" => set.services[idx].requires = dep_list(value),
                _ if key.starts_with("xnix.") => {
                    if set.services[idx].perms.len() < PERMS_MAX {
                        set.services[idx].perms.push((String::from(key), ini::parse_bool(value)));
                    }
                }
                _ => {}
            }
            return true;
        }

        if let Some(name) = section.strip_prefix("handle.") {
            let Some(idx) = set.handle_def_get_or_add(name) else {
                log("too many handle defs");
                return true;
            };
            if key == "type" {
                set.handle_defs[idx].kind = match value {
                    "endpoint" => HandleKind::Endpoint,
                    "inherit" => HandleKind::Inherit,
                    _ => HandleKind::Unset,
                };
            }
            return true;
        }

        if let Some(name) = section.strip_prefix("profile.") {
            let Some(idx) = set.profile_get_or_add(name) else {
                log("too many profiles");
                return true;
            };
            if key == "inherit" {
                set.profiles[idx].inherit = Some(String::from(value));
            } else if key.starts_with("xnix.") {
                set.profiles[idx].perms.push((String::from(key), ini::parse_bool(value)));
            }
            return true;
        }

        true
    });

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# boot services
[service.ramfsd]
type = module
module_name = ramfsd
provides = ramfs
mount = /mnt
respawn = true
profile = driver

[service.kbd]
type = module
module_name = kbd
after = ramfsd
ready = ramfsd
handles = kbd_ep module_font
delay = 100
xnix.io.port = true

[handle.kbd_ep]
type = endpoint

[profile.driver]
inherit = base
xnix.io.irq = true
"#;

    fn parsed() -> ServiceSet {
        parse(SAMPLE, |_| {})
    }

    #[test]
    fn services_and_keys() {
        let set = parsed();
        assert_eq!(set.services.len(), 2);

        let ramfsd = &set.services[set.find_service("ramfsd").unwrap()];
        assert_eq!(ramfsd.mode, StartMode::Module);
        assert_eq!(ramfsd.module_name, "ramfsd");
        assert_eq!(ramfsd.provides, ["ramfs"]);
        assert_eq!(ramfsd.mount.as_deref(), Some("/mnt"));
        assert!(ramfsd.respawn);
        assert_eq!(ramfsd.profile.as_deref(), Some("driver"));

        let kbd = &set.services[set.find_service("kbd").unwrap()];
        assert_eq!(kbd.after, ["ramfsd"]);
        assert_eq!(kbd.ready, ["ramfsd"]);
        assert_eq!(kbd.delay_ms, 100);
        assert_eq!(kbd.perms, [(String::from("xnix.io.port"), true)]);
    }

    #[test]
    fn handle_kinds_default_by_name() {
        let set = parsed();
        let ep = &set.handle_defs[set.find_handle_def("kbd_ep").unwrap()];
        assert_eq!(ep.kind, HandleKind::Endpoint);
        // module_* names default to inherit.
        let font = &set.handle_defs[set.find_handle_def("module_font").unwrap()];
        assert_eq!(font.kind, HandleKind::Inherit);
    }

    #[test]
    fn profiles_parse_inherit_and_perms() {
        let set = parsed();
        assert_eq!(set.profiles.len(), 1);
        let p = &set.profiles[0];
        assert_eq!(p.name, "driver");
        assert_eq!(p.inherit.as_deref(), Some("base"));
        assert_eq!(p.perms, [(String::from("xnix.io.irq"), true)]);
    }

    #[test]
    fn colon_handle_specs_are_rejected() {
        let mut complaints = 0;
        let set = parse("[service.a]\nhandles = good bad:3\n", |_| complaints += 1);
        let a = &set.services[0];
        assert_eq!(a.handles.len(), 1);
        assert_eq!(a.handles[0].name, "good");
        assert_eq!(complaints, 1);
    }

    #[test]
    fn later_sections_merge_by_name() {
        let set = parse(
            "[service.a]\ntype = module\n[service.b]\n[service.a]\nrespawn = true\n",
            |_| {},
        );
        assert_eq!(set.services.len(), 2);
        assert!(set.services[set.find_service("a").unwrap()].respawn);
    }
}
