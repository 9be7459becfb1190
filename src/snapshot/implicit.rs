use super::master::Assembly;
use super::names::{escape_path, unescape_unit_prefix, UnitName, UnitType};
use super::relations::{Origin, RelationKind};
use crate::systemd_unit::{
    AUTOMOUNT_SECTION, MOUNT_SECTION, PATH_SECTION, SERVICE_SECTION, SOCKET_SECTION,
    SWAP_SECTION, TIMER_SECTION, UNIT_SECTION,
};

pub(crate) const SYSINIT_TARGET: &str = "sysinit.target";
pub(crate) const BASIC_TARGET: &str = "basic.target";
pub(crate) const SHUTDOWN_TARGET: &str = "shutdown.target";
pub(crate) const UMOUNT_TARGET: &str = "umount.target";
pub(crate) const SOCKETS_TARGET: &str = "sockets.target";
pub(crate) const PATHS_TARGET: &str = "paths.target";
pub(crate) const TIMERS_TARGET: &str = "timers.target";
pub(crate) const SWAP_TARGET: &str = "swap.target";
pub(crate) const LOCAL_FS_TARGET: &str = "local-fs.target";
pub(crate) const LOCAL_FS_PRE_TARGET: &str = "local-fs-pre.target";
pub(crate) const REMOTE_FS_TARGET: &str = "remote-fs.target";
pub(crate) const REMOTE_FS_PRE_TARGET: &str = "remote-fs-pre.target";
pub(crate) const NETWORK_TARGET: &str = "network.target";
pub(crate) const NETWORK_ONLINE_TARGET: &str = "network-online.target";
pub(crate) const TIME_SET_TARGET: &str = "time-set.target";
pub(crate) const TIME_SYNC_TARGET: &str = "time-sync.target";
pub(crate) const DBUS_SOCKET: &str = "dbus.socket";

/// Filesystem types that make a mount a network mount.
const NETWORK_FS_TYPES: [&str; 10] = [
    "nfs", "nfs4", "cifs", "smbfs", "smb3", "sshfs", "fuse.sshfs", "glusterfs", "ceph", "9p",
];

/// Paths watched by a `[Path]` unit; each one pulls in the mounts covering it.
const WATCH_KEYS: [&str; 5] = [
    "PathExists",
    "PathExistsGlob",
    "PathChanged",
    "PathModified",
    "DirectoryNotEmpty",
];

struct Planned {
    kind: RelationKind,
    target: String,
    rule: &'static str,
}

fn plan(kind: RelationKind, target: impl Into<String>, rule: &'static str) -> Planned {
    Planned {
        kind,
        target: target.into(),
        rule,
    }
}

/// Injects the default and type-specific implicit dependencies for one unit.
/// Masked, synthetic and template units carry none.
pub(crate) fn inject(asm: &mut Assembly, idx: usize) {
    let unit = &asm.units[idx];
    if unit.masked || unit.not_found {
        return;
    }
    let Some(name) = unit.name.clone() else {
        return;
    };
    if name.is_template() {
        return;
    }

    let dd = default_dependencies(asm, idx);
    let mut planned: Vec<Planned> = Vec::new();
    // facts whose edge hangs off another unit
    let mut elsewhere: Vec<(String, RelationKind, String, &'static str)> = Vec::new();

    match name.unit_type {
        UnitType::Service => plan_service(asm, idx, dd, &mut planned),
        UnitType::Socket => plan_socket(asm, idx, &name, dd, &mut planned, &mut elsewhere),
        UnitType::Mount => plan_mount(asm, idx, &name, dd, &mut planned),
        UnitType::Automount => plan_automount(asm, idx, &name, dd, &mut planned),
        UnitType::Swap => plan_swap(asm, idx, &name, dd, &mut planned),
        UnitType::Target => plan_target(dd, &mut planned),
        UnitType::Path => plan_path(asm, idx, &name, dd, &mut planned),
        UnitType::Timer => plan_timer(asm, idx, &name, dd, &mut planned),
        UnitType::Slice => plan_slice(&name, dd, &mut planned),
        UnitType::Scope => plan_scope(dd, &mut planned),
        UnitType::Device => {}
    }

    plan_requires_mounts_for(asm, idx, &mut planned);

    let canonical = asm.units[idx].canonical.clone();
    for edge in planned {
        if edge.target == canonical {
            continue;
        }
        asm.add_edge(
            idx,
            edge.kind,
            &edge.target,
            Origin::Implicit(edge.rule.to_string()),
            UNIT_SECTION,
        );
    }

    for (source_name, kind, target, rule) in elsewhere {
        let (source_idx, _) = asm.ensure_unit(&source_name);
        asm.add_edge(
            source_idx,
            kind,
            &target,
            Origin::Implicit(rule.to_string()),
            UNIT_SECTION,
        );
    }
}

/// Targets get `After=` on everything they want or require. Runs as a
/// separate pass once every explicit edge (including reverse-direction
/// `[Install]` facts declared by other units) is in place.
pub(crate) fn inject_target_ordering(asm: &mut Assembly) {
    for idx in 0..asm.units.len() {
        let unit = &asm.units[idx];
        if unit.masked || unit.not_found {
            continue;
        }
        let is_plain_target = unit
            .name
            .as_ref()
            .is_some_and(|n| n.unit_type == UnitType::Target && !n.is_template());
        if !is_plain_target || !default_dependencies(asm, idx) {
            continue;
        }

        let unit = &asm.units[idx];
        let canonical = unit.canonical.clone();
        let mut dependencies: Vec<String> = unit
            .forward
            .get(&RelationKind::Wants)
            .into_iter()
            .chain(unit.forward.get(&RelationKind::Requires))
            .flatten()
            .map(|e| e.target.clone())
            .filter(|t| t != &canonical)
            .collect();
        dependencies.sort();
        dependencies.dedup();

        for target in dependencies {
            asm.add_edge(
                idx,
                RelationKind::After,
                &target,
                Origin::Implicit("target-after-deps".to_string()),
                UNIT_SECTION,
            );
        }
    }
}

fn default_dependencies(asm: &Assembly, idx: usize) -> bool {
    asm.units[idx]
        .data
        .lookup_bool(UNIT_SECTION, "DefaultDependencies")
        .unwrap_or(true)
}

fn plan_service(asm: &Assembly, idx: usize, dd: bool, planned: &mut Vec<Planned>) {
    let data = &asm.units[idx].data;

    if dd {
        planned.push(plan(RelationKind::Requires, SYSINIT_TARGET, "service-default"));
        planned.push(plan(RelationKind::After, SYSINIT_TARGET, "service-default"));
        planned.push(plan(RelationKind::After, BASIC_TARGET, "service-default"));
        planned.push(plan(RelationKind::Conflicts, SHUTDOWN_TARGET, "service-default"));
        planned.push(plan(RelationKind::Before, SHUTDOWN_TARGET, "service-default"));
    }

    if data.lookup_last(SERVICE_SECTION, "Type").as_deref() == Some("dbus") {
        planned.push(plan(RelationKind::Requires, DBUS_SOCKET, "service-dbus"));
        planned.push(plan(RelationKind::After, DBUS_SOCKET, "service-dbus"));
    }

    for socket in data.lookup_all_strv(SERVICE_SECTION, "Sockets") {
        planned.push(plan(RelationKind::Wants, socket.clone(), "service-sockets"));
        planned.push(plan(RelationKind::After, socket, "service-sockets"));
    }
}

fn plan_socket(
    asm: &Assembly,
    idx: usize,
    name: &UnitName,
    dd: bool,
    planned: &mut Vec<Planned>,
    elsewhere: &mut Vec<(String, RelationKind, String, &'static str)>,
) {
    let unit = &asm.units[idx];
    let data = &unit.data;

    if dd {
        planned.push(plan(RelationKind::Before, SOCKETS_TARGET, "socket-default"));
        planned.push(plan(RelationKind::Requires, SYSINIT_TARGET, "socket-default"));
        planned.push(plan(RelationKind::After, SYSINIT_TARGET, "socket-default"));
        planned.push(plan(RelationKind::Conflicts, SHUTDOWN_TARGET, "socket-default"));
        planned.push(plan(RelationKind::Before, SHUTDOWN_TARGET, "socket-default"));
    }

    // the activated service: Service= override or the same-stem default
    let service = data
        .lookup_last(SOCKET_SECTION, "Service")
        .unwrap_or_else(|| format!("{}.service", name.stem()));
    planned.push(plan(RelationKind::Before, service.clone(), "socket-service"));
    planned.push(plan(RelationKind::Triggers, service.clone(), "socket-service"));
    elsewhere.push((
        service,
        RelationKind::After,
        unit.canonical.clone(),
        "socket-activation",
    ));

    for key in ["ListenStream", "ListenDatagram"] {
        for listen in data.lookup_all_strv(SOCKET_SECTION, key) {
            if !listen.starts_with('/') {
                continue;
            }
            for mount in asm.mounts_covering(&listen, idx) {
                planned.push(plan(RelationKind::Requires, mount.clone(), "socket-mounts"));
                planned.push(plan(RelationKind::After, mount, "socket-mounts"));
            }
        }
    }

    if let Some(device) = data.lookup_last(SOCKET_SECTION, "BindToDevice") {
        let device_unit = format!("sys-subsystem-net-devices-{}.device", escape_path(&device));
        planned.push(plan(RelationKind::BindsTo, device_unit.clone(), "socket-device"));
        planned.push(plan(RelationKind::After, device_unit, "socket-device"));
    }
}

fn plan_mount(asm: &Assembly, idx: usize, name: &UnitName, dd: bool, planned: &mut Vec<Planned>) {
    let data = &asm.units[idx].data;

    let where_path = data
        .lookup_last(MOUNT_SECTION, "Where")
        .unwrap_or_else(|| unescape_unit_prefix(&name.prefix));
    let what = data.lookup_last(MOUNT_SECTION, "What").unwrap_or_default();
    let fstype = data.lookup_last(MOUNT_SECTION, "Type").unwrap_or_default();
    let options = data.lookup_last(MOUNT_SECTION, "Options").unwrap_or_default();
    let nofail = options.split(',').any(|o| o.trim() == "nofail");
    let network = NETWORK_FS_TYPES.contains(&fstype.as_str())
        || what.starts_with("//")
        || options.split(',').any(|o| o.trim() == "_netdev");

    if dd {
        planned.push(plan(RelationKind::Conflicts, UMOUNT_TARGET, "mount-default"));
        planned.push(plan(RelationKind::Before, UMOUNT_TARGET, "mount-default"));

        if network {
            planned.push(plan(RelationKind::After, REMOTE_FS_PRE_TARGET, "mount-default"));
            planned.push(plan(RelationKind::After, NETWORK_TARGET, "mount-default"));
            planned.push(plan(RelationKind::After, NETWORK_ONLINE_TARGET, "mount-default"));
            if !nofail {
                planned.push(plan(RelationKind::Before, REMOTE_FS_TARGET, "mount-default"));
            }
        } else {
            planned.push(plan(RelationKind::After, LOCAL_FS_PRE_TARGET, "mount-default"));
            if !nofail {
                planned.push(plan(RelationKind::Before, LOCAL_FS_TARGET, "mount-default"));
            }
        }
    }

    if let Some(parent) = asm.parent_mount(&where_path, idx) {
        planned.push(plan(RelationKind::Requires, parent.clone(), "mount-parent"));
        planned.push(plan(RelationKind::After, parent, "mount-parent"));
    }

    if what.starts_with("/dev/") {
        let device = format!("{}.device", escape_path(&what));
        planned.push(plan(RelationKind::BindsTo, device.clone(), "mount-device"));
        planned.push(plan(RelationKind::After, device, "mount-device"));
    }
}

fn plan_automount(
    asm: &Assembly,
    idx: usize,
    name: &UnitName,
    dd: bool,
    planned: &mut Vec<Planned>,
) {
    let data = &asm.units[idx].data;

    if dd {
        planned.push(plan(RelationKind::Conflicts, UMOUNT_TARGET, "automount-default"));
        planned.push(plan(RelationKind::Before, UMOUNT_TARGET, "automount-default"));
        planned.push(plan(RelationKind::After, LOCAL_FS_PRE_TARGET, "automount-default"));
        planned.push(plan(RelationKind::Before, LOCAL_FS_TARGET, "automount-default"));
    }

    let where_path = data
        .lookup_last(AUTOMOUNT_SECTION, "Where")
        .unwrap_or_else(|| unescape_unit_prefix(&name.prefix));
    if let Some(parent) = asm.parent_mount(&where_path, idx) {
        planned.push(plan(RelationKind::Requires, parent.clone(), "automount-parent"));
        planned.push(plan(RelationKind::After, parent, "automount-parent"));
    }

    let mount = format!("{}.mount", name.stem());
    planned.push(plan(RelationKind::Before, mount.clone(), "automount-mount"));
    planned.push(plan(RelationKind::Triggers, mount, "automount-mount"));
}

fn plan_swap(asm: &Assembly, idx: usize, name: &UnitName, dd: bool, planned: &mut Vec<Planned>) {
    let data = &asm.units[idx].data;

    if dd {
        planned.push(plan(RelationKind::Conflicts, UMOUNT_TARGET, "swap-default"));
        planned.push(plan(RelationKind::Before, UMOUNT_TARGET, "swap-default"));
        planned.push(plan(RelationKind::Before, SWAP_TARGET, "swap-default"));
    }

    let what = data
        .lookup_last(SWAP_SECTION, "What")
        .unwrap_or_else(|| unescape_unit_prefix(&name.prefix));
    if what.starts_with("/dev/") {
        let device = format!("{}.device", escape_path(&what));
        planned.push(plan(RelationKind::BindsTo, device.clone(), "swap-device"));
        planned.push(plan(RelationKind::After, device, "swap-device"));
    } else if let Some(mount) = asm.parent_mount(&what, idx) {
        planned.push(plan(RelationKind::BindsTo, mount.clone(), "swap-device"));
        planned.push(plan(RelationKind::After, mount, "swap-device"));
    }
}

fn plan_target(dd: bool, planned: &mut Vec<Planned>) {
    if dd {
        planned.push(plan(RelationKind::Conflicts, SHUTDOWN_TARGET, "target-default"));
        planned.push(plan(RelationKind::Before, SHUTDOWN_TARGET, "target-default"));
    }
}

fn plan_path(asm: &Assembly, idx: usize, name: &UnitName, dd: bool, planned: &mut Vec<Planned>) {
    let data = &asm.units[idx].data;

    if dd {
        planned.push(plan(RelationKind::Before, PATHS_TARGET, "path-default"));
        planned.push(plan(RelationKind::Requires, SYSINIT_TARGET, "path-default"));
        planned.push(plan(RelationKind::After, SYSINIT_TARGET, "path-default"));
        planned.push(plan(RelationKind::Conflicts, SHUTDOWN_TARGET, "path-default"));
        planned.push(plan(RelationKind::Before, SHUTDOWN_TARGET, "path-default"));
    }

    for key in WATCH_KEYS {
        for watched in data.lookup_all_strv(PATH_SECTION, key) {
            if !watched.starts_with('/') {
                continue;
            }
            for mount in asm.mounts_covering(&watched, idx) {
                planned.push(plan(RelationKind::Requires, mount.clone(), "path-mounts"));
                planned.push(plan(RelationKind::After, mount, "path-mounts"));
            }
        }
    }

    let matched = data
        .lookup_last(PATH_SECTION, "Unit")
        .unwrap_or_else(|| format!("{}.service", name.stem()));
    planned.push(plan(RelationKind::Before, matched.clone(), "path-unit"));
    planned.push(plan(RelationKind::Triggers, matched, "path-unit"));
}

fn plan_timer(asm: &Assembly, idx: usize, name: &UnitName, dd: bool, planned: &mut Vec<Planned>) {
    let data = &asm.units[idx].data;

    if dd {
        planned.push(plan(RelationKind::Requires, SYSINIT_TARGET, "timer-default"));
        planned.push(plan(RelationKind::After, SYSINIT_TARGET, "timer-default"));
        planned.push(plan(RelationKind::Before, TIMERS_TARGET, "timer-default"));
        planned.push(plan(RelationKind::Conflicts, SHUTDOWN_TARGET, "timer-default"));
        planned.push(plan(RelationKind::Before, SHUTDOWN_TARGET, "timer-default"));
    }

    let matched = data
        .lookup_last(TIMER_SECTION, "Unit")
        .unwrap_or_else(|| format!("{}.service", name.stem()));
    planned.push(plan(RelationKind::Before, matched.clone(), "timer-unit"));
    planned.push(plan(RelationKind::Triggers, matched, "timer-unit"));

    if !data.lookup_all(TIMER_SECTION, "OnCalendar").is_empty() {
        planned.push(plan(RelationKind::After, TIME_SET_TARGET, "timer-calendar"));
        planned.push(plan(RelationKind::After, TIME_SYNC_TARGET, "timer-calendar"));
    }
}

fn plan_slice(name: &UnitName, dd: bool, planned: &mut Vec<Planned>) {
    if dd {
        planned.push(plan(RelationKind::Conflicts, SHUTDOWN_TARGET, "slice-default"));
        planned.push(plan(RelationKind::Before, SHUTDOWN_TARGET, "slice-default"));
    }

    if let Some(parent) = parent_slice(&name.prefix) {
        planned.push(plan(RelationKind::Requires, parent.clone(), "slice-parent"));
        planned.push(plan(RelationKind::After, parent, "slice-parent"));
    }
}

fn plan_scope(dd: bool, planned: &mut Vec<Planned>) {
    if dd {
        planned.push(plan(RelationKind::Conflicts, SHUTDOWN_TARGET, "scope-default"));
        planned.push(plan(RelationKind::Before, SHUTDOWN_TARGET, "scope-default"));
    }
}

fn plan_requires_mounts_for(asm: &Assembly, idx: usize, planned: &mut Vec<Planned>) {
    let paths = asm.units[idx]
        .data
        .lookup_all_strv(UNIT_SECTION, "RequiresMountsFor");

    for path in paths {
        for mount in asm.mounts_covering(&path, idx) {
            planned.push(plan(RelationKind::Requires, mount.clone(), "requires-mounts-for"));
            planned.push(plan(RelationKind::After, mount, "requires-mounts-for"));
        }
    }
}

/// The dash hierarchy of slice names: `foo-bar.slice` lives in `foo.slice`,
/// every top-level slice lives in the root slice `-.slice`.
fn parent_slice(prefix: &str) -> Option<String> {
    if prefix == "-" {
        return None;
    }

    match prefix.rsplit_once('-') {
        Some((parent, _)) if !parent.is_empty() => Some(format!("{parent}.slice")),
        _ => Some("-.slice".to_string()),
    }
}
