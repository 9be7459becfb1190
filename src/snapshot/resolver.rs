use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use super::master::{Meta, MsDocument};
use super::relations::{Edge, RelationKind};
use super::{iso8601_now, Error, GENERATOR_WARNING, TOOL_VERSION};

/// The dependency-map artifact: the sub-model of the master structure
/// reachable from a chosen root, with per-node forward and backward edge
/// lists. Cycles are preserved, not broken.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct DmDocument {
    pub(crate) root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) depth_limit: Option<usize>,
    pub(crate) nodes: BTreeMap<String, DmNode>,
    pub(crate) meta: Meta,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct DmNode {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) forward: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) backward: Vec<Edge>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) masked: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) not_found: bool,
    /// The first edge by which the node was discovered; absent on the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) reached_via: Option<ReachedVia>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ReachedVia {
    pub(crate) from: String,
    pub(crate) kind: RelationKind,
    pub(crate) depth: usize,
}

impl DmDocument {
    /// Canonical JSON rendering, byte-stable under reparse (sorted keys).
    pub(crate) fn to_json(&self) -> Result<String, Error> {
        let mut out = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        out.push('\n');
        Ok(out)
    }

    pub(crate) fn load_from_path(path: &Path) -> Result<Self, Error> {
        let buf = fs::read_to_string(path)
            .map_err(|e| Error::RootInaccessible(path.to_path_buf(), e))?;

        serde_json::from_str(&buf).map_err(|e| Error::MalformedMsInput(e.to_string()))
    }
}

/// Computes the dependency map of `ms` rooted at `root_unit`.
///
/// Traversal follows requirement edges only; ordering edges are recorded
/// between reached units but never pull anything in, `Conflicts` edges are
/// recorded as negative facts without traversing, and masked units join as
/// leaves with their outgoing edges suppressed.
pub(crate) fn resolve(
    ms: &MsDocument,
    root_unit: &str,
    depth_limit: Option<usize>,
) -> Result<DmDocument, Error> {
    let root = resolve_root_name(ms, root_unit)?;
    debug!("Resolving dependency map from {root} (requested as {root_unit})");

    let mut nodes: BTreeMap<String, DmNode> = BTreeMap::new();
    let mut queue: VecDeque<(String, usize, Option<ReachedVia>)> = VecDeque::new();
    queue.push_back((root.clone(), 0, None));

    while let Some((name, depth, via)) = queue.pop_front() {
        if nodes.contains_key(&name) {
            continue;
        }

        let record = ms.units.get(&name);
        let masked = record.map(|r| r.masked).unwrap_or(false);
        let not_found = record.map(|r| r.not_found).unwrap_or(true);

        nodes.insert(
            name.clone(),
            DmNode {
                masked,
                not_found,
                reached_via: via,
                ..DmNode::default()
            },
        );

        // masked units enter as leaves; a bounded node is recorded but its
        // dependencies are not chased further
        if masked || depth_limit.is_some_and(|limit| depth >= limit) {
            continue;
        }

        let Some(record) = record else { continue };
        for edge in record.forward_edges() {
            if !edge.kind.pulls_in() || nodes.contains_key(&edge.target) {
                continue;
            }
            queue.push_back((
                edge.target.clone(),
                depth + 1,
                Some(ReachedVia {
                    from: name.clone(),
                    kind: edge.kind,
                    depth: depth + 1,
                }),
            ));
        }
    }

    // second pass: record edges, restricted to the reached set (negative
    // Conflicts edges are kept even when the conflicted unit stays outside)
    let reached: Vec<String> = nodes.keys().cloned().collect();
    for name in &reached {
        let Some(record) = ms.units.get(name) else {
            continue;
        };
        if record.masked {
            continue;
        }

        let mut forward: Vec<Edge> = record
            .forward_edges()
            .filter(|e| e.kind == RelationKind::Conflicts || nodes.contains_key(&e.target))
            .cloned()
            .collect();
        forward.sort();
        forward.dedup();

        for edge in &forward {
            let Some(inverse) = edge.kind.inverse() else {
                continue;
            };
            if let Some(target_node) = nodes.get_mut(&edge.target) {
                target_node.backward.push(Edge::new(
                    inverse,
                    name.clone(),
                    edge.origin.clone(),
                    edge.section.clone(),
                ));
            }
        }

        nodes.get_mut(name).expect("node was inserted").forward = forward;
    }

    for node in nodes.values_mut() {
        node.backward.sort();
        node.backward.dedup();
    }

    let mut warnings = vec![GENERATOR_WARNING.to_string()];
    warnings.extend(record_cycles(&nodes));

    Ok(DmDocument {
        root,
        depth_limit,
        nodes,
        meta: Meta {
            root_path: ms.meta.root_path.clone(),
            generated_at: iso8601_now(),
            tool_version: TOOL_VERSION.to_string(),
            warnings,
        },
    })
}

/// Maps the requested root through the alias table: either a canonical name,
/// or the basename (or full path) of some unit's alias link.
fn resolve_root_name(ms: &MsDocument, root_unit: &str) -> Result<String, Error> {
    if ms.units.contains_key(root_unit) {
        return Ok(root_unit.to_string());
    }

    for (name, record) in &ms.units {
        let matched = record.aliases.iter().any(|alias| {
            alias == root_unit
                || Path::new(alias)
                    .file_name()
                    .is_some_and(|base| base == root_unit)
        });
        if matched {
            return Ok(name.clone());
        }
    }

    Err(Error::RootNotFound(root_unit.to_string()))
}

/// Reports every requirement back-edge inside the reached set. Purely
/// informational; the map keeps its cycles.
fn record_cycles(nodes: &BTreeMap<String, DmNode>) -> Vec<String> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    fn requirement_targets<'n>(nodes: &'n BTreeMap<String, DmNode>, name: &str) -> Vec<&'n str> {
        nodes[name]
            .forward
            .iter()
            .filter(|e| e.kind.pulls_in() && nodes.contains_key(&e.target))
            .map(|e| e.target.as_str())
            .collect()
    }

    let mut colors: HashMap<&str, u8> = nodes.keys().map(|n| (n.as_str(), WHITE)).collect();
    let mut cycles: BTreeSet<String> = BTreeSet::new();

    for start in nodes.keys() {
        if colors[start.as_str()] != WHITE {
            continue;
        }

        let mut stack: Vec<(&str, Vec<&str>, usize)> =
            vec![(start.as_str(), requirement_targets(nodes, start), 0)];
        colors.insert(start.as_str(), GRAY);

        while !stack.is_empty() {
            let step = {
                let (name, targets, pos) = stack.last_mut().expect("stack is non-empty");
                match targets.get(*pos).copied() {
                    Some(target) => {
                        *pos += 1;
                        Ok((target, *name))
                    }
                    None => Err(*name),
                }
            };

            match step {
                Ok((target, name)) => match colors[target] {
                    GRAY => {
                        cycles.insert(format!(
                            "dependency cycle recorded: {target} is reachable from itself via {name}"
                        ));
                    }
                    WHITE => {
                        colors.insert(target, GRAY);
                        stack.push((target, requirement_targets(nodes, target), 0));
                    }
                    _ => {}
                },
                Err(name) => {
                    colors.insert(name, BLACK);
                    stack.pop();
                }
            }
        }
    }

    cycles.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::master::build_master;
    use std::path::PathBuf;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
    }

    fn link(root: &Path, rel: &str, target: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(target, &path).unwrap();
    }

    fn ms_for(root: &Path) -> MsDocument {
        build_master(root, None).unwrap()
    }

    mod root_resolution {
        use super::*;

        #[test]
        fn alias_symlink_resolves_to_canonical_root() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/foo.service",
                "[Service]\nExecStart=/bin/a\n",
            );
            link(
                root,
                "etc/systemd/system/default.target",
                "/usr/lib/systemd/system/foo.service",
            );

            let ms = ms_for(root);
            let dm = resolve(&ms, "default.target", None).unwrap();

            assert_eq!(dm.root, "foo.service");
            assert!(dm.nodes.contains_key("foo.service"));
            assert!(!dm.nodes.contains_key("default.target"));
        }

        #[test]
        fn unknown_root_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let ms = ms_for(dir.path());

            let result = resolve(&ms, "default.target", None);

            assert!(matches!(result, Err(Error::RootNotFound(_))));
        }
    }

    mod traversal {
        use super::*;

        #[test]
        fn requirement_edges_pull_units_in() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nRequires=b.service\n[Service]\nExecStart=/bin/a\n",
            );
            write(
                root,
                "usr/lib/systemd/system/b.service",
                "[Unit]\nDefaultDependencies=no\n[Service]\nExecStart=/bin/b\n",
            );

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();

            assert!(dm.nodes.contains_key("a.service"));
            assert!(dm.nodes.contains_key("b.service"));

            let b = &dm.nodes["b.service"];
            let via = b.reached_via.as_ref().unwrap();
            assert_eq!(via.from, "a.service");
            assert_eq!(via.kind, RelationKind::Requires);
            assert_eq!(via.depth, 1);

            // the reverse fact is present on the target inside the DM
            assert!(b
                .backward
                .iter()
                .any(|e| e.kind == RelationKind::RequiredBy && e.target == "a.service"));
        }

        #[test]
        fn ordering_only_targets_stay_out() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nAfter=b.service\n[Service]\nExecStart=/bin/a\n",
            );
            write(
                root,
                "usr/lib/systemd/system/b.service",
                "[Unit]\nDefaultDependencies=no\n[Service]\nExecStart=/bin/b\n",
            );

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();

            assert!(!dm.nodes.contains_key("b.service"));
            // the ordering edge is not recorded either, its target is unreached
            assert!(dm.nodes["a.service"]
                .forward
                .iter()
                .all(|e| e.target != "b.service"));
        }

        #[test]
        fn ordering_edges_between_reached_units_are_recorded() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nRequires=b.service\nAfter=b.service\n[Service]\nExecStart=/bin/a\n",
            );
            write(
                root,
                "usr/lib/systemd/system/b.service",
                "[Unit]\nDefaultDependencies=no\n[Service]\nExecStart=/bin/b\n",
            );

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();

            assert!(dm.nodes["a.service"]
                .forward
                .iter()
                .any(|e| e.kind == RelationKind::After && e.target == "b.service"));
        }

        #[test]
        fn conflicts_are_recorded_but_not_traversed() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nRequires=b.service\n[Service]\nExecStart=/bin/a\n",
            );
            write(
                root,
                "usr/lib/systemd/system/b.service",
                "[Unit]\nDefaultDependencies=no\nConflicts=c.service\n[Service]\nExecStart=/bin/b\n",
            );
            write(
                root,
                "usr/lib/systemd/system/c.service",
                "[Unit]\nDefaultDependencies=no\n[Service]\nExecStart=/bin/c\n",
            );

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();

            assert!(dm.nodes.contains_key("a.service"));
            assert!(dm.nodes.contains_key("b.service"));
            assert!(!dm.nodes.contains_key("c.service"));
            assert!(dm.nodes["b.service"]
                .forward
                .iter()
                .any(|e| e.kind == RelationKind::Conflicts && e.target == "c.service"));
        }

        #[test]
        fn masked_units_are_leaves() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nWants=bluetooth.service\n[Service]\nExecStart=/bin/a\n",
            );
            link(root, "etc/systemd/system/bluetooth.service", "/dev/null");

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();

            let masked = &dm.nodes["bluetooth.service"];
            assert!(masked.masked);
            assert!(masked.forward.is_empty());
        }

        #[test]
        fn cycles_terminate_and_are_reported() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nRequires=b.service\n[Service]\nExecStart=/bin/a\n",
            );
            write(
                root,
                "usr/lib/systemd/system/b.service",
                "[Unit]\nDefaultDependencies=no\nRequires=a.service\n[Service]\nExecStart=/bin/b\n",
            );

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();

            assert!(dm.nodes.contains_key("a.service"));
            assert!(dm.nodes.contains_key("b.service"));
            assert!(dm
                .meta
                .warnings
                .iter()
                .any(|w| w.contains("dependency cycle recorded")));
        }

        #[test]
        fn depth_limit_bounds_expansion() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nRequires=b.service\n[Service]\nExecStart=/bin/a\n",
            );
            write(
                root,
                "usr/lib/systemd/system/b.service",
                "[Unit]\nDefaultDependencies=no\nRequires=c.service\n[Service]\nExecStart=/bin/b\n",
            );
            write(
                root,
                "usr/lib/systemd/system/c.service",
                "[Unit]\nDefaultDependencies=no\n[Service]\nExecStart=/bin/c\n",
            );

            let dm = resolve(&ms_for(root), "a.service", Some(1)).unwrap();

            assert!(dm.nodes.contains_key("b.service"));
            assert!(!dm.nodes.contains_key("c.service"));
            assert!(dm
                .nodes
                .values()
                .all(|n| n.reached_via.as_ref().map(|v| v.depth).unwrap_or(0) <= 1));
        }

        #[test]
        fn not_found_targets_are_carried_as_synthetic_leaves() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nDefaultDependencies=no\nWants=ghost.service\n[Service]\nExecStart=/bin/a\n",
            );

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();

            assert!(dm.nodes["ghost.service"].not_found);
        }
    }

    mod round_trip {
        use super::*;

        #[test]
        fn serialize_parse_reserialize_is_byte_identical() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Unit]\nRequires=b.service\n[Service]\nExecStart=/bin/a\n",
            );
            write(
                root,
                "usr/lib/systemd/system/b.service",
                "[Service]\nExecStart=/bin/b\n",
            );

            let dm = resolve(&ms_for(root), "a.service", Some(3)).unwrap();
            let json = dm.to_json().unwrap();

            let reparsed: DmDocument = serde_json::from_str(&json).unwrap();
            assert_eq!(reparsed.to_json().unwrap(), json);
            assert_eq!(reparsed, dm);
        }

        #[test]
        fn dm_document_loads_back_from_disk() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write(
                root,
                "usr/lib/systemd/system/a.service",
                "[Service]\nExecStart=/bin/a\n",
            );

            let dm = resolve(&ms_for(root), "a.service", None).unwrap();
            let out: PathBuf = dir.path().join("snap_dm.json");
            fs::write(&out, dm.to_json().unwrap()).unwrap();

            let loaded = DmDocument::load_from_path(&out).unwrap();
            assert_eq!(loaded, dm);
        }
    }
}
