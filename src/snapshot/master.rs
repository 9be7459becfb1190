use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::discovery::{discover, DiscoveredTree};
use super::dropins::merge_dropins;
use super::enrich::{enrich_unit, ArtifactEnricher};
use super::implicit;
use super::names::{unescape_unit_prefix, UnitName, UnitType};
use super::record::{
    insert_edge, DirectiveEntry, DirectiveMap, RelationMap, UnitRecord, Warning, WarningKind,
};
use super::relations::{Edge, Origin, RelationKind};
use super::specifiers::expand_instance;
use super::{iso8601_now, Error, GENERATOR_WARNING, TOOL_VERSION};
use crate::systemd_unit::{
    SystemdUnitData, SystemdUnitFile, INSTALL_SECTION, MOUNT_SECTION, UNIT_SECTION,
};

/// `[Unit]` keys the assembler understands besides the relation directives.
/// Anything else (outside the `Condition*`/`Assert*`/`X-` families) is
/// preserved verbatim but flagged once per key.
const KNOWN_UNIT_KEYS: [&str; 22] = [
    "AllowIsolate",
    "CollectMode",
    "DefaultDependencies",
    "Description",
    "Documentation",
    "FailureAction",
    "IgnoreOnIsolate",
    "JobRunningTimeoutSec",
    "JobTimeoutAction",
    "JobTimeoutSec",
    "OnFailureJobMode",
    "OnSuccessJobMode",
    "RefuseManualStart",
    "RefuseManualStop",
    "RequiresMountsFor",
    "SourcePath",
    "StartLimitAction",
    "StartLimitBurst",
    "StartLimitIntervalSec",
    "StopWhenUnneeded",
    "SuccessAction",
    "WantsMountsFor",
];

/// `[Install]` keys that declare reverse-direction requirement edges.
const INSTALL_EDGE_KEYS: [(&str, RelationKind); 3] = [
    ("WantedBy", RelationKind::Wants),
    ("RequiredBy", RelationKind::Requires),
    ("UpheldBy", RelationKind::Upholds),
];

/// One unit while the master structure is under construction: the
/// serializable record fields plus the parsed directive data the injector
/// and enricher still need to query.
#[derive(Debug)]
pub(crate) struct BuildUnit {
    pub(crate) canonical: String,
    /// `None` when the referenced name has no parseable unit syntax.
    pub(crate) name: Option<UnitName>,
    pub(crate) source_path: Option<PathBuf>,
    pub(crate) masked: bool,
    pub(crate) not_found: bool,
    pub(crate) aliases: BTreeSet<String>,
    pub(crate) dropins: Vec<PathBuf>,
    pub(crate) overridden_by: Vec<PathBuf>,
    pub(crate) data: SystemdUnitData,
    pub(crate) forward: RelationMap,
    pub(crate) backward: RelationMap,
    pub(crate) warnings: Vec<Warning>,
}

impl BuildUnit {
    fn bare(canonical: String, name: Option<UnitName>) -> Self {
        BuildUnit {
            canonical,
            name,
            source_path: None,
            masked: false,
            not_found: false,
            aliases: BTreeSet::new(),
            dropins: Vec::new(),
            overridden_by: Vec::new(),
            data: SystemdUnitData::new(),
            forward: RelationMap::new(),
            backward: RelationMap::new(),
            warnings: Vec::new(),
        }
    }
}

/// Arena of units plus the name index, shared between the assembler phases
/// and the implicit-dependency injector. Edges are stored by canonical name,
/// so the intentionally cyclic graph needs no owning references.
pub(crate) struct Assembly {
    pub(crate) root: PathBuf,
    pub(crate) units: Vec<BuildUnit>,
    pub(crate) by_name: HashMap<String, usize>,
    tree: DiscoveredTree,
    /// Mount units discovered on disk with their mount paths.
    mounts: Vec<(usize, String)>,
    warnings: Vec<Warning>,
}

impl Assembly {
    fn new(root: PathBuf, mut tree: DiscoveredTree) -> Self {
        let warnings = mem::take(&mut tree.warnings);

        Assembly {
            root,
            units: Vec::new(),
            by_name: HashMap::new(),
            tree,
            mounts: Vec::new(),
            warnings,
        }
    }

    /// Phase 1: load and merge every discovered unit file.
    fn materialize(&mut self) {
        for discovered in mem::take(&mut self.tree.units) {
            let mut unit = BuildUnit::bare(discovered.canonical, Some(discovered.name.clone()));
            unit.source_path = discovered.source_path;
            unit.masked = discovered.masked;
            unit.not_found = discovered.not_found;
            unit.aliases = discovered
                .aliases
                .into_iter()
                .collect();
            unit.warnings = discovered.warnings;

            if !unit.masked && !unit.not_found {
                if let Some(path) = unit.source_path.clone() {
                    match SystemdUnitFile::load_from_path(&path) {
                        Ok(file) => unit.data = file.into_data(),
                        Err(e) => {
                            unit.warnings.push(Warning::new(
                                WarningKind::MalformedUnit,
                                format!("{path:?} not parsed: {e}"),
                            ));
                        }
                    }

                    let alias_basenames: Vec<String> = unit
                        .aliases
                        .iter()
                        .filter_map(|a| {
                            Path::new(a)
                                .file_name()
                                .and_then(|n| n.to_str())
                                .map(String::from)
                        })
                        .collect();
                    let (applied, dropin_warnings) = merge_dropins(
                        &mut unit.data,
                        &discovered.name,
                        &alias_basenames,
                        &self.tree,
                    );
                    unit.dropins = applied;
                    unit.warnings.extend(dropin_warnings);

                    if discovered.name.is_instance() {
                        unit.warnings
                            .extend(expand_instance(&mut unit.data, &discovered.name));
                    }
                }
            }

            let idx = self.units.len();
            self.by_name.insert(unit.canonical.clone(), idx);
            self.units.push(unit);
        }

        // same-basename files shadowed under precedence
        let overridden = mem::take(&mut self.tree.overridden);
        for (basename, paths) in overridden {
            match self.by_name.get(&basename) {
                Some(&idx) => self.units[idx].overridden_by.extend(paths),
                None => debug!("Shadowed files for unclaimed name {basename}: {paths:?}"),
            }
        }

        self.mounts = self
            .units
            .iter()
            .enumerate()
            .filter(|(_, u)| {
                !u.not_found
                    && !u.masked
                    && u.name
                        .as_ref()
                        .is_some_and(|n| n.unit_type == UnitType::Mount && !n.is_template())
            })
            .map(|(idx, u)| {
                let path = u.data.lookup_last(MOUNT_SECTION, "Where").unwrap_or_else(|| {
                    unescape_unit_prefix(&u.name.as_ref().expect("filtered above").prefix)
                });
                (idx, path)
            })
            .collect();
    }

    /// Phase 2: `*.wants/` and `*.requires/` directory entries become edges
    /// on the owning unit.
    fn link_dir_dependencies(&mut self) {
        let wants = mem::take(&mut self.tree.wants_links);
        let requires = mem::take(&mut self.tree.requires_links);

        for (links, kind) in [(wants, RelationKind::Wants), (requires, RelationKind::Requires)]
        {
            for link in links {
                let (owner, _) = self.ensure_unit(&link.owner);
                self.add_edge(
                    owner,
                    kind,
                    &link.dependency,
                    Origin::Explicit(link.link_path),
                    UNIT_SECTION,
                );
            }
        }
    }

    /// Phase 3 (per unit): edges declared by the unit's own directives.
    fn extract_explicit_edges(&mut self, idx: usize) {
        let unit = &self.units[idx];
        if unit.masked || unit.not_found {
            return;
        }
        let Some(name) = unit.name.clone() else { return };
        if name.is_template() {
            return;
        }

        let canonical = unit.canonical.clone();
        let fallback = unit.source_path.clone().unwrap_or_default();

        let mut own_edges: Vec<(RelationKind, String, Origin)> = Vec::new();
        for kind in RelationKind::UNIT_DIRECTIVES {
            for (target, source) in unit.data.lookup_all_strv_values(UNIT_SECTION, kind.as_str())
            {
                let origin = Origin::Explicit(source.unwrap_or_else(|| fallback.clone()));
                own_edges.push((kind, target, origin));
            }
        }

        let mut install_edges: Vec<(String, RelationKind, Origin)> = Vec::new();
        for (key, kind) in INSTALL_EDGE_KEYS {
            for (holder, source) in unit.data.lookup_all_strv_values(INSTALL_SECTION, key) {
                let origin = Origin::Explicit(source.unwrap_or_else(|| fallback.clone()));
                install_edges.push((holder, kind, origin));
            }
        }

        let install_aliases = unit.data.lookup_all_strv(INSTALL_SECTION, "Alias");

        let mut unknown_keys: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        for (key, _) in unit.data.section_entries(UNIT_SECTION) {
            if !seen.insert(key.to_string()) {
                continue;
            }
            let known = KNOWN_UNIT_KEYS.contains(&key)
                || RelationKind::UNIT_DIRECTIVES.iter().any(|k| k.as_str() == key)
                || key.starts_with("Condition")
                || key.starts_with("Assert")
                || key.starts_with("X-");
            if !known {
                unknown_keys.push(key.to_string());
            }
        }

        for (kind, target, origin) in own_edges {
            self.add_edge(idx, kind, &target, origin, UNIT_SECTION);
        }

        for (holder, kind, origin) in install_edges {
            let (holder_idx, _) = self.ensure_unit(&holder);
            if self.units[holder_idx].not_found {
                self.units[idx].warnings.push(Warning::new(
                    WarningKind::TargetNotFound,
                    format!("{holder} (referenced from [Install]) does not exist on disk"),
                ));
            }
            self.add_edge(holder_idx, kind, &canonical, origin, INSTALL_SECTION);
        }

        for alias in install_aliases {
            self.units[idx].aliases.insert(alias);
        }

        for key in unknown_keys {
            self.units[idx].warnings.push(Warning::new(
                WarningKind::UnknownDirective,
                format!("[Unit] directive {key}= is preserved but not interpreted"),
            ));
        }
    }

    /// Phase 5: mirror every forward edge as a reverse fact on its target.
    fn mirror_reverse_edges(&mut self) {
        for idx in 0..self.units.len() {
            let canonical = self.units[idx].canonical.clone();
            let edges: Vec<Edge> = self.units[idx].forward.values().flatten().cloned().collect();

            for edge in edges {
                let Some(inverse) = edge.kind.inverse() else {
                    continue;
                };
                let (target_idx, _) = self.ensure_unit(&edge.target);
                insert_edge(
                    &mut self.units[target_idx].backward,
                    Edge::new(inverse, canonical.clone(), edge.origin, edge.section),
                );
            }
        }
    }

    /// Returns the index for `name`, creating the unit if needed: template
    /// references are instantiated, anything else missing becomes a
    /// synthetic `not_found` record. The flag reports synthetic creation.
    pub(crate) fn ensure_unit(&mut self, name: &str) -> (usize, bool) {
        if let Some(&idx) = self.by_name.get(name) {
            return (idx, false);
        }

        match UnitName::parse(name) {
            Ok(parsed) => {
                if parsed.is_instance() {
                    let template = parsed.template().expect("instance names a template");
                    if let Some(&tpl_idx) = self.by_name.get(&template.to_string()) {
                        if self.units[tpl_idx].source_path.is_some() {
                            return (self.instantiate(&parsed, tpl_idx), false);
                        }
                    }
                }
                (self.push_synthetic(name, Some(parsed)), true)
            }
            Err(e) => {
                warn!("Referenced name {name:?} is not a unit name: {e}");
                (self.push_synthetic(name, None), true)
            }
        }
    }

    /// Synthesizes `parsed` from its on-disk template: the template file is
    /// re-read so the instance layers its own drop-ins (type-wide, then
    /// `prefix@.type.d`, then instance-specific) before specifier expansion.
    fn instantiate(&mut self, parsed: &UnitName, tpl_idx: usize) -> usize {
        let canonical = parsed.to_string();
        debug!("Instantiating {canonical} from template");

        let tpl_path = self.units[tpl_idx].source_path.clone();
        let tpl_masked = self.units[tpl_idx].masked;

        let mut unit = BuildUnit::bare(canonical.clone(), Some(parsed.clone()));
        unit.source_path = tpl_path.clone();
        unit.masked = tpl_masked;

        if let Some(path) = tpl_path {
            match SystemdUnitFile::load_from_path(&path) {
                Ok(file) => unit.data = file.into_data(),
                Err(e) => {
                    unit.warnings.push(Warning::new(
                        WarningKind::MalformedUnit,
                        format!("template {path:?} not parsed: {e}"),
                    ));
                }
            }

            let (applied, dropin_warnings) =
                merge_dropins(&mut unit.data, parsed, &[], &self.tree);
            unit.dropins = applied;
            unit.warnings.extend(dropin_warnings);
            unit.warnings.extend(expand_instance(&mut unit.data, parsed));
        }

        let idx = self.units.len();
        self.by_name.insert(canonical, idx);
        self.units.push(unit);
        idx
    }

    fn push_synthetic(&mut self, canonical: &str, name: Option<UnitName>) -> usize {
        let mut unit = BuildUnit::bare(canonical.to_string(), name);
        unit.not_found = true;

        let idx = self.units.len();
        self.by_name.insert(canonical.to_string(), idx);
        self.units.push(unit);
        idx
    }

    /// Records a forward edge, creating the target when it is missing.
    /// Explicit references to missing units are flagged on the source.
    pub(crate) fn add_edge(
        &mut self,
        source: usize,
        kind: RelationKind,
        target: &str,
        origin: Origin,
        section: &str,
    ) {
        let (target_idx, _) = self.ensure_unit(target);

        if self.units[target_idx].not_found && matches!(origin, Origin::Explicit(_)) {
            self.units[source].warnings.push(Warning::new(
                WarningKind::TargetNotFound,
                format!("{target} does not exist on disk, recorded as synthetic"),
            ));
        }

        insert_edge(
            &mut self.units[source].forward,
            Edge::new(kind, target, origin, section),
        );
    }

    /// All mount units whose mount path covers `path`, by canonical name.
    pub(crate) fn mounts_covering(&self, path: &str, exclude: usize) -> Vec<String> {
        let mut names: Vec<String> = self
            .mounts
            .iter()
            .filter(|(idx, mount_path)| *idx != exclude && covers(mount_path, path))
            .map(|(idx, _)| self.units[*idx].canonical.clone())
            .collect();
        names.sort();
        names
    }

    /// The closest mount strictly above `path` (longest proper prefix).
    pub(crate) fn parent_mount(&self, path: &str, exclude: usize) -> Option<String> {
        self.mounts
            .iter()
            .filter(|(idx, mount_path)| {
                *idx != exclude && mount_path.as_str() != path && covers(mount_path, path)
            })
            .max_by_key(|(_, mount_path)| mount_path.len())
            .map(|(idx, _)| self.units[*idx].canonical.clone())
    }

    /// Phase 6: enforce alias disjointness, run enrichment, and produce the
    /// serializable document.
    fn finalize(mut self, enricher: Option<&dyn ArtifactEnricher>) -> MsDocument {
        let mut claimed: HashMap<String, String> = HashMap::new();
        for idx in 0..self.units.len() {
            let canonical = self.units[idx].canonical.clone();
            let aliases: Vec<String> = self.units[idx].aliases.iter().cloned().collect();
            for alias in aliases {
                match claimed.get(&alias).cloned() {
                    Some(owner) if owner != canonical => {
                        self.units[idx].aliases.remove(&alias);
                        self.units[idx].warnings.push(Warning::new(
                            WarningKind::BadAlias,
                            format!("alias {alias} already claimed by {owner}, dropped"),
                        ));
                    }
                    _ => {
                        claimed.insert(alias, canonical.clone());
                    }
                }
            }
        }

        let mut meta_warnings = vec![GENERATOR_WARNING.to_string()];
        self.warnings.sort();
        self.warnings.dedup();
        for warning in &self.warnings {
            meta_warnings.push(warning.message.clone());
        }

        let mut units_map = BTreeMap::new();
        for unit in &mut self.units {
            unit.warnings.sort();
            unit.warnings.dedup();
            for warning in &unit.warnings {
                meta_warnings.push(format!("{}: {}", unit.canonical, warning.message));
            }
        }

        for unit in self.units {
            let exec_artifacts = if unit.masked || unit.not_found {
                BTreeMap::new()
            } else {
                enrich_unit(&unit.data, &self.root, enricher)
            };

            let record = UnitRecord {
                canonical_name: unit.canonical.clone(),
                unit_type: unit.name.as_ref().map(|n| n.unit_type),
                source_path: unit.source_path,
                is_template: unit.name.as_ref().is_some_and(|n| n.is_template()),
                instance_name: unit
                    .name
                    .as_ref()
                    .and_then(|n| n.instance.clone())
                    .filter(|i| !i.is_empty()),
                masked: unit.masked,
                not_found: unit.not_found,
                aliases: unit.aliases.into_iter().collect(),
                dropins: unit.dropins,
                overridden_by: unit.overridden_by,
                directives: directive_map(&unit.data),
                relations: unit.forward,
                reverse_relations: unit.backward,
                exec_artifacts,
                warnings: unit.warnings,
            };
            units_map.insert(unit.canonical, record);
        }

        MsDocument {
            units: units_map,
            meta: Meta {
                root_path: Some(self.root.to_string_lossy().into_owned()),
                generated_at: iso8601_now(),
                tool_version: TOOL_VERSION.to_string(),
                warnings: meta_warnings,
            },
        }
    }
}

fn covers(mount_path: &str, path: &str) -> bool {
    if mount_path == "/" {
        return path.starts_with('/');
    }
    path == mount_path || path.starts_with(&format!("{mount_path}/"))
}

fn directive_map(data: &SystemdUnitData) -> DirectiveMap {
    let mut map = DirectiveMap::new();

    let sections: Vec<String> = data.section_names().map(String::from).collect();
    for section in sections {
        let keys: BTreeSet<String> = data
            .section_entries(&section)
            .map(|(k, _)| k.to_string())
            .collect();

        let mut section_map = BTreeMap::new();
        for key in keys {
            let entries: Vec<DirectiveEntry> = data
                .lookup_all_values(&section, &key)
                .iter()
                .map(|v| DirectiveEntry {
                    value: v.raw.clone(),
                    source: v.source.clone(),
                })
                .collect();
            if !entries.is_empty() {
                section_map.insert(key, entries);
            }
        }

        if !section_map.is_empty() {
            map.insert(section, section_map);
        }
    }

    map
}

/// The master-structure artifact: every canonical name mapped to its
/// effective record, plus provenance metadata.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct MsDocument {
    pub(crate) units: BTreeMap<String, UnitRecord>,
    pub(crate) meta: Meta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) root_path: Option<String>,
    pub(crate) generated_at: String,
    pub(crate) tool_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) warnings: Vec<String>,
}

impl MsDocument {
    pub(crate) fn load_from_path(path: &Path) -> Result<Self, Error> {
        let buf = fs::read_to_string(path)
            .map_err(|e| Error::RootInaccessible(path.to_path_buf(), e))?;

        serde_json::from_str(&buf).map_err(|e| Error::MalformedMsInput(e.to_string()))
    }

    /// Canonical JSON rendering: sorted keys throughout, so re-serializing a
    /// parsed document is byte-identical.
    pub(crate) fn to_json(&self) -> Result<String, Error> {
        let mut out = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        out.push('\n');
        Ok(out)
    }
}

/// Builds the master structure for the unit tree under `root`.
pub(crate) fn build_master(
    root: &Path,
    enricher: Option<&dyn ArtifactEnricher>,
) -> Result<MsDocument, Error> {
    let meta = fs::metadata(root).map_err(|e| Error::RootInaccessible(root.to_path_buf(), e))?;
    if !meta.is_dir() {
        return Err(Error::RootInaccessible(
            root.to_path_buf(),
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    debug!("Snapshotting unit tree under {root:?}");
    let tree = discover(root);
    let mut asm = Assembly::new(root.to_path_buf(), tree);

    asm.materialize();
    asm.link_dir_dependencies();

    // instantiation appends units, so the sweep re-checks the length
    let mut idx = 0;
    while idx < asm.units.len() {
        asm.extract_explicit_edges(idx);
        implicit::inject(&mut asm, idx);
        idx += 1;
    }

    implicit::inject_target_ordering(&mut asm);
    asm.mirror_reverse_edges();

    Ok(asm.finalize(enricher))
}
