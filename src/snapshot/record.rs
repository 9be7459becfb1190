use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::enrich::ExecArtifact;
use super::names::UnitType;
use super::relations::{Edge, RelationKind};

/// A recoverable diagnostic, attached to the unit it concerns and echoed in
/// the artifact's top-level meta block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct Warning {
    pub(crate) kind: WarningKind,
    pub(crate) message: String,
}

impl Warning {
    pub(crate) fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Warning {
            kind,
            message: message.into(),
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WarningKind {
    MalformedUnit,
    BadAlias,
    UnknownSpecifier,
    DanglingSymlink,
    EscapingSymlink,
    UnknownDirective,
    TargetNotFound,
    CycleRecorded,
}

/// One `key=value` occurrence in the merged directive map, with the file it
/// came from. `source` is absent for synthesized values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DirectiveEntry {
    pub(crate) value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) source: Option<PathBuf>,
}

pub(crate) type DirectiveMap = BTreeMap<String, BTreeMap<String, Vec<DirectiveEntry>>>;
pub(crate) type RelationMap = BTreeMap<RelationKind, Vec<Edge>>;

/// The effective record for one canonical name in the master structure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct UnitRecord {
    pub(crate) canonical_name: String,
    /// `None` only for synthetic units whose referenced name carries no
    /// recognizable type suffix.
    #[serde(rename = "type")]
    pub(crate) unit_type: Option<UnitType>,
    pub(crate) source_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) is_template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) masked: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) not_found: bool,
    /// Symlink paths (and `[Install]` alias names) resolving to this unit,
    /// sorted ascending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) aliases: Vec<String>,
    /// Drop-in files merged into this unit, in application order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) dropins: Vec<PathBuf>,
    /// Same-name files shadowed by this unit's `source_path` under
    /// search-path precedence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) overridden_by: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) directives: DirectiveMap,
    /// Forward edges this unit declares (explicitly or via implicit rules),
    /// grouped by kind, targets sorted ascending.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) relations: RelationMap,
    /// Reverse-direction facts recorded on this unit for edges declared
    /// elsewhere.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) reverse_relations: RelationMap,
    /// Enrichment attached to `Exec*` command lines, keyed by directive.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) exec_artifacts: BTreeMap<String, Vec<ExecArtifact>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) warnings: Vec<Warning>,
}

impl UnitRecord {
    /// All forward edges, flattened out of the by-kind grouping.
    pub(crate) fn forward_edges(&self) -> impl Iterator<Item = &Edge> {
        self.relations.values().flatten()
    }
}

/// Inserts an edge into a by-kind relation map, keeping each kind's list
/// sorted and free of duplicates.
pub(crate) fn insert_edge(map: &mut RelationMap, edge: Edge) {
    let edges = map.entry(edge.kind).or_default();
    if let Err(pos) = edges.binary_search(&edge) {
        edges.insert(pos, edge);
    }
}
