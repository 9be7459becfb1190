use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Every relation an edge can carry, spelled the way the corresponding
/// directive is. Reverse-direction kinds (`WantedBy`, `TriggeredBy`, ...)
/// only appear on the backward side of a record.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub(crate) enum RelationKind {
    // requirement, forward
    Wants,
    Requires,
    Requisite,
    BindsTo,
    PartOf,
    Upholds,
    Conflicts,
    OnFailure,
    OnSuccess,
    PropagatesReloadTo,
    PropagatesStopTo,
    JoinsNamespaceOf,
    Triggers,
    // requirement, reverse
    WantedBy,
    RequiredBy,
    RequisiteOf,
    BoundBy,
    ConsistsOf,
    UpheldBy,
    TriggeredByOnFailure,
    TriggeredByOnSuccess,
    ReloadPropagatedFrom,
    StopPropagatedFrom,
    TriggeredBy,
    // ordering
    Before,
    After,
}

impl RelationKind {
    /// Directive keys that declare a forward edge in a `[Unit]` section.
    pub(crate) const UNIT_DIRECTIVES: [RelationKind; 14] = [
        RelationKind::Wants,
        RelationKind::Requires,
        RelationKind::Requisite,
        RelationKind::BindsTo,
        RelationKind::PartOf,
        RelationKind::Upholds,
        RelationKind::Conflicts,
        RelationKind::OnFailure,
        RelationKind::OnSuccess,
        RelationKind::PropagatesReloadTo,
        RelationKind::PropagatesStopTo,
        RelationKind::JoinsNamespaceOf,
        RelationKind::Before,
        RelationKind::After,
    ];

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Wants => "Wants",
            RelationKind::Requires => "Requires",
            RelationKind::Requisite => "Requisite",
            RelationKind::BindsTo => "BindsTo",
            RelationKind::PartOf => "PartOf",
            RelationKind::Upholds => "Upholds",
            RelationKind::Conflicts => "Conflicts",
            RelationKind::OnFailure => "OnFailure",
            RelationKind::OnSuccess => "OnSuccess",
            RelationKind::PropagatesReloadTo => "PropagatesReloadTo",
            RelationKind::PropagatesStopTo => "PropagatesStopTo",
            RelationKind::JoinsNamespaceOf => "JoinsNamespaceOf",
            RelationKind::Triggers => "Triggers",
            RelationKind::WantedBy => "WantedBy",
            RelationKind::RequiredBy => "RequiredBy",
            RelationKind::RequisiteOf => "RequisiteOf",
            RelationKind::BoundBy => "BoundBy",
            RelationKind::ConsistsOf => "ConsistsOf",
            RelationKind::UpheldBy => "UpheldBy",
            RelationKind::TriggeredByOnFailure => "TriggeredByOnFailure",
            RelationKind::TriggeredByOnSuccess => "TriggeredByOnSuccess",
            RelationKind::ReloadPropagatedFrom => "ReloadPropagatedFrom",
            RelationKind::StopPropagatedFrom => "StopPropagatedFrom",
            RelationKind::TriggeredBy => "TriggeredBy",
            RelationKind::Before => "Before",
            RelationKind::After => "After",
        }
    }

    /// The kind recorded on the target's backward side for an edge of this
    /// kind. `Conflicts` is symmetric. `JoinsNamespaceOf` has no reverse fact.
    pub(crate) fn inverse(&self) -> Option<RelationKind> {
        Some(match self {
            RelationKind::Wants => RelationKind::WantedBy,
            RelationKind::Requires => RelationKind::RequiredBy,
            RelationKind::Requisite => RelationKind::RequisiteOf,
            RelationKind::BindsTo => RelationKind::BoundBy,
            RelationKind::PartOf => RelationKind::ConsistsOf,
            RelationKind::Upholds => RelationKind::UpheldBy,
            RelationKind::Conflicts => RelationKind::Conflicts,
            RelationKind::OnFailure => RelationKind::TriggeredByOnFailure,
            RelationKind::OnSuccess => RelationKind::TriggeredByOnSuccess,
            RelationKind::PropagatesReloadTo => RelationKind::ReloadPropagatedFrom,
            RelationKind::PropagatesStopTo => RelationKind::StopPropagatedFrom,
            RelationKind::Triggers => RelationKind::TriggeredBy,
            RelationKind::JoinsNamespaceOf => return None,
            RelationKind::WantedBy => RelationKind::Wants,
            RelationKind::RequiredBy => RelationKind::Requires,
            RelationKind::RequisiteOf => RelationKind::Requisite,
            RelationKind::BoundBy => RelationKind::BindsTo,
            RelationKind::ConsistsOf => RelationKind::PartOf,
            RelationKind::UpheldBy => RelationKind::Upholds,
            RelationKind::TriggeredByOnFailure => RelationKind::OnFailure,
            RelationKind::TriggeredByOnSuccess => RelationKind::OnSuccess,
            RelationKind::ReloadPropagatedFrom => RelationKind::PropagatesReloadTo,
            RelationKind::StopPropagatedFrom => RelationKind::PropagatesStopTo,
            RelationKind::TriggeredBy => RelationKind::Triggers,
            RelationKind::Before => RelationKind::After,
            RelationKind::After => RelationKind::Before,
        })
    }

    /// Whether the dependency resolver traverses through an edge of this
    /// kind. Ordering edges are recorded but never pull a unit in, and
    /// `Conflicts` is recorded as a negative edge.
    pub(crate) fn pulls_in(&self) -> bool {
        matches!(
            self,
            RelationKind::Wants
                | RelationKind::Requires
                | RelationKind::Requisite
                | RelationKind::BindsTo
                | RelationKind::Upholds
                | RelationKind::PartOf
                | RelationKind::Triggers
                | RelationKind::OnFailure
                | RelationKind::OnSuccess
                | RelationKind::PropagatesReloadTo
                | RelationKind::PropagatesStopTo
        )
    }
}

/// Where an edge (or directive) came from: a file on disk, or one of the
/// implicit-dependency rules (identified by rule id).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Origin {
    Explicit(PathBuf),
    Implicit(String),
}

/// One directed edge as serialized in MS and DM artifacts. The source unit
/// is the record (or DM node) the edge hangs off, so it is not repeated here.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct Edge {
    pub(crate) kind: RelationKind,
    pub(crate) target: String,
    pub(crate) origin: Origin,
    pub(crate) section: String,
}

impl Edge {
    pub(crate) fn new(
        kind: RelationKind,
        target: impl Into<String>,
        origin: Origin,
        section: impl Into<String>,
    ) -> Self {
        Edge {
            kind,
            target: target.into(),
            origin,
            section: section.into(),
        }
    }
}
