use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::systemd_unit::{
    exec_path, SystemdUnitData, MOUNT_SECTION, SERVICE_SECTION, SOCKET_SECTION, SWAP_SECTION,
};

/// Command-line directives whose executables get enriched.
pub(crate) const EXEC_KEYS: [&str; 5] = [
    "ExecStart",
    "ExecStartPre",
    "ExecStartPost",
    "ExecReload",
    "ExecStop",
];

const EXEC_SECTIONS: [&str; 4] = [
    SERVICE_SECTION,
    SOCKET_SECTION,
    MOUNT_SECTION,
    SWAP_SECTION,
];

/// Hook for attaching binary-inspection results to command entries.
/// The snapshot core never looks inside executables itself; an enricher
/// (library extractor, string scraper, hasher) can be plugged in by the
/// caller. Without one, enrichment stays empty.
pub(crate) trait ArtifactEnricher {
    fn enrich(&self, executable: &Path) -> Enrichment;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Enrichment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) libraries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) strings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) file_hash: Option<String>,
}

/// One `Exec*` command line with its resolved executable (when the binary
/// exists under the snapshot root) and whatever the enricher attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ExecArtifact {
    pub(crate) command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) executable: Option<PathBuf>,
    #[serde(flatten)]
    pub(crate) enrichment: Enrichment,
}

/// Collects the `Exec*` artifacts of one unit, invoking `enricher` for every
/// executable locatable under `root`.
pub(crate) fn enrich_unit(
    data: &SystemdUnitData,
    root: &Path,
    enricher: Option<&dyn ArtifactEnricher>,
) -> BTreeMap<String, Vec<ExecArtifact>> {
    let mut artifacts: BTreeMap<String, Vec<ExecArtifact>> = BTreeMap::new();

    for key in EXEC_KEYS {
        for section in EXEC_SECTIONS {
            for value in data.lookup_all_values(section, key) {
                let executable = resolve_executable(root, &value.raw);
                let enrichment = match (&executable, enricher) {
                    (Some(path), Some(enricher)) => enricher.enrich(path),
                    _ => Enrichment::default(),
                };

                artifacts.entry(key.to_string()).or_default().push(ExecArtifact {
                    command: value.raw.clone(),
                    executable,
                    enrichment,
                });
            }
        }
    }

    artifacts
}

/// Re-anchors the command's absolute executable path below `root` and checks
/// it exists there. Relative commands (or ones still carrying unexpanded
/// specifiers) are not resolvable.
fn resolve_executable(root: &Path, command_line: &str) -> Option<PathBuf> {
    let word = exec_path(command_line)?;
    let relative = Path::new(word).strip_prefix("/").ok()?;

    let candidate = root.join(relative);
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct HashingEnricher;

    impl ArtifactEnricher for HashingEnricher {
        fn enrich(&self, executable: &Path) -> Enrichment {
            Enrichment {
                libraries: vec!["libc.so.6".into()],
                strings: Vec::new(),
                file_hash: Some(format!("hash:{}", executable.display())),
            }
        }
    }

    fn fixture(root: &Path) -> SystemdUnitData {
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/a"), "#!/bin/sh\n").unwrap();

        SystemdUnitData::load_from_str(
            "[Service]\nExecStart=-/bin/a --flag\nExecStop=/bin/missing\n",
        )
        .unwrap()
    }

    mod enrich_unit {
        use super::*;

        #[test]
        fn resolves_executables_under_root() {
            let dir = tempfile::tempdir().unwrap();
            let data = fixture(dir.path());

            let artifacts = enrich_unit(&data, dir.path(), None);

            let start = &artifacts["ExecStart"][0];
            assert_eq!(start.command, "-/bin/a --flag");
            assert_eq!(start.executable.as_deref(), Some(dir.path().join("bin/a").as_path()));

            let stop = &artifacts["ExecStop"][0];
            assert_eq!(stop.executable, None);
        }

        #[test]
        fn without_enricher_enrichment_is_empty() {
            let dir = tempfile::tempdir().unwrap();
            let data = fixture(dir.path());

            let artifacts = enrich_unit(&data, dir.path(), None);

            assert_eq!(artifacts["ExecStart"][0].enrichment, Enrichment::default());
        }

        #[test]
        fn enricher_runs_only_for_located_executables() {
            let dir = tempfile::tempdir().unwrap();
            let data = fixture(dir.path());

            let artifacts = enrich_unit(&data, dir.path(), Some(&HashingEnricher));

            assert!(artifacts["ExecStart"][0]
                .enrichment
                .file_hash
                .as_deref()
                .unwrap()
                .starts_with("hash:"));
            assert_eq!(artifacts["ExecStop"][0].enrichment, Enrichment::default());
        }
    }

    mod resolve_executable {
        use super::*;

        #[test]
        fn relative_commands_are_not_resolved() {
            let dir = tempfile::tempdir().unwrap();

            assert_eq!(resolve_executable(dir.path(), "agetty tty1"), None);
        }
    }
}
