use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use super::discovery::DiscoveredTree;
use super::names::UnitName;
use super::record::{Warning, WarningKind};
use crate::systemd_unit::{SystemdUnitData, SystemdUnitFile};

/// Merges every applicable drop-in into `data` and returns the list of
/// `.conf` files applied, in application order.
///
/// Layering, least to most specific: type-wide `<type>.d/`, the template's
/// `<prefix>@.<type>.d/` for instances, the unit's own `<name>.d/`, then one
/// `<alias>.d/` round per alias name. Within each of those, directories
/// apply lowest-precedence first so that higher-precedence search paths
/// override, and files merge in lexicographic order inside a directory.
pub(crate) fn merge_dropins(
    data: &mut SystemdUnitData,
    name: &UnitName,
    alias_basenames: &[String],
    tree: &DiscoveredTree,
) -> (Vec<PathBuf>, Vec<Warning>) {
    let mut applied = Vec::new();
    let mut warnings = Vec::new();

    let mut layers: Vec<&[(usize, PathBuf)]> = Vec::new();

    if let Some(dirs) = tree.type_dropin_dirs.get(&name.unit_type) {
        layers.push(dirs);
    }
    if name.is_instance() {
        if let Some(template) = name.template() {
            if let Some(dirs) = tree.unit_dropin_dirs.get(&template.to_string()) {
                layers.push(dirs);
            }
        }
    }
    if let Some(dirs) = tree.unit_dropin_dirs.get(&name.to_string()) {
        layers.push(dirs);
    }
    for alias in alias_basenames {
        if alias == &name.to_string() {
            continue;
        }
        if let Some(dirs) = tree.unit_dropin_dirs.get(alias) {
            layers.push(dirs);
        }
    }

    for dirs in layers {
        let mut ordered: Vec<&(usize, PathBuf)> = dirs.iter().collect();
        // rank 0 is the highest-precedence search path; it must merge last
        ordered.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, dir) in ordered {
            for conf in conf_files(dir) {
                match SystemdUnitFile::load_from_path(&conf) {
                    Ok(dropin) => {
                        data.merge_from(&dropin);
                        applied.push(conf);
                    }
                    Err(e) => {
                        warnings.push(Warning::new(
                            WarningKind::MalformedUnit,
                            format!("drop-in {conf:?} not merged: {e}"),
                        ));
                    }
                }
            }
        }
    }

    (applied, warnings)
}

fn conf_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let Ok(entry) = entry else { continue };
        if entry.path().extension().unwrap_or_default() != "conf" {
            debug!("Ignoring non-conf drop-in entry {:?}", entry.path());
            continue;
        }
        files.push(entry.path().to_path_buf());
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::discovery::discover;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn merged_for(root: &Path, name: &str, base: &str) -> (SystemdUnitData, Vec<PathBuf>) {
        let tree = discover(root);
        let mut data = SystemdUnitData::load_from_str(base).unwrap();
        let name = UnitName::parse(name).unwrap();
        let (applied, warnings) = merge_dropins(&mut data, &name, &[], &tree);
        assert!(warnings.is_empty(), "{warnings:?}");
        (data, applied)
    }

    #[test]
    fn dropin_overrides_base_with_reset() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "etc/systemd/system/foo.service.d/10-over.conf",
            "[Service]\nExecStart=\nExecStart=/bin/b\n",
        );

        let (data, applied) =
            merged_for(root, "foo.service", "[Service]\nExecStart=/bin/a\n");

        assert_eq!(data.lookup_all("Service", "ExecStart"), vec!["/bin/b"]);
        assert_eq!(
            applied,
            vec![root.join("etc/systemd/system/foo.service.d/10-over.conf")],
        );
    }

    #[test]
    fn files_merge_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "etc/systemd/system/foo.service.d/20-b.conf",
            "[Unit]\nDescription=\nDescription=late\n",
        );
        write(
            root,
            "etc/systemd/system/foo.service.d/10-a.conf",
            "[Unit]\nDescription=\nDescription=early\n",
        );

        let (data, applied) = merged_for(root, "foo.service", "[Unit]\n");

        assert_eq!(data.lookup_last("Unit", "Description"), Some("late".into()));
        assert_eq!(
            applied,
            vec![
                root.join("etc/systemd/system/foo.service.d/10-a.conf"),
                root.join("etc/systemd/system/foo.service.d/20-b.conf"),
            ],
        );
    }

    #[test]
    fn higher_precedence_directories_apply_later() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "usr/lib/systemd/system/foo.service.d/10.conf",
            "[Unit]\nDescription=\nDescription=distro\n",
        );
        write(
            root,
            "etc/systemd/system/foo.service.d/10.conf",
            "[Unit]\nDescription=\nDescription=admin\n",
        );

        let (data, applied) = merged_for(root, "foo.service", "[Unit]\n");

        assert_eq!(data.lookup_last("Unit", "Description"), Some("admin".into()));
        assert_eq!(applied.len(), 2);
        assert_eq!(
            applied[0],
            root.join("usr/lib/systemd/system/foo.service.d/10.conf"),
        );
    }

    #[test]
    fn name_specific_overrides_type_wide() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "etc/systemd/system/service.d/10.conf",
            "[Unit]\nDescription=\nDescription=typewide\n",
        );
        write(
            root,
            "etc/systemd/system/foo.service.d/10.conf",
            "[Unit]\nDescription=\nDescription=specific\n",
        );

        let (data, applied) = merged_for(root, "foo.service", "[Unit]\n");

        assert_eq!(
            data.lookup_last("Unit", "Description"),
            Some("specific".into()),
        );
        assert_eq!(
            applied[0],
            root.join("etc/systemd/system/service.d/10.conf"),
        );
    }

    #[test]
    fn instances_also_merge_template_dropins() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "etc/systemd/system/getty@.service.d/10.conf",
            "[Unit]\nDescription=\nDescription=template\n",
        );

        let (data, _) = merged_for(root, "getty@tty1.service", "[Unit]\n");

        assert_eq!(
            data.lookup_last("Unit", "Description"),
            Some("template".into()),
        );
    }

    #[test]
    fn alias_dropins_apply_last() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "etc/systemd/system/foo.service.d/10.conf",
            "[Unit]\nDescription=\nDescription=own\n",
        );
        write(
            root,
            "etc/systemd/system/bar.service.d/10.conf",
            "[Unit]\nDescription=\nDescription=via-alias\n",
        );

        let tree = discover(root);
        let mut data = SystemdUnitData::load_from_str("[Unit]\n").unwrap();
        let name = UnitName::parse("foo.service").unwrap();
        let (_, warnings) =
            merge_dropins(&mut data, &name, &["bar.service".to_string()], &tree);

        assert!(warnings.is_empty());
        assert_eq!(
            data.lookup_last("Unit", "Description"),
            Some("via-alias".into()),
        );
    }

    #[test]
    fn malformed_dropin_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "etc/systemd/system/foo.service.d/10.conf",
            "Description=no section\n",
        );

        let tree = discover(root);
        let mut data = SystemdUnitData::load_from_str("[Unit]\n").unwrap();
        let name = UnitName::parse("foo.service").unwrap();
        let (applied, warnings) = merge_dropins(&mut data, &name, &[], &tree);

        assert!(applied.is_empty());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::MalformedUnit);
    }
}
