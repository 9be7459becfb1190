use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use super::names::{UnitName, UnitType};
use super::record::{Warning, WarningKind};
use super::search_paths::search_paths;

/// Maximum symlink hops before a chain is treated as dangling.
const SYMLINK_HOP_LIMIT: usize = 40;

/// Everything the classification walk over the search paths finds, before
/// any file content is parsed.
#[derive(Debug, Default)]
pub(crate) struct DiscoveredTree {
    pub(crate) units: Vec<DiscoveredUnit>,
    pub(crate) by_name: HashMap<String, usize>,
    /// `<unit>.d` directories, keyed by full unit name; `rank` is the
    /// owning search path's precedence index (0 = highest).
    pub(crate) unit_dropin_dirs: HashMap<String, Vec<(usize, PathBuf)>>,
    /// `<type>.d` directories, applicable to every unit of that type.
    pub(crate) type_dropin_dirs: HashMap<UnitType, Vec<(usize, PathBuf)>>,
    /// Entries of `*.wants/` directories.
    pub(crate) wants_links: Vec<DirLink>,
    /// Entries of `*.requires/` directories.
    pub(crate) requires_links: Vec<DirLink>,
    /// Same-basename files shadowed under first-wins precedence.
    pub(crate) overridden: HashMap<String, Vec<PathBuf>>,
    pub(crate) warnings: Vec<Warning>,
}

/// One symlink inside a `*.wants/` or `*.requires/` directory: the owning
/// unit gains a dependency on the entry's basename.
#[derive(Debug)]
pub(crate) struct DirLink {
    pub(crate) owner: String,
    pub(crate) dependency: String,
    pub(crate) link_path: PathBuf,
}

#[derive(Debug)]
pub(crate) struct DiscoveredUnit {
    pub(crate) name: UnitName,
    pub(crate) canonical: String,
    pub(crate) source_path: Option<PathBuf>,
    pub(crate) masked: bool,
    pub(crate) not_found: bool,
    pub(crate) aliases: BTreeSet<String>,
    pub(crate) warnings: Vec<Warning>,
}

/// Result of resolving a symlink chain confined to the snapshot root.
#[derive(Debug, PartialEq)]
enum Resolution {
    File(PathBuf),
    Directory,
    Masked,
    Dangling,
    Escaping,
}

/// Walks every search path under `root` in precedence order and classifies
/// each entry: unit file, alias link, masked unit, drop-in directory,
/// wants/requires directory.
pub(crate) fn discover(root: &Path) -> DiscoveredTree {
    let mut tree = DiscoveredTree::default();

    for (rank, dir) in search_paths(root).iter().enumerate() {
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(io_error) = e.io_error() {
                        // missing search paths are expected
                        if io_error.kind() != io::ErrorKind::NotFound {
                            warn!("Can't read {dir:?}: {e}");
                        }
                    }
                    continue;
                }
            };

            let Some(basename) = entry.file_name().to_str().map(String::from) else {
                warn!("Skipping non-UTF-8 entry {:?}", entry.path());
                continue;
            };

            if entry.file_type().is_dir() {
                tree.classify_directory(rank, entry.path(), &basename);
            } else {
                tree.classify_file(root, entry.path(), &basename);
            }
        }
    }

    tree
}

impl DiscoveredTree {
    fn classify_directory(&mut self, rank: usize, path: &Path, basename: &str) {
        if let Some(owner) = basename.strip_suffix(".wants") {
            self.collect_dir_links(owner, path, true);
        } else if let Some(owner) = basename.strip_suffix(".requires") {
            self.collect_dir_links(owner, path, false);
        } else if let Some(stem) = basename.strip_suffix(".d") {
            if let Some(unit_type) = UnitType::from_suffix(stem) {
                self.type_dropin_dirs
                    .entry(unit_type)
                    .or_default()
                    .push((rank, path.to_path_buf()));
            } else if UnitName::parse(stem).is_ok() {
                self.unit_dropin_dirs
                    .entry(stem.to_string())
                    .or_default()
                    .push((rank, path.to_path_buf()));
            } else {
                debug!("Ignoring drop-in directory with unrecognized name {path:?}");
            }
        } else {
            debug!("Ignoring directory {path:?}");
        }
    }

    fn collect_dir_links(&mut self, owner: &str, dir: &Path, wants: bool) {
        if UnitName::parse(owner).is_err() {
            debug!("Ignoring dependency directory with unrecognized owner {dir:?}");
            return;
        }

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let Ok(entry) = entry else { continue };
            let Some(dependency) = entry.file_name().to_str() else {
                continue;
            };

            if UnitName::parse(dependency).is_err() {
                debug!("Ignoring dependency-directory entry {:?}", entry.path());
                continue;
            }

            let link = DirLink {
                owner: owner.to_string(),
                dependency: dependency.to_string(),
                link_path: entry.path().to_path_buf(),
            };
            if wants {
                self.wants_links.push(link);
            } else {
                self.requires_links.push(link);
            }
        }
    }

    fn classify_file(&mut self, root: &Path, path: &Path, basename: &str) {
        let Ok(name) = UnitName::parse(basename) else {
            debug!("Ignoring non-unit file {path:?}");
            return;
        };

        // first-wins override: a basename claimed by a higher-precedence
        // path shadows everything that follows
        if let Some(&idx) = self.by_name.get(basename) {
            let unit = &mut self.units[idx];
            if unit.canonical == basename && unit.source_path.is_none() && !unit.masked {
                // the name was only known from dangling links so far; the
                // real file supplies the content
                unit.source_path = Some(path.to_path_buf());
                unit.not_found = false;
                unit.masked = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false);
            } else if unit.source_path.as_deref() != Some(path) {
                self.overridden
                    .entry(basename.to_string())
                    .or_default()
                    .push(path.to_path_buf());
            }
            return;
        }

        let is_symlink = path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        if is_symlink {
            self.classify_symlink(root, path, basename, name);
        } else {
            let masked = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false);
            self.ensure_unit(name, Some(path.to_path_buf()), masked, false);
        }
    }

    fn classify_symlink(&mut self, root: &Path, path: &Path, basename: &str, name: UnitName) {
        match resolve_within_root(root, path) {
            Resolution::Masked => {
                debug!("Unit {basename} is masked via {path:?}");
                self.ensure_unit(name, Some(path.to_path_buf()), true, false);
            }
            Resolution::File(target) => {
                let empty = fs::metadata(&target).map(|m| m.len() == 0).unwrap_or(false);
                if empty {
                    self.ensure_unit(name, Some(path.to_path_buf()), true, false);
                    return;
                }

                let Some(target_basename) = target.file_name().and_then(|n| n.to_str()) else {
                    return;
                };

                if target_basename == basename {
                    // same basename, different path: the link both selects
                    // the content file and counts as an alias path
                    let idx = self.ensure_unit(name, Some(target.clone()), false, false);
                    self.units[idx]
                        .aliases
                        .insert(path.to_string_lossy().into_owned());
                    self.claim(basename, idx);
                    return;
                }

                let Ok(target_name) = UnitName::parse(target_basename) else {
                    self.warnings.push(Warning::new(
                        WarningKind::BadAlias,
                        format!("{path:?} points at non-unit file {target:?}"),
                    ));
                    return;
                };

                // plain may only alias plain, templates templates,
                // instances instances
                if alias_arity(&name) != alias_arity(&target_name) {
                    self.warnings.push(Warning::new(
                        WarningKind::BadAlias,
                        format!(
                            "alias {path:?} mixes template and non-template units, dropped"
                        ),
                    ));
                    return;
                }

                let idx = self.ensure_unit(target_name, Some(target), false, false);
                if name.unit_type != self.units[idx].name.unit_type {
                    let canonical = self.units[idx].canonical.clone();
                    self.units[idx].warnings.push(Warning::new(
                        WarningKind::BadAlias,
                        format!("alias {path:?} changes the unit type of {canonical}"),
                    ));
                }
                self.units[idx]
                    .aliases
                    .insert(path.to_string_lossy().into_owned());
                self.claim(basename, idx);
            }
            outcome @ (Resolution::Dangling | Resolution::Escaping) => {
                let kind = match outcome {
                    Resolution::Escaping => WarningKind::EscapingSymlink,
                    _ => WarningKind::DanglingSymlink,
                };

                // alias to a synthetic unit named after the raw link target
                let raw_target = fs::read_link(path).unwrap_or_default();
                let Some(target_basename) = raw_target
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
                else {
                    self.warnings.push(Warning::new(
                        kind,
                        format!("symlink {path:?} has no resolvable target"),
                    ));
                    return;
                };

                let Ok(target_name) = UnitName::parse(&target_basename) else {
                    self.warnings.push(Warning::new(
                        kind,
                        format!("symlink {path:?} points at non-unit name {target_basename:?}"),
                    ));
                    return;
                };

                let idx = self.ensure_unit(target_name, None, false, true);
                self.units[idx].warnings.push(Warning::new(
                    kind,
                    format!("symlink {path:?} does not resolve under the snapshot root"),
                ));
                if target_basename != basename {
                    self.units[idx]
                        .aliases
                        .insert(path.to_string_lossy().into_owned());
                }
                self.claim(basename, idx);
            }
            Resolution::Directory => {
                debug!("Ignoring symlink to directory {path:?}");
            }
        }
    }

    fn ensure_unit(
        &mut self,
        name: UnitName,
        source_path: Option<PathBuf>,
        masked: bool,
        not_found: bool,
    ) -> usize {
        let canonical = name.to_string();

        if let Some(&idx) = self.by_name.get(&canonical) {
            let unit = &mut self.units[idx];
            // a real file upgrades a previously dangling reference
            if unit.source_path.is_none() && source_path.is_some() {
                unit.source_path = source_path;
                unit.not_found = false;
            }
            return idx;
        }

        let idx = self.units.len();
        self.units.push(DiscoveredUnit {
            canonical: canonical.clone(),
            name,
            source_path,
            masked,
            not_found,
            aliases: BTreeSet::new(),
            warnings: Vec::new(),
        });
        self.by_name.insert(canonical, idx);
        idx
    }

    /// Marks `basename` as taken so lower-precedence files land in the
    /// overridden list instead of contributing content.
    fn claim(&mut self, basename: &str, idx: usize) {
        self.by_name.entry(basename.to_string()).or_insert(idx);
    }
}

fn alias_arity(name: &UnitName) -> u8 {
    if name.is_template() {
        1
    } else if name.is_instance() {
        2
    } else {
        0
    }
}

/// Follows a symlink chain without ever leaving `root`: absolute targets are
/// re-anchored below the root, and any hop escaping it is reported. A chain
/// ending at the null device means the unit is masked.
fn resolve_within_root(root: &Path, path: &Path) -> Resolution {
    let mut current = path.to_path_buf();

    for _ in 0..SYMLINK_HOP_LIMIT {
        let Ok(meta) = fs::symlink_metadata(&current) else {
            return Resolution::Dangling;
        };

        if !meta.file_type().is_symlink() {
            if meta.file_type().is_dir() {
                return Resolution::Directory;
            }
            return Resolution::File(current);
        }

        let Ok(target) = fs::read_link(&current) else {
            return Resolution::Dangling;
        };

        if target == Path::new("/dev/null") {
            return Resolution::Masked;
        }

        let next = if target.is_absolute() {
            let relative = target.strip_prefix("/").expect("absolute path");
            lexical_clean(&root.join(relative))
        } else {
            let parent = current.parent().unwrap_or(root);
            lexical_clean(&parent.join(&target))
        };

        if !next.starts_with(root) {
            return Resolution::Escaping;
        }

        current = next;
    }

    debug!("Symlink chain at {path:?} exceeds {SYMLINK_HOP_LIMIT} hops");
    Resolution::Dangling
}

/// Lexically normalizes a path: drops `.` elements and resolves `..`
/// against the preceding component. Symlinks are not followed here.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::with_capacity(path.as_os_str().len());

    for element in path.components() {
        if element.as_os_str().is_empty() || element.as_os_str() == "." {
            continue;
        } else if element.as_os_str() == ".." {
            if normalized.components().count() > 0 {
                normalized.pop();
            } else {
                normalized.push(element);
            }
        } else {
            normalized.push(element);
        }
    }

    normalized
}
