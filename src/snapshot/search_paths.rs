use std::fs;
use std::path::{Path, PathBuf};

/// System-scope unit search paths under `root`, highest precedence first.
///
/// `lib/systemd/system` is only searched when it is a directory distinct
/// from `usr/lib/systemd/system` (on merged-/usr images it is a symlink).
/// Generator output directories are deliberately absent: a firmware image
/// cannot run its generators, so there is nothing to enumerate there.
pub(crate) fn search_paths(root: &Path) -> Vec<PathBuf> {
    let mut paths = vec![
        root.join("etc/systemd/system"),
        root.join("run/systemd/system"),
        root.join("usr/local/lib/systemd/system"),
        root.join("usr/lib/systemd/system"),
    ];

    let lib = root.join("lib/systemd/system");
    let usr_lib_canonical = fs::canonicalize(root.join("usr/lib/systemd/system")).ok();
    match fs::canonicalize(&lib) {
        Ok(canonical) if Some(&canonical) == usr_lib_canonical.as_ref() => {}
        Ok(_) => paths.push(lib),
        // nonexistent paths are skipped at walk time anyway
        Err(_) => paths.push(lib),
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_order() {
        let paths = search_paths(Path::new("/fx"));

        assert_eq!(paths[0], PathBuf::from("/fx/etc/systemd/system"));
        assert_eq!(paths[1], PathBuf::from("/fx/run/systemd/system"));
        assert_eq!(paths[2], PathBuf::from("/fx/usr/local/lib/systemd/system"));
        assert_eq!(paths[3], PathBuf::from("/fx/usr/lib/systemd/system"));
    }

    #[test]
    fn lib_is_kept_when_nothing_exists() {
        // neither lib nor usr/lib resolve, so lib stays as a candidate
        let paths = search_paths(Path::new("/nonexistent-root"));

        assert!(paths.contains(&PathBuf::from("/nonexistent-root/lib/systemd/system")));
    }

    #[test]
    fn lib_symlinked_to_usr_lib_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/lib/systemd/system")).unwrap();
        std::os::unix::fs::symlink(root.join("usr/lib"), root.join("lib")).unwrap();

        let paths = search_paths(root);

        assert!(!paths.contains(&root.join("lib/systemd/system")));
    }

    #[test]
    fn distinct_lib_is_searched_last() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/lib/systemd/system")).unwrap();
        fs::create_dir_all(root.join("lib/systemd/system")).unwrap();

        let paths = search_paths(root);

        assert_eq!(paths.last(), Some(&root.join("lib/systemd/system")));
    }
}
