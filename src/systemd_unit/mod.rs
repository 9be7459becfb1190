mod parser;
mod unit_data;
mod unit_file;

pub(crate) use self::unit_data::SystemdUnitData;
pub(crate) use self::unit_file::SystemdUnitFile;

pub(crate) const UNIT_SECTION: &str = "Unit";
pub(crate) const INSTALL_SECTION: &str = "Install";
pub(crate) const SERVICE_SECTION: &str = "Service";
pub(crate) const SOCKET_SECTION: &str = "Socket";
pub(crate) const MOUNT_SECTION: &str = "Mount";
pub(crate) const AUTOMOUNT_SECTION: &str = "Automount";
pub(crate) const SWAP_SECTION: &str = "Swap";
pub(crate) const PATH_SECTION: &str = "Path";
pub(crate) const TIMER_SECTION: &str = "Timer";

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("directive on line {0} appears before any section header")]
    DirectiveOutsideSection(usize),
    #[error("line {0}: malformed section header {1:?}")]
    MalformedSectionHeader(usize, String),
    #[error("line {0}: expected `key=value`, got {1:?}")]
    MalformedDirective(usize, String),
    #[error("unit file ends inside a line continuation")]
    DanglingContinuation,
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    if ["1", "yes", "true", "on"].contains(&s) {
        Some(true)
    } else if ["0", "no", "false", "off"].contains(&s) {
        Some(false)
    } else {
        None
    }
}

/// Splits a space-separated directive value (e.g. `Wants=a.service b.service`)
/// into its entries. Unit names cannot contain whitespace, so no quoting rules
/// apply here.
pub(crate) fn split_strv(value: &str) -> impl Iterator<Item = &str> {
    value.split_ascii_whitespace()
}

/// First word of a command line, with Systemd's executable prefix
/// characters (`-`, `@`, `:`, `+`, `!`) stripped.
pub(crate) fn exec_path(command_line: &str) -> Option<&str> {
    let word = command_line.split_ascii_whitespace().next()?;
    let path = word.trim_start_matches(['-', '@', ':', '+', '!']);
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parse_bool {
        use super::*;

        #[test]
        fn truthy_values() {
            for v in ["1", "yes", "true", "on"] {
                assert_eq!(parse_bool(v), Some(true), "{v:?}");
            }
        }

        #[test]
        fn falsy_values() {
            for v in ["0", "no", "false", "off"] {
                assert_eq!(parse_bool(v), Some(false), "{v:?}");
            }
        }

        #[test]
        fn everything_else_is_none() {
            for v in ["", "Yes", "ON", "2", "maybe"] {
                assert_eq!(parse_bool(v), None, "{v:?}");
            }
        }
    }

    mod split_strv {
        use super::*;

        #[test]
        fn splits_on_any_whitespace() {
            let values: Vec<&str> = split_strv("a.service  b.service\tc.target").collect();
            assert_eq!(values, vec!["a.service", "b.service", "c.target"]);
        }

        #[test]
        fn empty_value_yields_nothing() {
            assert_eq!(split_strv("").count(), 0);
            assert_eq!(split_strv("   ").count(), 0);
        }
    }

    mod exec_path {
        use super::*;

        #[test]
        fn plain_command() {
            assert_eq!(exec_path("/bin/a --flag"), Some("/bin/a"));
        }

        #[test]
        fn strips_prefix_characters() {
            assert_eq!(exec_path("-/usr/bin/rm -f /run/foo.pid"), Some("/usr/bin/rm"));
            assert_eq!(exec_path("@/sbin/agetty tty1"), Some("/sbin/agetty"));
            assert_eq!(exec_path("!!/bin/b"), Some("/bin/b"));
        }

        #[test]
        fn empty_command_line() {
            assert_eq!(exec_path(""), None);
            assert_eq!(exec_path("   "), None);
        }
    }
}
