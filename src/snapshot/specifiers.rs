use std::collections::BTreeSet;

use super::names::{unescape_instance, UnitName};
use super::record::{Warning, WarningKind};
use crate::systemd_unit::SystemdUnitData;

/// Substitutes specifiers in every directive of an instantiated unit.
/// Runs after drop-in merging, so overrides referencing `%i` still expand.
/// Unknown specifiers stay verbatim and are reported once per character.
pub(crate) fn expand_instance(data: &mut SystemdUnitData, name: &UnitName) -> Vec<Warning> {
    let mut unknown = BTreeSet::new();

    data.map_values(|raw| {
        if raw.contains('%') {
            *raw = expand_str(raw, name, &mut unknown);
        }
    });

    unknown
        .into_iter()
        .map(|c| {
            Warning::new(
                WarningKind::UnknownSpecifier,
                format!("unknown specifier %{c} in {name} left verbatim"),
            )
        })
        .collect()
}

fn expand_str(s: &str, name: &UnitName, unknown: &mut BTreeSet<char>) -> String {
    let instance = name.instance.as_deref().unwrap_or_default();

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('i') => out.push_str(instance),
            Some('I') => out.push_str(&unescape_instance(instance)),
            Some('n') => out.push_str(&name.to_string()),
            Some('N') => out.push_str(&name.stem()),
            Some('p') => out.push_str(&name.prefix),
            Some('f') => {
                out.push('/');
                out.push_str(&unescape_instance(instance));
            }
            Some('%') => out.push('%'),
            Some(c) => {
                unknown.insert(c);
                out.push('%');
                out.push(c);
            }
            None => out.push('%'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str) -> UnitName {
        UnitName::parse(name).unwrap()
    }

    fn expand(raw: &str, name: &str) -> (String, Vec<Warning>) {
        let mut data =
            SystemdUnitData::load_from_str(&format!("[Service]\nExecStart={raw}\n")).unwrap();
        let warnings = expand_instance(&mut data, &instance(name));
        (data.lookup_last("Service", "ExecStart").unwrap(), warnings)
    }

    mod expand_instance {
        use super::*;

        #[test]
        fn instance_specifier() {
            let (value, warnings) = expand("/sbin/agetty %i", "getty@tty1.service");

            assert_eq!(value, "/sbin/agetty tty1");
            assert!(warnings.is_empty());
        }

        #[test]
        fn decoded_instance_specifier() {
            let (value, _) = expand("/bin/run %I", "job@a\\x20b.service");

            assert_eq!(value, "/bin/run a b");
        }

        #[test]
        fn name_specifiers() {
            let (value, _) = expand("%n|%N|%p", "getty@tty1.service");

            assert_eq!(value, "getty@tty1.service|getty@tty1|getty");
        }

        #[test]
        fn instance_as_path() {
            let (value, _) = expand("--where %f", "mnt@opt\\x2ddata.service");

            assert_eq!(value, "--where /opt-data");
        }

        #[test]
        fn escaped_percent() {
            let (value, warnings) = expand("load %% now", "getty@tty1.service");

            assert_eq!(value, "load % now");
            assert!(warnings.is_empty());
        }

        #[test]
        fn unknown_specifier_stays_verbatim_and_warns() {
            let (value, warnings) = expand("run %z %z", "getty@tty1.service");

            assert_eq!(value, "run %z %z");
            assert_eq!(warnings.len(), 1);
            assert_eq!(warnings[0].kind, WarningKind::UnknownSpecifier);
        }

        #[test]
        fn trailing_percent_is_kept() {
            let (value, warnings) = expand("odd%", "getty@tty1.service");

            assert_eq!(value, "odd%");
            assert!(warnings.is_empty());
        }

        #[test]
        fn values_without_percent_are_untouched() {
            let (value, warnings) = expand("/bin/plain", "getty@tty1.service");

            assert_eq!(value, "/bin/plain");
            assert!(warnings.is_empty());
        }
    }
}
