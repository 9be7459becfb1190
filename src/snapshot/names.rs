use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// The unit-type tag carried by every canonical name's suffix.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UnitType {
    Service,
    Socket,
    Device,
    Mount,
    Automount,
    Swap,
    Target,
    Path,
    Timer,
    Slice,
    Scope,
}

impl UnitType {
    pub(crate) const ALL: [UnitType; 11] = [
        UnitType::Service,
        UnitType::Socket,
        UnitType::Device,
        UnitType::Mount,
        UnitType::Automount,
        UnitType::Swap,
        UnitType::Target,
        UnitType::Path,
        UnitType::Timer,
        UnitType::Slice,
        UnitType::Scope,
    ];

    pub(crate) fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == suffix)
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            UnitType::Service => "service",
            UnitType::Socket => "socket",
            UnitType::Device => "device",
            UnitType::Mount => "mount",
            UnitType::Automount => "automount",
            UnitType::Swap => "swap",
            UnitType::Target => "target",
            UnitType::Path => "path",
            UnitType::Timer => "timer",
            UnitType::Slice => "slice",
            UnitType::Scope => "scope",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub(crate) enum NameError {
    #[error("{0:?} is not a valid unit name")]
    InvalidName(String),
    #[error("{0:?} has no recognized unit-type suffix")]
    UnknownType(String),
}

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9:._\\-]+(@[A-Za-z0-9:._\\-]*)?\.[a-z]+$").unwrap()
});

/// A parsed canonical unit name: `<prefix>[@<instance>].<type>`.
///
/// `instance` is `None` for plain units, `Some("")` for templates
/// (`foo@.service`) and non-empty for template instances.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct UnitName {
    pub(crate) prefix: String,
    pub(crate) instance: Option<String>,
    pub(crate) unit_type: UnitType,
}

impl UnitName {
    pub(crate) fn parse(name: &str) -> Result<Self, NameError> {
        if !NAME_RE.is_match(name) {
            return Err(NameError::InvalidName(name.into()));
        }

        let (stem, suffix) = name
            .rsplit_once('.')
            .ok_or_else(|| NameError::InvalidName(name.into()))?;
        let unit_type = UnitType::from_suffix(suffix)
            .ok_or_else(|| NameError::UnknownType(name.into()))?;

        let (prefix, instance) = match stem.split_once('@') {
            Some((prefix, instance)) if !prefix.is_empty() => {
                (prefix.to_string(), Some(instance.to_string()))
            }
            Some(_) => return Err(NameError::InvalidName(name.into())),
            None => (stem.to_string(), None),
        };

        Ok(UnitName {
            prefix,
            instance,
            unit_type,
        })
    }

    pub(crate) fn is_template(&self) -> bool {
        matches!(self.instance.as_deref(), Some(""))
    }

    pub(crate) fn is_instance(&self) -> bool {
        matches!(self.instance.as_deref(), Some(i) if !i.is_empty())
    }

    /// The template that would generate this instance, e.g.
    /// `getty@tty1.service` -> `getty@.service`.
    pub(crate) fn template(&self) -> Option<UnitName> {
        if !self.is_instance() {
            return None;
        }

        Some(UnitName {
            prefix: self.prefix.clone(),
            instance: Some(String::new()),
            unit_type: self.unit_type,
        })
    }

    /// `prefix@instance` without the type suffix (the `%N` specifier).
    pub(crate) fn stem(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}@{}", self.prefix, instance),
            None => self.prefix.clone(),
        }
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stem(), self.unit_type)
    }
}

/// Decodes a mount/swap/slice unit prefix into the filesystem path it stands
/// for: `-` separates path components, `\xHH` encodes reserved bytes.
/// `var-log` becomes `/var/log`; the bare `-` stands for `/`.
pub(crate) fn unescape_unit_prefix(prefix: &str) -> String {
    if prefix == "-" {
        return "/".to_string();
    }

    let mut path = String::with_capacity(prefix.len() + 1);
    path.push('/');

    let mut chars = prefix.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '-' => path.push('/'),
            '\\' if chars.peek() == Some(&'x') => {
                chars.next();
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) => path.push(byte as char),
                    Err(_) => {
                        path.push_str("\\x");
                        path.push_str(&hex);
                    }
                }
            }
            c => path.push(c),
        }
    }

    path
}

/// The inverse of [`unescape_unit_prefix`]: encodes an absolute path as a
/// unit-name prefix, e.g. `/dev/sda1` becomes `dev-sda1`.
pub(crate) fn escape_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return "-".to_string();
    }

    let mut prefix = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '/' => prefix.push('-'),
            c if c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.') => prefix.push(c),
            c => {
                for byte in c.to_string().as_bytes() {
                    prefix.push_str(&format!("\\x{byte:02x}"));
                }
            }
        }
    }

    prefix
}

/// Decodes `\xHH` escapes in an instance string (the `%I` specifier).
pub(crate) fn unescape_instance(instance: &str) -> String {
    let mut out = String::with_capacity(instance.len());

    let mut chars = instance.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'x') {
            chars.next();
            let hex: String = chars.by_ref().take(2).collect();
            match u8::from_str_radix(&hex, 16) {
                Ok(byte) => out.push(byte as char),
                Err(_) => {
                    out.push_str("\\x");
                    out.push_str(&hex);
                }
            }
        } else {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parse {
        use super::*;

        #[test]
        fn plain_unit() {
            let name = UnitName::parse("sshd.service").unwrap();

            assert_eq!(name.prefix, "sshd");
            assert_eq!(name.instance, None);
            assert_eq!(name.unit_type, UnitType::Service);
            assert!(!name.is_template());
            assert!(!name.is_instance());
            assert_eq!(name.to_string(), "sshd.service");
        }

        #[test]
        fn template_unit() {
            let name = UnitName::parse("getty@.service").unwrap();

            assert_eq!(name.prefix, "getty");
            assert_eq!(name.instance.as_deref(), Some(""));
            assert!(name.is_template());
            assert!(!name.is_instance());
        }

        #[test]
        fn instance_unit() {
            let name = UnitName::parse("getty@tty1.service").unwrap();

            assert_eq!(name.prefix, "getty");
            assert_eq!(name.instance.as_deref(), Some("tty1"));
            assert!(name.is_instance());
            assert_eq!(
                name.template().unwrap().to_string(),
                "getty@.service",
            );
        }

        #[test]
        fn every_known_type_parses() {
            for t in UnitType::ALL {
                let name = UnitName::parse(&format!("x.{t}")).unwrap();
                assert_eq!(name.unit_type, t);
            }
        }

        #[test]
        fn unknown_suffix_is_rejected() {
            assert_eq!(
                UnitName::parse("foo.container"),
                Err(NameError::UnknownType("foo.container".into())),
            );
        }

        #[test]
        fn no_suffix_is_rejected() {
            assert!(UnitName::parse("foo").is_err());
        }

        #[test]
        fn empty_prefix_is_rejected() {
            assert!(UnitName::parse("@tty1.service").is_err());
            assert!(UnitName::parse(".service").is_err());
        }

        #[test]
        fn whitespace_is_rejected() {
            assert!(UnitName::parse("foo bar.service").is_err());
        }

        #[test]
        fn root_slice_parses() {
            let name = UnitName::parse("-.slice").unwrap();
            assert_eq!(name.prefix, "-");
            assert_eq!(name.unit_type, UnitType::Slice);
        }
    }

    mod unescape_unit_prefix {
        use super::*;

        #[test]
        fn dashes_become_separators() {
            assert_eq!(unescape_unit_prefix("var-log"), "/var/log");
            assert_eq!(unescape_unit_prefix("var"), "/var");
        }

        #[test]
        fn root_is_a_single_dash() {
            assert_eq!(unescape_unit_prefix("-"), "/");
        }

        #[test]
        fn hex_escapes_decode() {
            assert_eq!(unescape_unit_prefix("mnt-a\\x2db"), "/mnt/a-b");
        }

        #[test]
        fn round_trips_with_escape_path() {
            for path in ["/var/log", "/dev/sda1", "/", "/mnt/a-b"] {
                assert_eq!(unescape_unit_prefix(&escape_path(path)), path, "{path}");
            }
        }
    }

    mod escape_path {
        use super::*;

        #[test]
        fn device_paths() {
            assert_eq!(escape_path("/dev/sda1"), "dev-sda1");
            assert_eq!(escape_path("/dev/mapper/root"), "dev-mapper-root");
        }

        #[test]
        fn reserved_bytes_are_hex_escaped() {
            assert_eq!(escape_path("/mnt/a-b"), "mnt-a\\x2db");
        }
    }

    mod unescape_instance {
        use super::*;

        #[test]
        fn literal_instance_is_unchanged() {
            assert_eq!(unescape_instance("tty1"), "tty1");
        }

        #[test]
        fn hex_escapes_decode() {
            assert_eq!(unescape_instance("a\\x20b"), "a b");
        }

        #[test]
        fn truncated_escape_is_kept_verbatim() {
            assert_eq!(unescape_instance("a\\x2"), "a\\x2");
        }
    }
}
