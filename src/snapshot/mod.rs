mod discovery;
mod dropins;
mod enrich;
mod implicit;
pub(crate) mod logger;
mod master;
mod names;
mod record;
mod relations;
mod resolver;
mod search_paths;
mod specifiers;

pub(crate) use self::master::{build_master, MsDocument};
pub(crate) use self::resolver::{resolve, DmDocument};

use std::io;
use std::path::PathBuf;
use std::process::Command;

pub(crate) const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const DEFAULT_TARGET: &str = "default.target";

/// Emitted into every artifact's meta block: generators cannot run against
/// an offline image, so their output directories are never part of the walk.
pub(crate) const GENERATOR_WARNING: &str =
    "units produced by generators under /run/systemd/generator* are not enumerated; \
     generators cannot run against an offline unit tree";

/// Fatal errors that abort a run. Everything recoverable travels as
/// per-unit warnings instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot access snapshot root {0:?}: {1}")]
    RootInaccessible(PathBuf, #[source] io::Error),
    #[error("root unit {0:?} not found in master structure")]
    RootNotFound(String),
    #[error("output file {0:?} already exists and overwriting is disabled")]
    OutputCollision(PathBuf),
    #[error("malformed master-structure input: {0}")]
    MalformedMsInput(String),
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Current UTC time, ISO 8601. Shells out to `date` so the binary stays
/// free of a calendar dependency; falls back to "unknown" in odd
/// environments.
pub(crate) fn iso8601_now() -> String {
    let output = Command::new("date")
        .arg("-u")
        .arg("+%Y-%m-%dT%H:%M:%SZ")
        .output()
        .ok();

    output
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
