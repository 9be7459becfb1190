mod snapshot;
mod systemd_unit;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::debug;

use crate::snapshot::logger::StderrLogger;
use crate::snapshot::{
    build_master, resolve, DmDocument, Error, MsDocument, DEFAULT_TARGET, TOOL_VERSION,
};

#[derive(Clone, Copy, Debug, PartialEq)]
enum Action {
    Master,
    Deps,
    Both,
}

#[derive(Debug)]
struct Config {
    action: Action,
    root_path: PathBuf,
    ms_path: Option<PathBuf>,
    target_unit: String,
    depth_limit: Option<usize>,
    force_overwrite: bool,
    verbose: bool,
    version: bool,
    output_prefix: String,
}

fn help() {
    println!(
        "Usage:
systemd-snapshot --version
systemd-snapshot [OPTIONS] ACTION PREFIX

Snapshots a Systemd unit tree into a master structure (MS) and resolves
its dependency map (DM), without ever executing the target.

Actions:
  master    build the MS from a filesystem root, write <PREFIX>_ms.json
  deps      resolve the DM from an existing MS file, write <PREFIX>_dm.json
  both      build the MS, resolve the DM, write both artifacts

Options:
  --root DIR     filesystem root to crawl (default: /)
  --ms FILE      MS JSON input for the deps action
  --unit NAME    root unit for dependency resolution (default: default.target)
  --depth N      bound the resolution depth (default: unbounded)
  -f, --force    overwrite existing artifact files
  -v, --verbose  debug logging"
    );
}

fn parse_args(args: Vec<String>) -> Result<Config, String> {
    let mut cfg = Config {
        action: Action::Both,
        root_path: PathBuf::from("/"),
        ms_path: None,
        target_unit: DEFAULT_TARGET.to_string(),
        depth_limit: None,
        force_overwrite: false,
        verbose: false,
        version: false,
        output_prefix: String::new(),
    };

    let mut positionals: Vec<String> = Vec::new();
    let mut iter = args.into_iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut take_value = |flag: &str| {
            iter.next().ok_or_else(|| format!("{flag} needs a value"))
        };

        match arg.as_str() {
            "-v" | "--verbose" => cfg.verbose = true,
            "-f" | "--force" => cfg.force_overwrite = true,
            "--version" => cfg.version = true,
            "--root" => cfg.root_path = PathBuf::from(take_value("--root")?),
            "--ms" => cfg.ms_path = Some(PathBuf::from(take_value("--ms")?)),
            "--unit" => cfg.target_unit = take_value("--unit")?,
            "--depth" => {
                let value = take_value("--depth")?;
                let depth: usize = value
                    .parse()
                    .map_err(|_| format!("invalid depth: {value}"))?;
                cfg.depth_limit = Some(depth);
            }
            flag if flag.starts_with('-') => return Err(format!("Unknown argument: {flag}")),
            _ => positionals.push(arg),
        }
    }

    if cfg.version {
        return Ok(cfg);
    }

    let [action, prefix]: [String; 2] = positionals
        .try_into()
        .map_err(|_| "expected exactly ACTION and PREFIX".to_string())?;

    cfg.action = match action.as_str() {
        "master" => Action::Master,
        "deps" => Action::Deps,
        "both" => Action::Both,
        other => return Err(format!("Unknown action: {other}")),
    };

    if cfg.action == Action::Deps && cfg.ms_path.is_none() {
        return Err("the deps action needs --ms FILE".to_string());
    }
    if prefix.is_empty() {
        return Err("PREFIX must not be empty".to_string());
    }
    cfg.output_prefix = prefix;

    Ok(cfg)
}

fn write_artifact(path: &Path, contents: &str, force_overwrite: bool) -> Result<(), Error> {
    if path.exists() && !force_overwrite {
        return Err(Error::OutputCollision(path.to_path_buf()));
    }

    debug!("Writing {path:?}");
    fs::write(path, contents)?;
    Ok(())
}

fn run(cfg: &Config) -> Result<(), Error> {
    let ms_out = PathBuf::from(format!("{}_ms.json", cfg.output_prefix));
    let dm_out = PathBuf::from(format!("{}_dm.json", cfg.output_prefix));

    match cfg.action {
        Action::Master => {
            let ms = build_master(&cfg.root_path, None)?;
            write_artifact(&ms_out, &ms.to_json()?, cfg.force_overwrite)?;
        }
        Action::Deps => {
            let ms_path = cfg.ms_path.as_deref().expect("checked during parsing");
            let ms = MsDocument::load_from_path(ms_path)?;
            let dm: DmDocument = resolve(&ms, &cfg.target_unit, cfg.depth_limit)?;
            write_artifact(&dm_out, &dm.to_json()?, cfg.force_overwrite)?;
        }
        Action::Both => {
            let ms = build_master(&cfg.root_path, None)?;
            write_artifact(&ms_out, &ms.to_json()?, cfg.force_overwrite)?;
            let dm = resolve(&ms, &cfg.target_unit, cfg.depth_limit)?;
            write_artifact(&dm_out, &dm.to_json()?, cfg.force_overwrite)?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let cfg = match parse_args(args) {
        Ok(cfg) => cfg,
        Err(msg) => {
            eprintln!("Error: {msg}");
            help();
            return ExitCode::from(1);
        }
    };

    let mut logger = StderrLogger::from_env();
    logger.debug_enabled |= cfg.verbose;
    let _ = logger.init();

    if cfg.version {
        println!("systemd-snapshot {TOOL_VERSION}");
        return ExitCode::SUCCESS;
    }

    match run(&cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("systemd-snapshot: {e}");
            ExitCode::from(2)
        }
    }
}
