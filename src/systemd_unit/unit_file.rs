use std::fs;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use super::unit_data::SystemdUnitData;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Unit(#[from] super::Error),
}

/// A parsed unit (or drop-in) file: its on-disk path plus directive data.
/// Every directive value is stamped with the file it came from, so merged
/// units keep per-value provenance.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SystemdUnitFile {
    path: PathBuf,
    data: SystemdUnitData,
}

impl Deref for SystemdUnitFile {
    type Target = SystemdUnitData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for SystemdUnitFile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl SystemdUnitFile {
    pub(crate) fn load_from_path(path: &Path) -> Result<Self, IoError> {
        let buf = fs::read_to_string(path)?;

        let mut data = SystemdUnitData::load_from_str(buf.as_str())?;
        data.set_source(path);

        Ok(SystemdUnitFile {
            path: path.into(),
            data,
        })
    }

    /// Appends `other`'s directives after this file's own, preserving
    /// `other`'s per-value sources. Drop-in layering is just repeated merging
    /// in precedence order.
    pub(crate) fn merge_from(&mut self, other: &SystemdUnitFile) {
        self.data.merge_from(&other.data);
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn into_data(self) -> SystemdUnitData {
        self.data
    }
}
