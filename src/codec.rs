//
// codec.rs
// dicom-deid
//
// Reads and writes DICOM Part 10 records, classifying non-DICOM inputs as not applicable.
//
// dicom-deid contributors - October 2026

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use dicom::object::{open_file, DefaultDicomObject};

use crate::error::{DeidError, Result};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// Opens `path` as a DICOM file.
///
/// Files without the Part 10 preamble and `DICM` magic are
/// [`DeidError::NotApplicable`]; files that carry the magic but fail to parse
/// are real errors.
pub fn read_record(path: &Path) -> Result<DefaultDicomObject> {
    if !has_dicom_magic(path)? {
        return Err(DeidError::NotApplicable {
            path: path.to_path_buf(),
            reason: "missing DICM preamble".into(),
        });
    }
    open_file(path).map_err(|e| DeidError::processing(path, "failed to parse DICOM file", e))
}

/// Writes the record next to `destination` first and renames it into place,
/// so an interrupted write never leaves a truncated file under the final name.
pub fn write_record(obj: &DefaultDicomObject, destination: &Path) -> Result<()> {
    let partial = partial_path(destination);
    obj.write_to_file(&partial)
        .map_err(|e| DeidError::processing(destination, "failed to write DICOM file", e))?;
    fs::rename(&partial, destination)
        .map_err(|e| DeidError::io(format!("moving output to {}", destination.display()), e))
}

fn has_dicom_magic(path: &Path) -> Result<bool> {
    let context = || format!("reading {}", path.display());
    let file = File::open(path).map_err(|e| DeidError::io(context(), e))?;

    let mut header = Vec::with_capacity(PREAMBLE_LEN + MAGIC.len());
    file.take((PREAMBLE_LEN + MAGIC.len()) as u64)
        .read_to_end(&mut header)
        .map_err(|e| DeidError::io(context(), e))?;

    Ok(header.len() == PREAMBLE_LEN + MAGIC.len() && &header[PREAMBLE_LEN..] == MAGIC)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    destination.with_file_name(name)
}
