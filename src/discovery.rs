//
// discovery.rs
// dicom-deid
//
// Expands the user's sources (files, directories, glob patterns) into a lazy sequence of file paths.
//
// dicom-deid contributors - October 2026

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{DeidError, Result};

/// Lazily yields every file reachable from `sources`, in source order.
///
/// Files yield themselves, directories are walked recursively (sorted by file
/// name so reruns see the same order), anything else is treated as a glob.
pub fn discover<'a>(sources: &'a [String]) -> impl Iterator<Item = Result<PathBuf>> + 'a {
    sources.iter().flat_map(|source| expand_source(source))
}

fn expand_source(source: &str) -> Box<dyn Iterator<Item = Result<PathBuf>>> {
    let path = Path::new(source);
    if path.is_file() {
        return Box::new(std::iter::once(Ok(path.to_path_buf())));
    }
    if path.is_dir() {
        return walk_dir(path);
    }

    match glob::glob(source) {
        Ok(paths) => Box::new(paths.flat_map(|entry| match entry {
            Ok(matched) if matched.is_dir() => walk_dir(&matched),
            Ok(matched) => Box::new(std::iter::once(Ok(matched))),
            Err(e) => {
                let context = format!("reading {}", e.path().display());
                let source = io::Error::new(e.error().kind(), e.error().to_string());
                Box::new(std::iter::once(Err(DeidError::io(context, source))))
            }
        })),
        Err(e) => Box::new(std::iter::once(Err(DeidError::InvalidArgument(format!(
            "invalid source pattern {source:?}: {e}"
        ))))),
    }
}

fn walk_dir(dir: &Path) -> Box<dyn Iterator<Item = Result<PathBuf>>> {
    Box::new(
        WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_file() => Some(Ok(e.into_path())),
                Ok(_) => None,
                Err(e) => {
                    let context = match e.path() {
                        Some(p) => format!("walking {}", p.display()),
                        None => "walking source directory".to_string(),
                    };
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop detected"));
                    Some(Err(DeidError::io(context, source)))
                }
            }),
    )
}
