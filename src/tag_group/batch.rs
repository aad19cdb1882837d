use dicom_dictionary_std::tags;
use dicom_object::OpenFileOptions;
use log::{debug, warn};
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{resolve, Error, Result, TagGroup};

/// Options for [`parse_dir`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParseOptions {
    /// Look for files in subdirectories as well.
    pub recursive: bool,

    /// Fail on the first file that cannot be read as DICOM. By default such files are
    /// skipped with a warning.
    pub strict: bool,
}

/// The tags resolved from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub values: Map<String, Value>,
}

fn parse_file(path: &Path, group: &TagGroup) -> Result<Map<String, Value>> {
    let obj = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map_err(|e| Error::Read(format!("{}: {e}", path.display())))?;
    resolve(&obj, group)
}

/// Resolves a [`TagGroup`] against every DICOM file in a directory.
///
/// Files are processed in parallel; the result is sorted by path. Files that are not
/// DICOM are skipped unless [`ParseOptions::strict`] is set.
pub fn parse_dir(dir: &Path, group: &TagGroup, options: ParseOptions) -> Result<Vec<ParsedFile>> {
    if !dir.is_dir() {
        return Err(Error::Read(format!("{} is not a directory", dir.display())));
    }

    let mut walk_dir = WalkDir::new(dir);
    if !options.recursive {
        walk_dir = walk_dir.max_depth(1);
    }

    let parsed: Vec<Option<ParsedFile>> = walk_dir
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("{e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .par_bridge()
        .map(|path| match parse_file(&path, group) {
            Ok(values) => {
                debug!("parsed {}", path.display());
                Ok(Some(ParsedFile { path, values }))
            }
            Err(e @ Error::Read(_)) if !options.strict => {
                warn!("{e}");
                Ok(None)
            }
            Err(e) => Err(e),
        })
        .collect::<Result<_>>()?;

    let mut parsed: Vec<ParsedFile> = parsed.into_iter().flatten().collect();
    parsed.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(parsed)
}
