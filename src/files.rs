//! Ambient-authority file helpers built on `cap-std`.
//!
//! Each helper opens the parent directory of the target path and performs the
//! operation relative to it, returning a plain error message so callers can
//! wrap it in their own error type.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path}"))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    Ok((parent, file_name))
}

/// Returns `true` when `path` exists. A missing parent directory counts as
/// absent.
///
/// # Errors
///
/// Returns a message when the parent exists but cannot be inspected.
pub fn exists(path: &Utf8Path) -> Result<bool, String> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name).map_err(|err| err.to_string()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.to_string()),
    }
}

/// Reads `path` into a string.
///
/// # Errors
///
/// Returns a message when the file cannot be opened or read.
pub fn read_to_string(path: &Utf8Path) -> Result<String, String> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}

/// Writes `contents` to `path`, creating parent directories first.
///
/// # Errors
///
/// Returns a message when directories cannot be created or the write fails.
pub fn write(path: &Utf8Path, contents: &str) -> Result<(), String> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| err.to_string())?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.write(file_name, contents).map_err(|err| err.to_string())
}

/// Creates `path` and any missing ancestors.
///
/// # Errors
///
/// Returns a message when creation fails.
pub fn create_dir_all(path: &Utf8Path) -> Result<(), String> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| err.to_string())
}

/// Creates the parent directory of `path` when it has one.
///
/// # Errors
///
/// Returns a message when creation fails.
pub fn create_parent_dir(path: &Utf8Path) -> Result<(), String> {
    let (parent, _) = split(path)?;
    create_dir_all(parent)
}

/// Removes a single file.
///
/// # Errors
///
/// Returns a message when the file cannot be removed.
pub fn remove_file(path: &Utf8Path) -> Result<(), String> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.remove_file(file_name).map_err(|err| err.to_string())
}

/// Recursively removes a directory. A directory that is already gone is not
/// an error.
///
/// # Errors
///
/// Returns a message when removal fails.
pub fn remove_dir_all(path: &Utf8Path) -> Result<(), String> {
    let (parent, name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.to_string()),
    };
    match dir.remove_dir_all(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}
