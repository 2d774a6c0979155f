//! New-root usability checks.
//!
//! A directory is usable as a new root when the essential directory
//! skeleton is present and at least one shell or init binary exists.

use std::path::Path;

/// Directories that must exist; each missing one is an error.
const ESSENTIAL_DIRS: [&str; 5] = ["bin", "lib", "dev", "proc", "sys"];

/// Directories that should exist; each missing one is a warning.
const RECOMMENDED_DIRS: [&str; 6] = ["etc", "tmp", "var", "usr", "sbin", "run"];

/// At least one of these must exist and be a file.
const ESSENTIAL_EXECUTABLES: [&str; 4] = ["bin/sh", "bin/bash", "sbin/init", "usr/bin/sh"];

/// Outcome of a root filesystem verification.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Verify that `path` is usable as a new root.
pub fn verify(path: &Path) -> VerifyReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !path.is_dir() {
        errors.push(format!("{} is not a directory", path.display()));
        return VerifyReport {
            valid: false,
            errors,
            warnings,
        };
    }

    for dir in ESSENTIAL_DIRS {
        if !path.join(dir).is_dir() {
            errors.push(format!("missing essential directory: {dir}"));
        }
    }

    for dir in RECOMMENDED_DIRS {
        if !path.join(dir).is_dir() {
            warnings.push(format!("missing recommended directory: {dir}"));
        }
    }

    if !has_essential_executable(path) {
        errors.push(format!(
            "no shell or init found (looked for {})",
            ESSENTIAL_EXECUTABLES.join(", ")
        ));
    }

    VerifyReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Quick predicate: all essential directories exist and at least one
/// essential executable exists.
pub fn is_valid(path: &Path) -> bool {
    ESSENTIAL_DIRS.iter().all(|dir| path.join(dir).is_dir()) && has_essential_executable(path)
}

fn has_essential_executable(path: &Path) -> bool {
    ESSENTIAL_EXECUTABLES
        .iter()
        .any(|exe| path.join(exe).is_file())
}
