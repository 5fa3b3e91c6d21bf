//! Discovery of extraction-service descriptors from manifest files.
//!
//! A manifest is a plain-text file whose name ends in `.is`: the first line
//! is the service identifier, each following line one lowercase file
//! extension (no leading dot). Manifests are discovered by recursively
//! scanning a directory tree; malformed or unreadable manifests are skipped
//! with a warning, never fatal.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{IndexError, Result};

/// File-name suffix that marks a service manifest.
pub const MANIFEST_SUFFIX: &str = ".is";

/// One extraction service: its name and the extensions it can parse.
///
/// Immutable after load; owned exclusively by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    extensions: Vec<String>,
}

impl ServiceDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Case-insensitive extension membership check.
    pub fn supports_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }
}

/// Registry of discovered extraction services, looked up by extension.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Scans `root` recursively for manifest files and loads every
    /// well-formed descriptor found. Unreadable directories and malformed
    /// manifests are logged and skipped.
    pub fn discover(root: &Path) -> Self {
        let mut services = Vec::new();
        scan_directory(root, &mut services);
        log::info!(
            "service registry loaded {} descriptor(s) from {}",
            services.len(),
            root.display()
        );
        Self { services }
    }

    #[cfg(test)]
    pub(crate) fn from_descriptors(services: Vec<ServiceDescriptor>) -> Self {
        Self { services }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Finds the service claiming `ext`, case-insensitively.
    ///
    /// If multiple descriptors claim the same extension, the last one
    /// scanned wins.
    pub fn match_extension(&self, ext: &str) -> Option<&ServiceDescriptor> {
        self.services
            .iter()
            .rev()
            .find(|service| service.supports_extension(ext))
    }

    /// Matches a file path by its extension, if it has one.
    pub fn match_path(&self, path: &Path) -> Option<&ServiceDescriptor> {
        let ext = path.extension()?.to_str()?;
        self.match_extension(ext)
    }
}

fn scan_directory(dir: &Path, services: &mut Vec<ServiceDescriptor>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            log::warn!(
                "service scan skipping unreadable directory {}: {}",
                dir.display(),
                error
            );
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_directory(&path, services);
        } else if is_manifest(&path) {
            match parse_manifest(&path) {
                Ok(service) => {
                    log::info!(
                        "found service {:?} handling {:?}",
                        service.name,
                        service.extensions
                    );
                    services.push(service);
                }
                Err(error) => {
                    log::warn!("skipping manifest {}: {}", path.display(), error);
                }
            }
        }
    }
}

fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(MANIFEST_SUFFIX))
}

/// Parses one manifest file: line 1 = service name, rest = extensions.
fn parse_manifest(path: &Path) -> Result<ServiceDescriptor> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut lines = reader.lines();
    let name = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(IndexError::ManifestParse {
                path: path.to_path_buf(),
                reason: "empty manifest".to_string(),
            })
        }
    };
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(IndexError::ManifestParse {
            path: path.to_path_buf(),
            reason: "blank service name".to_string(),
        });
    }
    let mut extensions = Vec::new();
    for line in lines {
        let ext = line?.trim().to_ascii_lowercase();
        if !ext.is_empty() {
            extensions.push(ext);
        }
    }
    Ok(ServiceDescriptor { name, extensions })
}
