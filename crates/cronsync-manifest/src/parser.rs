//! Manifest tree parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use cronsync_protocols::{DEFAULT_NAMESPACE, JobManifest, Revision};

use crate::cron_expr::CronExpr;
use crate::document::{API_VERSION, KIND, ManifestDocument};
use crate::error::{DuplicateId, ParseError, ParseErrorKind, RevisionError};

const MAX_NAME_LEN: usize = 63;

/// Result of parsing one revision.
#[derive(Debug, Default)]
pub struct ParsedRevision {
    pub revision: String,
    /// Valid manifests, ordered by file path.
    pub manifests: Vec<JobManifest>,
    /// Files that were skipped.
    pub errors: Vec<ParseError>,
}

/// Parses every `*.yaml`/`*.yml` file under a revision root independently.
pub struct ManifestParser;

impl ManifestParser {
    /// Parse a revision tree.
    ///
    /// A malformed file is reported in [`ParsedRevision::errors`] and skipped.
    /// Two valid manifests sharing an id reject the whole revision.
    pub fn parse(revision: &Revision) -> Result<ParsedRevision, RevisionError> {
        let root = &revision.path;
        if !root.is_dir() {
            return Err(RevisionError::MissingRoot(root.clone()));
        }

        let mut manifests = Vec::new();
        let mut errors = Vec::new();

        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || !is_manifest_file(entry.path()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();

            match Self::parse_file(entry.path(), &relative, &revision.id) {
                Ok(manifest) => {
                    debug!(
                        "Parsed manifest {} ({}) from {}",
                        manifest.qualified_name(),
                        manifest.id,
                        relative.display()
                    );
                    manifests.push(manifest);
                }
                Err(kind) => {
                    let error = ParseError {
                        file: relative,
                        kind,
                    };
                    warn!("Skipping manifest: {}", error);
                    errors.push(error);
                }
            }
        }

        let duplicates = find_duplicates(&manifests);
        if !duplicates.is_empty() {
            for dup in &duplicates {
                warn!(
                    "Manifest id {} is used by {:?}",
                    dup.id,
                    dup.files
                );
            }
            return Err(RevisionError::DuplicateIds {
                revision: revision.id.clone(),
                duplicates,
            });
        }

        Ok(ParsedRevision {
            revision: revision.id.clone(),
            manifests,
            errors,
        })
    }

    /// Read and validate one file. `relative` is its path under the revision root.
    pub fn parse_file(
        path: &Path,
        relative: &Path,
        revision_id: &str,
    ) -> Result<JobManifest, ParseErrorKind> {
        let content = fs::read_to_string(path)?;
        Self::parse_str(&content, relative, revision_id)
    }

    /// Validate one document.
    pub fn parse_str(
        content: &str,
        relative: &Path,
        revision_id: &str,
    ) -> Result<JobManifest, ParseErrorKind> {
        let doc: ManifestDocument = serde_yml::from_str(content)?;

        let api_version = doc.api_version.ok_or(ParseErrorKind::MissingField("apiVersion"))?;
        if api_version != API_VERSION {
            return Err(ParseErrorKind::ApiVersion(api_version));
        }
        let kind = doc.kind.ok_or(ParseErrorKind::MissingField("kind"))?;
        if kind != KIND {
            return Err(ParseErrorKind::Kind(kind));
        }

        let meta = doc.metadata;
        let spec = doc.spec;

        let id_text = non_empty(meta.id).ok_or(ParseErrorKind::MissingField("metadata.id"))?;
        let id = Uuid::parse_str(&id_text).map_err(|e| ParseErrorKind::InvalidField {
            field: "metadata.id",
            reason: e.to_string(),
        })?;
        if id.is_nil() {
            return Err(ParseErrorKind::InvalidField {
                field: "metadata.id",
                reason: "nil UUID is reserved".to_string(),
            });
        }

        let name = non_empty(meta.name).ok_or(ParseErrorKind::MissingField("metadata.name"))?;
        check_identifier("metadata.name", &name)?;

        let namespace = match non_empty(meta.namespace) {
            Some(ns) => ns,
            None => namespace_from_path(relative),
        };
        check_identifier("metadata.namespace", &namespace)?;

        let schedule = non_empty(spec.schedule).ok_or(ParseErrorKind::MissingField("spec.schedule"))?;
        let schedule = CronExpr::parse(&schedule)?;

        let command = non_empty(spec.command).ok_or(ParseErrorKind::MissingField("spec.command"))?;
        check_single_line("spec.command", &command)?;
        for arg in &spec.args {
            check_single_line("spec.args", arg)?;
        }
        check_env(&spec.env)?;

        let timezone = non_empty(spec.timezone);

        Ok(JobManifest {
            id,
            name,
            namespace,
            schedule: schedule.as_str().to_string(),
            command,
            args: spec.args,
            env: spec.env,
            enabled: spec.enabled,
            paused: spec.paused,
            timezone,
            labels: meta.labels,
            revision: revision_id.to_string(),
            source_file: relative.to_path_buf(),
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First directory under the revision root, or the default namespace.
fn namespace_from_path(relative: &Path) -> String {
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(dir)), Some(_)) => dir.to_string_lossy().into_owned(),
        _ => DEFAULT_NAMESPACE.to_string(),
    }
}

/// Names end up in crontab markers and task paths.
fn check_identifier(field: &'static str, value: &str) -> Result<(), ParseErrorKind> {
    let invalid = |reason: &str| ParseErrorKind::InvalidField {
        field,
        reason: format!("'{}' {}", value, reason),
    };

    if value.len() > MAX_NAME_LEN {
        return Err(invalid("is longer than 63 characters"));
    }
    let mut chars = value.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid("must start with a letter or digit"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        return Err(invalid("may only contain letters, digits, '-', '_' and '.'"));
    }
    Ok(())
}

fn check_single_line(field: &'static str, value: &str) -> Result<(), ParseErrorKind> {
    if value.contains(['\n', '\r']) {
        return Err(ParseErrorKind::InvalidField {
            field,
            reason: "must be a single line".to_string(),
        });
    }
    Ok(())
}

fn check_env(env: &BTreeMap<String, String>) -> Result<(), ParseErrorKind> {
    for (key, value) in env {
        let mut chars = key.chars();
        let valid_key = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            return Err(ParseErrorKind::InvalidField {
                field: "spec.env",
                reason: format!("'{}' is not a valid variable name", key),
            });
        }
        check_single_line("spec.env", value)?;
    }
    Ok(())
}

fn find_duplicates(manifests: &[JobManifest]) -> Vec<DuplicateId> {
    let mut by_id: BTreeMap<Uuid, Vec<PathBuf>> = BTreeMap::new();
    for manifest in manifests {
        by_id
            .entry(manifest.id)
            .or_default()
            .push(manifest.source_file.clone());
    }
    by_id
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(id, files)| DuplicateId { id, files })
        .collect()
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
