//! Loads source definitions from TOML files.
//!
//! A sources directory holds one definition per `*.toml` file. Files whose
//! name starts with `_` are drafts and are skipped, as are other extensions
//! and subdirectories.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use event_scrape_source_models::{SourceConfig, SourceDefinition, ValidationErrors};

/// File extension of source definitions.
pub const SOURCE_FILE_EXTENSION: &str = "toml";

/// Errors that can occur while loading source definitions.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A file or directory could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid TOML or has fields of the wrong type.
    #[error("failed to parse {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A single definition file failed validation.
    #[error("invalid source definition {}: {source}", path.display())]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: ValidationErrors,
    },

    /// Some definitions in a directory failed validation. The ones that
    /// passed are carried along.
    #[error("source validation failed: {}", problems.join("; "))]
    Invalid {
        /// One `file: field: message` entry per problem.
        problems: Vec<String>,
        /// Definitions that validated.
        valid: Vec<SourceConfig>,
    },

    /// Two files define the same source name (compared case-insensitively).
    #[error("duplicate source name '{name}' in {}", path.display())]
    DuplicateName { name: String, path: PathBuf },
}

/// Parses a [`SourceDefinition`] from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or a field has the wrong type.
pub fn parse_source_toml(toml_str: &str) -> Result<SourceDefinition, toml::de::Error> {
    toml::from_str(toml_str)
}

fn read_definition(path: &Path) -> Result<SourceDefinition, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_source_toml(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads and validates a single definition file.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed, or if validation finds any
/// problem.
pub fn load_source_config(path: &Path) -> Result<SourceConfig, ConfigError> {
    read_definition(path)?
        .validate()
        .map_err(|source| ConfigError::InvalidFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Loads every definition in `dir`, in file name order.
///
/// A missing directory yields no sources.
///
/// # Errors
///
/// * [`ConfigError::Io`] / [`ConfigError::Toml`] if any file cannot be read
///   or parsed; nothing is returned in that case
/// * [`ConfigError::DuplicateName`] if two valid definitions share a name
/// * [`ConfigError::Invalid`] if any definition fails validation, carrying
///   the definitions that passed
pub fn load_source_configs(dir: &Path) -> Result<Vec<SourceConfig>, ConfigError> {
    let io_error = |source: std::io::Error| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Sources directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(io_error(e)),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_error)?;
        if entry.file_type().map_err(io_error)?.is_dir() {
            continue;
        }

        let path = entry.path();
        let is_draft = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('_'));
        let is_source = path
            .extension()
            .is_some_and(|ext| ext == SOURCE_FILE_EXTENSION);

        if is_source && !is_draft {
            paths.push(path);
        }
    }
    paths.sort();

    let mut valid: Vec<SourceConfig> = Vec::new();
    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut problems = Vec::new();

    for path in paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match read_definition(&path)?.validate() {
            Ok(config) => {
                let key = config.name.to_lowercase();
                if seen.contains_key(&key) {
                    return Err(ConfigError::DuplicateName {
                        name: config.name,
                        path,
                    });
                }
                seen.insert(key, path);
                valid.push(config);
            }
            Err(errors) => problems.extend(
                errors
                    .problems
                    .into_iter()
                    .map(|problem| format!("{file_name}: {problem}")),
            ),
        }
    }

    log::debug!(
        "Loaded {} source definition(s) from {}",
        valid.len(),
        dir.display()
    );

    if problems.is_empty() {
        Ok(valid)
    } else {
        Err(ConfigError::Invalid { problems, valid })
    }
}

/// File name a source is exported under: the lowercased name with every
/// run of other characters replaced by `_`.
#[must_use]
pub fn source_file_name(name: &str) -> String {
    let mut stem = String::new();
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            stem.push(c.to_ascii_lowercase());
        } else if !stem.is_empty() && !stem.ends_with('_') {
            stem.push('_');
        }
    }
    let stem = stem.trim_end_matches('_');
    let stem = if stem.is_empty() { "source" } else { stem };
    format!("{stem}.{SOURCE_FILE_EXTENSION}")
}

/// Writes one definition file per source into `dir`, creating it if
/// needed. Existing files of the same name are overwritten.
///
/// Sources that cannot be serialized or written are logged and skipped.
/// Returns the paths that were written.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if `dir` cannot be created.
pub fn write_source_configs(
    configs: Vec<SourceConfig>,
    dir: &Path,
) -> Result<Vec<PathBuf>, ConfigError> {
    fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(configs.len());

    for config in configs {
        let path = dir.join(source_file_name(&config.name));
        let name = config.name.clone();

        let content = match toml::to_string(&SourceDefinition::from(config)) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Skipping source '{name}': {e}");
                continue;
            }
        };

        if let Err(e) = fs::write(&path, content) {
            log::warn!("Failed to write {}: {e}", path.display());
            continue;
        }

        log::debug!("Wrote source '{name}' to {}", path.display());
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use event_scrape_source_models::{Schedule, Tier};

    use super::*;

    const HARBOURFRONT: &str = r#"
name = "Harbourfront Centre"
url = "https://harbourfront.example/events"
license = "CC0-1.0"
"#;

    const JAZZ_BISTRO: &str = r#"
name = "Jazz Bistro"
url = "https://jazzbistro.example/calendar"
tier = 1
schedule = "weekly"
max_pages = 3

[selectors]
event_list = ".event"
name = "h3"
start_date = "time"
pagination = "a.next"
"#;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn loads_definitions_in_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b_jazz.toml", JAZZ_BISTRO);
        write(dir.path(), "a_harbourfront.toml", HARBOURFRONT);

        let sources = load_source_configs(dir.path()).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Harbourfront Centre", "Jazz Bistro"]);

        let harbourfront = &sources[0];
        assert_eq!(harbourfront.tier, Tier::Structured);
        assert_eq!(harbourfront.trust_level, 5);
        assert_eq!(harbourfront.max_pages, 10);
        assert_eq!(harbourfront.schedule, Schedule::Manual);
        assert!(harbourfront.enabled);
        assert_eq!(harbourfront.license.as_deref(), Some("CC0-1.0"));

        let jazz = &sources[1];
        assert_eq!(jazz.tier, Tier::Selectors);
        assert_eq!(jazz.max_pages, 3);
        assert_eq!(jazz.selectors.pagination(), Some("a.next"));
    }

    #[test]
    fn skips_drafts_other_extensions_and_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "harbourfront.toml", HARBOURFRONT);
        write(dir.path(), "_draft.toml", "this is not toml at all [");
        write(dir.path(), "README.md", "# sources");
        write(dir.path(), "jazz.yaml", "name: jazz");
        fs::create_dir(dir.path().join("archive")).unwrap();
        write(&dir.path().join("archive"), "old.toml", JAZZ_BISTRO);

        let sources = load_source_configs(dir.path()).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "Harbourfront Centre");
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sources = load_source_configs(&dir.path().join("nope")).unwrap();
        assert!(sources.is_empty());
    }

    #[test]
    fn parse_error_fails_the_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "harbourfront.toml", HARBOURFRONT);
        write(dir.path(), "broken.toml", "name = ");

        let err = load_source_configs(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }), "{err}");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "one.toml", HARBOURFRONT);
        write(
            dir.path(),
            "two.toml",
            &HARBOURFRONT.replace("Harbourfront Centre", "HARBOURFRONT CENTRE"),
        );

        let err = load_source_configs(dir.path()).unwrap_err();
        match err {
            ConfigError::DuplicateName { name, path } => {
                assert_eq!(name, "HARBOURFRONT CENTRE");
                assert!(path.ends_with("two.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_problems_are_combined_and_valid_sources_kept() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.toml", HARBOURFRONT);
        write(dir.path(), "bad_tier.toml", "name = \"x\"\nurl = \"https://x.example\"\ntier = 4\n");
        write(dir.path(), "bad_url.toml", "name = \"y\"\nurl = \"not a url\"\n");

        let err = load_source_configs(dir.path()).unwrap_err();
        let ConfigError::Invalid { problems, valid } = &err else {
            panic!("unexpected error: {err}");
        };

        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].name, "Harbourfront Centre");
        assert_eq!(problems.len(), 2);
        assert!(problems[0].starts_with("bad_tier.toml: tier"));
        assert!(problems[1].starts_with("bad_url.toml: url"));
        assert!(err.to_string().contains("; "));
    }

    #[test]
    fn single_file_load_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jazz.toml");
        fs::write(&path, JAZZ_BISTRO.replace("event_list = \".event\"\n", "")).unwrap();

        let err = load_source_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFile { .. }), "{err}");
        assert!(err.to_string().contains("selectors.event_list"));
    }

    #[test]
    fn single_file_load_returns_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harbourfront.toml");
        fs::write(&path, HARBOURFRONT).unwrap();

        let config = load_source_config(&path).unwrap();
        assert_eq!(config.url, "https://harbourfront.example/events");
    }

    #[test]
    fn source_file_names_are_slugged() {
        assert_eq!(source_file_name("Harbourfront Centre"), "harbourfront_centre.toml");
        assert_eq!(source_file_name("  Jazz / Bistro! "), "jazz_bistro.toml");
        assert_eq!(source_file_name("???"), "source.toml");
    }

    #[test]
    fn written_sources_load_back() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "harbourfront.toml", HARBOURFRONT);
        write(dir.path(), "jazz.toml", JAZZ_BISTRO);
        let configs = load_source_configs(dir.path()).unwrap();

        let out = dir.path().join("export");
        let written = write_source_configs(configs.clone(), &out).unwrap();
        assert_eq!(written.len(), 2);
        assert!(out.join("harbourfront_centre.toml").exists());

        let mut reloaded = load_source_configs(&out).unwrap();
        reloaded.sort_by(|a, b| a.name.cmp(&b.name));
        let mut expected = configs;
        expected.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(reloaded, expected);
    }
}
