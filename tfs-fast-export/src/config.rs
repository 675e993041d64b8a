use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use time::UtcOffset;

use crate::error::{ExportError, Result};
use crate::hooks::{Hooks, User, UserIdent};

/// Default threshold above which an exported file triggers a warning.
pub const DEFAULT_OVERSIZE_WARNING: u64 = 10_000_000;
/// Default threshold above which delta chains are folded on disk.
pub const DEFAULT_DISK_DELTA_THRESHOLD: u64 = 10_000_000;

/// Size thresholds consulted throughout the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub oversize_warning: u64,
    pub disk_delta_threshold: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            oversize_warning: DEFAULT_OVERSIZE_WARNING,
            disk_delta_threshold: DEFAULT_DISK_DELTA_THRESHOLD,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    branches: Option<FileBranches>,
    filters: Option<FileFilters>,
    users: Option<FileUsers>,
    limits: Option<FileLimits>,
    delta: Option<FileDelta>,
    scratch: Option<FileScratch>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileBranches {
    /// Regex with named captures `branch` and `relpath`.
    pattern: Option<String>,
    /// Everything-on-one-branch mode.
    single: Option<String>,
    /// Leading characters of the source path to drop in single mode.
    strip_prefix: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FileFilters {
    ignore: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct FileUsers {
    fallback_email: Option<String>,
    map: Option<HashMap<String, FileUserEntry>>,
}

#[derive(Debug, Deserialize)]
struct FileUserEntry {
    name: String,
    email: String,
    offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLimits {
    oversize_warning: Option<u64>,
    disk_delta_threshold: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDelta {
    accept_legacy_magic: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileScratch {
    dir: Option<PathBuf>,
    clear: Option<bool>,
}

#[derive(Debug, Clone)]
enum BranchRules {
    Pattern(Regex),
    Single { branch: String, strip_prefix: usize },
}

#[derive(Debug, Clone)]
struct UserEntry {
    name: String,
    email: String,
    offset: Option<UtcOffset>,
}

/// Resolved project configuration.
pub struct Config {
    pub database: PathBuf,
    pub limits: Limits,
    pub accept_legacy_magic: bool,
    pub scratch_dir: Option<PathBuf>,
    pub scratch_clear: bool,
    branches: BranchRules,
    ignores: Vec<Regex>,
    fallback_email: String,
    users: HashMap<String, UserEntry>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            ExportError::invalid_options(format!(
                "error while loading the project configuration '{}': {e}",
                path.display()
            ))
        })?;
        let raw: FileConfig = toml::from_str(&text).map_err(|e| {
            ExportError::invalid_options(format!(
                "error while loading the project configuration '{}': {e}",
                path.display()
            ))
        })?;
        Config::from_file_config(raw)
    }

    fn from_file_config(raw: FileConfig) -> Result<Config> {
        let database = raw
            .database
            .and_then(|d| d.path)
            .ok_or_else(|| ExportError::invalid_options("config is missing [database] path"))?;

        let raw_branches = raw.branches.unwrap_or_default();
        if raw_branches.pattern.is_some() && raw_branches.single.is_some() {
            return Err(ExportError::invalid_options(
                "[branches] pattern and single are mutually exclusive",
            ));
        }
        let branches = match raw_branches.pattern {
            Some(pattern) => {
                let re = Regex::new(&pattern).map_err(|e| {
                    ExportError::invalid_options(format!("invalid [branches] pattern: {e}"))
                })?;
                if !re.capture_names().flatten().any(|name| name == "branch") {
                    return Err(ExportError::invalid_options(
                        "[branches] pattern must define a named capture group 'branch'",
                    ));
                }
                BranchRules::Pattern(re)
            }
            None => BranchRules::Single {
                branch: raw_branches
                    .single
                    .unwrap_or_else(|| "master".to_string()),
                // "$\" prefixes every source path
                strip_prefix: raw_branches.strip_prefix.unwrap_or(2),
            },
        };

        let mut ignores = Vec::new();
        for pattern in raw.filters.unwrap_or_default().ignore.unwrap_or_default() {
            ignores.push(Regex::new(&pattern).map_err(|e| {
                ExportError::invalid_options(format!("invalid [filters] ignore '{pattern}': {e}"))
            })?);
        }

        let raw_users = raw.users.unwrap_or_default();
        let mut users = HashMap::new();
        for (login, entry) in raw_users.map.unwrap_or_default() {
            let offset = entry.offset.as_deref().map(parse_offset).transpose()?;
            users.insert(
                login,
                UserEntry {
                    name: entry.name,
                    email: entry.email,
                    offset,
                },
            );
        }

        let raw_limits = raw.limits.unwrap_or_default();
        let limits = Limits {
            oversize_warning: raw_limits
                .oversize_warning
                .unwrap_or(DEFAULT_OVERSIZE_WARNING),
            disk_delta_threshold: raw_limits
                .disk_delta_threshold
                .unwrap_or(DEFAULT_DISK_DELTA_THRESHOLD),
        };

        let raw_scratch = raw.scratch.unwrap_or_default();

        Ok(Config {
            database,
            limits,
            accept_legacy_magic: raw
                .delta
                .unwrap_or_default()
                .accept_legacy_magic
                .unwrap_or(true),
            scratch_dir: raw_scratch.dir,
            scratch_clear: raw_scratch.clear.unwrap_or(false),
            branches,
            ignores,
            fallback_email: raw_users
                .fallback_email
                .unwrap_or_else(|| "nobody@example.org".to_string()),
            users,
        })
    }

    /// Build the hook set the engine runs with.
    pub fn build_hooks(&self) -> Hooks {
        let branch_extract: Box<dyn Fn(&str) -> (Option<String>, Option<String>)> =
            match self.branches.clone() {
                BranchRules::Pattern(re) => Box::new(move |path| match re.captures(path) {
                    Some(caps) => (
                        caps.name("branch").map(|m| m.as_str().to_string()),
                        caps.name("relpath").map(|m| m.as_str().to_string()),
                    ),
                    None => (None, None),
                }),
                BranchRules::Single {
                    branch,
                    strip_prefix,
                } => Box::new(move |path| {
                    if path.len() < strip_prefix {
                        return (None, None);
                    }
                    (
                        Some(branch.clone()),
                        Some(path[strip_prefix..].to_string()),
                    )
                }),
            };

        let ignores = self.ignores.clone();
        let file_filter: Box<dyn Fn(&str, &str) -> bool> =
            Box::new(move |_branch, relpath| !ignores.iter().any(|re| re.is_match(relpath)));

        let users = self.users.clone();
        let fallback_email = self.fallback_email.clone();
        let user_lookup: Box<dyn Fn(&User) -> crate::Result<UserIdent>> =
            Box::new(move |user| match users.get(&user.login) {
                Some(entry) => Ok(UserIdent {
                    display_name: entry.name.clone(),
                    email: entry.email.clone(),
                    offset: entry.offset,
                }),
                None => Ok(UserIdent {
                    display_name: user.display_name.clone(),
                    email: fallback_email.clone(),
                    offset: None,
                }),
            });

        Hooks {
            branch_extract,
            file_filter,
            content_rewrite: None,
            user_lookup,
        }
    }
}

/// Parse a `+HH:MM` / `-HH:MM` timezone offset.
fn parse_offset(text: &str) -> Result<UtcOffset> {
    let err = || ExportError::invalid_options(format!("invalid timezone offset '{text}'"));
    let (sign, rest) = match text.as_bytes().first() {
        Some(b'+') => (1i8, &text[1..]),
        Some(b'-') => (-1i8, &text[1..]),
        _ => return Err(err()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(err)?;
    let hours: i8 = hours.parse().map_err(|_| err())?;
    let minutes: i8 = minutes.parse().map_err(|_| err())?;
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).map_err(|_| err())
}
