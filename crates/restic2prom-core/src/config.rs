//! Run configuration.
//!
//! Everything the pipeline needs is resolved here, before the child starts:
//! the textfile destination, the exposition type and the label identity.
//! Repository and backup targets are recovered from the wrapped restic
//! command line, the same way restic itself would see them.

use std::io;
use std::path::{Path, PathBuf};

use crate::exposition::TEXTFILE_EXTENSION;
use crate::metrics::{ExpositionKind, LabelIdentity};

/// Environment variable restic reads the repository from.
pub const REPOSITORY_ENV: &str = "RESTIC_REPOSITORY";

/// restic flags that consume the following argument as their value.
const VALUE_FLAGS: &[&str] = &[
    // global
    "-r",
    "--repo",
    "--repository-file",
    "-p",
    "--password-file",
    "--password-command",
    "--cache-dir",
    "--cacert",
    "--tls-client-cert",
    "-o",
    "--option",
    "--limit-upload",
    "--limit-download",
    "--pack-size",
    "--compression",
    "--key-hint",
    "--retry-lock",
    "--stuck-request-timeout",
    "--http-user-agent",
    // backup
    "-e",
    "--exclude",
    "--iexclude",
    "--exclude-file",
    "--iexclude-file",
    "--exclude-if-present",
    "--exclude-larger-than",
    "--files-from",
    "--files-from-verbatim",
    "--files-from-raw",
    "-g",
    "--group-by",
    "-H",
    "--host",
    "--parent",
    "--read-concurrency",
    "--stdin-filename",
    "--tag",
    "--time",
];

/// Error type for configuration problems detected before the child starts.
#[derive(Debug)]
pub enum ConfigError {
    /// Textfile name lacks the `.prom` suffix.
    InvalidTextfile(PathBuf),
    /// `--repository-file` could not be read.
    RepositoryFile { path: PathBuf, source: io::Error },
    /// No command to wrap.
    EmptyCommand,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidTextfile(path) => write!(
                f,
                "Invalid textfile name '{}' (missing '.{}' suffix)",
                path.display(),
                TEXTFILE_EXTENSION
            ),
            ConfigError::RepositoryFile { path, source } => write!(
                f,
                "Invalid repository filename '{}': {}",
                path.display(),
                source
            ),
            ConfigError::EmptyCommand => write!(f, "no command given"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::RepositoryFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Fully resolved settings for one wrapped run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub textfile: PathBuf,
    pub exposition: ExpositionKind,
    pub identity: LabelIdentity,
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

impl RunConfig {
    /// Validates `textfile` and derives the label identity from `command`.
    ///
    /// `repo_label` overrides the repository found on the command line or in
    /// `env_repository`.
    pub fn new(
        textfile: PathBuf,
        exposition: ExpositionKind,
        command: Vec<String>,
        repo_label: Option<String>,
        env_repository: Option<String>,
    ) -> Result<Self, ConfigError> {
        validate_textfile(&textfile)?;
        if command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        let repo = match repo_label {
            Some(label) => label,
            None => resolve_repository(&command, env_repository)?,
        };
        let identity = LabelIdentity::for_backup(&backup_targets(&command), &repo);

        Ok(Self {
            textfile,
            exposition,
            identity,
            command,
        })
    }
}

/// Rejects destinations the textfile collector would not pick up.
pub fn validate_textfile(path: &Path) -> Result<(), ConfigError> {
    match path.extension() {
        Some(ext) if ext == TEXTFILE_EXTENSION && path.file_stem().is_some() => Ok(()),
        _ => Err(ConfigError::InvalidTextfile(path.to_path_buf())),
    }
}

/// Finds the repository locator the wrapped command will use.
///
/// `RESTIC_REPOSITORY` wins; otherwise the last `-r`/`--repo` or
/// `--repository-file` on the command line. Empty when none is given.
pub fn resolve_repository(
    command: &[String],
    env_repository: Option<String>,
) -> Result<String, ConfigError> {
    if let Some(repo) = env_repository.filter(|r| !r.is_empty()) {
        return Ok(repo);
    }

    let mut repo = String::new();
    let mut args = command.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg == "-r" || arg == "--repo" {
            if let Some(value) = args.next() {
                repo = value.clone();
            }
        } else if let Some(value) = arg.strip_prefix("--repo=") {
            repo = value.to_string();
        } else if arg == "--repository-file" {
            if let Some(file) = args.next() {
                repo = read_repository_file(Path::new(file))?;
            }
        } else if let Some(file) = arg.strip_prefix("--repository-file=") {
            repo = read_repository_file(Path::new(file))?;
        }
    }
    Ok(repo)
}

fn read_repository_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|data| data.trim().to_string())
        .map_err(|source| ConfigError::RepositoryFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Positional arguments of a `backup` subcommand, in order.
///
/// Empty for any other subcommand.
pub fn backup_targets(command: &[String]) -> Vec<String> {
    let mut subcommand: Option<&str> = None;
    let mut targets = Vec::new();
    let mut only_positional = false;

    let mut args = command.iter().skip(1);
    while let Some(arg) = args.next() {
        if !only_positional {
            if arg == "--" {
                only_positional = true;
                continue;
            }
            if arg.len() > 1 && arg.starts_with('-') {
                if takes_value(arg) {
                    args.next();
                }
                continue;
            }
        }
        match subcommand {
            None => subcommand = Some(arg.as_str()),
            Some(_) => targets.push(arg.clone()),
        }
    }

    if subcommand == Some("backup") {
        targets
    } else {
        Vec::new()
    }
}

fn takes_value(flag: &str) -> bool {
    !flag.contains('=') && VALUE_FLAGS.contains(&flag)
}
