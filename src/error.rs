use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecantError {
    #[error("No available formula or cask with the name \"{name}\"{}", suggestion_suffix(.suggestion))]
    Resolution {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Cannot install {package} because conflicting package {conflicts_with} is installed")]
    Conflict {
        package: String,
        conflicts_with: String,
    },

    #[error("Failed to fetch {package}: {message}")]
    Fetch { package: String, message: String },

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to install {package}: {message}")]
    Install { package: String, message: String },

    #[error(
        "Failed to restore {package} after a failed upgrade ({original}): {message}. \
         The installation is inconsistent and needs manual intervention"
    )]
    Revert {
        package: String,
        message: String,
        original: String,
    },

    #[error("Not upgrading {package}: dependency {dependency} failed to upgrade")]
    DependencyFailed { package: String, dependency: String },

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Failed to lock {}: {message}", .path.display())]
    Lock { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DecantError>;

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(". Did you mean \"{}\"?", name),
        None => String::new(),
    }
}

/// Coarse error class shown in the upgrade summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Resolution,
    Conflict,
    Fetch,
    Install,
    Revert,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Resolution => "resolution",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Fetch => "fetch",
            ErrorCategory::Install => "install",
            ErrorCategory::Revert => "revert",
            ErrorCategory::Other => "other",
        };
        f.write_str(label)
    }
}

impl DecantError {
    pub fn install(package: impl fmt::Display, message: impl fmt::Display) -> Self {
        DecantError::Install {
            package: package.to_string(),
            message: message.to_string(),
        }
    }

    pub fn fetch(package: impl fmt::Display, message: impl fmt::Display) -> Self {
        DecantError::Fetch {
            package: package.to_string(),
            message: message.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DecantError::Resolution { .. }
            | DecantError::Cycle { .. }
            | DecantError::NotInstalled(_) => ErrorCategory::Resolution,
            DecantError::Conflict { .. } => ErrorCategory::Conflict,
            DecantError::Fetch { .. } | DecantError::Checksum { .. } | DecantError::Http(_) => {
                ErrorCategory::Fetch
            }
            DecantError::Install { .. } | DecantError::DependencyFailed { .. } => {
                ErrorCategory::Install
            }
            DecantError::Revert { .. } => ErrorCategory::Revert,
            DecantError::Interrupted
            | DecantError::Lock { .. }
            | DecantError::Io(_)
            | DecantError::Json(_)
            | DecantError::Other(_) => ErrorCategory::Other,
        }
    }

    /// Revert failures leave a package with neither version usable.
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, DecantError::Revert { .. })
    }
}
