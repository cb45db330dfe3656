use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::domain::config::LocalConfig;
use crate::domain::{DomainError, Platform};

/// External executables the pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryRole {
    /// Long-running inference server.
    Server,
    /// One-shot transcription CLI.
    Cli,
    /// Audio conversion tool.
    Converter,
    /// Interpreter running the stdio inference daemon.
    Daemon,
}

impl BinaryRole {
    /// Executable base name.
    pub fn base_name(&self) -> &'static str {
        match self {
            BinaryRole::Server => "whisper-server",
            BinaryRole::Cli => "whisper-cli",
            BinaryRole::Converter => "ffmpeg",
            BinaryRole::Daemon => "python3",
        }
    }

    fn slot(&self) -> usize {
        match self {
            BinaryRole::Server => 0,
            BinaryRole::Cli => 1,
            BinaryRole::Converter => 2,
            BinaryRole::Daemon => 3,
        }
    }
}

impl std::fmt::Display for BinaryRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.base_name())
    }
}

/// Locates executables: configured override, bundled platform-specific
/// build, bundled generic build, then the system.
///
/// Found paths are cached for the lifetime of the resolver. Misses are not
/// cached so a tool installed while the app runs is picked up.
pub struct BinaryResolver {
    platform: Platform,
    resource_dir: Option<PathBuf>,
    overrides: HashMap<BinaryRole, PathBuf>,
    search_path: Option<OsString>,
    well_known_dirs: bool,
    resolved: [OnceCell<PathBuf>; 4],
}

impl BinaryResolver {
    pub fn new(resource_dir: Option<PathBuf>) -> Self {
        Self {
            platform: Platform::detect(),
            resource_dir,
            overrides: HashMap::new(),
            search_path: None,
            well_known_dirs: true,
            resolved: Default::default(),
        }
    }

    pub fn from_config(config: &LocalConfig) -> Self {
        let mut resolver = Self::new(config.resource_dir.clone());
        let overrides = [
            (BinaryRole::Server, &config.server_binary),
            (BinaryRole::Cli, &config.cli_binary),
            (BinaryRole::Converter, &config.converter_binary),
            (BinaryRole::Daemon, &config.daemon.interpreter),
        ];
        for (role, path) in overrides {
            if let Some(path) = path {
                resolver = resolver.with_override(role, path.clone());
            }
        }
        resolver
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Always try `path` first for `role`.
    pub fn with_override(mut self, role: BinaryRole, path: PathBuf) -> Self {
        self.overrides.insert(role, path);
        self
    }

    /// Search these directories instead of the process `PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Skip `/usr/local/bin` and friends.
    pub fn without_well_known_dirs(mut self) -> Self {
        self.well_known_dirs = false;
        self
    }

    /// Find an executable for `role`.
    pub fn resolve(&self, role: BinaryRole) -> Result<PathBuf, DomainError> {
        self.resolved[role.slot()]
            .get_or_try_init(|| {
                let candidates = self.candidates(role);
                match candidates.iter().find(|c| is_executable(c)) {
                    Some(found) => {
                        info!(role = %role, path = ?found, "Resolved binary");
                        Ok(found.clone())
                    }
                    None => {
                        debug!(role = %role, candidates = candidates.len(), "Binary not found");
                        Err(DomainError::BinaryNotFound {
                            role: role.base_name().to_string(),
                            searched: candidates
                                .iter()
                                .map(|c| c.display().to_string())
                                .collect::<Vec<_>>()
                                .join(", "),
                        })
                    }
                }
            })
            .cloned()
    }

    /// Whether `role` can currently be resolved.
    pub fn is_available(&self, role: BinaryRole) -> bool {
        self.resolve(role).is_ok()
    }

    /// Every location checked for `role`, in priority order.
    pub fn candidates(&self, role: BinaryRole) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(path) = self.overrides.get(&role) {
            candidates.push(path.clone());
        }

        if let Some(resource_dir) = &self.resource_dir {
            let bin_dir = resource_dir.join("bin");
            let name = role.base_name();
            candidates.push(bin_dir.join(self.platform.qualified_executable_name(name)));
            candidates.push(bin_dir.join(self.platform.executable_name(name)));
        }

        let exe = self.platform.executable_name(role.base_name());
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();
        for dir in std::env::split_paths(&search_path) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            candidates.push(dir.join(&exe));
        }

        if self.well_known_dirs {
            for dir in self.platform.well_known_dirs() {
                let candidate = Path::new(dir).join(&exe);
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }

        candidates
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
