use serde::{Deserialize, Serialize};

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuArch {
    /// x86-64 (AMD64/Intel 64).
    X86_64,
    /// ARM64 (AArch64, Apple Silicon).
    Arm64,
    /// Unknown or unsupported architecture.
    Unknown,
}

impl CpuArch {
    /// Detect the current CPU architecture.
    pub fn detect() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => CpuArch::X86_64,
            "aarch64" => CpuArch::Arm64,
            _ => CpuArch::Unknown,
        }
    }

    /// Architecture tag used in bundled binary names.
    pub fn binary_tag(&self) -> &'static str {
        match self {
            CpuArch::X86_64 => "x64",
            CpuArch::Arm64 => "arm64",
            CpuArch::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CpuArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuArch::X86_64 => write!(f, "x86_64"),
            CpuArch::Arm64 => write!(f, "arm64"),
            CpuArch::Unknown => write!(f, "unknown"),
        }
    }
}

/// Operating system type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    MacOS,
    Windows,
    Linux,
    Unknown,
}

impl OsType {
    /// Detect the current operating system.
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => OsType::MacOS,
            "windows" => OsType::Windows,
            "linux" => OsType::Linux,
            _ => OsType::Unknown,
        }
    }

    /// OS tag used in bundled binary names.
    pub fn binary_tag(&self) -> &'static str {
        match self {
            OsType::MacOS => "darwin",
            OsType::Windows => "win32",
            OsType::Linux => "linux",
            OsType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsType::MacOS => write!(f, "macOS"),
            OsType::Windows => write!(f, "Windows"),
            OsType::Linux => write!(f, "Linux"),
            OsType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Operating system and architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: OsType,
    pub arch: CpuArch,
}

impl Platform {
    pub fn detect() -> Self {
        Self {
            os: OsType::detect(),
            arch: CpuArch::detect(),
        }
    }

    /// Executable file name for `base`, e.g. `whisper-server.exe` on Windows.
    pub fn executable_name(&self, base: &str) -> String {
        match self.os {
            OsType::Windows => format!("{}.exe", base),
            _ => base.to_string(),
        }
    }

    /// Platform-qualified executable name, e.g. `whisper-server-darwin-arm64`.
    pub fn qualified_executable_name(&self, base: &str) -> String {
        self.executable_name(&format!(
            "{}-{}-{}",
            base,
            self.os.binary_tag(),
            self.arch.binary_tag()
        ))
    }

    /// Install directories searched after `PATH`.
    pub fn well_known_dirs(&self) -> Vec<&'static str> {
        match self.os {
            OsType::MacOS => vec!["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"],
            OsType::Linux => vec!["/usr/local/bin", "/usr/bin", "/snap/bin"],
            OsType::Windows | OsType::Unknown => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_arch_detect() {
        let arch = CpuArch::detect();
        assert!(matches!(arch, CpuArch::X86_64 | CpuArch::Arm64 | CpuArch::Unknown));
    }

    #[test]
    fn test_qualified_names() {
        let mac = Platform {
            os: OsType::MacOS,
            arch: CpuArch::Arm64,
        };
        assert_eq!(
            mac.qualified_executable_name("whisper-server"),
            "whisper-server-darwin-arm64"
        );
        assert_eq!(mac.executable_name("ffmpeg"), "ffmpeg");

        let win = Platform {
            os: OsType::Windows,
            arch: CpuArch::X86_64,
        };
        assert_eq!(
            win.qualified_executable_name("whisper-cli"),
            "whisper-cli-win32-x64.exe"
        );
        assert!(win.well_known_dirs().is_empty());
    }
}
