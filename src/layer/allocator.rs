//! Memory allocator selection
//!
//! Non-default allocators must be installed on the host. Detection goes
//! through a [`LibraryProbe`] so compositions can be tested (or run for a
//! different host) without touching the real library directories.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use walkdir::WalkDir;

use super::{LayerContext, ParameterError, Violation};

/// Locates allocator libraries on the host
pub trait LibraryProbe: Send + Sync {
    /// Path of an installed library for `allocator` targeting `platform`
    fn locate(&self, allocator: &str, platform: &str) -> Option<PathBuf>;
}

/// Scans the conventional library directories of the target OS
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLibraryProbe;

/// Depth below each search root that is scanned
const MAX_SCAN_DEPTH: usize = 3;

impl LibraryProbe for SystemLibraryProbe {
    fn locate(&self, allocator: &str, platform: &str) -> Option<PathBuf> {
        let os = HostOs::from_platform(platform);
        let patterns = library_patterns(allocator, os);
        if patterns.is_empty() {
            return None;
        }
        find_library(&search_paths(allocator, os), patterns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostOs {
    Linux,
    Macos,
    Windows,
}

impl HostOs {
    fn from_platform(platform: &str) -> Self {
        let platform = platform.to_lowercase();
        if platform.contains("windows") {
            HostOs::Windows
        } else if platform.contains("macos") || platform.contains("darwin") {
            HostOs::Macos
        } else {
            HostOs::Linux
        }
    }
}

fn library_patterns(allocator: &str, os: HostOs) -> &'static [&'static str] {
    use HostOs::*;
    match (allocator, os) {
        ("jemalloc", Linux) => &["libjemalloc.so", "libjemalloc.so.2"],
        ("jemalloc", Macos) => &["libjemalloc.dylib", "libjemalloc.2.dylib"],
        ("jemalloc", Windows) => &["jemalloc.lib", "jemalloc.dll"],
        ("tcmalloc", Linux) => &["libtcmalloc.so", "libtcmalloc.so.4"],
        ("tcmalloc", Macos) => &["libtcmalloc.dylib"],
        ("tcmalloc", Windows) => &["libtcmalloc.lib"],
        ("mimalloc", Linux) => &["libmimalloc.so", "libmimalloc.so.2"],
        ("mimalloc", Macos) => &["libmimalloc.dylib"],
        ("mimalloc", Windows) => &["mimalloc.lib", "mimalloc.dll"],
        ("snmalloc", Linux) => &["libsnmalloc.so"],
        ("snmalloc", Macos) => &["libsnmalloc.dylib"],
        ("snmalloc", Windows) => &["snmalloc.lib"],
        ("hoard", Linux) => &["libhoard.so"],
        ("hoard", Macos) => &["libhoard.dylib"],
        ("hoard", Windows) => &["libhoard.lib"],
        ("nedmalloc", Linux) => &["libnedmalloc.so"],
        ("nedmalloc", Macos) => &["libnedmalloc.dylib"],
        ("nedmalloc", Windows) => &["nedmalloc.lib"],
        ("tbbmalloc", Linux) => &["libtbbmalloc.so", "libtbbmalloc.so.2"],
        ("tbbmalloc", Macos) => &["libtbbmalloc.dylib"],
        ("tbbmalloc", Windows) => &["tbbmalloc.lib"],
        _ => &[],
    }
}

fn search_paths(allocator: &str, os: HostOs) -> Vec<PathBuf> {
    match os {
        HostOs::Windows => vec![
            PathBuf::from(r"C:\Program Files"),
            PathBuf::from(r"C:\Program Files (x86)"),
            PathBuf::from(r"C:\Windows\System32"),
        ],
        HostOs::Macos => vec![
            PathBuf::from("/usr/local/lib"),
            PathBuf::from("/opt/homebrew/lib"),
            PathBuf::from(format!("/usr/local/opt/{}/lib", allocator)),
            PathBuf::from("/usr/lib"),
        ],
        HostOs::Linux => vec![
            PathBuf::from("/usr/lib"),
            PathBuf::from("/usr/local/lib"),
            PathBuf::from("/usr/lib/x86_64-linux-gnu"),
            PathBuf::from("/usr/lib/aarch64-linux-gnu"),
            PathBuf::from("/lib"),
        ],
    }
}

/// First file (or symlink) named like one of `patterns` under `roots`.
///
/// Patterns are tried in order; each is searched across all roots before the
/// next pattern is considered. Missing roots are skipped.
pub(crate) fn find_library(roots: &[PathBuf], patterns: &[&str]) -> Option<PathBuf> {
    patterns.iter().find_map(|pattern| {
        roots
            .iter()
            .filter(|root| root.is_dir())
            .find_map(|root| scan_root(root, pattern))
    })
}

fn scan_root(root: &Path, file_name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .max_depth(MAX_SCAN_DEPTH)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| !entry.file_type().is_dir() && entry.file_name() == file_name)
        .map(|entry| entry.into_path())
}

/// How a detected allocator is wired into the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// Pick the best method for the platform (currently always link)
    #[default]
    Auto,
    /// `-l<allocator>` at link time
    Link,
    /// `LD_PRELOAD` in the runtime environment
    LdPreload,
    /// Wrapper library; falls back to linking
    Proxy,
}

impl IntegrationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationMethod::Auto => "auto",
            IntegrationMethod::Link => "link",
            IntegrationMethod::LdPreload => "ld_preload",
            IntegrationMethod::Proxy => "proxy",
        }
    }
}

impl FromStr for IntegrationMethod {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "auto" => Ok(IntegrationMethod::Auto),
            "link" => Ok(IntegrationMethod::Link),
            "ld_preload" => Ok(IntegrationMethod::LdPreload),
            "proxy" => Ok(IntegrationMethod::Proxy),
            _ => Err(ParameterError::new(
                "method",
                format!("'{}' (expected one of auto, link, ld_preload, proxy)", s),
            )),
        }
    }
}

/// Allocator name plus integration method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorSpec {
    name: String,
    method: IntegrationMethod,
}

impl AllocatorSpec {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>, method: IntegrationMethod) -> Self {
        Self {
            name: name.into(),
            method,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> IntegrationMethod {
        self.method
    }

    /// The system allocator, which needs no configuration
    pub fn is_default(&self) -> bool {
        self.name == Self::DEFAULT
    }

    pub(crate) fn apply(
        &self,
        ctx: &mut LayerContext,
        probe: &dyn LibraryProbe,
    ) -> Result<(), Violation> {
        self.check_sanitizers(ctx)?;
        if self.is_default() {
            return Ok(());
        }

        let platform = ctx.platform.clone().unwrap_or_default();
        let library = probe.locate(&self.name, &platform).ok_or_else(|| {
            Violation::Requirement(format!(
                "allocator '{}' was not found on the system; install it with your package manager (e.g. lib{}-dev)",
                self.name, self.name
            ))
        })?;
        tracing::debug!(allocator = %self.name, library = %library.display(), "allocator detected");

        match self.method {
            IntegrationMethod::Auto | IntegrationMethod::Link | IntegrationMethod::Proxy => {
                ctx.add_link_flag(format!("-l{}", self.name));
            }
            IntegrationMethod::LdPreload => {
                if HostOs::from_platform(&platform) == HostOs::Windows {
                    return Err(Violation::Requirement(
                        "LD_PRELOAD integration is not available on windows".to_string(),
                    ));
                }
                ctx.set_runtime_env("LD_PRELOAD", library.display().to_string());
            }
        }
        Ok(())
    }

    fn check_sanitizers(&self, ctx: &LayerContext) -> Result<(), Violation> {
        if ctx.has_sanitizer("address") {
            return Err(Violation::Conflict {
                other: "sanitizer/address".to_string(),
                reason: "AddressSanitizer replaces the allocator and cannot be combined with another one"
                    .to_string(),
            });
        }
        if self.is_default() {
            return Ok(());
        }
        for sanitizer in ["thread", "memory"] {
            if ctx.has_sanitizer(sanitizer) {
                return Err(Violation::Conflict {
                    other: format!("sanitizer/{}", sanitizer),
                    reason: "use the default allocator with this sanitizer".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for AllocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.method.as_str())
    }
}
