//! Security hardening policies

use std::fmt;
use std::str::FromStr;

use super::{LayerContext, ParameterError};

/// `-fstack-protector*` level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackProtectorLevel {
    None,
    Basic,
    Strong,
    All,
}

impl StackProtectorLevel {
    pub fn flag(&self) -> &'static str {
        match self {
            StackProtectorLevel::None => "-fno-stack-protector",
            StackProtectorLevel::Basic => "-fstack-protector",
            StackProtectorLevel::Strong => "-fstack-protector-strong",
            StackProtectorLevel::All => "-fstack-protector-all",
        }
    }
}

impl FromStr for StackProtectorLevel {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(StackProtectorLevel::None),
            "basic" => Ok(StackProtectorLevel::Basic),
            "strong" => Ok(StackProtectorLevel::Strong),
            "all" => Ok(StackProtectorLevel::All),
            other => Err(ParameterError::new(
                "stack protector level",
                format!("'{}' (expected one of none, basic, strong, all)", other),
            )),
        }
    }
}

/// `_FORTIFY_SOURCE` level, 0 through 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FortifyLevel(u8);

impl FortifyLevel {
    pub const MAX: u8 = 3;

    pub fn new(level: u8) -> Result<Self, ParameterError> {
        if level <= Self::MAX {
            Ok(Self(level))
        } else {
            Err(ParameterError::new(
                "fortify level",
                format!("{} (expected 0-{})", level, Self::MAX),
            ))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn flag(&self) -> String {
        format!("-D_FORTIFY_SOURCE={}", self.0)
    }
}

impl FromStr for FortifyLevel {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level: u8 = s.trim().parse().map_err(|_| {
            ParameterError::new("fortify level", format!("'{}' (expected 0-{})", s, Self::MAX))
        })?;
        Self::new(level)
    }
}

/// RELRO linking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelroMode {
    Full,
    Partial,
    None,
}

impl RelroMode {
    pub fn flag(&self) -> &'static str {
        match self {
            RelroMode::Full => "-Wl,-z,relro,-z,now",
            RelroMode::Partial => "-Wl,-z,relro",
            RelroMode::None => "-Wl,-z,norelro",
        }
    }
}

impl FromStr for RelroMode {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(RelroMode::Full),
            "partial" => Ok(RelroMode::Partial),
            "none" => Ok(RelroMode::None),
            other => Err(ParameterError::new(
                "RELRO mode",
                format!("'{}' (expected one of full, partial, none)", other),
            )),
        }
    }
}

/// One hardening feature with validated parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityFeature {
    StackProtector(StackProtectorLevel),
    Fortify(FortifyLevel),
    Relro(RelroMode),
    Pie,
    /// Stack size limit in bytes
    StackSize(u64),
    /// stack-protector=strong + fortify=2 + PIE + full RELRO
    Hardened,
}

impl SecurityFeature {
    /// Build a feature from the loosely typed layer document parameters.
    ///
    /// Missing `level`/`mode` fall back to the defaults (strong, 2, full).
    pub fn from_params(
        security_type: &str,
        level: Option<&str>,
        mode: Option<&str>,
        stack_size: Option<u64>,
    ) -> Result<Self, ParameterError> {
        match security_type.replace('-', "_").as_str() {
            "stack_protector" => Ok(SecurityFeature::StackProtector(
                level.unwrap_or("strong").parse()?,
            )),
            "fortify" => Ok(SecurityFeature::Fortify(level.unwrap_or("2").parse()?)),
            "relro" => Ok(SecurityFeature::Relro(mode.unwrap_or("full").parse()?)),
            "pie" => Ok(SecurityFeature::Pie),
            "stack_size" => match stack_size {
                Some(size) if size > 0 => Ok(SecurityFeature::StackSize(size)),
                _ => Err(ParameterError::new(
                    "stack_size",
                    "must be specified as a positive byte count for the stack_size security type",
                )),
            },
            "hardened" => Ok(SecurityFeature::Hardened),
            _ => Err(ParameterError::new(
                "security_type",
                format!(
                    "unknown security type '{}' (expected one of stack_protector, fortify, relro, pie, stack_size, hardened)",
                    security_type
                ),
            )),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SecurityFeature::StackProtector(_) => "stack_protector",
            SecurityFeature::Fortify(_) => "fortify",
            SecurityFeature::Relro(_) => "relro",
            SecurityFeature::Pie => "pie",
            SecurityFeature::StackSize(_) => "stack_size",
            SecurityFeature::Hardened => "hardened",
        }
    }

    pub(crate) fn apply(&self, ctx: &mut LayerContext) {
        match *self {
            SecurityFeature::StackProtector(level) => {
                ctx.add_compile_flag(level.flag());
            }
            SecurityFeature::Fortify(level) => apply_fortify(ctx, level),
            SecurityFeature::Relro(mode) => {
                ctx.add_link_flag(mode.flag());
            }
            SecurityFeature::Pie => apply_pie(ctx),
            SecurityFeature::StackSize(size) => {
                ctx.add_link_flag(format!("-Wl,-z,stack-size={}", size));
            }
            SecurityFeature::Hardened => apply_hardened(ctx),
        }
    }
}

impl fmt::Display for SecurityFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

// Fortification only works with optimization enabled.
fn apply_fortify(ctx: &mut LayerContext, level: FortifyLevel) {
    ctx.add_compile_flag(level.flag());
    if level.get() != 0 && !ctx.has_optimization_flag() {
        ctx.add_compile_flag("-O2");
    }
}

fn apply_pie(ctx: &mut LayerContext) {
    ctx.add_compile_flag("-fPIE");
    ctx.add_link_flag("-pie");
}

// Each part is skipped when an equivalent setting is already present, so a
// hardened layer stacked on explicit fortify/relro layers adds nothing twice.
fn apply_hardened(ctx: &mut LayerContext) {
    ctx.add_compile_flag(StackProtectorLevel::Strong.flag());

    if !ctx.compile_flags_contain("_FORTIFY_SOURCE") {
        apply_fortify(ctx, FortifyLevel(2));
    }

    if !ctx.link_flags_contain("relro") {
        ctx.add_link_flag(RelroMode::Full.flag());
    }

    apply_pie(ctx);
}
