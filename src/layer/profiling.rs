//! Profiling instrumentation

use std::fmt;
use std::str::FromStr;

use super::{LayerContext, ParameterError, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilingMode {
    /// GNU gprof (`-pg`)
    Gprof,
    InstrumentFunctions,
    /// Extra AddressSanitizer instrumentation; needs ASan already enabled
    AsanProfile,
    /// Linux perf: frame pointers and debug info
    Perf,
}

impl ProfilingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfilingMode::Gprof => "gprof",
            ProfilingMode::InstrumentFunctions => "instrument_functions",
            ProfilingMode::AsanProfile => "asan_profile",
            ProfilingMode::Perf => "perf",
        }
    }

    pub(crate) fn apply(&self, ctx: &mut LayerContext) -> Result<(), Violation> {
        match self {
            ProfilingMode::Gprof => {
                ctx.add_compile_flag("-pg");
                ctx.add_link_flag("-pg");
            }
            ProfilingMode::InstrumentFunctions => {
                ctx.add_compile_flag("-finstrument-functions");
            }
            ProfilingMode::AsanProfile => {
                if !ctx.compile_flags_contain("fsanitize=address") {
                    return Err(Violation::Requirement(
                        "asan_profile requires AddressSanitizer (-fsanitize=address) to be enabled first"
                            .to_string(),
                    ));
                }
                ctx.add_compile_flag("-fsanitize-address-use-after-scope");
            }
            ProfilingMode::Perf => {
                ctx.add_compile_flag("-fno-omit-frame-pointer");
                if !ctx.has_debug_info_flag() {
                    ctx.add_compile_flag("-g");
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ProfilingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProfilingMode {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "gprof" => Ok(ProfilingMode::Gprof),
            "instrument_functions" => Ok(ProfilingMode::InstrumentFunctions),
            "asan_profile" => Ok(ProfilingMode::AsanProfile),
            "perf" => Ok(ProfilingMode::Perf),
            _ => Err(ParameterError::new(
                "profiling_type",
                format!(
                    "unknown profiling type '{}' (expected one of gprof, instrument_functions, asan_profile, perf)",
                    s
                ),
            )),
        }
    }
}
