//! Built-in layer library, embedded from `data/layers/`

use crate::layer::LayerType;

/// `(type, name, document)` for every built-in layer, in canonical type order
const BUILTIN_LAYERS: &[(LayerType, &str, &str)] = &[
    (LayerType::Base, "clang-18", include_str!("../../data/layers/base/clang-18.yaml")),
    (LayerType::Base, "gcc-13", include_str!("../../data/layers/base/gcc-13.yaml")),
    (LayerType::Base, "msvc-2022", include_str!("../../data/layers/base/msvc-2022.yaml")),
    (LayerType::Platform, "linux-arm64", include_str!("../../data/layers/platform/linux-arm64.yaml")),
    (LayerType::Platform, "linux-x64", include_str!("../../data/layers/platform/linux-x64.yaml")),
    (LayerType::Platform, "macos-arm64", include_str!("../../data/layers/platform/macos-arm64.yaml")),
    (LayerType::Platform, "windows-x64", include_str!("../../data/layers/platform/windows-x64.yaml")),
    (LayerType::Stdlib, "libc++", include_str!("../../data/layers/stdlib/libc++.yaml")),
    (LayerType::Stdlib, "libstdc++", include_str!("../../data/layers/stdlib/libstdc++.yaml")),
    (LayerType::Stdlib, "msvc", include_str!("../../data/layers/stdlib/msvc.yaml")),
    (LayerType::BuildType, "debug", include_str!("../../data/layers/buildtype/debug.yaml")),
    (LayerType::BuildType, "minsizerel", include_str!("../../data/layers/buildtype/minsizerel.yaml")),
    (LayerType::BuildType, "release", include_str!("../../data/layers/buildtype/release.yaml")),
    (LayerType::BuildType, "relwithdebinfo", include_str!("../../data/layers/buildtype/relwithdebinfo.yaml")),
    (LayerType::Optimization, "lto-full", include_str!("../../data/layers/optimization/lto-full.yaml")),
    (LayerType::Optimization, "lto-thin", include_str!("../../data/layers/optimization/lto-thin.yaml")),
    (LayerType::Optimization, "native", include_str!("../../data/layers/optimization/native.yaml")),
    (LayerType::Sanitizer, "address", include_str!("../../data/layers/sanitizer/address.yaml")),
    (LayerType::Sanitizer, "leak", include_str!("../../data/layers/sanitizer/leak.yaml")),
    (LayerType::Sanitizer, "memory", include_str!("../../data/layers/sanitizer/memory.yaml")),
    (LayerType::Sanitizer, "thread", include_str!("../../data/layers/sanitizer/thread.yaml")),
    (LayerType::Sanitizer, "undefined", include_str!("../../data/layers/sanitizer/undefined.yaml")),
    (LayerType::Security, "fortify", include_str!("../../data/layers/security/fortify.yaml")),
    (LayerType::Security, "hardened", include_str!("../../data/layers/security/hardened.yaml")),
    (LayerType::Security, "pie", include_str!("../../data/layers/security/pie.yaml")),
    (LayerType::Security, "relro-full", include_str!("../../data/layers/security/relro-full.yaml")),
    (LayerType::Security, "stack-protector-strong", include_str!("../../data/layers/security/stack-protector-strong.yaml")),
    (LayerType::Profiling, "asan-profile", include_str!("../../data/layers/profiling/asan-profile.yaml")),
    (LayerType::Profiling, "gprof", include_str!("../../data/layers/profiling/gprof.yaml")),
    (LayerType::Profiling, "instrument-functions", include_str!("../../data/layers/profiling/instrument-functions.yaml")),
    (LayerType::Profiling, "perf", include_str!("../../data/layers/profiling/perf.yaml")),
    (LayerType::Allocator, "default", include_str!("../../data/layers/allocator/default.yaml")),
    (LayerType::Allocator, "jemalloc", include_str!("../../data/layers/allocator/jemalloc.yaml")),
    (LayerType::Allocator, "mimalloc", include_str!("../../data/layers/allocator/mimalloc.yaml")),
    (LayerType::Allocator, "tcmalloc", include_str!("../../data/layers/allocator/tcmalloc.yaml")),
];

/// Document text of a built-in layer
pub fn builtin_document(layer_type: LayerType, name: &str) -> Option<&'static str> {
    BUILTIN_LAYERS
        .iter()
        .find(|(t, n, _)| *t == layer_type && *n == name)
        .map(|(_, _, text)| *text)
}

/// Names of the built-in layers of `layer_type`
pub fn builtin_names(layer_type: LayerType) -> impl Iterator<Item = &'static str> {
    BUILTIN_LAYERS
        .iter()
        .filter(move |(t, _, _)| *t == layer_type)
        .map(|(_, name, _)| *name)
}
