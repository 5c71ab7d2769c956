//! Compiler definition resolution against on-disk definition trees

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use cfgstack::settings::BUILTIN_DATA_DIR;
use cfgstack::{CompilerResolver, DefinitionStore, ResolveError, Vars};

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn resolver(root: &Path) -> CompilerResolver {
    CompilerResolver::new(Arc::new(DefinitionStore::new(root)))
}

const BASE: &str = r#"
name: base
compiler_family: clang
flags:
  common: [-Wall]
  release: [-O2]
executables:
  c: clang
  cxx: clang++
linker:
  lld:
    flag: -fuse-ld=lld
  mold: mold
  gold:
    flag: -fuse-ld=gold
platform_overrides:
  linux:
    flags:
      common: [-pthread]
  linux-arm64:
    executables:
      c: aarch64-clang
"#;

const CHILD: &str = r#"
name: child
extends: base
compiler_family: clang
version: "17.0.6"
flags:
  common: [-Wextra]
  debug: [-O0, -g]
cmake_variables:
  CMAKE_C_COMPILER: "{{root}}/bin/clang-{{version}}"
  CMAKE_PREFIX_PATH: ["{{root}}/lib", "{{missing}}/lib"]
"#;

fn fixture() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "compilers/base.yaml", BASE);
    write(temp_dir.path(), "compilers/child.yaml", CHILD);
    temp_dir
}

// =============================================================================
// Extends chains
// =============================================================================

#[test]
fn test_extends_merges_child_over_parent() {
    let temp_dir = fixture();
    let config = resolver(temp_dir.path()).load("child", None).unwrap();

    assert_eq!(config.name(), "child");
    assert_eq!(config.version(), Some("17.0.6"));
    assert_eq!(config.common_flags(), ["-Wall", "-Wextra"]);
    assert_eq!(config.flags_for_build_type("release"), ["-O2"]);
    assert_eq!(config.flags_for_build_type("Debug"), ["-O0", "-g"]);
    assert_eq!(config.executables()["cxx"], "clang++");
}

#[test]
fn test_extends_with_yaml_suffix() {
    let temp_dir = fixture();
    write(
        temp_dir.path(),
        "compilers/grandchild.yaml",
        "name: grandchild\nextends: child.yaml\ncompiler_family: clang\n",
    );

    let config = resolver(temp_dir.path()).load("grandchild", None).unwrap();
    assert_eq!(config.version(), Some("17.0.6"));
    assert_eq!(config.common_flags(), ["-Wall", "-Wextra"]);
}

#[test]
fn test_required_fields_may_come_from_parent() {
    let temp_dir = fixture();
    write(
        temp_dir.path(),
        "compilers/thin.yaml",
        "name: thin\nextends: base\n",
    );

    let config = resolver(temp_dir.path()).load("thin", None).unwrap();
    assert_eq!(config.compiler_family(), "clang");
}

#[test]
fn test_missing_required_fields() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "compilers/broken.yaml", "name: broken\n");

    let err = resolver(temp_dir.path()).load("broken", None).unwrap_err();
    match &err {
        ResolveError::MissingFields { fields, .. } => assert_eq!(*fields, ["compiler_family"]),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.kind(), "invalid_document");
}

#[test]
fn test_circular_extends_from_either_entry_point() {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        "compilers/a.yaml",
        "name: a\ncompiler_family: clang\nextends: b\n",
    );
    write(
        temp_dir.path(),
        "compilers/b.yaml",
        "name: b\ncompiler_family: clang\nextends: a\n",
    );
    let resolver = resolver(temp_dir.path());

    for entry in ["a", "b"] {
        let err = resolver.load(entry, None).unwrap_err();
        assert_eq!(err.kind(), "circular_extends", "entry {}", entry);
        assert!(err.to_string().contains("a -> b") || err.to_string().contains("b -> a"));
    }
}

#[test]
fn test_missing_definition() {
    let temp_dir = fixture();
    let err = resolver(temp_dir.path()).load("icc", None).unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[test]
fn test_extends_cannot_leave_compilers_dir() {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        "data/outside.yaml",
        "name: outside\ncompiler_family: gcc\n",
    );
    write(
        temp_dir.path(),
        "data/compilers/sneaky.yaml",
        "name: sneaky\ncompiler_family: gcc\nextends: ../outside\n",
    );

    let err = resolver(&temp_dir.path().join("data"))
        .load("sneaky", None)
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_name");
}

#[test]
fn test_missing_parent() {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        "compilers/orphan.yaml",
        "name: orphan\ncompiler_family: gcc\nextends: nowhere\n",
    );

    let err = resolver(temp_dir.path()).load("orphan", None).unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

// =============================================================================
// Platform overrides
// =============================================================================

#[test]
fn test_platform_override_replaces_lists() {
    let temp_dir = fixture();
    let config = resolver(temp_dir.path()).load("child", Some("linux-x64")).unwrap();

    // OS-prefix match; the override list replaces the merged common flags
    assert_eq!(config.common_flags(), ["-pthread"]);
    assert_eq!(config.executables()["c"], "clang");
}

#[test]
fn test_exact_platform_key_wins_over_os_prefix() {
    let temp_dir = fixture();
    let config = resolver(temp_dir.path()).load("child", Some("linux-arm64")).unwrap();

    assert_eq!(config.executables()["c"], "aarch64-clang");
    assert_eq!(config.executables()["cxx"], "clang++");
    assert_eq!(config.common_flags(), ["-Wall", "-Wextra"]);
}

#[test]
fn test_platform_override_replaces_nested_lists() {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        "compilers/san.yaml",
        r#"
name: san
compiler_family: clang
features:
  sanitizers:
    address:
      compile_flags: [-fsanitize=address, -fno-omit-frame-pointer]
      link_flags: [-fsanitize=address]
platform_overrides:
  windows:
    features:
      sanitizers:
        address:
          compile_flags: [/fsanitize=address]
"#,
    );
    write(
        temp_dir.path(),
        "compilers/san-child.yaml",
        r#"
name: san-child
extends: san
features:
  sanitizers:
    address:
      compile_flags: [-fsanitize-address-use-after-scope]
"#,
    );
    let resolver = resolver(temp_dir.path());

    let linux = resolver.load("san-child", Some("linux-x64")).unwrap();
    assert_eq!(
        linux.sanitizer_flags("address").unwrap().compile_flags,
        [
            "-fsanitize=address",
            "-fno-omit-frame-pointer",
            "-fsanitize-address-use-after-scope"
        ]
    );

    let windows = resolver.load("san-child", Some("windows-x64")).unwrap();
    let address = windows.sanitizer_flags("address").unwrap();
    assert_eq!(address.compile_flags, ["/fsanitize=address"]);
    // Sibling keys the override does not name are kept
    assert_eq!(address.link_flags, ["-fsanitize=address"]);
}

#[test]
fn test_unknown_platform_leaves_definition_untouched() {
    let temp_dir = fixture();
    let resolver = resolver(temp_dir.path());
    let plain = resolver.load("child", None).unwrap();
    let other = resolver.load("child", Some("freebsd-x64")).unwrap();

    assert_eq!(plain.document(), other.document());
    assert_eq!(other.platform(), Some("freebsd-x64"));
}

#[test]
fn test_results_are_cached_per_platform() {
    let temp_dir = fixture();
    let resolver = resolver(temp_dir.path());

    let first = resolver.load("child", Some("linux-x64")).unwrap();
    let second = resolver.load("child", Some("linux-x64")).unwrap();
    let other = resolver.load("child", None).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
}

#[test]
fn test_concurrent_loads_share_one_resolution() {
    let temp_dir = fixture();
    let resolver = Arc::new(resolver(temp_dir.path()));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                scope.spawn(move || {
                    let platform = if i % 2 == 0 { Some("linux-x64") } else { None };
                    (platform, resolver.load("child", platform).unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let linux = resolver.load("child", Some("linux-x64")).unwrap();
    let plain = resolver.load("child", None).unwrap();
    for (platform, config) in &results {
        let expected = if platform.is_some() { &linux } else { &plain };
        assert!(Arc::ptr_eq(config, expected));
        assert_eq!(config.document(), expected.document());
    }
}

// =============================================================================
// Linker selection
// =============================================================================

#[test]
fn test_linker_flag_sources() {
    let temp_dir = fixture();
    write(
        temp_dir.path(),
        "layers/linker/gold.yaml",
        "flag: -fuse-ld=gold.custom\n",
    );
    write(temp_dir.path(), "layers/linker/mold.yaml", "flag: -fuse-ld=mold\n");
    let config = resolver(temp_dir.path()).load("base", None).unwrap();

    // Inline entry
    assert_eq!(config.linker_flag("lld").unwrap().as_deref(), Some("-fuse-ld=lld"));
    // A linker layer file takes precedence over the inline entry
    assert_eq!(
        config.linker_flag("gold").unwrap().as_deref(),
        Some("-fuse-ld=gold.custom")
    );
    // String reference to a linker layer file
    assert_eq!(config.linker_flag("mold").unwrap().as_deref(), Some("-fuse-ld=mold"));
    // Unknown linker
    assert_eq!(config.linker_flag("bfd").unwrap(), None);
}

#[test]
fn test_linker_flag_without_linker_section() {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        "compilers/bare.yaml",
        "name: bare\ncompiler_family: gcc\n",
    );
    write(temp_dir.path(), "layers/linker/lld.yaml", "flag: -fuse-ld=lld\n");

    let config = resolver(temp_dir.path()).load("bare", None).unwrap();
    assert_eq!(config.linker_flag("lld").unwrap(), None);
}

// =============================================================================
// CMake variables
// =============================================================================

#[test]
fn test_cmake_variables_interpolation() {
    let temp_dir = fixture();
    let config = resolver(temp_dir.path()).load("child", None).unwrap();

    let vars: Vars = [
        ("root".to_string(), "/opt/llvm".to_string()),
        ("version".to_string(), "17".to_string()),
    ]
    .into_iter()
    .collect();
    let variables = config.cmake_variables(&vars);

    assert_eq!(variables["CMAKE_C_COMPILER"], "/opt/llvm/bin/clang-17");
    // Unbound placeholders are left verbatim; lists use CMake list syntax
    assert_eq!(variables["CMAKE_PREFIX_PATH"], "/opt/llvm/lib;{{missing}}/lib");
}

// =============================================================================
// Shipped definitions
// =============================================================================

#[test]
fn test_shipped_definitions_resolve() {
    let resolver = resolver(Path::new(BUILTIN_DATA_DIR));

    let names = resolver.list_available();
    for expected in ["clang", "clang-18", "gcc", "gcc-13", "msvc"] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }
    for name in &names {
        resolver
            .load(name, None)
            .unwrap_or_else(|e| panic!("{}: {}", name, e));
    }
}

#[test]
fn test_shipped_clang_18() {
    let resolver = resolver(Path::new(BUILTIN_DATA_DIR));
    let config = resolver.load("clang-18", None).unwrap();

    assert_eq!(config.compiler_family(), "clang");
    assert_eq!(config.version(), Some("18.1.8"));
    assert_eq!(config.common_flags(), ["-fcolor-diagnostics", "-fno-common"]);
    assert_eq!(config.standard_flag("cpp", "c++26"), Some("-std=c++2c"));
    assert_eq!(config.standard_flag("cpp", "c++20"), Some("-std=c++20"));
    assert_eq!(config.default_standard("cpp"), Some("c++20"));
    assert_eq!(config.linker_flag("mold").unwrap().as_deref(), Some("-fuse-ld=mold"));

    let macos = resolver.load("clang-18", Some("macos-arm64")).unwrap();
    assert_eq!(
        macos.stdlib_flags("libc++").unwrap().link_flags,
        ["-stdlib=libc++"]
    );
}

#[test]
fn test_shipped_linker_flags_match_linker_files() {
    let resolver = resolver(Path::new(BUILTIN_DATA_DIR));

    for platform in [None, Some("linux-x64"), Some("macos-arm64"), Some("windows-x64")] {
        let config = resolver.load("clang", platform).unwrap();
        let linkers = config.document()["linker"].as_object().unwrap();
        for (id, entry) in linkers {
            let flag = config.linker_flag(id).unwrap();
            if let Some(inline) = entry.get("flag") {
                assert_eq!(flag.as_deref(), inline.as_str(), "{} on {:?}", id, platform);
            }
        }
    }
}

#[test]
fn test_report_covers_every_query() {
    let resolver = resolver(Path::new(BUILTIN_DATA_DIR));
    let config = resolver.load("clang-18", Some("linux-x64")).unwrap();

    let vars: Vars = [("toolchain_root".to_string(), "/opt/llvm".to_string())]
        .into_iter()
        .collect();
    let report = config.report("Release", &vars).unwrap();

    assert_eq!(report["compiler_family"], "clang");
    assert_eq!(report["platform"], "linux-x64");
    assert_eq!(report["build_type_flags"], serde_json::json!(["-O3", "-DNDEBUG"]));
    assert_eq!(report["default_standards"]["cpp"], "c++20");
    assert_eq!(report["language_standards"]["cpp"]["c++26"], "-std=c++2c");
    assert_eq!(report["warning_levels"]["extra"], serde_json::json!(["-Wall", "-Wextra"]));
    assert_eq!(
        report["stdlib"]["libc++"]["compile_flags"],
        serde_json::json!(["-stdlib=libc++"])
    );
    assert_eq!(
        report["sanitizers"]["address"]["link_flags"],
        serde_json::json!(["-fsanitize=address"])
    );
    assert_eq!(report["lto"]["thin"]["compile_flags"], serde_json::json!(["-flto=thin"]));
    assert_eq!(
        report["coverage"]["gcov"]["compile_flags"],
        serde_json::json!(["--coverage"])
    );
    assert_eq!(report["linkers"]["mold"], "-fuse-ld=mold");
    assert_eq!(report["cmake_variables"]["CMAKE_C_COMPILER"], "/opt/llvm/bin/clang");
}
