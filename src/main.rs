//! cfgstack CLI
//!
//! Entry point for the `cfgstack` command-line tool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use cfgstack::settings::LoadedSettings;
use cfgstack::{
    CompilerResolver, ComposeError, ComposedConfig, DefinitionStore, LayerComposer, LayerSpec,
    LayerType, ResolveError, Settings, SettingsError, SettingsOverrides, Vars,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cfgstack")]
#[command(about = "Compose C/C++ build configurations from layered definitions", version)]
struct Cli {
    /// Definition tree containing compilers/ and layers/linker/
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Project whose .cfgstack/layers/ override other layers
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a configuration from layers
    Compose {
        /// Layer to include, as type/name (repeatable)
        #[arg(long = "layer", short = 'l', required = true)]
        layers: Vec<LayerSpec>,

        /// Interpolation variable, as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Resolve a compiler definition and print its queries as JSON
    Resolve {
        /// Compiler definition name
        compiler: String,

        /// Target platform (e.g. linux-x64)
        #[arg(long)]
        platform: Option<String>,

        /// Build type whose flags are reported
        #[arg(long, default_value = "release")]
        build_type: String,

        /// Interpolation variable, as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Output format (text is rendered as JSON)
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// List available layers
    Layers {
        /// Only list layers of this type
        #[arg(long = "type")]
        layer_type: Option<LayerType>,
    },

    /// List available compiler definitions
    Compilers,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

/// A failure reported to the user as `error[<kind>]: <message>`
struct Failure {
    kind: &'static str,
    message: String,
}

impl From<SettingsError> for Failure {
    fn from(e: SettingsError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<ComposeError> for Failure {
    fn from(e: ComposeError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<ResolveError> for Failure {
    fn from(e: ResolveError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Self {
            kind: "serialization",
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for Failure {
    fn from(e: serde_yaml::Error) -> Self {
        Self {
            kind: "serialization",
            message: e.to_string(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(failure) = run(cli) {
        eprintln!("error[{}]: {}", failure.kind, failure.message);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "cfgstack=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Failure> {
    let overrides = SettingsOverrides {
        data_dir: cli.data_dir,
        project_root: cli.project_root,
        ..SettingsOverrides::default()
    };
    let LoadedSettings { settings, .. } = Settings::discover(&overrides)?;

    match cli.command {
        Commands::Compose {
            layers,
            vars,
            format,
        } => run_compose(&settings, &layers, vars, format),
        Commands::Resolve {
            compiler,
            platform,
            build_type,
            vars,
            format,
        } => run_resolve(
            &settings,
            &compiler,
            platform.as_deref(),
            &build_type,
            vars,
            format,
        ),
        Commands::Layers { layer_type } => {
            for id in LayerComposer::from_settings(&settings).list_layers(layer_type) {
                println!("{}", id);
            }
            Ok(())
        }
        Commands::Compilers => {
            for name in DefinitionStore::new(&settings.data_dir).list_compilers() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

fn run_compose(
    settings: &Settings,
    layers: &[LayerSpec],
    vars: Vec<(String, String)>,
    format: OutputFormat,
) -> Result<(), Failure> {
    let composer = LayerComposer::from_settings(settings);
    let vars: Vars = vars.into_iter().collect();
    let config = composer.compose_with_vars(layers, &vars)?;

    if format == OutputFormat::Text {
        return print_human(&config);
    }
    let mut output = config.to_dict();
    output["layer_info"] = serde_json::to_value(config.layer_info())?;
    output["fingerprint"] = Value::String(config.fingerprint()?);
    print_document(&output, format)
}

fn print_document(output: &Value, format: OutputFormat) -> Result<(), Failure> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(output)?),
        OutputFormat::Text | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(output)?)
        }
    }
    Ok(())
}

fn print_human(config: &ComposedConfig) -> Result<(), Failure> {
    let or_dash = |value: Option<&str>| value.unwrap_or("-").to_string();

    println!(
        "Compiler:      {} {}",
        or_dash(config.compiler()),
        config.compiler_version().unwrap_or("")
    );
    println!("Platform:      {}", or_dash(config.platform()));
    println!("Stdlib:        {}", or_dash(config.stdlib()));
    println!("Build type:    {}", or_dash(config.build_type()));
    println!("Linker:        {}", or_dash(config.linker()));
    if !config.sanitizers().is_empty() {
        let sanitizers: Vec<&str> = config.sanitizers().iter().map(String::as_str).collect();
        println!("Sanitizers:    {}", sanitizers.join(", "));
    }
    println!("Compile flags: {}", config.compile_flags().join(" "));
    println!("Link flags:    {}", config.link_flags().join(" "));
    println!("Defines:       {}", config.defines().join(" "));

    print_map("CMake variables", config.cmake_variables());
    print_map("Runtime environment", config.runtime_env());

    println!();
    println!("Layers:");
    for info in config.layer_info() {
        println!("  {}/{:<24} {}", info.layer_type, info.name, info.description);
    }
    println!();
    println!("Fingerprint:   {}", config.fingerprint()?);
    Ok(())
}

fn print_map(title: &str, map: &BTreeMap<String, String>) {
    if map.is_empty() {
        return;
    }
    println!();
    println!("{}:", title);
    for (key, value) in map {
        println!("  {} = {}", key, value);
    }
}

fn run_resolve(
    settings: &Settings,
    compiler: &str,
    platform: Option<&str>,
    build_type: &str,
    vars: Vec<(String, String)>,
    format: OutputFormat,
) -> Result<(), Failure> {
    let resolver = CompilerResolver::new(Arc::new(DefinitionStore::new(&settings.data_dir)));
    let config = resolver.load(compiler, platform)?;
    let vars: Vars = vars.into_iter().collect();
    let output = config.report(build_type, &vars)?;
    print_document(&output, format)
}

/// Parse a single `key=value` pair
fn parse_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid variable '{}': expected key=value", s))?;
    if key.is_empty() {
        return Err(format!("invalid variable '{}': empty key", s));
    }
    Ok((key.to_string(), value.to_string()))
}
