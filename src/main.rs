use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use toolbox::config::LlmSettings;
use toolbox::generate::{
    ChatClient, GeneratedArtifact, GenerationOrchestrator, GenerationRequest, StructuralValidator,
};
use toolbox::library::{self, ScriptLibrary};
use toolbox::packages;
use toolbox::runner;
use toolbox::versions::{EditorKind, VersionStore};

#[derive(Parser, Debug)]
#[command(
    name = "toolbox",
    about = "Generate, validate and run small Python file-processing scripts",
    version
)]
struct Cli {
    /// Directory holding the script library
    #[arg(long, global = true, default_value = "scripts")]
    scripts_dir: PathBuf,

    /// Python interpreter used to run scripts and install packages
    #[arg(long, global = true, default_value = packages::default_interpreter())]
    python: String,

    /// Show debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the configured LLM for a new script, or to edit one
    Generate(GenerateArgs),
    /// Check a script against the library contract
    Validate { file: PathBuf },
    /// List library scripts, optionally filtered
    List { query: Option<String> },
    /// Run a library script on input files
    Run(RunArgs),
    /// Show stored backups of a script
    Versions { script: String },
    /// Restore a script from a backup
    Restore { script: String, version: u32 },
    /// Manage LLM endpoint profiles
    #[command(subcommand)]
    Llm(LlmCommand),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// What the script should do (or what to change, with --edit)
    prompt: String,
    /// Existing script to modify
    #[arg(long)]
    edit: Option<PathBuf>,
    /// Install detected third-party packages after saving
    #[arg(long)]
    install: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Script filename or display name
    script: String,
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Parameter override, repeatable
    #[arg(long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,
}

#[derive(Subcommand, Debug)]
enum LlmCommand {
    List,
    Add {
        name: String,
        endpoint: String,
        model: String,
        #[arg(long, default_value = "")]
        api_key: String,
    },
    Use { id: String },
    Remove { id: String },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    toolbox::logging::init(cli.verbose);

    match &cli.command {
        Commands::Generate(args) => generate(&cli, args).await,
        Commands::Validate { file } => validate(file),
        Commands::List { query } => list(&cli.scripts_dir, query.as_deref()),
        Commands::Run(args) => run(&cli, args),
        Commands::Versions { script } => show_versions(&cli.scripts_dir, script),
        Commands::Restore { script, version } => restore(&cli.scripts_dir, script, *version),
        Commands::Llm(command) => llm(command),
    }
}

fn version_store(scripts_dir: &Path) -> Result<VersionStore> {
    VersionStore::new(scripts_dir.join(".script_versions"))
}

async fn generate(cli: &Cli, args: &GenerateArgs) -> Result<()> {
    let settings = LlmSettings::load();
    let profile = settings
        .current()
        .ok_or_else(|| anyhow!("No LLM profile configured. Add one with `toolbox llm add`."))?;
    let client = ChatClient::from_profile(profile)?;

    let request = match &args.edit {
        Some(path) => {
            let existing = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            GenerationRequest::edit(args.prompt.clone(), existing)
        }
        None => GenerationRequest::create(args.prompt.clone()),
    };

    eprintln!("  Using {} ({})", profile.name, profile.model);
    let orchestrator = GenerationOrchestrator::new(client, profile.model.clone());
    let artifact = orchestrator
        .generate(&request, |attempt, max| {
            if attempt == 1 {
                eprintln!("  Generating script...");
            } else {
                eprintln!("  Retrying ({}/{})...", attempt, max);
            }
        })
        .await?;

    let store = version_store(&cli.scripts_dir)?;
    let path = match &args.edit {
        Some(path) => {
            store.create_backup(path, &args.prompt, EditorKind::Llm)?;
            write_script(path, &artifact.code)?;
            path.clone()
        }
        None => {
            let target = ScriptLibrary::new(&cli.scripts_dir).artifact_path(&artifact);
            store.create_backup(&target, "Before regeneration", EditorKind::Auto)?;
            library::save_artifact(&cli.scripts_dir, &artifact)?
        }
    };
    eprintln!("  Saved \"{}\" to {}", artifact.name, path.display());

    report_packages(cli, &artifact, args.install)
}

fn write_script(path: &Path, code: &str) -> Result<()> {
    let mut content = code.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn report_packages(cli: &Cli, artifact: &GeneratedArtifact, install: bool) -> Result<()> {
    if artifact.external_packages.is_empty() {
        return Ok(());
    }
    eprintln!("  Requires: {}", artifact.external_packages.join(", "));
    for package in &artifact.external_packages {
        let argv = packages::install_command(&cli.python, package);
        if !install {
            eprintln!("    {}", argv.join(" "));
            continue;
        }
        eprintln!("  Installing {}...", packages::distribution_for(package));
        let code = runner::run_streaming(&argv, |line| eprintln!("{}", line))?;
        if code != 0 {
            bail!("Installing {} failed (exit code {})", package, code);
        }
    }
    Ok(())
}

fn validate(file: &Path) -> Result<()> {
    let code =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let validator = StructuralValidator::new();
    let result = validator.validate_structure(&code);
    if !result.is_valid() {
        println!("✗ {}", file.display());
        println!("  {}", result.error_message());
        std::process::exit(1);
    }

    let metadata = validator.extract_metadata(&code);
    println!("✓ {}", file.display());
    println!("  Name:        {}", metadata.name);
    println!("  Description: {}", metadata.description);
    let external = validator.detect_external_packages(&code);
    if !external.is_empty() {
        println!("  Packages:    {}", external.join(", "));
    }
    Ok(())
}

fn list(scripts_dir: &Path, query: Option<&str>) -> Result<()> {
    let mut library = ScriptLibrary::new(scripts_dir);
    library.load()?;
    let scripts = library.filter(query.unwrap_or_default());
    if scripts.is_empty() {
        println!("No scripts found in {}", scripts_dir.display());
        return Ok(());
    }
    for script in scripts {
        println!("{:<28} {}", script.filename, script.name);
        println!("{:<28} {}", "", script.description);
        if !script.input_types.is_empty() {
            println!("{:<28} Input: {}", "", script.input_types);
        }
    }
    Ok(())
}

fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let mut library = ScriptLibrary::new(&cli.scripts_dir);
    library.load()?;
    let script = library
        .find(&args.script)
        .ok_or_else(|| anyhow!("No script named '{}'", args.script))?;

    let params = runner::resolve_params(script, &args.params)?;
    let output_dir = runner::output_dir_for(script);
    if !script.accepts_multiple_files {
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        if args.files.len() > 1 {
            eprintln!("  {} takes one file; using {}", script.name, args.files[0].display());
        }
    }
    let argv = runner::build_command(&cli.python, script, &args.files, &params, &output_dir);

    eprintln!("  Running {}...", script.name);
    let mut missing = None;
    let code = runner::run_streaming(&argv, |line| {
        println!("{}", line);
        if missing.is_none() {
            missing = runner::missing_module(line);
        }
    })?;

    if let Some(module) = missing {
        eprintln!("  Missing package '{}'. Install it with:", module);
        eprintln!(
            "    {}",
            packages::install_command(&cli.python, &module).join(" ")
        );
    }
    if code != 0 {
        std::process::exit(code);
    }
    eprintln!("  Done. Outputs: {}", output_dir.display());
    Ok(())
}

fn script_path(scripts_dir: &Path, script: &str) -> PathBuf {
    let stem = script.strip_suffix(".py").unwrap_or(script);
    scripts_dir.join(format!("{}.py", stem))
}

fn show_versions(scripts_dir: &Path, script: &str) -> Result<()> {
    let store = version_store(scripts_dir)?;
    let stem = script.strip_suffix(".py").unwrap_or(script);
    let versions = store.versions(stem);
    if versions.is_empty() {
        println!("No backups for {}", stem);
        return Ok(());
    }
    for version in versions {
        let when = version
            .created_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| version.timestamp.clone());
        println!(
            "v{:<4} {}  [{}] {}",
            version.number, when, version.editor, version.change_description
        );
    }
    Ok(())
}

fn restore(scripts_dir: &Path, script: &str, version: u32) -> Result<()> {
    let store = version_store(scripts_dir)?;
    let path = script_path(scripts_dir, script);
    store.restore(&path, version)?;
    eprintln!("  Restored {} to v{}", path.display(), version);
    Ok(())
}

fn llm(command: &LlmCommand) -> Result<()> {
    let mut settings = LlmSettings::load();
    match command {
        LlmCommand::List => {
            for profile in settings.all() {
                let marker = if settings.is_current(&profile.id) { "*" } else { " " };
                println!(
                    "{} {:<20} {} ({}) key: {}",
                    marker,
                    profile.id,
                    profile.endpoint,
                    profile.model,
                    profile.masked_api_key()
                );
            }
            if let Some(path) = settings.path() {
                println!("\nConfig: {}", path.display());
            }
        }
        LlmCommand::Add {
            name,
            endpoint,
            model,
            api_key,
        } => {
            let id = settings.add(name, endpoint, model, api_key)?;
            eprintln!("  Added {}", id);
        }
        LlmCommand::Use { id } => {
            settings.set_current(id)?;
            eprintln!("  Now using {}", id);
        }
        LlmCommand::Remove { id } => {
            settings.delete(id)?;
            eprintln!("  Removed {}", id);
        }
    }
    Ok(())
}
