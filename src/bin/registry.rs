//! Spec Registry CLI
//!
//! Operator tool over the version registry: manage versions, diff them and
//! check `$ref` integrity.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use api_spec_registry::references::{find_usages, validate_references};
use api_spec_registry::registry::ApiMetadataUpdate;
use api_spec_registry::{
    ApiId, DiffEngine, DiffResult, NewVersion, RegistryConfig, SpecDocument, SpecDocuments, SpecFormat,
    VersionRegistry, VersionTag,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spec-registry")]
#[command(about = "Manage versioned OpenAPI specifications")]
struct Cli {
    /// Config file to layer over the default locations
    #[arg(short, long)]
    config: Option<String>,

    /// Storage root (overrides config)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Actor recorded in the audit trail (overrides config)
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the versions of an API
    Versions {
        #[command(subcommand)]
        command: VersionCommands,
    },

    /// Compare two versions of an API
    Diff {
        api: String,
        /// Base version
        #[arg(short, long)]
        from: String,
        /// Target version
        #[arg(short, long)]
        to: String,
        /// Strict mode - any change is breaking
        #[arg(long)]
        strict: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Inspect and rewrite `$ref` pointers
    Refs {
        #[command(subcommand)]
        command: RefCommands,
    },

    /// List registered APIs
    Apis {
        /// Print aggregate statistics instead
        #[arg(long)]
        stats: bool,
    },

    /// Show the audit trail of an API
    Audit {
        api: String,
        /// Only the most recent N records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Change the descriptive metadata of an API
    Describe {
        api: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replace the tag list (comma separated)
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },
}

#[derive(Subcommand)]
enum VersionCommands {
    /// List versions in creation order
    List { api: String },

    /// Show the metadata of one version
    Show { api: String, version: String },

    /// Create a version from a file or from an existing version
    Create {
        api: String,
        version: String,
        /// Copy this existing version
        #[arg(long, conflicts_with = "file")]
        from: Option<String>,
        /// Seed from a JSON or YAML document
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Display name when this creates the API
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        rationale: Option<String>,
        /// Stored format; defaults to `storage.default_format`
        #[arg(long, value_enum)]
        format: Option<StoredFormat>,
    },

    /// Make a version current
    SetCurrent {
        api: String,
        version: String,
        #[arg(long)]
        rationale: Option<String>,
    },

    /// Delete a non-current version
    Delete {
        api: String,
        version: String,
        #[arg(long)]
        rationale: Option<String>,
    },

    /// Verify stored documents against their checksums
    Verify {
        api: String,
        /// Version to verify (default: all)
        version: Option<String>,
    },
}

#[derive(Subcommand)]
enum RefCommands {
    /// Report references that do not resolve
    Validate {
        api: String,
        /// Version (default: current)
        #[arg(long)]
        version: Option<String>,
    },

    /// Locations referencing a component
    Usages {
        api: String,
        kind: String,
        name: String,
        #[arg(long)]
        version: Option<String>,
    },

    /// Replace every occurrence of a `$ref` string
    Rewrite {
        api: String,
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        rationale: Option<String>,
    },

    /// Rename a component and repoint its references
    Rename {
        api: String,
        kind: String,
        from: String,
        to: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        rationale: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoredFormat {
    Json,
    Yaml,
}

impl From<StoredFormat> for SpecFormat {
    fn from(format: StoredFormat) -> Self {
        match format {
            StoredFormat::Json => SpecFormat::Json,
            StoredFormat::Yaml => SpecFormat::Yaml,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = RegistryConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.storage.root = root;
    }
    let registry = VersionRegistry::from_config(&config)?;
    let actor = cli.actor.unwrap_or_else(|| config.defaults.actor.clone());

    match cli.command {
        Commands::Versions { command } => run_versions(&registry, command, &actor),

        Commands::Diff {
            api,
            from,
            to,
            strict,
            format,
        } => {
            let api = ApiId::parse(&api)?;
            let (from, to) = (VersionTag::parse(&from)?, VersionTag::parse(&to)?);
            let result = if strict {
                let old = registry.load_document(&api, &from)?;
                let new = registry.load_document(&api, &to)?;
                DiffEngine::new().strict().diff(&old.content, &new.content)
            } else {
                registry.calculate_diff(&api, &from, &to)?
            };

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Text => print_diff(&api, &from, &to, &result),
            }
            Ok(if result.has_breaking_changes() { 2 } else { 0 })
        }

        Commands::Refs { command } => run_refs(&registry, command, &actor),

        Commands::Apis { stats } => {
            if stats {
                let stats = registry.dashboard_stats()?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(0);
            }
            for api in registry.list_apis()? {
                match registry.get_api_metadata(&api) {
                    Ok(meta) => println!(
                        "{:<24} current {:<18} {} version(s)  {}",
                        api.as_str(),
                        meta.current_version.as_str(),
                        meta.versions.len(),
                        meta.name
                    ),
                    Err(e) => println!("{:<24} unreadable: {}", api, e),
                }
            }
            Ok(0)
        }

        Commands::Audit { api, limit } => {
            let api = ApiId::parse(&api)?;
            let records = registry.audit_trail(&api)?;
            let skip = limit.map(|n| records.len().saturating_sub(n)).unwrap_or(0);
            for record in records.iter().skip(skip) {
                println!("{}", serde_json::to_string(record)?);
            }
            Ok(0)
        }

        Commands::Describe {
            api,
            name,
            owner,
            description,
            tags,
        } => {
            let api = ApiId::parse(&api)?;
            let update = ApiMetadataUpdate {
                name,
                owner,
                tags,
                description,
            };
            let meta = registry.update_api_metadata(&api, update, &actor, None)?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
            Ok(0)
        }
    }
}

fn run_versions(registry: &VersionRegistry, command: VersionCommands, actor: &str) -> anyhow::Result<i32> {
    match command {
        VersionCommands::List { api } => {
            let api = ApiId::parse(&api)?;
            let meta = registry.get_api_metadata(&api)?;
            for version in &meta.versions {
                let marker = if meta.is_current(version) { "*" } else { " " };
                println!("{} {}", marker, version);
            }
        }

        VersionCommands::Show { api, version } => {
            let api = ApiId::parse(&api)?;
            let record = registry.get_version_metadata(&api, &VersionTag::parse(&version)?)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        VersionCommands::Create {
            api,
            version,
            from,
            file,
            description,
            name,
            owner,
            rationale,
            format,
        } => {
            let api = ApiId::parse(&api)?;
            let tag = VersionTag::parse(&version)?;
            let mut new = match (from, file) {
                (Some(source), _) => NewVersion::copied_from(tag, VersionTag::parse(&source)?),
                (None, Some(path)) => NewVersion::seeded(tag, read_document(&path)?),
                (None, None) => bail!("Either --from or --file is required"),
            };
            new = new.description(description).author(actor);
            if let Some(name) = name {
                new = new.api_name(name);
            }
            if let Some(owner) = owner {
                new = new.owner(owner);
            }
            if let Some(rationale) = rationale {
                new = new.rationale(rationale);
            }
            if let Some(format) = format {
                new = new.format(format.into());
            }

            let record = registry.create_version(&api, new)?;
            println!("✅ Created {} {}", api, record.version);
            if let Some(parent) = &record.parent_version {
                println!(
                    "   from {}: {} breaking change(s)",
                    parent,
                    record.changes.breaking_changes.len()
                );
            }
            if !record.validation.valid {
                println!("⚠️  Document has {} validation error(s)", record.validation.errors.len());
            }
        }

        VersionCommands::SetCurrent {
            api,
            version,
            rationale,
        } => {
            let api = ApiId::parse(&api)?;
            let meta = registry.set_current_version(&api, &VersionTag::parse(&version)?, actor, rationale.as_deref())?;
            println!("✅ {} current version is {}", api, meta.current_version);
        }

        VersionCommands::Delete {
            api,
            version,
            rationale,
        } => {
            let api = ApiId::parse(&api)?;
            let tag = VersionTag::parse(&version)?;
            registry.delete_version(&api, &tag, actor, rationale.as_deref())?;
            println!("🗑️  Deleted {} {}", api, tag);
        }

        VersionCommands::Verify { api, version } => {
            let api = ApiId::parse(&api)?;
            let versions = match version {
                Some(v) => vec![VersionTag::parse(&v)?],
                None => registry.list_versions(&api)?,
            };

            let mut all_valid = true;
            for tag in &versions {
                let report = registry.verify_version(&api, tag)?;
                if report.is_intact() {
                    println!("  ✅ {} - valid", tag);
                } else {
                    println!(
                        "  ❌ {} - INVALID (expected {}, found {})",
                        tag,
                        report.expected.short(),
                        report.actual.short()
                    );
                    all_valid = false;
                }
            }
            if !all_valid {
                return Ok(1);
            }
        }
    }
    Ok(0)
}

fn run_refs(registry: &VersionRegistry, command: RefCommands, actor: &str) -> anyhow::Result<i32> {
    match command {
        RefCommands::Validate { api, version } => {
            let api = ApiId::parse(&api)?;
            let tag = resolve_version(registry, &api, version.as_deref())?;
            let report = validate_references(&registry.load_document(&api, &tag)?.content);

            if report.valid {
                println!("✅ All references in {} {} resolve", api, tag);
                return Ok(0);
            }
            println!("❌ {} broken reference(s) in {} {}:", report.broken.len(), api, tag);
            for broken in &report.broken {
                println!("  {}", broken.reference);
                for location in &broken.locations {
                    println!("    └─ {}", location);
                }
            }
            Ok(1)
        }

        RefCommands::Usages {
            api,
            kind,
            name,
            version,
        } => {
            let api = ApiId::parse(&api)?;
            let tag = resolve_version(registry, &api, version.as_deref())?;
            let usages = find_usages(&registry.load_document(&api, &tag)?.content, &kind, &name)?;
            println!("{} usage(s) of {}/{}", usages.len(), kind, name);
            for usage in &usages {
                println!("  {}", usage.location);
            }
            Ok(0)
        }

        RefCommands::Rewrite {
            api,
            old,
            new,
            version,
            rationale,
        } => {
            let api = ApiId::parse(&api)?;
            let tag = resolve_version(registry, &api, version.as_deref())?;
            let result = registry.rewrite_document_references(&api, &tag, &old, &new, actor, rationale.as_deref())?;
            println!("✅ Rewrote {} reference(s)", result.count);
            for location in &result.locations {
                println!("  {}", location);
            }
            Ok(0)
        }

        RefCommands::Rename {
            api,
            kind,
            from,
            to,
            version,
            rationale,
        } => {
            let api = ApiId::parse(&api)?;
            let tag = resolve_version(registry, &api, version.as_deref())?;
            let result = registry.rename_component(&api, &tag, &kind, &from, &to, actor, rationale.as_deref())?;
            println!("✅ Renamed {}/{} to {} ({} reference(s) updated)", kind, from, to, result.count);
            Ok(0)
        }
    }
}

/// The given version, or the API's current one
fn resolve_version(registry: &VersionRegistry, api: &ApiId, version: Option<&str>) -> anyhow::Result<VersionTag> {
    match version {
        Some(v) => Ok(VersionTag::parse(v)?),
        None => Ok(registry.get_api_metadata(api)?.current_version),
    }
}

fn read_document(path: &Path) -> anyhow::Result<SpecDocument> {
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(SpecFormat::from_extension)
        .with_context(|| format!("Unrecognised document extension: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content = format.parse(&bytes, &path.display().to_string())?;
    Ok(SpecDocument::new(content, format))
}

fn print_diff(api: &ApiId, from: &VersionTag, to: &VersionTag, result: &DiffResult) {
    println!("🔍 {}: {} -> {}", api, from, to);
    println!();

    if result.is_empty() {
        println!("✅ No changes");
        return;
    }

    for change in &result.breaking {
        println!("❌ {}: {}", change.target, change.description);
    }
    for change in &result.non_breaking {
        println!("✅ {}: {}", change.target, change.description);
    }

    let summary = &result.summary;
    println!();
    println!(
        "Endpoints: +{} -{} ~{}   Schemas: +{} -{} ~{}   Security: {}",
        summary.endpoints_added,
        summary.endpoints_removed,
        summary.endpoints_modified,
        summary.schemas_added,
        summary.schemas_removed,
        summary.schemas_modified,
        summary.security_changes
    );
    println!(
        "{} breaking, {} non-breaking",
        summary.breaking, summary.non_breaking
    );
}
