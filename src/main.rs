// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotsmith::{
    apply::{render_diff, render_status},
    config::{Config, Settings, TreeRoot},
    context::RenderContext,
    path,
    plan::{EntryFailure, Plan, Planner},
    scan::{self, Attributes, Scanner, SourceEntry},
    state::StateStore,
    template::Renderer,
    vault::{GpgVault, Vault},
    Executor,
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use glob::Pattern;
use inquire::Text;
use std::{fs, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotsmith [options] <command> [target]...",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Alternate configuration file.
    #[arg(short, long, value_name = "path", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<i32> {
        match self.command {
            Command::Diff(opts) => run_diff(self.config, opts),
            Command::Apply(opts) => run_apply(self.config, opts),
            Command::Status(opts) => run_status(self.config, opts),
            Command::Init(opts) => run_init(self.config, opts),
            Command::Add(opts) => run_add(self.config, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show what apply would change, without changing anything.
    #[command(override_usage = "dotsmith diff [target]...")]
    Diff(SelectOptions),

    /// Synchronize the target directory with the source tree.
    #[command(override_usage = "dotsmith apply [target]...")]
    Apply(SelectOptions),

    /// List differing entries, one line each.
    #[command(override_usage = "dotsmith status [target]...")]
    Status(SelectOptions),

    /// Interactively write a starter configuration file.
    #[command(override_usage = "dotsmith init [options]")]
    Init(InitOptions),

    /// Import live target files into the source tree.
    #[command(override_usage = "dotsmith add [options] <path>...")]
    Add(AddOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SelectOptions {
    /// Glob patterns selecting target paths; empty selects everything.
    #[arg(value_name = "target")]
    pub targets: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Accept defaults without prompting.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Live target files to import.
    #[arg(value_name = "path", required = true)]
    pub paths: Vec<PathBuf>,

    /// Import as a template.
    #[arg(short, long)]
    pub template: bool,

    /// Encrypt for the configured recipient before storing.
    #[arg(short, long)]
    pub encrypt: bool,

    /// Force restricted permissions even if the live file is world-readable.
    #[arg(short, long)]
    pub private: bool,
}

fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    match run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(2);
        }
    }
}

fn run() -> Result<i32> {
    Cli::parse().run()
}

/// Everything one synchronization pass needs, loaded once.
struct Engine {
    config: Config,
    context: RenderContext,
    vault: GpgVault,
    entries: Vec<SourceEntry>,
    state_path: PathBuf,
}

fn load_engine(config_path: Option<PathBuf>) -> Result<Engine> {
    let config = load_config(config_path)?;
    let entries = Scanner::new(config.settings.source_dir.as_path())
        .scan()
        .context("scanning source tree failed")?;

    // INVARIANT: A missing decryption tool is an environment problem;
    // surface it before planning touches the first encrypted entry.
    if entries.iter().any(|entry| entry.attributes.encrypted) {
        GpgVault::probe()?;
    }

    let context = RenderContext::from_probes(&config.data);
    let vault = GpgVault::new(config.settings.recipient.clone());
    let state_path = path::default_state_path()?;

    Ok(Engine {
        config,
        context,
        vault,
        entries,
        state_path,
    })
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let config_path = match config_path {
        Some(path) => path,
        None => path::default_config_path()?,
    };

    if !config_path.exists() {
        info!("no configuration at {:?}, using defaults", config_path);
        return default_config();
    }

    let contents = fs::read_to_string(&config_path)
        .with_context(|| format!("cannot read configuration {config_path:?}"))?;

    contents
        .parse()
        .with_context(|| format!("cannot parse configuration {config_path:?}"))
}

fn default_config() -> Result<Config> {
    Ok(Config {
        settings: Settings {
            source_dir: TreeRoot::new(path::default_source_dir()?),
            target_dir: TreeRoot::new(path::home_dir()?),
            recipient: None,
        },
        data: toml::Table::new(),
    })
}

fn parse_filters(targets: &[String]) -> Result<Vec<Pattern>> {
    targets
        .iter()
        .map(|target| {
            Pattern::new(target).with_context(|| format!("bad target pattern {target:?}"))
        })
        .collect()
}

fn build_plan(engine: &Engine, targets: &[String]) -> Result<Plan> {
    let filters = parse_filters(targets)?;
    let renderer = Renderer::new(&engine.context);
    let planner = Planner::new(
        engine.config.settings.target_dir.as_path(),
        renderer,
        &engine.vault,
    );

    Ok(planner.plan(&engine.entries, &filters)?)
}

fn report_failures(failures: &[EntryFailure]) {
    for failure in failures {
        error!(
            "{:?} -> {:?}: {}",
            failure.source_path, failure.target_path, failure.cause
        );
    }
}

fn run_diff(config_path: Option<PathBuf>, opts: SelectOptions) -> Result<i32> {
    let engine = load_engine(config_path)?;
    let plan = build_plan(&engine, &opts.targets)?;
    let store = StateStore::load(&engine.state_path)?;

    print!(
        "{}",
        render_diff(&plan, engine.config.settings.target_dir.as_path(), &store)
    );

    report_failures(&plan.failures);
    Ok(if plan.failures.is_empty() { 0 } else { 1 })
}

fn run_status(config_path: Option<PathBuf>, opts: SelectOptions) -> Result<i32> {
    let engine = load_engine(config_path)?;
    let plan = build_plan(&engine, &opts.targets)?;
    let store = StateStore::load(&engine.state_path)?;

    print!("{}", render_status(&plan, &store));

    report_failures(&plan.failures);
    Ok(if plan.failures.is_empty() { 0 } else { 1 })
}

fn run_apply(config_path: Option<PathBuf>, opts: SelectOptions) -> Result<i32> {
    let engine = load_engine(config_path)?;
    let plan = build_plan(&engine, &opts.targets)?;

    let executor = Executor::new(engine.config.settings.target_dir.as_path());
    let mut report = executor.execute(&plan)?;

    // Scripts run last: their side effects may depend on every file write
    // having landed.
    let mut store = StateStore::load(&engine.state_path)?;
    let outcomes = dotsmith::apply::run_scripts(&plan.scripts, &mut store, &engine.state_path);
    report.absorb_scripts(outcomes);

    report_failures(&report.failures);
    println!("{}", report.summary());

    Ok(if report.is_success() { 0 } else { 1 })
}

fn run_init(config_path: Option<PathBuf>, opts: InitOptions) -> Result<i32> {
    let config_path = match config_path {
        Some(path) => path,
        None => path::default_config_path()?,
    };

    let default_source = path::default_source_dir()?;
    let default_target = path::home_dir()?;

    let config = if opts.yes {
        default_config()?
    } else {
        let source_dir = Text::new("source directory")
            .with_default(default_source.to_string_lossy().as_ref())
            .prompt()?;
        let target_dir = Text::new("target directory")
            .with_default(default_target.to_string_lossy().as_ref())
            .prompt()?;
        let recipient = Text::new("GPG recipient key id (empty for none)")
            .with_default("")
            .prompt()?;

        Config {
            settings: Settings {
                source_dir: TreeRoot::expand(&source_dir)?,
                target_dir: TreeRoot::expand(&target_dir)?,
                recipient: (!recipient.trim().is_empty()).then(|| recipient.trim().to_string()),
            },
            data: toml::Table::new(),
        }
    };

    dotsmith::fsutil::write_atomic(&config_path, config.to_string().as_bytes(), 0o644)?;
    mkdirp::mkdirp(config.settings.source_dir.as_path())
        .with_context(|| format!("cannot create {:?}", config.settings.source_dir))?;

    info!("configuration written to {:?}", config_path);
    Ok(0)
}

fn run_add(config_path: Option<PathBuf>, opts: AddOptions) -> Result<i32> {
    let config = load_config(config_path)?;
    let vault = GpgVault::new(config.settings.recipient.clone());
    let target_root = config.settings.target_dir.as_path();
    let source_root = config.settings.source_dir.as_path();

    if opts.encrypt {
        GpgVault::probe()?;
    }

    for target in &opts.paths {
        let relative = target.strip_prefix(target_root).map_err(|_| {
            anyhow!("{target:?} is not under the target directory {target_root:?}")
        })?;

        let metadata = fs::metadata(target)
            .with_context(|| format!("cannot read {target:?}"))?;
        if !metadata.is_file() {
            warn!("skip {target:?}: only regular files can be imported");
            continue;
        }

        let attributes = Attributes {
            template: opts.template,
            encrypted: opts.encrypt,
            private: opts.private || is_owner_only(&metadata),
            executable: is_executable(&metadata),
            exact: false,
        };

        let mut source_path = source_root.to_path_buf();
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                let name = component
                    .as_os_str()
                    .to_str()
                    .ok_or_else(|| anyhow!("{target:?} has a non-UTF-8 path component"))?;
                source_path.push(scan::encode_dir_name(name));
            }
        }

        let name = relative
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("{target:?} has a non-UTF-8 file name"))?;
        source_path.push(scan::encode_file_name(name, attributes));

        let mut content = fs::read(target).with_context(|| format!("cannot read {target:?}"))?;
        if opts.encrypt {
            content = vault.encrypt(&content)?;
        }

        let mode = if attributes.private { 0o600 } else { 0o644 };
        dotsmith::fsutil::write_atomic(&source_path, &content, mode)?;
        info!("added {:?} as {:?}", target, source_path);
    }

    Ok(0)
}

fn is_executable(metadata: &fs::Metadata) -> bool {
    dotsmith::fsutil::read_mode(metadata)
        .map(|mode| mode & 0o111 != 0)
        .unwrap_or(false)
}

fn is_owner_only(metadata: &fs::Metadata) -> bool {
    dotsmith::fsutil::read_mode(metadata)
        .map(|mode| mode & 0o077 == 0)
        .unwrap_or(false)
}
