//! Halyard CLI entrypoint.
//!
//! This is the main entrypoint for the halyard command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use halyard::cli::{Cli, Commands, LogFormat, OutputFormatter, ValuesArgs};
use halyard::cluster::{ClusterApi, InMemoryCluster, KubeClient};
use halyard::config::{
    is_valid_name, ClusterBackend, ConfigParser, ConfigValidator, StateBackend,
};
use halyard::error::{ConfigError, HalyardError, Result};
use halyard::planner::{CancelToken, ExecutorSettings};
use halyard::reconciler::{Reconciler, ReleaseOutcome, ReleaseRequest};
use halyard::render::{Bundle, ReleaseContext, Renderer, Values, ValuesSource};
use halyard::state::{
    InMemoryReleaseStore, LocalReleaseStore, ReleaseKey, ReleaseStore, STATE_DIR,
};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter.
const LOG_ENV: &str = "HALYARD_LOG";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_retryable() {
                eprintln!("This error is transient; running the command again may succeed.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Everything a release command needs.
struct Context {
    store: Box<dyn ReleaseStore>,
    cluster: Box<dyn ClusterApi>,
    settings: ExecutorSettings,
    cancel: CancelToken,
    namespace: String,
}

impl Context {
    fn reconciler(&self) -> Reconciler<'_, dyn ReleaseStore, dyn ClusterApi> {
        Reconciler::new(&*self.store, &*self.cluster)
            .with_settings(self.settings.clone())
            .with_cancel_token(self.cancel.clone())
    }

    fn key(&self, release: &str) -> Result<ReleaseKey> {
        ReleaseKey::parse(&self.namespace, release)
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let namespace = cli.namespace;

    match cli.command {
        Commands::Create { name, path, force } => cmd_create(&name, &path, force, &formatter),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_deref(), warnings, &formatter),
        Commands::Template {
            release,
            bundle,
            values,
        } => cmd_template(cli.config.as_deref(), namespace, &release, &bundle, &values, &formatter),
        command => {
            let ctx = load_context(cli.config.as_deref(), namespace)?;
            watch_interrupt(ctx.cancel.clone());
            run_release_command(&ctx, command, &formatter).await
        }
    }
}

/// Dispatches commands that need the release store and cluster.
async fn run_release_command(ctx: &Context, command: Commands, formatter: &OutputFormatter) -> Result<()> {
    match command {
        Commands::Install {
            release,
            bundle,
            values,
        } => {
            let bundle = Bundle::load(&bundle)?;
            let req = ReleaseRequest {
                key: ctx.key(&release)?,
                values: resolve_values(&bundle, &values)?,
                bundle: &bundle,
            };
            finish(ctx.reconciler().install(req).await?, formatter)
        }
        Commands::Upgrade {
            release,
            bundle,
            install,
            values,
        } => {
            let bundle = Bundle::load(&bundle)?;
            let req = ReleaseRequest {
                key: ctx.key(&release)?,
                values: resolve_values(&bundle, &values)?,
                bundle: &bundle,
            };
            finish(ctx.reconciler().upgrade(req, install).await?, formatter)
        }
        Commands::Rollback { release, revision } => {
            let key = ctx.key(&release)?;
            finish(ctx.reconciler().rollback(&key, revision).await?, formatter)
        }
        Commands::Uninstall { release } => {
            let key = ctx.key(&release)?;
            finish(ctx.reconciler().uninstall(&key).await?, formatter)
        }
        Commands::History { release, max } => {
            let key = ctx.key(&release)?;
            let revisions = ctx.store.history(&key, max).await?;
            emit(&formatter.format_history(&revisions))
        }
        Commands::Status { release } => {
            let key = ctx.key(&release)?;
            let report = ctx.reconciler().status(&key).await?;
            emit(&formatter.format_report(&report))
        }
        Commands::List { all_namespaces } => {
            let mut releases = ctx.store.list_releases().await?;
            if !all_namespaces {
                releases.retain(|r| r.key.namespace == ctx.namespace);
            }
            emit(&formatter.format_list(&releases))
        }
        Commands::Diff {
            release,
            bundle,
            detailed,
            values,
        } => {
            let bundle = Bundle::load(&bundle)?;
            let req = ReleaseRequest {
                key: ctx.key(&release)?,
                values: resolve_values(&bundle, &values)?,
                bundle: &bundle,
            };
            let preview = ctx.reconciler().plan(&req).await?;
            emit(&formatter.format_plan(&preview, detailed))
        }
        Commands::Create { .. } | Commands::Validate { .. } | Commands::Template { .. } => Err(
            HalyardError::internal("command does not use the release store"),
        ),
    }
}

/// Prints an outcome and turns a failed one into an error.
fn finish(outcome: ReleaseOutcome, formatter: &OutputFormatter) -> Result<()> {
    emit(&formatter.format_outcome(&outcome))?;
    outcome.into_result().map(|_| ())
}

/// Scaffolds a new bundle.
fn cmd_create(name: &str, parent: &Path, force: bool, formatter: &OutputFormatter) -> Result<()> {
    if !is_valid_name(name) {
        return Err(ConfigError::validation(
            format!("'{name}' must be lowercase alphanumeric with hyphens, starting with a letter"),
            "name",
        )
        .into());
    }

    let written = Bundle::scaffold(parent, name, force)?;
    for path in &written {
        eprintln!("Created: {}", path.display());
    }

    emit(&formatter.success(&format!("Bundle '{name}' created")))?;
    eprintln!("\nNext steps:");
    eprintln!("  1. Edit {name}/values.yaml and the files in {name}/templates/");
    eprintln!("  2. Run 'halyard template {name} ./{name}' to check the rendered manifests");
    eprintln!("  3. Run 'halyard install {name} ./{name}' to deploy it");
    Ok(())
}

/// Validates the configuration file.
fn cmd_validate(config_path: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config, source) = config_parser(config_path).load_or_default(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;

    match &source {
        Some(path) => eprintln!("Configuration: {}", path.display()),
        None => eprintln!("Configuration: built-in defaults"),
    }
    if show_warnings && !result.warnings.is_empty() {
        eprintln!("\nWarnings:");
        for warning in &result.warnings {
            eprintln!("  - {warning}");
        }
    }

    eprintln!("\nConfiguration summary:");
    eprintln!("  Namespace: {}", config.namespace);
    eprintln!("  State backend: {}", config.state.backend);
    eprintln!("  Cluster backend: {}", config.cluster.backend);
    eprintln!("  History limit: {}", config.state.history_max);

    emit(&formatter.success("Configuration is valid"))
}

/// Renders a bundle locally without touching the store or cluster.
fn cmd_template(
    config_path: Option<&Path>,
    namespace: Option<String>,
    release: &str,
    bundle: &Path,
    values: &ValuesArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = config_parser(config_path).load_or_default(config_path)?;
    let namespace = namespace.unwrap_or(config.namespace);
    let key = ReleaseKey::parse(&namespace, release)?;

    let bundle = Bundle::load(bundle)?;
    let values = resolve_values(&bundle, values)?;
    let context = ReleaseContext {
        name: key.name,
        namespace: key.namespace,
        revision: 1,
    };

    let manifests = Renderer::new().render(&bundle, &values, &context)?;
    emit(&formatter.format_manifests(&manifests))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads configuration and creates the release store and cluster client.
fn load_context(config_path: Option<&Path>, namespace: Option<String>) -> Result<Context> {
    let (config, source) = config_parser(config_path).load_or_default(config_path)?;
    ConfigValidator::new().validate(&config)?;

    let namespace = namespace.unwrap_or_else(|| config.namespace.clone());
    if !is_valid_name(&namespace) {
        return Err(ConfigError::validation(
            format!("namespace '{namespace}' must be lowercase alphanumeric with hyphens, starting with a letter"),
            "namespace",
        )
        .into());
    }

    let base = source
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(std::env::current_dir, |p| Ok(p.to_path_buf()))?;
    let state_dir = config
        .state
        .path
        .as_ref()
        .map_or_else(|| base.join(STATE_DIR), |p| base.join(p));

    // Create release store based on config
    let store: Box<dyn ReleaseStore> = match config.state.backend {
        StateBackend::Local => Box::new(
            LocalReleaseStore::with_base_dir(state_dir.clone()).with_history_max(config.state.history_max),
        ),
        StateBackend::Memory => {
            Box::new(InMemoryReleaseStore::new().with_history_max(config.state.history_max))
        }
    };

    let cluster: Box<dyn ClusterApi> = match config.cluster.backend {
        ClusterBackend::Local => {
            let snapshot = config
                .cluster
                .snapshot
                .as_ref()
                .map_or_else(|| state_dir.join("cluster.json"), |p| base.join(p));
            Box::new(InMemoryCluster::with_snapshot(snapshot)?)
        }
        ClusterBackend::Kubernetes => {
            let server = config.cluster.server.as_deref().ok_or_else(|| {
                ConfigError::validation("required when cluster.backend is kubernetes", "cluster.server")
            })?;
            let token = match ConfigParser::cluster_token(&config) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!("{e}; sending unauthenticated requests");
                    None
                }
            };
            Box::new(KubeClient::with_timeout(
                server,
                token,
                &config.cluster.field_manager,
                config.cluster.timeout_secs,
            )?)
        }
    };

    info!(
        "Using {} release store and {} cluster",
        store.backend_type(),
        cluster.backend_type()
    );

    let settings = ExecutorSettings::from(&config.reconcile);

    Ok(Context {
        store,
        cluster,
        settings,
        cancel: CancelToken::new(),
        namespace,
    })
}

/// Builds a parser that reads `.env` next to an explicit config file.
fn config_parser(config_path: Option<&Path>) -> ConfigParser {
    config_path
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map_or_else(ConfigParser::new, |dir| ConfigParser::new().with_base_path(dir))
}

/// Cancels `cancel` on Ctrl-C; the running plan stops before its next tier.
fn watch_interrupt(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current tier");
            cancel.cancel();
        }
    });
}


/// Merges bundle defaults, values files and `--set` overrides.
fn resolve_values(bundle: &Bundle, args: &ValuesArgs) -> Result<Values> {
    let mut source = ValuesSource::new(bundle.defaults.clone());
    for file in &args.files {
        source = source.with_file(file)?;
    }
    for spec in &args.set {
        source = source.with_override(spec)?;
    }
    Ok(source.resolve())
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
