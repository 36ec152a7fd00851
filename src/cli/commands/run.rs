//! Main phase: install omni and drive its subcommands
//!
//! A linear sequence with no branching back: credential export, cache
//! restore, install, version gate, trust, auto-bootstrap suppression,
//! check, up, reshim, environment configuration. The first failure aborts
//! everything after it.

use crate::cache::{self, CacheOptions, CacheStore, DirStore};
use crate::cli::args::RunArgs;
use crate::error::{SetupError, SetupResult};
use crate::home;
use crate::install::{self, Installer, ReleaseInstaller};
use crate::omni::OmniCli;
use crate::retry::RetryConfig;
use crate::version::VersionGate;
use crate::workflow::{self, GithubStateStore, StateStore};
use tracing::info;

/// Execute the main phase
pub async fn run(args: RunArgs) -> SetupResult<()> {
    let mut state = GithubStateStore::new();
    let cli = OmniCli::system();
    let store = DirStore::new();
    execute(&args, &mut state, &cli, &store, &ReleaseInstaller).await
}

async fn execute(
    args: &RunArgs,
    state: &mut dyn StateStore,
    cli: &OmniCli,
    store: &dyn CacheStore,
    installer: &dyn Installer,
) -> SetupResult<()> {
    let token = install::resolve_token(&args.github_token);
    if let Some(token) = &token {
        let already_present = std::env::var_os("GITHUB_TOKEN").is_some_and(|v| !v.is_empty());
        if !already_present {
            workflow::export_var("GITHUB_TOKEN", token)?;
        }
    }

    if args.cache {
        let options = CacheOptions {
            write: args.cache_write,
            check_hash: args.cache_check_hash,
            key_prefix: args.cache_key_prefix.clone(),
        };
        cache::restore(&options, state, store).await?;
    } else {
        workflow::set_output("cache-hit", "false")?;
    }

    installer.install(&args.version, token).await?;

    let version = cli.version().await?;
    let gate = VersionGate::new(&version)?;
    info!("omni {version} installed");

    let trusted = if gate.use_trust_subcommand() {
        cli.trust().await?
    } else {
        home::set_org()
    };

    if gate.disable_auto_bootstrap() {
        home::disable_auto_bootstrap().await?;
    }

    if args.check {
        if gate.supports_check() {
            cli.check(&args.check_patterns, &args.check_ignore, &args.check_select)
                .await?;
        } else {
            workflow::warning(&format!(
                "omni config check is not available in omni {version}, skipping"
            ));
        }
    }

    if args.up {
        let retry = RetryConfig {
            retries: args.up_retries,
            base_delay_ms: args.up_retry_delay,
            jitter_pct: args.up_retry_jitter,
            backoff_multiplier: args.up_retry_backoff,
        };
        let code = cli.up(&args.up_args, trusted, &retry).await?;
        if code != 0 {
            return Err(SetupError::UpFailed(code));
        }
    }

    if gate.run_reshim() {
        cli.reshim().await?;
    }

    home::set_env(&gate, cli, state).await
}
