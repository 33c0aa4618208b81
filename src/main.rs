use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lighthouse::cluster::{MemoryStore, ResourceClient};
use lighthouse::config::ConfigAgent;
use lighthouse::controller::Controller;
use lighthouse::jobs::{Activity, BuildNumberLauncher, Job, PipelineDefaults, PipelineLauncher};
use lighthouse::keeper::{self, ChildFactory, History, Keeper, MergeController, OwnerFanout};
use lighthouse::plugins::{LgtmPlugin, OverridePlugin, PluginRegistry, TriggerPlugin};
use lighthouse::retrier::{PipelineRun, Retrier};
use lighthouse::scm::{
    OwnerRoutedClient, OwnerTokensDir, SearchQuery, SharedScmClient, TokenClientFactory, new_client,
};
use lighthouse::server::{AppState, build_router};
use lighthouse::settings::{Credentials, ServerSettings};
use lighthouse::trigger::Trigger;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lighthouse=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "lighthouse failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = ServerSettings::from_env().context("reading settings from the environment")?;

    let report_url_base = settings.report_url_base.clone();
    let config = Arc::new(
        ConfigAgent::load(&settings.config_path)
            .await
            .with_context(|| format!("loading config from {}", settings.config_path.display()))?
            .with_overlay(move |config| {
                if let Some(base) = &report_url_base {
                    config.pipeline.report_url_base = Some(base.clone());
                }
            }),
    );
    let current = config.current();
    let namespace = current.pipeline.namespace.clone();

    let jobs: Arc<dyn ResourceClient<Job>> = Arc::new(MemoryStore::<Job>::new());
    let activities: Arc<dyn ResourceClient<Activity>> = Arc::new(MemoryStore::<Activity>::new());
    let runs: Arc<dyn ResourceClient<PipelineRun>> = Arc::new(MemoryStore::<PipelineRun>::new());
    let launcher: Arc<dyn PipelineLauncher> = Arc::new(
        BuildNumberLauncher::new()
            .with_activities(activities.clone(), namespace.clone())
            .with_defaults(PipelineDefaults {
                service_account: settings.service_account.clone(),
                image: settings.default_image.clone(),
            }),
    );

    let history = Arc::new(
        History::new(current.keeper.history_capacity, current.keeper.history_uri.as_deref())
            .context("opening keeper history")?,
    );

    let (scm, keeper): (SharedScmClient, Arc<dyn MergeController>) = match &settings.credentials {
        Credentials::Token(token) => {
            let scm = new_client(settings.git_kind, &settings.git_server, &settings.bot_name, token)
                .context("creating host client")?;
            let trigger = Arc::new(Trigger::new(scm.clone(), jobs.clone(), launcher.clone()));
            let keeper: Arc<dyn MergeController> = Arc::new(Keeper::new(config.clone(), trigger, history.clone()));
            (scm, keeper)
        }
        Credentials::AppSecretDir(dir) => {
            info!(dir = %dir.display(), "using per-owner installation tokens");
            let tokens = OwnerTokensDir::new(settings.git_server.clone(), dir.clone());

            let (kind, server, bot) = (settings.git_kind, settings.git_server.clone(), settings.bot_name.clone());
            let clients: TokenClientFactory = Arc::new(move |token: &str| new_client(kind, &server, &bot, token));
            let scm: SharedScmClient = Arc::new(OwnerRoutedClient::new(
                settings.bot_name.clone(),
                tokens.clone(),
                clients.clone(),
            ));

            let (child_config, child_jobs, child_launcher, child_history) =
                (config.clone(), jobs.clone(), launcher.clone(), history.clone());
            let factory: ChildFactory = Arc::new(move |owner: &str, token: String, queries: Vec<SearchQuery>| {
                let client = clients(&token)?;
                info!(owner, queries = queries.len(), "starting keeper for owner");
                let trigger = Arc::new(Trigger::new(client, child_jobs.clone(), child_launcher.clone()));
                let child: Arc<dyn MergeController> =
                    Arc::new(Keeper::scoped(child_config.clone(), trigger, child_history.clone(), queries));
                Ok(child)
            });
            let keeper: Arc<dyn MergeController> =
                Arc::new(OwnerFanout::new(config.clone(), tokens, history.clone(), factory));
            (scm, keeper)
        }
    };

    let trigger = Arc::new(Trigger::new(scm.clone(), jobs.clone(), launcher));
    let plugins = PluginRegistry::new()
        .register(Arc::new(TriggerPlugin::new(trigger)))
        .register(Arc::new(LgtmPlugin::new(scm.clone())))
        .register(Arc::new(OverridePlugin::new(scm.clone(), jobs.clone())));
    info!(plugins = ?plugins.names(), "registered plugins");

    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    let mut tasks = JoinSet::new();
    let controller = Controller::new(config.clone(), scm, jobs, activities, &namespace);
    tasks.spawn(controller.run(settings.workers, cancel.clone()));
    tasks.spawn(keeper::run(keeper.clone(), config.clone(), cancel.clone()));
    tasks.spawn(Arc::new(Retrier::new(config.clone(), runs)).run(cancel.clone()));
    tasks.spawn(config.clone().run(cancel.clone()));

    let state = AppState::new(config, plugins, settings.hmac_secret.clone(), Some(keeper));
    let app = build_router(state, &settings.hook_path);
    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("binding {}", settings.listen_addr))?;
    info!(addr = %settings.listen_addr, hook = %settings.hook_path, "listening");

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    cancel.cancel();
    tasks.join_all().await;
    served.context("serving http")?;
    info!("lighthouse stopped");
    Ok(())
}

/// Cancels on the first SIGINT or SIGTERM and exits on the second.
async fn watch_signals(cancel: CancellationToken) {
    for n in 0..2 {
        if let Err(e) = next_signal().await {
            warn!(error = %e, "cannot listen for signals");
            return;
        }
        if n == 0 {
            info!("shutdown requested");
            cancel.cancel();
        }
    }
    warn!("second signal, exiting now");
    std::process::exit(1);
}

#[cfg(unix)]
async fn next_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn next_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
