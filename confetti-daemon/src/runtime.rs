use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use confetti_core::paths::auth_token_path;
use confetti_core::{config, Environment};
use confetti_sync::remote::start_environment;
use confetti_sync::transport::{StaticToken, TokenFile};
use confetti_sync::{
    AuthProvider, BroadcastSink, DispatchConfig, GitCli, HttpTransport, Notification,
    RemoteApi, SyncDispatcher, SyncError, TracingSink, Transport,
};

use crate::error::{io_err, DaemonError};
use crate::reconciler::{ReconcilerConfig, ResourceReconciler};
use crate::watcher::{EventHandler, SyncWatcher};
use crate::watermark::ResourceWatermark;

pub const ACCESS_TOKEN_ENV: &str = "CONFETTI_ACCESS_TOKEN";
const NOTIFICATION_CAPACITY: usize = 256;

/// Set to `json` for one JSON object per log line.
pub const LOG_FORMAT_ENV: &str = "CONFETTI_LOG_FORMAT";

/// Everything `confetti watch` needs.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub root: PathBuf,
    pub environment: Option<String>,
    /// Discard remote state and the local artifact cache first.
    pub reset: bool,
    pub dispatch: DispatchConfig,
    pub reconciler: ReconcilerConfig,
}

impl WatchOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            environment: None,
            reset: false,
            dispatch: DispatchConfig {
                show_progress: true,
                ..DispatchConfig::default()
            },
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// A repository bound to one environment and one remote baseline.
pub struct Session {
    root: PathBuf,
    environment: Environment,
    repository: String,
    baseline: String,
    dispatcher: SyncDispatcher,
    notifications: BroadcastSink,
}

impl Session {
    /// Connect over HTTP using the stored access token.
    pub fn connect(
        root: &Path,
        environment: Option<&str>,
        dispatch: DispatchConfig,
    ) -> Result<Self, DaemonError> {
        let root = repository_root(root)?;
        let (environment, git, repository) = prepare(&root, environment)?;
        let transport = HttpTransport::new(auth_provider(&root), &repository)
            .with_start_environment(start_environment(&environment, &repository));
        Self::assemble(root, environment, git, repository, Arc::new(transport), dispatch)
    }

    /// Same as [`Session::connect`] over a caller-provided transport.
    pub fn with_transport(
        root: &Path,
        environment: Option<&str>,
        transport: Arc<dyn Transport>,
        dispatch: DispatchConfig,
    ) -> Result<Self, DaemonError> {
        let root = repository_root(root)?;
        let (environment, git, repository) = prepare(&root, environment)?;
        Self::assemble(root, environment, git, repository, transport, dispatch)
    }

    fn assemble(
        root: PathBuf,
        environment: Environment,
        git: GitCli,
        repository: String,
        transport: Arc<dyn Transport>,
        dispatch: DispatchConfig,
    ) -> Result<Self, DaemonError> {
        let baseline = git.remote_commit()?;
        if baseline.is_empty() {
            tracing::warn!("no remote commit found, syncing against the index");
        }
        let remote = RemoteApi::for_environment(transport, &environment)?;
        let notifications =
            BroadcastSink::new(NOTIFICATION_CAPACITY).forward_to(Arc::new(TracingSink));
        let dispatcher =
            SyncDispatcher::new(git, remote, dispatch).with_sink(Arc::new(notifications.clone()));
        Ok(Self {
            root,
            environment,
            repository,
            baseline,
            dispatcher,
            notifications,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    /// Notifications from the dispatcher, watcher and reconciler.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Point the remote at the baseline commit.
    pub async fn checkout(&self, reset: bool) -> Result<(), DaemonError> {
        let remote = self.dispatcher.remote().clone();
        let commit = self.baseline.clone();
        let result = tokio::task::spawn_blocking(move || remote.checkout(&commit, reset))
            .await
            .map_err(|err| task_failed("checkout", err))?;
        tolerate_user_error(result)
    }

    /// Push every local change, then have the remote parse what it received.
    pub async fn sync_all(&self) -> Result<Vec<String>, DaemonError> {
        let paths = confetti_sync::sync_all(&self.dispatcher, &self.baseline).await?;

        let remote = self.dispatcher.remote().clone();
        let parsed = paths.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DaemonError> {
            tolerate_user_error(remote.parse_base_components())?;
            for file in &parsed {
                tolerate_user_error(remote.parse_component(file))?;
            }
            Ok(())
        })
        .await
        .map_err(|err| task_failed("parse components", err))??;

        Ok(paths)
    }

    /// Initial catch-up, then watch and reconcile until `shutdown` fires.
    pub async fn watch(
        self,
        reset: bool,
        reconciler_config: ReconcilerConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        tracing::info!(root = %self.root.display(), environment = %self.environment.key, "confetti watch");
        self.checkout(reset).await?;
        let synced = self.sync_all().await?;
        tracing::info!(files = synced.len(), "local changes synced");

        let scheme = if self.environment.run_on_localhost {
            "http://"
        } else {
            "https://"
        };
        for host in self.environment.explicit_hosts() {
            tracing::info!("Website: {scheme}{host}");
            tracing::info!("Admin: {scheme}{host}/admin");
        }

        let since = if reset { None } else { Some(Utc::now()) };
        let watermark = Arc::new(ResourceWatermark::new(since));
        let reconciler = ResourceReconciler::new(
            &self.root,
            self.dispatcher.remote().clone(),
            watermark.clone(),
            reconciler_config,
        )
        .with_sink(self.dispatcher.sink());
        // Detached: a failing reconciler must not stop the watcher.
        tokio::spawn(async move {
            if let Err(err) = reconciler.run(reset).await {
                tracing::error!(error = %err, "resource sync stopped");
            }
        });

        let handler = EventHandler::new(&self.dispatcher, self.baseline.clone(), watermark);
        SyncWatcher::new(handler, self.dispatcher).run(shutdown).await
    }
}

/// One-shot catch-up sync of `root` against `environment`.
pub async fn sync_all(root: &Path, environment: Option<&str>) -> Result<Vec<String>, DaemonError> {
    let session = Session::connect(root, environment, DispatchConfig::default())?;
    session.sync_all().await
}

/// Run a watch session until ctrl-c.
pub async fn watch(options: WatchOptions) -> Result<(), DaemonError> {
    let session = Session::connect(
        &options.root,
        options.environment.as_deref(),
        options.dispatch,
    )?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let signal_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received ctrl-c, stopping watch");
                let _ = shutdown_tx.send(());
                Ok(())
            }
            Err(err) => Err(DaemonError::Task {
                task: "signal handler",
                message: err.to_string(),
            }),
        }
    });

    let result = session
        .watch(options.reset, options.reconciler, shutdown_rx)
        .await;
    signal_handle.abort();
    result
}

/// Start a watch session and block the current thread until it exits.
pub fn start_blocking(options: WatchOptions) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(watch(options))
}

/// Install the global subscriber. `RUST_LOG` overrides `verbosity`.
pub fn init_tracing(verbosity: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbosity {
        0 => "info".to_string(),
        1 => workspace_filter("debug"),
        2 => workspace_filter("trace"),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match std::env::var(LOG_FORMAT_ENV) {
        Ok(format) if format.eq_ignore_ascii_case("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };
}

fn workspace_filter(level: &str) -> String {
    ["confetti", "confetti_core", "confetti_sync", "confetti_daemon"]
        .iter()
        .fold("info".to_string(), |acc, krate| format!("{acc},{krate}={level}"))
}

/// Token from the environment, else the file written by the login flow.
pub fn auth_provider(root: &Path) -> Arc<dyn AuthProvider> {
    match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => Arc::new(StaticToken(token)),
        _ => Arc::new(TokenFile::new(auth_token_path(root))),
    }
}

/// Canonical root of the git working tree at `root`.
pub fn repository_root(root: &Path) -> Result<PathBuf, DaemonError> {
    if !root.join(".git").exists() {
        return Err(DaemonError::NotARepository {
            root: root.to_path_buf(),
        });
    }
    fs::canonicalize(root).map_err(|e| io_err(root, e))
}

fn prepare(
    root: &Path,
    environment: Option<&str>,
) -> Result<(Environment, GitCli, String), DaemonError> {
    let app_config = config::load(root)?;
    let environment = app_config.environment(environment)?.clone();
    let git = GitCli::new(root);
    let repository = git.repository_name()?;
    Ok((environment, git, repository))
}

fn tolerate_user_error(result: Result<(), SyncError>) -> Result<(), DaemonError> {
    match result {
        Err(err) if err.is_user_error() => {
            tracing::warn!(error = %err, "remote rejected request");
            Ok(())
        }
        other => other.map_err(DaemonError::from),
    }
}

fn task_failed(task: &'static str, err: tokio::task::JoinError) -> DaemonError {
    DaemonError::Task {
        task,
        message: err.to_string(),
    }
}
