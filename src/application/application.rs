use std::sync::Arc;

use snafu::Snafu;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::application::{RootsError, RuntimeConfig};
use crate::config::{MirrorConfig, MirrorConfigError};
use crate::sync::{ChangeReporter, ContextError, Reconciler, SyncContext};
use crate::watch::{InotifyNotifier, LiveDispatcher, LiveSyncError, WatchError};

pub struct Application;

impl Application {
    pub async fn run(runtime_config: impl Into<RuntimeConfig>) -> Result<(), ApplicationError> {
        let runtime_config: RuntimeConfig = runtime_config.into();
        let roots = runtime_config.resolve_roots().context(RootsSnafu)?;

        let file_config = match &runtime_config.config {
            Some(path) => MirrorConfig::from_path(path).await.context(ConfigSnafu)?,
            None => MirrorConfig::default(),
        };
        debug!("Loaded config: {:?}", file_config);
        let options = runtime_config.mirror_options(file_config);
        let reporter = ChangeReporter::new(!runtime_config.quiet);

        let mut ctx = SyncContext::scan(&roots.source, &roots.destination, options, reporter)
            .context(ScanSnafu)?;
        let stats = Reconciler::new(&mut ctx).run();
        info!("Initial reconciliation: {stats}");
        if stats.failed > 0 {
            warn!("{} entries could not be mirrored", stats.failed);
        }

        if runtime_config.once {
            return Ok(());
        }

        let notifier = InotifyNotifier::new().context(NotifierSnafu)?;
        let mut dispatcher = LiveDispatcher::new(ctx, Arc::new(notifier));
        dispatcher.install_pending();
        dispatcher
            .run(shutdown_signal())
            .await
            .context(LiveSyncSnafu)?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(error) = compio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C, terminate the process to stop: {error}");
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Snafu)]
pub enum ApplicationError {
    #[snafu(display("Invalid source or destination"))]
    RootsError { source: RootsError },
    #[snafu(display("Critical failure encountered during configuration stage"))]
    ConfigError { source: MirrorConfigError },
    #[snafu(display("Critical failure encountered during the initial scan"))]
    ScanError { source: ContextError },
    #[snafu(display("Failed to set up change notifications"))]
    NotifierError { source: WatchError },
    #[snafu(display("Live synchronization stopped"))]
    LiveSyncError { source: LiveSyncError },
}
