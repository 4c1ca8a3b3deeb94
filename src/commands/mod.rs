pub mod config;
pub mod page;
pub mod tabs;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nodemark::browser::{CdpConnection, Controller};
use nodemark::config::Config;
use nodemark::{NodemarkError, Result, TabId};

use crate::cli::Cli;

fn effective_profile_name(cli: &Cli, config: &Config) -> String {
    match cli.profile.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => name.to_string(),
        None => config.effective_default_profile_name(),
    }
}

/// Connect to the browser named by `--cdp` or the active profile.
pub(crate) async fn connect(cli: &Cli, config: &Config) -> Result<CdpConnection> {
    let endpoint = match &cli.cdp {
        Some(cdp) => cdp.clone(),
        None => config.get_profile(&effective_profile_name(cli, config))?.endpoint(),
    };
    tracing::debug!("Connecting to CDP endpoint {}", endpoint);
    CdpConnection::connect_endpoint(&endpoint).await
}

/// A tab with a debugger session for the duration of one command.
///
/// Operations run through [`AttachedTab::guard`], which applies the
/// operation timeout and Ctrl-C handling. [`AttachedTab::close`] must be
/// called on every path; it never fails.
pub(crate) struct AttachedTab {
    pub controller: Controller,
    pub tab: TabId,
    timeout: Option<Duration>,
}

impl AttachedTab {
    pub async fn open(cli: &Cli, tab: &str) -> Result<Self> {
        let config = Config::load()?;
        let connection = connect(cli, &config).await?;
        let controller = Controller::with_options(
            Arc::new(connection),
            config.browser.protocol_version,
            &config.session,
        );

        let attached = Self {
            controller,
            tab: TabId::from(tab),
            timeout: cli
                .timeout
                .or(config.session.operation_timeout_ms)
                .map(Duration::from_millis),
        };

        if let Err(e) = attached
            .guard(attached.controller.attach(&attached.tab))
            .await
        {
            attached.close().await;
            return Err(e);
        }
        Ok(attached)
    }

    pub async fn guard<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        let limited = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, op).await.map_err(|_| {
                    NodemarkError::Timeout(format!(
                        "operation on tab {} exceeded {} ms",
                        self.tab,
                        limit.as_millis()
                    ))
                })?,
                None => op.await,
            }
        };

        tokio::select! {
            result = limited => result,
            _ = tokio::signal::ctrl_c() => {
                Err(NodemarkError::Other("Interrupted".to_string()))
            }
        }
    }

    pub async fn close(self) {
        self.controller.detach(&self.tab).await;
    }
}
