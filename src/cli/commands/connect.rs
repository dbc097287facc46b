//! `connect` - establish sessions through the cache, then tear them down.

use super::{CommandContext, Runnable};
use crate::cli::output::HostStatus;
use anyhow::Result;
use clap::Parser;
use hostlink::connection::host_spec;
use hostlink::ConnectionCache;
use tracing::debug;

/// Arguments for connect command
#[derive(Parser, Debug, Clone)]
pub struct ConnectArgs {
    /// Host strings, `[user@]host[:port]`
    #[arg(required = true)]
    pub hosts: Vec<String>,

    /// Keep going after a host fails
    #[arg(long, short = 'k')]
    pub keep_going: bool,
}

#[async_trait::async_trait]
impl Runnable for ConnectArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let cache = ConnectionCache::builder(ctx.config.clone())
            .cancel_token(ctx.cancel.clone())
            .build();

        let mut exit_code = 0;
        for spec in &self.hosts {
            let shown = host_spec::denormalize(cache.canonicalize(spec).as_str(), &ctx.config);

            let outcome = tokio::select! {
                res = cache.get(spec) => res,
                _ = ctx.cancel.cancelled() => Err(hostlink::Error::Aborted),
            };

            match outcome {
                Ok(session) => {
                    debug!(host = %spec, identifier = %session.identifier(), "Session ready");
                    ctx.output
                        .host_result(&shown, HostStatus::Connected, Some(session.identifier()));
                }
                Err(e) if e.is_abort() => {
                    ctx.output.host_result(&shown, HostStatus::Aborted, None);
                    break;
                }
                Err(e) => {
                    ctx.output
                        .host_result(&shown, HostStatus::Failed, Some(&e.to_string()));
                    if exit_code == 0 {
                        exit_code = e.exit_code();
                    }
                    if !self.keep_going {
                        break;
                    }
                }
            }
        }

        for (key, result) in cache.disconnect_all().await {
            let shown = host_spec::denormalize(key.as_str(), &ctx.config);
            match result {
                Ok(()) => ctx
                    .output
                    .plain(&format!("Disconnecting from {} ... done.", shown)),
                Err(e) => ctx.output.error(&format!(
                    "Disconnecting from {} ... failed: {}",
                    shown, e
                )),
            }
        }

        Ok(exit_code)
    }
}
