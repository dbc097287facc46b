//! `normalize` - print canonical keys without connecting.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use hostlink::connection::host_spec;
use hostlink::connection::SshConfigLookup;

/// Arguments for normalize command
#[derive(Parser, Debug, Clone)]
pub struct NormalizeArgs {
    /// Host strings, `[user@]host[:port]`
    #[arg(required = true)]
    pub hosts: Vec<String>,
}

#[async_trait::async_trait]
impl Runnable for NormalizeArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let ssh_config = SshConfigLookup::from_config(&ctx.config);

        for spec in &self.hosts {
            let (user, host, port) = host_spec::normalize(spec, &ctx.config, &ssh_config);
            let key = host_spec::join(&user, &host, Some(&port));
            ctx.output.normalized(spec, &key, &user, &host, &port);
        }

        Ok(0)
    }
}
