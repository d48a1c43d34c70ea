//! `rtcheck kernel-args <name>`: print the guest kernel command line.

use anyhow::{Context as _, Result};

use super::Context;

pub async fn run(ctx: &Context, namespace: Option<&str>, name: &str) -> Result<()> {
    let session = ctx.session(namespace, name);
    rtcheck_console::login(&session, &ctx.credentials())
        .await
        .with_context(|| format!("failed to login to {}", session.target()))?;

    let args = session
        .guest_kernel_args()
        .await
        .context("failed to read guest kernel arguments")?;
    println!("{}", args.trim());
    Ok(())
}
