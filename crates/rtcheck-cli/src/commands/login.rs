//! `rtcheck login <name>`: log into an existing target's console.

use anyhow::{Context as _, Result};

use super::Context;

pub async fn run(ctx: &Context, namespace: Option<&str>, name: &str) -> Result<()> {
    let session = ctx.session(namespace, name);
    rtcheck_console::login(&session, &ctx.credentials())
        .await
        .with_context(|| format!("failed to login to {}", session.target()))?;
    println!("logged in to {}", session.target());
    Ok(())
}
