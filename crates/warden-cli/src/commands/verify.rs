use anyhow::bail;

use super::{Context, offer_reload};

pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    let path = ctx.editor.live_path().display().to_string();
    let validation = ctx.editor.verify().await?;
    if !validation.passed {
        eprintln!("✗ {path} failed validation:");
        for line in validation.output.lines() {
            eprintln!("    {line}");
        }
        bail!("validation failed; nothing was reloaded");
    }
    println!("✓ {path} is valid");
    offer_reload(ctx).await
}
