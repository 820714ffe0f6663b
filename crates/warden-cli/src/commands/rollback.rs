use anyhow::{anyhow, bail};

use warden_mutate::Snapshot;

use super::{Context, Prompt, committed, offer_reload};

pub async fn run(ctx: &Context, id: Option<&str>) -> anyhow::Result<()> {
    let id = match id {
        Some(id) => id.to_string(),
        None => choose(ctx)?,
    };

    let rolled = committed(ctx.editor.rollback(&id).await)?;
    println!("✓ restored backup {}", rolled.restored.id);
    if let Some(safety) = &rolled.safety {
        println!("  the replaced document was saved as {}", safety.id);
    }
    offer_reload(ctx).await
}

fn choose(ctx: &Context) -> anyhow::Result<String> {
    let backups = ctx.editor.backups().list()?;
    if backups.is_empty() {
        bail!("no backups in {}", ctx.editor.backups().dir().display());
    }
    for (i, snapshot) in backups.iter().enumerate() {
        println!(
            "{:>4}  {}  {}",
            i + 1,
            snapshot.id,
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    let input = Prompt::new()?.answer(&format!("backup to restore [{}]: ", backups.len()))?;
    pick(&backups, &input)
        .map(|s| s.id.clone())
        .ok_or_else(|| anyhow!("no backup {input:?}"))
}

/// Blank picks the newest; a number picks by list position; anything
/// else must be a backup id.
fn pick<'a>(backups: &'a [Snapshot], input: &str) -> Option<&'a Snapshot> {
    if input.is_empty() {
        return backups.last();
    }
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| backups.get(i));
    }
    backups.iter().find(|s| s.id == input)
}
