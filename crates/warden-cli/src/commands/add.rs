use std::path::Path;

use anyhow::{Context as _, bail};
use serde_json::{Value, json};

use super::{Context, Prompt, committed, offer_reload};

/// Fields prompted for when no file is given.
#[derive(Debug, Clone)]
pub struct WireguardInput {
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    pub local_address: Vec<String>,
    pub private_key: String,
    pub peer_public_key: String,
}

pub async fn run(ctx: &Context, tag: Option<&str>, file: Option<&Path>) -> anyhow::Result<()> {
    let mut entity = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<Value>(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?
        }
        None => wireguard_entity(&prompt_wireguard(tag)?),
    };
    if let (Some(tag), Some(obj)) = (tag, entity.as_object_mut()) {
        obj.insert("tag".to_string(), Value::String(tag.to_string()));
    }

    let applied = committed(ctx.editor.add_tunnel(entity, ctx.group()).await)?;
    let new_tag = applied
        .changes
        .first()
        .and_then(|c| c.new.get("tag"))
        .and_then(Value::as_str)
        .unwrap_or("tunnel");
    println!("✓ {new_tag} added to {} (backup {})", ctx.group(), applied.backup.id);
    offer_reload(ctx).await
}

fn prompt_wireguard(tag: Option<&str>) -> anyhow::Result<WireguardInput> {
    let mut prompt = Prompt::new()?;
    let mut required = |label: &str| -> anyhow::Result<String> {
        let value = prompt.answer(&format!("{label}: "))?;
        if value.is_empty() {
            bail!("{label} is required");
        }
        Ok(value)
    };

    let tag = match tag {
        Some(tag) => tag.to_string(),
        None => required("tag")?,
    };
    let server = required("server")?;
    let port = required("server port")?;
    let server_port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port {port:?}"))?;
    let local_address = required("local address(es), comma separated")?
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    let private_key = required("private key")?;
    let peer_public_key = required("peer public key")?;

    Ok(WireguardInput {
        tag,
        server,
        server_port,
        local_address,
        private_key,
        peer_public_key,
    })
}

pub fn wireguard_entity(input: &WireguardInput) -> Value {
    json!({
        "type": "wireguard",
        "tag": input.tag,
        "local_address": input.local_address,
        "private_key": input.private_key,
        "peers": [{
            "server": input.server,
            "server_port": input.server_port,
            "public_key": input.peer_public_key,
            "allowed_ips": ["0.0.0.0/0", "::/0"]
        }]
    })
}
