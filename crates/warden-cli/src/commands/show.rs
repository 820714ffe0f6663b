use serde_json::Value;

use warden_mutate::ConfigDocument;

use super::Context;

#[derive(Debug, PartialEq, Eq)]
pub struct OutboundRow {
    pub tag: String,
    pub kind: String,
    pub endpoint: String,
    pub member: bool,
}

pub fn run(ctx: &Context, raw: bool) -> anyhow::Result<()> {
    let doc = ctx.editor.show()?;
    if raw {
        print!("{}", doc.render()?);
        return Ok(());
    }

    println!("{}", ctx.editor.live_path().display());
    println!("{:<18} {:<12} {:<32} {}", "TAG", "TYPE", "ENDPOINT", ctx.group());
    for row in summarize(&doc, ctx.group()) {
        println!(
            "{:<18} {:<12} {:<32} {}",
            row.tag,
            row.kind,
            row.endpoint,
            if row.member { "*" } else { "" }
        );
    }
    Ok(())
}

pub fn summarize(doc: &ConfigDocument, group: &str) -> Vec<OutboundRow> {
    let members: Vec<&str> = doc
        .outbound(group)
        .and_then(|g| g.get("outbounds"))
        .and_then(Value::as_array)
        .map(|m| m.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    doc.tags()
        .into_iter()
        .filter_map(|tag| {
            let outbound = doc.outbound(&tag)?;
            Some(OutboundRow {
                kind: outbound
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_string(),
                endpoint: endpoint(outbound),
                member: members.contains(&tag.as_str()),
                tag,
            })
        })
        .collect()
}

/// `server:port` from the outbound itself or its first peer.
fn endpoint(outbound: &Value) -> String {
    let source = if outbound.get("server").is_some() {
        outbound
    } else {
        match outbound.pointer("/peers/0") {
            Some(peer) => peer,
            None => return "-".to_string(),
        }
    };
    match (source.get("server").and_then(Value::as_str), source.get("server_port")) {
        (Some(server), Some(port)) => format!("{server}:{port}"),
        (Some(server), None) => server.to_string(),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_marks_group_members_and_finds_peer_endpoints() {
        let doc = ConfigDocument::parse(
            r#"{"outbounds": [
                {"type": "direct", "tag": "direct"},
                {"type": "wireguard", "tag": "wg-jp", "peers": [{"server": "203.0.113.10", "server_port": 51820}]},
                {"type": "vless", "tag": "vl-sg", "server": "sg.example.com", "server_port": 443},
                {"type": "urltest", "tag": "auto-best", "outbounds": ["wg-jp", "vl-sg"]}
            ]}"#,
        )
        .unwrap();

        let rows = summarize(&doc, "auto-best");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].endpoint, "-");
        assert!(!rows[0].member);
        assert_eq!(rows[1].endpoint, "203.0.113.10:51820");
        assert!(rows[1].member);
        assert_eq!(
            rows[2],
            OutboundRow {
                tag: "vl-sg".to_string(),
                kind: "vless".to_string(),
                endpoint: "sg.example.com:443".to_string(),
                member: true,
            }
        );
    }
}
