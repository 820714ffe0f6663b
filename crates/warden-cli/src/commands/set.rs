use anyhow::{Context as _, anyhow, bail};
use serde_json::Value;

use warden_mutate::document::OUTBOUNDS;
use warden_mutate::{ConfigDocument, FieldPatch, Selector, editable_fields, parse_value};

use super::{Context, Prompt, compact, committed, offer_reload};

pub async fn run(ctx: &Context, tag: &str, fields: &[String]) -> anyhow::Result<()> {
    let doc = ctx.editor.show()?;
    let entity = doc
        .outbound(tag)
        .ok_or_else(|| anyhow!("no outbound tagged {tag:?}"))?;

    let patches = if fields.is_empty() {
        prompt_patches(tag, entity)?
    } else {
        fields
            .iter()
            .map(|f| assignment_patch(&doc, tag, f))
            .collect::<anyhow::Result<Vec<_>>>()?
    };
    if patches.is_empty() {
        println!("nothing to change");
        return Ok(());
    }

    let applied = committed(ctx.editor.apply_patch(&patches).await)?;
    for change in &applied.changes {
        let old = change.old.as_ref().map(compact).unwrap_or_else(|| "(unset)".to_string());
        println!("  {}: {old} → {}", change.selector, compact(&change.new));
    }
    println!("✓ {tag} updated (backup {})", applied.backup.id);
    offer_reload(ctx).await
}

/// Walk every editable field; a blank answer keeps the current value.
fn prompt_patches(tag: &str, entity: &Value) -> anyhow::Result<Vec<FieldPatch>> {
    let mut prompt = Prompt::new()?;
    let mut patches = Vec::new();
    println!("Editing {tag}. Press Enter to keep a value.");
    for (path, current) in editable_fields(entity) {
        let input = prompt.answer(&format!("{path} [{}]: ", compact(&current)))?;
        if input.is_empty() {
            continue;
        }
        let value = coerce(&input, Some(&current));
        if value != current {
            patches.push(FieldPatch::new(Selector::for_entity(OUTBOUNDS, tag, &path)?, value));
        }
    }
    Ok(patches)
}

/// `peers.0.server=198.51.100.7` → patch on `outbounds[tag=<tag>].peers.0.server`.
fn assignment_patch(doc: &ConfigDocument, tag: &str, assignment: &str) -> anyhow::Result<FieldPatch> {
    let (field, raw) = assignment
        .split_once('=')
        .with_context(|| format!("expected K=V, got {assignment:?}"))?;
    let field = field.trim();
    if field.is_empty() {
        bail!("empty field name in {assignment:?}");
    }
    let selector = Selector::for_entity(OUTBOUNDS, tag, field)?;
    let value = coerce(raw, doc.get(&selector));
    Ok(FieldPatch::new(selector, value))
}

/// Operator input for a field: strings stay strings, everything else is
/// read as JSON when it parses.
fn coerce(input: &str, current: Option<&Value>) -> Value {
    match current {
        Some(Value::String(_)) if !input.starts_with('"') => Value::String(input.to_string()),
        _ => parse_value(input),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc() -> ConfigDocument {
        ConfigDocument::parse(
            r#"{"outbounds": [{"type": "wireguard", "tag": "wg-jp", "private_key": "abc",
                "peers": [{"server": "203.0.113.10", "server_port": 51820}]}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn coerce_keeps_string_fields_as_strings() {
        assert_eq!(coerce("12345", Some(&json!("abc"))), json!("12345"));
        assert_eq!(coerce("\"quoted\"", Some(&json!("abc"))), json!("quoted"));
        assert_eq!(coerce("2408", Some(&json!(51820))), json!(2408));
        assert_eq!(coerce("1408", None), json!(1408));
        assert_eq!(coerce("10.0.0.2/32", None), json!("10.0.0.2/32"));
    }

    #[test]
    fn assignment_targets_the_tagged_outbound() {
        let patch = assignment_patch(&doc(), "wg-jp", "peers.0.server_port=2408").unwrap();
        assert_eq!(patch.selector.as_str(), "outbounds[tag=wg-jp].peers.0.server_port");
        assert_eq!(patch.value, json!(2408));

        let patch = assignment_patch(&doc(), "wg-jp", "private_key=a=b=").unwrap();
        assert_eq!(patch.value, json!("a=b="));
    }

    #[test]
    fn malformed_assignments_are_rejected() {
        assert!(assignment_patch(&doc(), "wg-jp", "no-equals").is_err());
        assert!(assignment_patch(&doc(), "wg-jp", "=value").is_err());
    }
}
