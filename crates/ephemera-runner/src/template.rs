use std::collections::HashMap;

use ephemera_domain::{LayerName, OutputSet, Vars};
use serde_json::Value;

use crate::error::RunError;

/// Scan a string for `{{ ... }}` placeholders and return their trimmed
/// inner text (e.g. `resource_group.name`).
pub(crate) fn placeholders(s: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut search_start = 0;
    while let Some(start) = s[search_start..].find("{{") {
        let abs_start = search_start + start;
        match s[abs_start..].find("}}") {
            Some(end) => {
                let abs_end = abs_start + end + 2;
                let inner = s[abs_start + 2..abs_end - 2].trim();
                found.push(inner.to_string());
                search_start = abs_end;
            }
            None => break,
        }
    }
    found
}

/// All placeholder references in a variable map, in encounter order.
pub(crate) fn collect_refs(vars: &Vars) -> Vec<String> {
    let mut refs = Vec::new();
    for value in vars.values() {
        collect_refs_value(value, &mut refs);
    }
    refs
}

fn collect_refs_value(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(placeholders(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_refs_value(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_refs_value(v, out)),
        _ => {}
    }
}

/// The layer a reference points at: the first dotted segment.
pub(crate) fn referenced_layer(reference: &str) -> LayerName {
    LayerName::new(reference.split('.').next().unwrap_or(reference))
}

/// Substitute `{{ layer.output }}` placeholders in every string value from
/// the outputs of already-applied layers. A string consisting of a single
/// placeholder takes the referenced output's JSON value verbatim, so map
/// and list outputs survive the round trip; embedded placeholders render
/// as text.
pub(crate) fn resolve_vars(
    layer: &LayerName,
    vars: &Vars,
    applied: &HashMap<LayerName, OutputSet>,
) -> Result<Vars, RunError> {
    let mut resolved = Vars::new();
    for (key, value) in vars {
        resolved.insert(key.clone(), resolve_value(layer, value, applied)?);
    }
    Ok(resolved)
}

fn resolve_value(
    layer: &LayerName,
    value: &Value,
    applied: &HashMap<LayerName, OutputSet>,
) -> Result<Value, RunError> {
    match value {
        Value::String(s) => resolve_string(layer, s, applied),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| resolve_value(layer, v, applied))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(layer, v, applied)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    layer: &LayerName,
    s: &str,
    applied: &HashMap<LayerName, OutputSet>,
) -> Result<Value, RunError> {
    let refs = placeholders(s);
    if refs.is_empty() {
        return Ok(Value::String(s.to_string()));
    }

    // Whole-string placeholder: inject the referenced value as-is.
    if refs.len() == 1 {
        let trimmed = s.trim();
        if trimmed.starts_with("{{") && trimmed.ends_with("}}") && placeholders(trimmed).len() == 1
        {
            let only = &refs[0];
            if trimmed[2..trimmed.len() - 2].trim() == only {
                return Ok(lookup(layer, only, applied)?.clone());
            }
        }
    }

    // Embedded placeholders: render into the surrounding text, rescanning
    // from the end of each substitution.
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        match rest[start..].find("}}") {
            Some(end) => {
                let reference = rest[start + 2..start + end].trim().to_string();
                let value = lookup(layer, &reference, applied)?;
                let rendered = match value {
                    Value::String(inner) => inner.clone(),
                    other => other.to_string(),
                };
                result.push_str(&rest[..start]);
                result.push_str(&rendered);
                rest = &rest[start + end + 2..];
            }
            None => break,
        }
    }
    result.push_str(rest);
    Ok(Value::String(result))
}

fn lookup<'a>(
    layer: &LayerName,
    reference: &str,
    applied: &'a HashMap<LayerName, OutputSet>,
) -> Result<&'a Value, RunError> {
    let (source, path) = match reference.split_once('.') {
        Some((source, path)) => (source, path),
        None => {
            return Err(RunError::Template {
                layer: layer.clone(),
                reference: reference.to_string(),
            })
        }
    };
    applied
        .get(&LayerName::new(source))
        .and_then(|outputs| outputs.lookup(path))
        .ok_or_else(|| RunError::Template {
            layer: layer.clone(),
            reference: reference.to_string(),
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
