use std::path::Path;

use ephemera_domain::{AzureResource, Expectation, IacTool, Layer, LayerName, Scenario};
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawExpectation, RawLayer, RawResource, RawStack};

/// Load one stack file into a [`Scenario`], substituting `{{ suffix }}`
/// with the given run suffix and `{{ env.NAME }}` with environment
/// variables. `{{ layer.output }}` placeholders are left alone — the
/// runner resolves those at apply time.
pub fn load_stack(path: &Path, suffix: &str) -> Result<Scenario, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawStack = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;

    debug!("Loading stack from {}", path.display());
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    convert_stack(raw, base, path, suffix)
}

/// Load every `*.yml`/`*.yaml` stack in a directory, sorted by file name.
pub fn load_stacks(dir: &Path, suffix: &str) -> Result<Vec<Scenario>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            )
        })
        .collect();
    paths.sort();

    paths.iter().map(|p| load_stack(p, suffix)).collect()
}

fn convert_stack(
    raw: RawStack,
    base: &Path,
    path: &Path,
    suffix: &str,
) -> Result<Scenario, ConfigError> {
    let mut scenario = Scenario::new(raw.name, suffix);
    for raw_layer in raw.layers {
        scenario.layers.push(convert_layer(raw_layer, base, path, suffix)?);
    }
    Ok(scenario)
}

fn convert_layer(
    raw: RawLayer,
    base: &Path,
    path: &Path,
    suffix: &str,
) -> Result<Layer, ConfigError> {
    let tool = raw.tool.as_deref().map(IacTool::parse).transpose()?;

    let mut layer = Layer {
        name: LayerName::new(&raw.name),
        dir: base.join(&raw.dir),
        tool,
        vars: Default::default(),
        expect: Vec::new(),
    };

    let mut keys: Vec<&String> = raw.vars.keys().collect();
    keys.sort();
    for key in keys {
        let value = yaml_to_json(&raw.vars[key], path)?;
        layer.vars.insert(key.clone(), substitute_value(value, path, suffix)?);
    }

    for raw_exp in raw.expect {
        layer.expect.push(convert_expectation(raw_exp, path, suffix)?);
    }

    Ok(layer)
}

fn convert_expectation(
    raw: RawExpectation,
    path: &Path,
    suffix: &str,
) -> Result<Expectation, ConfigError> {
    match raw {
        RawExpectation::OutputEquals { key, value } => {
            let value = substitute_value(yaml_to_json(&value, path)?, path, suffix)?;
            Ok(Expectation::OutputEquals { key, value })
        }
        RawExpectation::OutputNotEmpty(key) => Ok(Expectation::OutputNotEmpty { key }),
        RawExpectation::OutputContainsKey { key, entry } => {
            Ok(Expectation::OutputContainsKey { key, entry })
        }
        RawExpectation::Exists(resource) => {
            let resource = convert_resource(resource, path, suffix)?;
            Ok(Expectation::Exists { resource })
        }
    }
}

fn convert_resource(
    raw: RawResource,
    path: &Path,
    suffix: &str,
) -> Result<AzureResource, ConfigError> {
    let sub = |s: &str| substitute_str(s, path, suffix);

    let typed = [
        raw.virtual_network.as_deref(),
        raw.storage_account.as_deref(),
        raw.key_vault.as_deref(),
    ]
    .iter()
    .flatten()
    .count();
    if typed > 1 {
        return Err(ConfigError::Conversion {
            path: path.display().to_string(),
            message: "exists: more than one resource name given".into(),
        });
    }

    if typed == 1 {
        let resource_group = raw.resource_group.as_deref().ok_or_else(|| {
            ConfigError::Conversion {
                path: path.display().to_string(),
                message: "exists: resource_group is required alongside a resource name".into(),
            }
        })?;
        let resource_group = sub(resource_group)?;
        if let Some(name) = raw.virtual_network.as_deref() {
            return Ok(AzureResource::VirtualNetwork {
                name: sub(name)?,
                resource_group,
            });
        }
        if let Some(name) = raw.storage_account.as_deref() {
            return Ok(AzureResource::StorageAccount {
                name: sub(name)?,
                resource_group,
            });
        }
        if let Some(name) = raw.key_vault.as_deref() {
            return Ok(AzureResource::KeyVault {
                name: sub(name)?,
                resource_group,
            });
        }
    }

    match raw.resource_group.as_deref() {
        Some(name) => Ok(AzureResource::ResourceGroup { name: sub(name)? }),
        None => Err(ConfigError::Conversion {
            path: path.display().to_string(),
            message: "exists: no resource named".into(),
        }),
    }
}

// ── Value conversion ──────────────────────────────────────────────────────────

fn yaml_to_json(value: &serde_yaml::Value, path: &Path) -> Result<Value, ConfigError> {
    let conversion = |message: String| ConfigError::Conversion {
        path: path.display().to_string(),
        message,
    };

    match value {
        serde_yaml::Value::Null => Ok(Value::Null),
        serde_yaml::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::from(u))
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| conversion(format!("non-finite number {}", f)))
            } else {
                Err(conversion(format!("unrepresentable number {:?}", n)))
            }
        }
        serde_yaml::Value::String(s) => Ok(Value::String(s.clone())),
        serde_yaml::Value::Sequence(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| yaml_to_json(v, path))
                .collect::<Result<_, _>>()?,
        )),
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key = k
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| conversion(format!("non-string map key {:?}", k)))?;
                out.insert(key, yaml_to_json(v, path)?);
            }
            Ok(Value::Object(out))
        }
        serde_yaml::Value::Tagged(t) => Err(conversion(format!("unsupported YAML tag {:?}", t.tag))),
    }
}

// ── Load-time substitution ────────────────────────────────────────────────────

/// Replace `{{ suffix }}` and `{{ env.NAME }}` placeholders. Anything else
/// between braces (layer output references) passes through untouched.
fn substitute_str(s: &str, path: &Path, suffix: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            break;
        };
        let inner = rest[start + 2..start + end].trim();
        let replacement = if inner == "suffix" {
            Some(suffix.to_string())
        } else if let Some(var) = inner.strip_prefix("env.") {
            Some(std::env::var(var).map_err(|_| ConfigError::Conversion {
                path: path.display().to_string(),
                message: format!("environment variable '{}' is not set", var),
            })?)
        } else {
            None
        };

        match replacement {
            Some(value) => {
                result.push_str(&rest[..start]);
                result.push_str(&value);
            }
            None => result.push_str(&rest[..start + end + 2]),
        }
        rest = &rest[start + end + 2..];
    }
    result.push_str(rest);
    Ok(result)
}

fn substitute_value(value: Value, path: &Path, suffix: &str) -> Result<Value, ConfigError> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_str(&s, path, suffix)?)),
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|v| substitute_value(v, path, suffix))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, substitute_value(v, path, suffix)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
