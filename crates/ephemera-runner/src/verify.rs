use ephemera_domain::{Expectation, Layer, LayerName, OutputSet};
use ephemera_driver::CloudProbe;
use serde_json::Value;

/// One expectation that did not hold, with enough detail to read in a
/// test failure without re-running anything.
#[derive(Debug, Clone)]
pub struct AssertionFailure {
    pub layer: LayerName,
    pub expectation: Expectation,
    pub detail: String,
}

impl std::fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "layer '{}': expected {}: {}",
            self.layer, self.expectation, self.detail
        )
    }
}

/// Evaluate one layer's expectations against its outputs and the cloud.
/// Every expectation is checked — a failure never short-circuits the rest.
pub(crate) async fn evaluate_layer(
    layer: &Layer,
    outputs: &OutputSet,
    probe: &dyn CloudProbe,
) -> Vec<AssertionFailure> {
    let mut failures = Vec::new();

    for expectation in &layer.expect {
        let detail = match expectation {
            Expectation::OutputEquals { key, value } => match outputs.get(key) {
                Some(actual) if actual == value => None,
                Some(actual) => Some(format!("got {}", actual)),
                None => Some(format!("output '{}' missing", key)),
            },
            Expectation::OutputNotEmpty { key } => {
                if outputs.not_empty(key) {
                    None
                } else {
                    Some(format!(
                        "got {}",
                        outputs.get(key).unwrap_or(&Value::Null)
                    ))
                }
            }
            Expectation::OutputContainsKey { key, entry } => {
                if outputs.contains_entry(key, entry) {
                    None
                } else {
                    Some(format!(
                        "got {}",
                        outputs.get(key).unwrap_or(&Value::Null)
                    ))
                }
            }
            Expectation::Exists { resource } => match probe.exists(resource).await {
                Ok(true) => None,
                Ok(false) => Some("not found".to_string()),
                Err(e) => Some(format!("existence check failed: {}", e)),
            },
        };

        if let Some(detail) = detail {
            failures.push(AssertionFailure {
                layer: layer.name.clone(),
                expectation: expectation.clone(),
                detail,
            });
        }
    }

    failures
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_domain::AzureResource;
    use ephemera_driver::StaticProbe;
    use serde_json::json;

    fn outputs() -> OutputSet {
        let mut o = OutputSet::new();
        o.insert("name", json!("rg-test-abc"));
        o.insert("location", json!("East US"));
        o.insert("vnet_id", json!("/subscriptions/s/vnets/v"));
        o.insert("subnet_ids", json!({ "test-subnet": "sub-id" }));
        o
    }

    fn rg_layer() -> Layer {
        Layer::new("resource_group", "m/rg")
            .expect(Expectation::OutputEquals {
                key: "location".into(),
                value: json!("East US"),
            })
            .expect(Expectation::OutputNotEmpty { key: "vnet_id".into() })
            .expect(Expectation::OutputContainsKey {
                key: "subnet_ids".into(),
                entry: "test-subnet".into(),
            })
            .expect(Expectation::Exists {
                resource: AzureResource::ResourceGroup {
                    name: "rg-test-abc".into(),
                },
            })
    }

    #[tokio::test]
    async fn all_expectations_hold() {
        let probe = StaticProbe::new().present("rg-test-abc");
        let failures = evaluate_layer(&rg_layer(), &outputs(), &probe).await;
        assert!(failures.is_empty(), "got {:?}", failures);
    }

    #[tokio::test]
    async fn every_failure_is_reported() {
        // Probe knows nothing, and the outputs miss the expected location.
        let probe = StaticProbe::new();
        let mut o = outputs();
        o.insert("location", json!("West Europe"));
        let failures = evaluate_layer(&rg_layer(), &o, &probe).await;
        assert_eq!(failures.len(), 2, "got {:?}", failures);
        assert!(failures[0].to_string().contains("West Europe"));
        assert!(failures[1].to_string().contains("not found"));
    }

    #[tokio::test]
    async fn missing_output_is_a_failure_not_a_panic() {
        let probe = StaticProbe::new();
        let layer = Layer::new("storage", "m/storage").expect(Expectation::OutputNotEmpty {
            key: "container_urls".into(),
        });
        let failures = evaluate_layer(&layer, &OutputSet::new(), &probe).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("container_urls"));
    }
}
