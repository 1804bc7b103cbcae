use std::collections::{HashMap, HashSet};

use chrono::Utc;
use ephemera_domain::{LayerName, OutputSet, Phase, Scenario, Vars};
use ephemera_driver::{CloudProbe, IacEngine};
use tracing::{debug, info, warn};

use crate::error::RunError;
use crate::report::{LayerOutcome, LayerStatus, RunEvent, RunOutcome, RunReport};
use crate::template::{collect_refs, referenced_layer, resolve_vars};
use crate::validate::validate;
use crate::verify::evaluate_layer;

fn advance(phase: &mut Phase, next: Phase) {
    debug_assert!(
        phase.can_transition_to(&next),
        "illegal phase transition {} → {}",
        phase,
        next
    );
    *phase = next;
}

/// Run one scenario to completion: apply every layer in order, verify
/// expectations, then destroy every applied layer in reverse order.
///
/// Teardown is unconditional. A layer joins the teardown list the moment
/// its apply succeeds, so an apply failure in a later layer, an assertion
/// failure, or a destroy failure elsewhere never leaves it behind — each
/// applied layer is destroyed exactly once.
///
/// Only pre-flight validation returns `Err`; everything that happens after
/// the first apply is captured in the report.
pub async fn run(
    scenario: &Scenario,
    engine: &dyn IacEngine,
    probe: &dyn CloudProbe,
) -> Result<RunReport, RunError> {
    validate(scenario)?;

    info!(scenario = %scenario.name, suffix = %scenario.suffix, "starting scenario");
    let mut events = vec![RunEvent::ScenarioStarted {
        at: Utc::now(),
        scenario: scenario.name.clone(),
        suffix: scenario.suffix.clone(),
    }];
    let mut layers: Vec<LayerOutcome> = scenario
        .layers
        .iter()
        .map(|l| LayerOutcome {
            layer: l.name.clone(),
            status: LayerStatus::NotApplied,
            outputs: None,
        })
        .collect();
    let mut errors: Vec<String> = Vec::new();
    let mut phase = Phase::NotStarted;
    let mut outcome = RunOutcome::Passed;

    // Applied layers, with the variables their apply received. Destroy
    // must see the same values.
    let mut applied: Vec<(usize, Vars)> = Vec::new();
    let mut outputs_by_layer: HashMap<LayerName, OutputSet> = HashMap::new();

    // ── Apply, strictly in order ──────────────────────────────────────────────

    for (i, layer) in scenario.layers.iter().enumerate() {
        advance(
            &mut phase,
            Phase::Applying {
                layer: layer.name.clone(),
            },
        );

        let step = async {
            let resolved = resolve_vars(&layer.name, &layer.vars, &outputs_by_layer)?;
            info!(layer = %layer.name, dir = %layer.dir.display(), "applying layer");
            let outputs = engine.apply(layer, &resolved).await?;
            Ok::<(Vars, OutputSet), RunError>((resolved, outputs))
        };
        let step_result = step.await;

        match step_result {
            Ok((resolved, outputs)) => {
                // Register for teardown before anything else can fail.
                applied.push((i, resolved));
                events.push(RunEvent::LayerApplied {
                    at: Utc::now(),
                    layer: layer.name.clone(),
                });
                layers[i].status = LayerStatus::Applied;
                layers[i].outputs = Some(outputs.clone());
                outputs_by_layer.insert(layer.name.clone(), outputs);
            }
            Err(e) => {
                warn!(layer = %layer.name, error = %e, "apply failed; aborting scenario");
                errors.push(format!("apply '{}': {}", layer.name, e));
                events.push(RunEvent::LayerApplyFailed {
                    at: Utc::now(),
                    layer: layer.name.clone(),
                    error: e.to_string(),
                });
                layers[i].status = LayerStatus::ApplyFailed;
                advance(&mut phase, Phase::ApplyFailed);
                outcome = RunOutcome::ApplyFailed;
                break;
            }
        }
    }

    // ── Verify, only when the whole stack is up ───────────────────────────────

    if outcome == RunOutcome::Passed {
        advance(&mut phase, Phase::Applied);
        advance(&mut phase, Phase::Verifying);

        let mut failures = Vec::new();
        for layer in &scenario.layers {
            // Outputs are present for every layer on this path.
            if let Some(outputs) = outputs_by_layer.get(&layer.name) {
                failures.extend(evaluate_layer(layer, outputs, probe).await);
            }
        }

        for failure in &failures {
            errors.push(failure.to_string());
            events.push(RunEvent::AssertionFailed {
                at: Utc::now(),
                layer: failure.layer.clone(),
                expectation: failure.expectation.to_string(),
                detail: failure.detail.clone(),
            });
        }

        if failures.is_empty() {
            advance(&mut phase, Phase::Verified);
            events.push(RunEvent::VerificationPassed { at: Utc::now() });
        } else {
            warn!(failures = failures.len(), "verification failed");
            advance(&mut phase, Phase::VerificationFailed);
            events.push(RunEvent::VerificationFailed {
                at: Utc::now(),
                failures: failures.len(),
            });
            outcome = RunOutcome::VerificationFailed;
        }
    }

    // ── Destroy, unconditionally, in reverse order ────────────────────────────

    advance(&mut phase, Phase::Destroying);
    for (i, vars) in applied.iter().rev() {
        let layer = &scenario.layers[*i];
        info!(layer = %layer.name, "destroying layer");
        match engine.destroy(layer, vars).await {
            Ok(()) => {
                events.push(RunEvent::LayerDestroyed {
                    at: Utc::now(),
                    layer: layer.name.clone(),
                });
                layers[*i].status = LayerStatus::Destroyed;
            }
            Err(e) => {
                // Keep going: the remaining layers still get their destroy.
                warn!(layer = %layer.name, error = %e, "destroy failed");
                errors.push(format!("destroy '{}': {}", layer.name, e));
                events.push(RunEvent::LayerDestroyFailed {
                    at: Utc::now(),
                    layer: layer.name.clone(),
                    error: e.to_string(),
                });
                layers[*i].status = LayerStatus::DestroyFailed;
            }
        }
    }
    advance(&mut phase, Phase::Destroyed);

    events.push(RunEvent::ScenarioFinished {
        at: Utc::now(),
        outcome,
    });
    info!(scenario = %scenario.name, %outcome, "scenario finished");

    Ok(RunReport {
        scenario: scenario.name.clone(),
        suffix: scenario.suffix.clone(),
        outcome,
        phase,
        layers,
        events,
        errors,
    })
}

/// Apply every layer and leave the stack up, returning each layer's
/// outputs. Used by `ephemera up`; the caller owns eventual teardown.
pub async fn apply_stack(
    scenario: &Scenario,
    engine: &dyn IacEngine,
) -> Result<HashMap<LayerName, OutputSet>, RunError> {
    validate(scenario)?;

    let mut outputs_by_layer: HashMap<LayerName, OutputSet> = HashMap::new();
    for layer in &scenario.layers {
        let resolved = resolve_vars(&layer.name, &layer.vars, &outputs_by_layer)?;
        info!(layer = %layer.name, "applying layer");
        let outputs = engine.apply(layer, &resolved).await?;
        outputs_by_layer.insert(layer.name.clone(), outputs);
    }
    Ok(outputs_by_layer)
}

/// Destroy a previously applied stack in reverse order. Expects the stack
/// to be up: outputs of referenced layers are re-read from the tool so the
/// destroy sees the same variable values the apply did.
pub async fn destroy_stack(scenario: &Scenario, engine: &dyn IacEngine) -> Result<(), RunError> {
    validate(scenario)?;

    // Only layers whose outputs feed a later layer need re-reading.
    let referenced: HashSet<LayerName> = scenario
        .layers
        .iter()
        .flat_map(|l| collect_refs(&l.vars))
        .map(|r| referenced_layer(&r))
        .collect();

    let mut outputs_by_layer: HashMap<LayerName, OutputSet> = HashMap::new();
    let mut resolved_per_layer: Vec<Vars> = Vec::with_capacity(scenario.layers.len());
    for layer in &scenario.layers {
        resolved_per_layer.push(resolve_vars(&layer.name, &layer.vars, &outputs_by_layer)?);
        if referenced.contains(&layer.name) {
            debug!(layer = %layer.name, "re-reading outputs for dependent destroys");
            let outputs = engine.outputs(layer).await?;
            outputs_by_layer.insert(layer.name.clone(), outputs);
        }
    }

    let mut failures: Vec<String> = Vec::new();
    for (layer, vars) in scenario.layers.iter().zip(&resolved_per_layer).rev() {
        info!(layer = %layer.name, "destroying layer");
        if let Err(e) = engine.destroy(layer, vars).await {
            warn!(layer = %layer.name, error = %e, "destroy failed");
            failures.push(format!("destroy '{}': {}", layer.name, e));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(RunError::Failed {
            scenario: scenario.name.clone(),
            message: format!("teardown failed: {}", failures.join("; ")),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_domain::{AzureResource, Expectation, Layer};
    use ephemera_driver::{EngineCall, InMemoryEngine, StaticProbe};
    use serde_json::json;

    fn rg_outputs() -> OutputSet {
        let mut o = OutputSet::new();
        o.insert("name", json!("rg-test-abc123"));
        o.insert("location", json!("East US"));
        o
    }

    fn stack() -> Scenario {
        Scenario::new("smoke", "abc123")
            .layer(
                Layer::new("resource_group", "m/rg")
                    .var("resource_group_name", "rg-test-abc123")
                    .expect(Expectation::OutputEquals {
                        key: "location".into(),
                        value: json!("East US"),
                    }),
            )
            .layer(
                Layer::new("networking", "m/net")
                    .var("resource_group_name", "{{ resource_group.name }}")
                    .var("address_space", json!(["10.10.0.0/16"])),
            )
            .layer(Layer::new("storage", "m/storage").var(
                "resource_group_name",
                "{{ resource_group.name }}",
            ))
    }

    fn engine_for_stack() -> InMemoryEngine {
        InMemoryEngine::new().with_outputs("resource_group", rg_outputs())
    }

    #[tokio::test]
    async fn happy_path_applies_in_order_and_destroys_in_reverse() {
        let engine = engine_for_stack();
        let probe = StaticProbe::new();
        let report = run(&stack(), &engine, &probe).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Passed);
        assert!(report.passed(), "errors: {:?}", report.errors);
        assert_eq!(report.phase, Phase::Destroyed);

        let order: Vec<String> = engine
            .calls()
            .iter()
            .map(|c| match c {
                EngineCall::Apply { layer, .. } => format!("apply:{}", layer),
                EngineCall::Destroy { layer, .. } => format!("destroy:{}", layer),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "apply:resource_group",
                "apply:networking",
                "apply:storage",
                "destroy:storage",
                "destroy:networking",
                "destroy:resource_group",
            ]
        );
    }

    #[tokio::test]
    async fn resolved_outputs_flow_into_dependent_layers() {
        let engine = engine_for_stack();
        let probe = StaticProbe::new();
        run(&stack(), &engine, &probe).await.unwrap();

        let calls = engine.calls();
        let net_apply = calls
            .iter()
            .find_map(|c| match c {
                EngineCall::Apply { layer, vars } if layer.as_str() == "networking" => Some(vars),
                _ => None,
            })
            .unwrap();
        assert_eq!(net_apply["resource_group_name"], json!("rg-test-abc123"));

        // Destroy must see the same resolved values.
        let net_destroy = calls
            .iter()
            .find_map(|c| match c {
                EngineCall::Destroy { layer, vars } if layer.as_str() == "networking" => Some(vars),
                _ => None,
            })
            .unwrap();
        assert_eq!(net_destroy["resource_group_name"], json!("rg-test-abc123"));
    }

    #[tokio::test]
    async fn apply_failure_destroys_only_applied_layers_exactly_once() {
        let engine = engine_for_stack().fail_apply("networking");
        let probe = StaticProbe::new();
        let report = run(&stack(), &engine, &probe).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::ApplyFailed);
        assert_eq!(report.phase, Phase::Destroyed);
        assert_eq!(engine.destroys("resource_group"), 1);
        assert_eq!(engine.destroys("networking"), 0);
        assert_eq!(engine.applies("storage"), 0, "later layers are skipped");
        assert_eq!(engine.destroys("storage"), 0);

        assert_eq!(report.layers[0].status, LayerStatus::Destroyed);
        assert_eq!(report.layers[1].status, LayerStatus::ApplyFailed);
        assert_eq!(report.layers[2].status, LayerStatus::NotApplied);
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn assertion_failure_still_destroys_everything() {
        let scenario = Scenario::new("verify-fail", "abc123").layer(
            Layer::new("resource_group", "m/rg").expect(Expectation::Exists {
                resource: AzureResource::ResourceGroup {
                    name: "rg-test-abc123".into(),
                },
            }),
        );
        let engine = InMemoryEngine::new();
        let probe = StaticProbe::new(); // nothing exists

        let report = run(&scenario, &engine, &probe).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::VerificationFailed);
        assert_eq!(engine.destroys("resource_group"), 1);
        assert_eq!(report.layers[0].status, LayerStatus::Destroyed);
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn destroy_failure_does_not_stop_remaining_destroys() {
        let engine = engine_for_stack().fail_destroy("storage");
        let probe = StaticProbe::new();
        let report = run(&stack(), &engine, &probe).await.unwrap();

        // The run itself passed; teardown trouble is recorded, not fatal.
        assert_eq!(report.outcome, RunOutcome::Passed);
        assert_eq!(engine.destroys("storage"), 1);
        assert_eq!(engine.destroys("networking"), 1);
        assert_eq!(engine.destroys("resource_group"), 1);
        assert_eq!(report.layers[2].status, LayerStatus::DestroyFailed);
        assert!(!report.passed());
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn validation_failure_touches_nothing() {
        let scenario = Scenario::new("bad", "x")
            .layer(Layer::new("kv", "m/kv").var("subnet", "{{ networking.vnet_id }}"));
        let engine = InMemoryEngine::new();
        let probe = StaticProbe::new();

        let err = run(&scenario, &engine, &probe).await.unwrap_err();
        assert!(matches!(err, RunError::Validation(_)), "got {:?}", err);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn event_trail_starts_and_finishes() {
        let engine = engine_for_stack();
        let probe = StaticProbe::new();
        let report = run(&stack(), &engine, &probe).await.unwrap();

        assert!(matches!(report.events.first(), Some(RunEvent::ScenarioStarted { .. })));
        assert!(matches!(
            report.events.last(),
            Some(RunEvent::ScenarioFinished {
                outcome: RunOutcome::Passed,
                ..
            })
        ));
        let destroyed = report
            .events
            .iter()
            .filter(|e| matches!(e, RunEvent::LayerDestroyed { .. }))
            .count();
        assert_eq!(destroyed, 3);
    }

    #[tokio::test]
    async fn apply_stack_leaves_layers_up() {
        let engine = engine_for_stack();
        let outputs = apply_stack(&stack(), &engine).await.unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(engine.destroys("resource_group"), 0);
        assert_eq!(
            outputs[&LayerName::new("resource_group")].str_value("name"),
            Some("rg-test-abc123")
        );
    }

    #[tokio::test]
    async fn destroy_stack_reverses_order_and_reads_referenced_outputs() {
        let engine = engine_for_stack();
        destroy_stack(&stack(), &engine).await.unwrap();

        let destroys: Vec<String> = engine
            .calls()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Destroy { layer, .. } => Some(layer.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(destroys, vec!["storage", "networking", "resource_group"]);

        // The dependent layer's destroy saw the resolved resource group name.
        let storage_destroy = engine
            .calls()
            .iter()
            .find_map(|c| match c {
                EngineCall::Destroy { layer, vars } if layer.as_str() == "storage" => {
                    Some(vars.clone())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(storage_destroy["resource_group_name"], json!("rg-test-abc123"));
    }

    #[tokio::test]
    async fn destroy_stack_collects_failures_but_finishes() {
        let engine = engine_for_stack().fail_destroy("networking");
        let err = destroy_stack(&stack(), &engine).await.unwrap_err();
        assert!(err.to_string().contains("teardown failed"), "got: {}", err);
        // The failure did not stop the remaining destroys.
        assert_eq!(engine.destroys("resource_group"), 1);
    }
}
