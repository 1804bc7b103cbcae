use std::collections::HashMap;

use ephemera_domain::{LayerName, Scenario};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ValidationError;
use crate::template::{collect_refs, referenced_layer};

/// Validate a scenario's layer wiring before anything is applied.
///
/// Checks:
/// 1. At least one layer, no duplicate names
/// 2. Every `{{ layer.output }}` reference names a known layer
/// 3. References point strictly backwards in the declared order
///    (a layer can only consume outputs that exist when it applies)
/// 4. No self references, no cycles
pub fn validate(scenario: &Scenario) -> Result<(), ValidationError> {
    if scenario.layers.is_empty() {
        return Err(ValidationError::EmptyScenario);
    }

    let mut errors: Vec<ValidationError> = Vec::new();

    let mut position: HashMap<&LayerName, usize> = HashMap::new();
    for (i, layer) in scenario.layers.iter().enumerate() {
        if position.insert(&layer.name, i).is_some() {
            errors.push(ValidationError::DuplicateLayer(layer.name.clone()));
        }
    }

    let mut graph: DiGraph<&LayerName, ()> = DiGraph::new();
    let node_map: HashMap<&LayerName, NodeIndex> = scenario
        .layers
        .iter()
        .map(|l| (&l.name, graph.add_node(&l.name)))
        .collect();

    for (i, layer) in scenario.layers.iter().enumerate() {
        for reference in collect_refs(&layer.vars) {
            let source = referenced_layer(&reference);
            if source == layer.name {
                errors.push(ValidationError::SelfReference(layer.name.clone()));
                continue;
            }
            match position.get(&source) {
                None => errors.push(ValidationError::UnknownReference {
                    layer: layer.name.clone(),
                    reference,
                }),
                Some(&src_pos) if src_pos > i => {
                    errors.push(ValidationError::ForwardReference {
                        layer: layer.name.clone(),
                        reference,
                    });
                }
                Some(_) => {
                    // Edge: source must be applied before this layer.
                    graph.add_edge(node_map[&source], node_map[&layer.name], ());
                }
            }
        }
    }

    if is_cyclic_directed(&graph) {
        errors.push(ValidationError::CycleDetected);
    }

    if errors.is_empty() {
        return Ok(());
    }
    if errors.len() == 1 {
        return Err(errors.remove(0));
    }
    Err(ValidationError::Multiple(errors))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_domain::Layer;

    fn two_layer_scenario() -> Scenario {
        Scenario::new("smoke", "abc123")
            .layer(Layer::new("resource_group", "m/rg").var("resource_group_name", "rg-test"))
            .layer(
                Layer::new("networking", "m/net")
                    .var("resource_group_name", "{{ resource_group.name }}"),
            )
    }

    #[test]
    fn backward_references_are_valid() {
        assert!(validate(&two_layer_scenario()).is_ok());
    }

    #[test]
    fn empty_scenario_rejected() {
        let err = validate(&Scenario::new("empty", "x")).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyScenario));
    }

    #[test]
    fn duplicate_layer_rejected() {
        let s = Scenario::new("dup", "x")
            .layer(Layer::new("rg", "m/rg"))
            .layer(Layer::new("rg", "m/rg2"));
        let err = validate(&s).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateLayer(_)), "got {:?}", err);
    }

    #[test]
    fn unknown_reference_rejected() {
        let s = Scenario::new("bad", "x")
            .layer(Layer::new("kv", "m/kv").var("subnet", "{{ networking.vnet_id }}"));
        let err = validate(&s).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownReference { .. }), "got {:?}", err);
    }

    #[test]
    fn forward_reference_rejected() {
        let s = Scenario::new("bad", "x")
            .layer(Layer::new("kv", "m/kv").var("subnet", "{{ networking.vnet_id }}"))
            .layer(Layer::new("networking", "m/net"));
        let err = validate(&s).unwrap_err();
        assert!(matches!(err, ValidationError::ForwardReference { .. }), "got {:?}", err);
    }

    #[test]
    fn self_reference_rejected() {
        let s = Scenario::new("bad", "x")
            .layer(Layer::new("rg", "m/rg").var("name", "{{ rg.name }}"));
        let err = validate(&s).unwrap_err();
        assert!(matches!(err, ValidationError::SelfReference(_)), "got {:?}", err);
    }

    #[test]
    fn multiple_errors_accumulate() {
        let s = Scenario::new("bad", "x")
            .layer(Layer::new("kv", "m/kv").var("a", "{{ nope.x }}").var("b", "{{ kv.y }}"));
        let err = validate(&s).unwrap_err();
        match err {
            ValidationError::Multiple(errs) => assert_eq!(errs.len(), 2),
            other => panic!("expected Multiple, got {:?}", other),
        }
    }
}
