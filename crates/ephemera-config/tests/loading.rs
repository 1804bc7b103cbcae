use std::path::Path;

use ephemera_config::load_stacks;
use ephemera_domain::{Expectation, IacTool};

/// The shipped stack files must load and carry the shapes the runner
/// expects.
#[test]
fn shipped_stacks_load() {
    // key_vault.yml pulls the tenant id from the environment.
    std::env::set_var("ARM_TENANT_ID", "test-tenant-guid");

    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../stacks");
    let stacks = load_stacks(&dir, "abc123").unwrap();
    assert_eq!(stacks.len(), 4);

    let names: Vec<&str> = stacks.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "key-vault-smoke",
            "networking-smoke",
            "resource-group-smoke",
            "storage-smoke",
        ]
    );

    let networking = stacks.iter().find(|s| s.name == "networking-smoke").unwrap();
    assert_eq!(networking.layers.len(), 2);
    assert_eq!(networking.layers[0].tool, Some(IacTool::Terragrunt));
    let net = &networking.layers[1];
    assert_eq!(
        net.vars["name"],
        serde_json::json!("vnet-test-abc123"),
        "suffix must be substituted at load time"
    );
    assert_eq!(
        net.vars["resource_group_name"],
        serde_json::json!("{{ resource_group.name }}"),
        "layer references resolve at apply time, not load time"
    );
    assert_eq!(
        net.vars["subnets"]["test-subnet"]["address_prefix"],
        serde_json::json!("10.10.1.0/24")
    );
    assert!(net
        .expect
        .iter()
        .any(|e| matches!(e, Expectation::OutputContainsKey { key, entry }
            if key == "subnet_ids" && entry == "test-subnet")));

    let key_vault = stacks.iter().find(|s| s.name == "key-vault-smoke").unwrap();
    let kv = &key_vault.layers[2];
    assert_eq!(kv.vars["tenant_id"], serde_json::json!("test-tenant-guid"));
    assert_eq!(
        kv.vars["private_endpoint_subnet_id"],
        serde_json::json!("{{ networking.subnet_ids.data }}")
    );
    assert_eq!(kv.vars["secrets"]["test-secret"]["value"], serde_json::json!("SecureTestValue"));
}
