use std::path::PathBuf;

use anyhow::{Context, Result};
use ephemera_config::{load_stack, load_stacks};
use ephemera_domain::unique_suffix;
use ephemera_driver::{AzureClient, AzureConfig, TerraformCli};

use crate::cli::OutputFormat;
use crate::output;

// ── Run ───────────────────────────────────────────────────────────────────────

pub async fn run(
    stack: PathBuf,
    suffix: Option<String>,
    subscription: Option<String>,
    tenant: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let suffix = suffix.unwrap_or_else(unique_suffix);
    let scenario = load_stack(&stack, &suffix)
        .with_context(|| format!("Failed to load stack {}", stack.display()))?;

    let engine = TerraformCli::new();
    let azure = AzureClient::new(azure_config(subscription, tenant))
        .context("Failed to initialise the Azure client")?;

    let report = ephemera_runner::run(&scenario, &engine, &azure).await?;

    match format {
        OutputFormat::Text => print!("{}", output::render_report(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    report.into_result()?;
    Ok(())
}

// ── Up ────────────────────────────────────────────────────────────────────────

pub async fn up(stack: PathBuf, suffix: String, format: OutputFormat) -> Result<()> {
    let scenario = load_stack(&stack, &suffix)
        .with_context(|| format!("Failed to load stack {}", stack.display()))?;

    let engine = TerraformCli::new();
    let outputs = ephemera_runner::apply_stack(&scenario, &engine)
        .await
        .with_context(|| {
            format!(
                "Apply failed; applied layers are still up — reclaim with `ephemera down {} --suffix {}`",
                stack.display(),
                suffix
            )
        })?;

    match format {
        OutputFormat::Text => print!("{}", output::render_outputs(&scenario, &outputs)),
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = outputs
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::to_value(v).unwrap_or_default()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
    }
    Ok(())
}

// ── Down ──────────────────────────────────────────────────────────────────────

pub async fn down(stack: PathBuf, suffix: String) -> Result<()> {
    let scenario = load_stack(&stack, &suffix)
        .with_context(|| format!("Failed to load stack {}", stack.display()))?;

    let engine = TerraformCli::new();
    ephemera_runner::destroy_stack(&scenario, &engine).await?;
    println!("Destroyed {} layer(s).", scenario.layers.len());
    Ok(())
}

// ── Validate ──────────────────────────────────────────────────────────────────

pub async fn validate(path: PathBuf) -> Result<()> {
    let suffix = unique_suffix();
    let scenarios = if path.is_dir() {
        load_stacks(&path, &suffix)?
    } else {
        vec![load_stack(&path, &suffix)?]
    };

    for scenario in &scenarios {
        ephemera_runner::validate(scenario)
            .with_context(|| format!("Stack '{}' is invalid", scenario.name))?;
        println!("ok: {} ({} layer(s))", scenario.name, scenario.layers.len());
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn azure_config(subscription: Option<String>, tenant: Option<String>) -> AzureConfig {
    let mut config = AzureConfig::from_env();
    if subscription.is_some() {
        config.subscription_id = subscription;
    }
    if tenant.is_some() {
        config.tenant_id = tenant;
    }
    config
}
