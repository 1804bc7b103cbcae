use std::process::Command as StdCommand;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ephemera_domain::AzureResource;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::engine::CloudProbe;
use crate::error::DriverError;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Static configuration for the Azure read client, injected at startup.
#[derive(Clone, Default)]
pub struct AzureConfig {
    /// Azure tenant ID (GUID). Required for service principal auth;
    /// optional for the CLI fallback.
    pub tenant_id: Option<String>,
    /// Default subscription for existence checks. Individual checks may
    /// override it.
    pub subscription_id: Option<String>,
    /// Service principal client ID (optional; falls back to MSI/CLI).
    pub client_id: Option<String>,
    /// Service principal client secret (optional; falls back to MSI/CLI).
    pub client_secret: Option<String>,
}

impl AzureConfig {
    /// Read the standard `ARM_*` variables, falling back to `AZURE_*`.
    pub fn from_env() -> Self {
        fn var(arm: &str, azure: &str) -> Option<String> {
            std::env::var(arm)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| std::env::var(azure).ok().filter(|v| !v.is_empty()))
        }
        Self {
            tenant_id: var("ARM_TENANT_ID", "AZURE_TENANT_ID"),
            subscription_id: var("ARM_SUBSCRIPTION_ID", "AZURE_SUBSCRIPTION_ID"),
            client_id: var("ARM_CLIENT_ID", "AZURE_CLIENT_ID"),
            client_secret: var("ARM_CLIENT_SECRET", "AZURE_CLIENT_SECRET"),
        }
    }
}

// ── Base URLs (overridden in tests) ───────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct BaseUrls {
    management: String,
    login: String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".into(),
            login: "https://login.microsoftonline.com".into(),
        }
    }
}

// ── Token provider ────────────────────────────────────────────────────────────

/// Abstraction over Azure token acquisition — enables test injection.
#[async_trait]
trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, DriverError>;
}

// ── Service Principal ─────────────────────────────────────────────────────────

struct ServicePrincipalTokenProvider {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    login_base: String,
    client: reqwest::Client,
    cache: Mutex<Option<(String, Instant)>>,
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        {
            let guard = self.cache.lock().await;
            if let Some((tok, expiry)) = guard.as_ref() {
                if Instant::now() < *expiry {
                    return Ok(tok.clone());
                }
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", "https://management.azure.com/.default"),
        ];
        let resp: Value = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("SP token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Internal(format!("SP token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| {
                DriverError::Internal(format!("SP token: no access_token in response: {}", resp))
            })?
            .to_string();
        let expires_in = resp["expires_in"].as_u64().unwrap_or(3600);
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));

        *self.cache.lock().await = Some((tok.clone(), expiry));
        Ok(tok)
    }
}

// ── Managed Identity (IMDS) ───────────────────────────────────────────────────

struct ManagedIdentityTokenProvider {
    client: reqwest::Client,
    cache: Mutex<Option<(String, Instant)>>,
}

#[async_trait]
impl TokenProvider for ManagedIdentityTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        {
            let guard = self.cache.lock().await;
            if let Some((tok, expiry)) = guard.as_ref() {
                if Instant::now() < *expiry {
                    return Ok(tok.clone());
                }
            }
        }

        let resp: Value = self
            .client
            .get("http://169.254.169.254/metadata/identity/oauth2/token")
            .header("Metadata", "true")
            .query(&[
                ("api-version", "2018-02-01"),
                ("resource", "https://management.azure.com/"),
            ])
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("IMDS token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Internal(format!("IMDS token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| DriverError::Internal(format!("IMDS token: no access_token: {}", resp)))?
            .to_string();
        let expires_in = resp["expires_in"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3600);
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));

        *self.cache.lock().await = Some((tok.clone(), expiry));
        Ok(tok)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

struct AzureCliTokenProvider {
    tenant_id: Option<String>,
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self) -> Result<String, DriverError> {
        let mut args = vec![
            "account",
            "get-access-token",
            "--resource",
            "https://management.azure.com",
            "--output",
            "json",
        ];
        if let Some(tenant) = &self.tenant_id {
            args.push("--tenant");
            args.push(tenant);
        }

        let output = StdCommand::new("az").args(&args).output().map_err(|e| {
            DriverError::Internal(format!(
                "az CLI not found: {}. Install Azure CLI or configure service principal credentials.",
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Internal(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DriverError::Internal(format!("az CLI output parse: {}", e)))?;
        let tok = resp["accessToken"]
            .as_str()
            .ok_or_else(|| DriverError::Internal("az CLI: no accessToken in output".into()))?
            .to_string();
        Ok(tok)
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, DriverError> {
        Ok(self.0.clone())
    }
}

// ── AzureClient ───────────────────────────────────────────────────────────────

/// Read-only ARM client: existence checks for the resource types a stack
/// can produce, plus tenant lookup. Never mutates cloud state — all writes
/// go through the IaC tool.
pub struct AzureClient {
    config: AzureConfig,
    client: reqwest::Client,
    token: Box<dyn TokenProvider>,
    base: BaseUrls,
}

impl AzureClient {
    /// Create an `AzureClient`, auto-selecting the token provider:
    /// 1. `client_id` + `client_secret` in config → Service Principal
    /// 2. `IDENTITY_ENDPOINT` env var → Managed Identity (IMDS)
    /// 3. Otherwise → Azure CLI (`az account get-access-token`)
    pub fn new(config: AzureConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::new();
        let base = BaseUrls::default();

        let token: Box<dyn TokenProvider> = if let (Some(cid), Some(cs)) =
            (config.client_id.as_deref(), config.client_secret.as_deref())
        {
            let tenant_id = config.tenant_id.clone().ok_or_else(|| {
                DriverError::Internal(
                    "service principal auth requires a tenant id (ARM_TENANT_ID)".into(),
                )
            })?;
            Box::new(ServicePrincipalTokenProvider {
                tenant_id,
                client_id: cid.to_string(),
                client_secret: cs.to_string(),
                login_base: base.login.clone(),
                client: client.clone(),
                cache: Mutex::new(None),
            })
        } else if std::env::var("IDENTITY_ENDPOINT").is_ok() {
            Box::new(ManagedIdentityTokenProvider {
                client: client.clone(),
                cache: Mutex::new(None),
            })
        } else {
            Box::new(AzureCliTokenProvider {
                tenant_id: config.tenant_id.clone(),
            })
        };

        Ok(Self {
            config,
            client,
            token,
            base,
        })
    }

    /// Create an `AzureClient` with a static bearer token and custom base
    /// URLs. Used exclusively in tests.
    #[cfg(test)]
    pub(crate) fn with_static_token(config: AzureConfig, token: &str, base: BaseUrls) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token: Box::new(StaticToken(token.to_string())),
            base,
        }
    }

    async fn bearer(&self) -> Result<String, DriverError> {
        self.token.token().await
    }

    fn subscription<'a>(&'a self, explicit: Option<&'a str>) -> Result<&'a str, DriverError> {
        explicit
            .or(self.config.subscription_id.as_deref())
            .ok_or_else(|| {
                DriverError::ReadFailed(
                    "no subscription id configured (set ARM_SUBSCRIPTION_ID or pass one explicitly)"
                        .into(),
                )
            })
    }

    // ── ARM error parsing ─────────────────────────────────────────────────────

    fn parse_arm_error(body: &Value) -> String {
        let err = body
            .get("error")
            .or_else(|| body.get("Error"))
            .unwrap_or(body);
        let code = err["code"].as_str().unwrap_or("Unknown");
        let message = err["message"].as_str().unwrap_or("unknown error");
        format!("{}: {}", code, message)
    }

    // ── ARM HTTP ──────────────────────────────────────────────────────────────

    async fn arm_get(&self, url: &str) -> Result<(u16, Value), DriverError> {
        let token = self.bearer().await?;
        debug!(url, "Azure ARM GET");
        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| DriverError::ReadFailed(format!("GET {}: {}", url, e)))?;

        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    /// GET a resource URL and map the status to existence:
    /// 2xx → exists, 404 → missing, anything else → error.
    async fn exists_at(&self, url: &str) -> Result<bool, DriverError> {
        let (status, body) = self.arm_get(url).await?;
        if (200..300).contains(&status) {
            return Ok(true);
        }
        if status == 404 {
            return Ok(false);
        }
        Err(DriverError::ReadFailed(format!(
            "GET {}: status {} — {}",
            url,
            status,
            Self::parse_arm_error(&body)
        )))
    }

    // ── Existence checks ──────────────────────────────────────────────────────

    pub async fn resource_group_exists(
        &self,
        name: &str,
        subscription: Option<&str>,
    ) -> Result<bool, DriverError> {
        let sub = self.subscription(subscription)?;
        let url = format!(
            "{}/subscriptions/{}/resourcegroups/{}?api-version=2021-04-01",
            self.base.management, sub, name,
        );
        self.exists_at(&url).await
    }

    pub async fn virtual_network_exists(
        &self,
        name: &str,
        resource_group: &str,
        subscription: Option<&str>,
    ) -> Result<bool, DriverError> {
        let sub = self.subscription(subscription)?;
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}?api-version=2023-04-01",
            self.base.management, sub, resource_group, name,
        );
        self.exists_at(&url).await
    }

    pub async fn storage_account_exists(
        &self,
        name: &str,
        resource_group: &str,
        subscription: Option<&str>,
    ) -> Result<bool, DriverError> {
        let sub = self.subscription(subscription)?;
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}?api-version=2022-09-01",
            self.base.management, sub, resource_group, name,
        );
        self.exists_at(&url).await
    }

    pub async fn key_vault_exists(
        &self,
        name: &str,
        resource_group: &str,
        subscription: Option<&str>,
    ) -> Result<bool, DriverError> {
        let sub = self.subscription(subscription)?;
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.KeyVault/vaults/{}?api-version=2023-02-01",
            self.base.management, sub, resource_group, name,
        );
        self.exists_at(&url).await
    }

    // ── Tenant lookup ─────────────────────────────────────────────────────────

    /// First tenant visible to the caller's credentials. Key vault modules
    /// take it as an input variable.
    pub async fn tenant_id(&self) -> Result<String, DriverError> {
        if let Some(tenant) = &self.config.tenant_id {
            return Ok(tenant.clone());
        }
        let url = format!("{}/tenants?api-version=2020-01-01", self.base.management);
        let (status, body) = self.arm_get(&url).await?;
        if !(200..300).contains(&status) {
            return Err(DriverError::ReadFailed(format!(
                "GET {}: status {} — {}",
                url,
                status,
                Self::parse_arm_error(&body)
            )));
        }
        body["value"][0]["tenantId"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| DriverError::ReadFailed("tenant list: no tenantId in response".into()))
    }
}

#[async_trait]
impl CloudProbe for AzureClient {
    async fn exists(&self, resource: &AzureResource) -> Result<bool, DriverError> {
        match resource {
            AzureResource::ResourceGroup { name } => self.resource_group_exists(name, None).await,
            AzureResource::VirtualNetwork {
                name,
                resource_group,
            } => self.virtual_network_exists(name, resource_group, None).await,
            AzureResource::StorageAccount {
                name,
                resource_group,
            } => self.storage_account_exists(name, resource_group, None).await,
            AzureResource::KeyVault {
                name,
                resource_group,
            } => self.key_vault_exists(name, resource_group, None).await,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
