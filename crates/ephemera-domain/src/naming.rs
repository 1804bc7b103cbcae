use uuid::Uuid;

/// Azure storage account names: lowercase alphanumeric, at most 24 chars.
pub const STORAGE_ACCOUNT_NAME_MAX: usize = 24;

/// A 6-character lowercase alphanumeric id, unique per run. Appended to
/// every resource name so concurrent runs against the same subscription
/// never collide.
pub fn unique_suffix() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect()
}

/// Force a candidate storage account name into Azure's constraints:
/// lowercase, alphanumeric only, truncated to 24 chars.
pub fn clamp_storage_account_name(candidate: &str) -> String {
    candidate
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(STORAGE_ACCOUNT_NAME_MAX)
        .collect()
}
