/// User confirmation port for destructive transitions (overwrite an existing
/// entry, delete an entry).
///
/// Skipping confirmation changes persisted data irreversibly, so this gate
/// lives in the controller as a business rule rather than in the UI layer.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Approves everything. The `--yes` code path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Declines everything. Used to assert that a declined confirmation leaves
/// persisted state untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Confirm for DenyAll {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}
