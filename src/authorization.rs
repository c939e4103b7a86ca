use crate::error::SchemaError;
use crate::permission::{Action, PermissionSet};
use crate::role::Role;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Per-request permission evaluator.
///
/// Holds the caller's active roles and a bypass switch. One value is built for
/// each inbound request and passed down the call chain; it is never shared
/// between requests.
#[derive(Debug)]
pub struct Authorization {
    enabled: AtomicBool,
    default_enabled: bool,
    roles: BTreeSet<Role>,
    last_message: Mutex<Option<String>>,
}

impl Default for Authorization {
    fn default() -> Self {
        Self::new([Role::Any])
    }
}

impl Clone for Authorization {
    fn clone(&self) -> Self {
        Self {
            enabled: AtomicBool::new(self.is_enabled()),
            default_enabled: self.default_enabled,
            roles: self.roles.clone(),
            last_message: Mutex::new(self.last_message.lock().clone()),
        }
    }
}

impl Authorization {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            default_enabled: true,
            roles: roles.into_iter().collect(),
            last_message: Mutex::new(None),
        }
    }

    /// A context that starts (and resets to) bypass mode, for internal jobs.
    pub fn privileged() -> Self {
        let mut auth = Self::new([]);
        auth.default_enabled = false;
        auth.enabled = AtomicBool::new(false);
        auth
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn default_enabled(&self) -> bool {
        self.default_enabled
    }

    pub fn set_default_enabled(&mut self, enabled: bool) {
        self.default_enabled = enabled;
    }

    /// Restores the enabled flag to the configured default.
    pub fn reset(&self) {
        self.enabled.store(self.default_enabled, Ordering::Release);
    }

    pub fn set_role(&mut self, role: Role) {
        self.roles.insert(role);
    }

    pub fn unset_role(&mut self, role: &Role) {
        self.roles.remove(role);
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter()
    }

    pub fn is_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    pub fn clean_roles(&mut self) {
        self.roles.clear();
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().clone()
    }

    /// Passes when bypassed, or when any of `granted` is an active role.
    pub fn check<'a>(
        &self,
        action: Action,
        granted: impl IntoIterator<Item = &'a Role>,
    ) -> Result<(), SchemaError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let granted: Vec<&Role> = granted.into_iter().collect();
        let Some(first) = granted.first() else {
            let message = format!("No permissions provided for action '{action}'");
            return Err(self.deny(message));
        };
        if granted.iter().any(|role| self.roles.contains(role)) {
            return Ok(());
        }
        let active = render_roles(self.roles.iter());
        let given = render_roles(granted.iter().copied());
        Err(self.deny(format!(
            "Missing \"{action}\" permission for role \"{first}\". Only \"{active}\" scopes are \
             allowed and \"{given}\" was given."
        )))
    }

    pub fn is_valid(&self, action: Action, permissions: &PermissionSet) -> bool {
        self.check(action, permissions.roles_for(action)).is_ok()
    }

    /// Runs `f` with authorization bypassed, restoring the previous mode on
    /// every exit path, including errors, panics and cancellation.
    pub async fn skip<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.bypass();
        f().await
    }

    pub fn skip_sync<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.bypass();
        f()
    }

    /// Disables checks until the returned guard drops.
    pub fn bypass(&self) -> BypassGuard<'_> {
        let previous = self.enabled.swap(false, Ordering::AcqRel);
        if previous {
            debug!(roles = %render_roles(self.roles.iter()), "authorization bypassed");
        }
        BypassGuard {
            auth: self,
            previous,
        }
    }

    fn deny(&self, message: String) -> SchemaError {
        *self.last_message.lock() = Some(message.clone());
        SchemaError::Unauthorized(message)
    }
}

fn render_roles<'a>(roles: impl Iterator<Item = &'a Role>) -> String {
    let roles: Vec<String> = roles.map(ToString::to_string).collect();
    serde_json::to_string(&roles).unwrap_or_default()
}

#[must_use = "bypass ends as soon as the guard is dropped"]
pub struct BypassGuard<'a> {
    auth: &'a Authorization,
    previous: bool,
}

impl Drop for BypassGuard<'_> {
    fn drop(&mut self) {
        self.auth.enabled.store(self.previous, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::Authorization;
    use crate::error::SchemaError;
    use crate::permission::{Action, Permission, PermissionSet};
    use crate::role::Role;

    fn perms(raw: &[&str]) -> PermissionSet {
        PermissionSet::new(raw.iter().map(|p| Permission::parse(p).expect("permission")))
    }

    #[test]
    fn intersects_active_roles_with_granted_roles() {
        let auth = Authorization::new([Role::Any]);
        assert!(auth.is_valid(Action::Read, &perms(&["read:any"])));
        assert!(!auth.is_valid(Action::Read, &perms(&["read:user:u1"])));
        let message = auth.last_message().expect("message recorded");
        assert!(message.contains("read"));
        assert!(message.contains("user:u1"));
        assert!(message.contains("[\"any\"]"));
    }

    #[test]
    fn empty_grants_fail_with_message() {
        let auth = Authorization::new([Role::Any]);
        assert!(!auth.is_valid(Action::Delete, &PermissionSet::default()));
        assert_eq!(
            auth.last_message().as_deref(),
            Some("No permissions provided for action 'delete'")
        );
    }

    #[test]
    fn grants_for_other_actions_do_not_count() {
        let auth = Authorization::new([Role::Any]);
        assert!(!auth.is_valid(Action::Update, &perms(&["read:any"])));
    }

    #[test]
    fn disabled_context_passes_everything() {
        let auth = Authorization::new([]);
        auth.disable();
        assert!(auth.is_valid(Action::Read, &PermissionSet::default()));
        auth.reset();
        assert!(auth.is_enabled());
    }

    #[test]
    fn role_set_mutation() {
        let mut auth = Authorization::new([Role::Any]);
        auth.set_role(Role::user("u1"));
        assert!(auth.is_role(&Role::user("u1")));
        assert!(auth.is_valid(Action::Read, &perms(&["read:user:u1"])));
        auth.unset_role(&Role::user("u1"));
        assert!(!auth.is_role(&Role::user("u1")));
        assert_eq!(auth.roles().count(), 1);
    }

    #[tokio::test]
    async fn skip_restores_mode_after_error() {
        let auth = Authorization::new([]);
        let result: Result<(), SchemaError> = auth
            .skip(|| async {
                assert!(!auth.is_enabled());
                Err(SchemaError::InvalidValue("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(auth.is_enabled());
    }

    #[test]
    fn skip_restores_mode_after_panic() {
        let auth = Authorization::new([]);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            auth.skip_sync::<()>(|| panic!("boom"))
        }));
        assert!(outcome.is_err());
        assert!(auth.is_enabled());
    }

    #[test]
    fn nested_skip_restores_outer_mode() {
        let auth = Authorization::new([]);
        auth.skip_sync(|| {
            auth.skip_sync(|| assert!(!auth.is_enabled()));
            assert!(!auth.is_enabled());
        });
        assert!(auth.is_enabled());
    }

    #[test]
    fn privileged_context_starts_bypassed() {
        let auth = Authorization::privileged();
        assert!(!auth.is_enabled());
        auth.enable();
        auth.reset();
        assert!(!auth.is_enabled());
    }
}
