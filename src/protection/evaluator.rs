//! Violation evaluation
//!
//! Pure, synchronous decision functions, one per protection category. All
//! platform inputs (actor identity, actor roles, boundary role position) are
//! fetched by the caller beforehand so nothing here suspends; the decision
//! step is a single uninterruptible region per the concurrency model.

use crate::protection::event::RoleSnapshot;
use crate::protection::policy::{ProtectionCategory, ProtectionPolicy};
use crate::protection::rate_window::RateWindow;
use chrono::{DateTime, Utc};

/// The actor held responsible for a change, as resolved from the audit log
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub id: u64,
    /// Role ids the actor currently holds, for whitelist-by-role checks
    pub role_ids: Vec<u64>,
}

/// A detected policy violation and the corrective work it requires
#[derive(Debug, Clone)]
pub struct Violation {
    pub category: ProtectionCategory,
    pub messages: Vec<String>,
    /// Reassert the prior permission/restriction state of the subject
    pub rollback_permissions: bool,
    /// Remove the subject from the guild (or reverse its removal)
    pub rollback_membership: bool,
}

impl Violation {
    fn new(category: ProtectionCategory, message: String) -> Self {
        Self {
            category,
            messages: vec![message],
            rollback_permissions: false,
            rollback_membership: false,
        }
    }
}

/// Role at or above the boundary changed rank or permissions.
///
/// Position changes are flagged but not rolled back; only the permission
/// delta is restorable without reshuffling unrelated role ranks.
pub fn role_hierarchy(
    before: &RoleSnapshot,
    after: &RoleSnapshot,
    boundary_position: Option<u16>,
) -> Option<Violation> {
    let boundary = boundary_position?;
    if before.position < boundary && after.position < boundary {
        return None;
    }

    let position_changed = before.position != after.position;
    let permissions_changed = before.permissions != after.permissions;
    if !position_changed && !permissions_changed {
        return None;
    }

    let mut violation = Violation::new(
        ProtectionCategory::RoleHierarchy,
        format!(
            "Protected role `{}` (rank {}) was modified",
            after.name, after.position
        ),
    );
    if position_changed {
        violation.messages.push(format!(
            "Rank changed from {} to {}",
            before.position, after.position
        ));
    }
    if permissions_changed {
        violation
            .messages
            .push("Permission set changed, restoring previous permissions".to_string());
        violation.rollback_permissions = true;
    }
    Some(violation)
}

/// A role gained a permission from the denied set
pub fn critical_capability(
    policy: &ProtectionPolicy,
    before: &RoleSnapshot,
    after: &RoleSnapshot,
) -> Option<Violation> {
    let denied = policy.denied_capabilities?;
    let granted = after.permissions & !before.permissions;
    let offending = granted & denied;
    if offending.is_empty() {
        return None;
    }

    let mut violation = Violation::new(
        ProtectionCategory::CriticalCapability,
        format!(
            "Role `{}` was granted denied capabilities: {}",
            after.name,
            offending.get_permission_names().join(", ")
        ),
    );
    violation.rollback_permissions = true;
    Some(violation)
}

/// Burst of destructive actions by one actor. Fires once per window.
pub fn mass_action(
    policy: &ProtectionPolicy,
    category: ProtectionCategory,
    actor_id: u64,
    rate: &RateWindow,
    now: DateTime<Utc>,
) -> Option<Violation> {
    let threshold = policy.rate.as_ref()?;
    if !rate.threshold_crossed(actor_id, category, threshold, now) {
        return None;
    }

    let mut violation = Violation::new(
        category,
        format!(
            "Actor performed {} or more {category} actions within {} seconds",
            threshold.count, threshold.window_seconds
        ),
    );
    match category {
        // The latest subject's state is restorable
        ProtectionCategory::MassBan => violation.rollback_membership = true,
        ProtectionCategory::MassTimeout | ProtectionCategory::MassVoiceToggle => {
            violation.rollback_permissions = true;
        }
        // Deletions and disconnects have nothing left to restore here
        _ => {}
    }
    Some(violation)
}

/// An automated account joined without pre-approval
pub fn bot_admission(
    policy: &ProtectionPolicy,
    user_id: u64,
    is_bot: bool,
) -> Option<Violation> {
    if !is_bot || policy.whitelist_users.contains(&user_id) {
        return None;
    }

    let mut violation = Violation::new(
        ProtectionCategory::BotAdmission,
        format!("Unapproved bot account <@{user_id}> joined the guild"),
    );
    violation.rollback_membership = true;
    Some(violation)
}

/// An account younger than the configured minimum age joined. No third party
/// is punished; there is no actor to blame for an organic join.
pub fn new_account(
    policy: &ProtectionPolicy,
    user_id: u64,
    account_created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<Violation> {
    let min_days = policy.min_account_age_days?;
    let age_days = (now - account_created_at).num_days();
    if age_days >= i64::from(min_days) {
        return None;
    }

    let mut violation = Violation::new(
        ProtectionCategory::NewAccount,
        format!("Account <@{user_id}> is {age_days} day(s) old, minimum is {min_days}"),
    );
    violation.rollback_membership = true;
    Some(violation)
}

/// A deny-listed role was granted. Reverted unconditionally; the grantor is
/// typically an automated assignment elsewhere, so nobody is punished.
pub fn blocked_role(policy: &ProtectionPolicy, added: &[u64]) -> Option<Violation> {
    let offending: Vec<u64> = added
        .iter()
        .copied()
        .filter(|r| policy.blocked_roles.contains(r))
        .collect();
    if offending.is_empty() {
        return None;
    }

    let mut violation = Violation::new(
        ProtectionCategory::BlockedRole,
        format!(
            "Deny-listed role(s) granted: {}",
            offending
                .iter()
                .map(|r| format!("<@&{r}>"))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    );
    violation.rollback_permissions = true;
    Some(violation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::policy::RateThreshold;
    use chrono::Duration;
    use serenity::model::Permissions;

    fn role(position: u16, permissions: Permissions) -> RoleSnapshot {
        RoleSnapshot {
            role_id: 42,
            name: "mods".to_string(),
            position,
            permissions,
        }
    }

    fn enabled_policy() -> ProtectionPolicy {
        ProtectionPolicy {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_role_hierarchy_flags_protected_permission_change() {
        let before = role(8, Permissions::SEND_MESSAGES);
        let after = role(8, Permissions::SEND_MESSAGES | Permissions::BAN_MEMBERS);

        let violation = role_hierarchy(&before, &after, Some(5)).unwrap();
        assert!(violation.rollback_permissions);
        assert!(!violation.rollback_membership);
    }

    #[test]
    fn test_role_hierarchy_position_change_not_rolled_back() {
        let before = role(8, Permissions::SEND_MESSAGES);
        let after = role(9, Permissions::SEND_MESSAGES);

        let violation = role_hierarchy(&before, &after, Some(5)).unwrap();
        assert!(!violation.rollback_permissions);
        assert_eq!(violation.messages.len(), 2);
    }

    #[test]
    fn test_role_hierarchy_ignores_roles_below_boundary() {
        let before = role(2, Permissions::SEND_MESSAGES);
        let after = role(2, Permissions::SEND_MESSAGES | Permissions::BAN_MEMBERS);

        assert!(role_hierarchy(&before, &after, Some(5)).is_none());
        // Unconfigured boundary disables the guard
        assert!(role_hierarchy(&before, &after, None).is_none());
    }

    #[test]
    fn test_critical_capability_detects_newly_granted_denied_bits() {
        let mut policy = enabled_policy();
        policy.denied_capabilities = Some(Permissions::ADMINISTRATOR | Permissions::MANAGE_GUILD);

        let before = role(2, Permissions::SEND_MESSAGES);
        let after = role(2, Permissions::SEND_MESSAGES | Permissions::ADMINISTRATOR);

        let violation = critical_capability(&policy, &before, &after).unwrap();
        assert!(violation.rollback_permissions);

        // A denied bit that was already present is not a new grant
        let before = role(2, Permissions::ADMINISTRATOR);
        let after = role(2, Permissions::ADMINISTRATOR | Permissions::SEND_MESSAGES);
        assert!(critical_capability(&policy, &before, &after).is_none());
    }

    #[test]
    fn test_mass_action_fires_once_at_threshold() {
        let mut policy = enabled_policy();
        policy.rate = Some(RateThreshold {
            count: 3,
            window_seconds: 30,
        });
        let rate = RateWindow::new();
        let t0 = Utc::now();
        let category = ProtectionCategory::MassChannelDelete;

        assert!(mass_action(&policy, category, 7, &rate, t0).is_none());
        assert!(mass_action(&policy, category, 7, &rate, t0 + Duration::seconds(5)).is_none());
        let violation =
            mass_action(&policy, category, 7, &rate, t0 + Duration::seconds(10)).unwrap();
        assert_eq!(violation.category, category);
        // Fourth deletion in the same window does not re-fire
        assert!(mass_action(&policy, category, 7, &rate, t0 + Duration::seconds(11)).is_none());
    }

    #[test]
    fn test_mass_action_rollback_flags_by_category() {
        let mut policy = enabled_policy();
        policy.rate = Some(RateThreshold {
            count: 1,
            window_seconds: 30,
        });
        let rate = RateWindow::new();
        let now = Utc::now();

        let v = mass_action(&policy, ProtectionCategory::MassBan, 1, &rate, now).unwrap();
        assert!(v.rollback_membership);

        let v = mass_action(&policy, ProtectionCategory::MassTimeout, 2, &rate, now).unwrap();
        assert!(v.rollback_permissions);

        let v = mass_action(&policy, ProtectionCategory::MassRoleDelete, 3, &rate, now).unwrap();
        assert!(!v.rollback_permissions);
        assert!(!v.rollback_membership);
    }

    #[test]
    fn test_bot_admission_respects_preapproval() {
        let mut policy = enabled_policy();
        policy.whitelist_users.insert(900);

        assert!(bot_admission(&policy, 900, true).is_none());
        assert!(bot_admission(&policy, 901, false).is_none());

        let violation = bot_admission(&policy, 901, true).unwrap();
        assert!(violation.rollback_membership);
    }

    #[test]
    fn test_new_account_age_gate() {
        let mut policy = enabled_policy();
        policy.min_account_age_days = Some(7);
        let now = Utc::now();

        let young = now - Duration::days(2);
        let violation = new_account(&policy, 5, young, now).unwrap();
        assert!(violation.rollback_membership);

        let old = now - Duration::days(30);
        assert!(new_account(&policy, 5, old, now).is_none());

        // Unconfigured minimum disables the guard
        policy.min_account_age_days = None;
        assert!(new_account(&policy, 5, young, now).is_none());
    }

    #[test]
    fn test_blocked_role_reverts_only_denied_grants() {
        let mut policy = enabled_policy();
        policy.blocked_roles.insert(10);

        assert!(blocked_role(&policy, &[11, 12]).is_none());

        let violation = blocked_role(&policy, &[11, 10]).unwrap();
        assert!(violation.rollback_permissions);
        assert!(!violation.rollback_membership);
    }
}
