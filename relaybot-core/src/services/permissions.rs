use relaybot_common::models::SenderRoles;

/// Who may talk to the bot.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    pub subscribers_only: bool,
    /// Moderators pass a subscribers-only gate.
    pub moderators_bypass: bool,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            subscribers_only: false,
            moderators_bypass: true,
        }
    }
}

impl PermissionPolicy {
    pub fn allows(&self, roles: &SenderRoles) -> bool {
        if !self.subscribers_only {
            return true;
        }
        roles.subscriber
            || roles.broadcaster
            || roles.admin
            || (self.moderators_bypass && roles.moderator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_policy_allows_everyone() {
        assert!(PermissionPolicy::default().allows(&SenderRoles::default()));
    }

    #[test]
    fn test_subscribers_only() {
        let policy = PermissionPolicy { subscribers_only: true, moderators_bypass: true };
        assert!(!policy.allows(&SenderRoles::default()));
        assert!(policy.allows(&SenderRoles { subscriber: true, ..Default::default() }));
        assert!(policy.allows(&SenderRoles { broadcaster: true, ..Default::default() }));
        assert!(policy.allows(&SenderRoles { moderator: true, ..Default::default() }));

        let strict = PermissionPolicy { subscribers_only: true, moderators_bypass: false };
        assert!(!strict.allows(&SenderRoles { moderator: true, ..Default::default() }));
    }
}
