//! Visibility policy for plans
//!
//! Pure decision functions: who may read a plan, who may set which
//! visibility, and what a plan looks like when it is created without an
//! explicit choice. Routes gather the facts (principal, plan,
//! membership) and come here for the verdict, so the rules live in one
//! place and test without a database.
//!
//! A denied read is reported to clients exactly like a missing plan.
//! That mapping happens in the route layer; here a denial is just
//! [`ReadDecision::Deny`].

use crate::auth::principal::Principal;
use crate::db::schemas::{PlanDoc, Visibility};

/// Outcome of a read check against a plan's visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDecision {
    /// Readable with the facts already in hand
    Allow,
    /// Not readable, no matter what else is true
    Deny,
    /// Readable only if the caller has a claimed membership row on
    /// this plan; the route must look that up
    RequiresMembership,
}

/// Decide read access from the plan and principal alone.
///
/// Admins read everything. Public plans read for everyone. Otherwise an
/// account is needed: the creator passes outright, any other account
/// hinges on membership. Anonymous callers and invite-token guests
/// never pass here; guests reach their plan through the guest routes
/// instead.
pub fn read_decision(principal: &Principal, plan: &PlanDoc) -> ReadDecision {
    if principal.is_admin() {
        return ReadDecision::Allow;
    }
    if plan.visibility == Visibility::Public {
        return ReadDecision::Allow;
    }
    match principal.user_id() {
        None => ReadDecision::Deny,
        Some(user_id) => {
            if plan.created_by_user_id.as_deref() == Some(user_id) {
                ReadDecision::Allow
            } else {
                ReadDecision::RequiresMembership
            }
        }
    }
}

/// Full read check once membership is known.
pub fn can_read(principal: &Principal, plan: &PlanDoc, is_linked_member: bool) -> bool {
    match read_decision(principal, plan) {
        ReadDecision::Allow => true,
        ReadDecision::Deny => false,
        ReadDecision::RequiresMembership => is_linked_member,
    }
}

/// May this principal set this visibility on a plan it can write?
///
/// Admins may set anything. Signed-in users may keep a plan off the
/// public web but may not put it there. Anonymous creators get public
/// and nothing else, since a plan nobody owns must stay reachable by
/// link alone.
pub fn can_set_visibility(principal: &Principal, requested: Visibility) -> bool {
    if principal.is_admin() {
        return true;
    }
    if principal.is_authenticated() {
        return requested != Visibility::Public;
    }
    requested == Visibility::Public
}

/// Visibility applied when a creating request does not pick one.
pub fn default_visibility(principal: &Principal) -> Visibility {
    if principal.is_authenticated() {
        Visibility::InviteOnly
    } else {
        Visibility::Public
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{AppMetadata, IdentityClaims};
    use bson::oid::ObjectId;

    fn anonymous() -> Principal {
        Principal::Anonymous
    }

    fn user(sub: &str) -> Principal {
        Principal::from_claims(IdentityClaims {
            sub: sub.to_string(),
            ..Default::default()
        })
    }

    fn admin(sub: &str) -> Principal {
        Principal::from_claims(IdentityClaims {
            sub: sub.to_string(),
            app_metadata: Some(AppMetadata {
                role: Some("admin".to_string()),
            }),
            ..Default::default()
        })
    }

    fn guest() -> Principal {
        Principal::guest(ObjectId::new(), ObjectId::new())
    }

    fn plan(visibility: Visibility, creator: Option<&str>) -> PlanDoc {
        let mut plan = PlanDoc::new(
            "Weekend ride".to_string(),
            visibility,
            creator.map(String::from),
        );
        plan._id = Some(ObjectId::new());
        plan
    }

    #[test]
    fn test_public_plans_readable_by_everyone() {
        let plan = plan(Visibility::Public, Some("creator"));
        assert_eq!(read_decision(&anonymous(), &plan), ReadDecision::Allow);
        assert_eq!(read_decision(&user("other"), &plan), ReadDecision::Allow);
        assert_eq!(read_decision(&admin("root"), &plan), ReadDecision::Allow);
        assert_eq!(read_decision(&guest(), &plan), ReadDecision::Allow);
    }

    #[test]
    fn test_admin_reads_everything() {
        for visibility in [Visibility::Public, Visibility::InviteOnly, Visibility::Private] {
            let plan = plan(visibility, Some("creator"));
            assert_eq!(read_decision(&admin("root"), &plan), ReadDecision::Allow);
        }
    }

    #[test]
    fn test_creator_reads_own_non_public_plan() {
        for visibility in [Visibility::InviteOnly, Visibility::Private] {
            let plan = plan(visibility, Some("creator"));
            assert_eq!(read_decision(&user("creator"), &plan), ReadDecision::Allow);
        }
    }

    #[test]
    fn test_other_user_needs_membership() {
        let plan = plan(Visibility::InviteOnly, Some("creator"));
        assert_eq!(
            read_decision(&user("other"), &plan),
            ReadDecision::RequiresMembership
        );
        assert!(can_read(&user("other"), &plan, true));
        assert!(!can_read(&user("other"), &plan, false));
    }

    #[test]
    fn test_membership_never_rescues_anonymous() {
        let plan = plan(Visibility::InviteOnly, Some("creator"));
        assert_eq!(read_decision(&anonymous(), &plan), ReadDecision::Deny);
        // The membership flag must be irrelevant once denied.
        assert!(!can_read(&anonymous(), &plan, true));
    }

    #[test]
    fn test_private_plan_same_rules_as_invite_only() {
        let plan = plan(Visibility::Private, Some("creator"));
        assert_eq!(read_decision(&anonymous(), &plan), ReadDecision::Deny);
        assert_eq!(
            read_decision(&user("other"), &plan),
            ReadDecision::RequiresMembership
        );
    }

    #[test]
    fn test_guest_token_does_not_open_normal_reads() {
        let plan = plan(Visibility::InviteOnly, Some("creator"));
        assert_eq!(read_decision(&guest(), &plan), ReadDecision::Deny);
    }

    #[test]
    fn test_anonymous_plan_without_creator() {
        // Plans created anonymously have no creator id; non-public ones
        // are then only reachable by admins and linked members.
        let plan = plan(Visibility::InviteOnly, None);
        assert_eq!(
            read_decision(&user("anyone"), &plan),
            ReadDecision::RequiresMembership
        );
        assert_eq!(read_decision(&anonymous(), &plan), ReadDecision::Deny);
    }

    #[test]
    fn test_visibility_matrix_for_anonymous() {
        assert!(can_set_visibility(&anonymous(), Visibility::Public));
        assert!(!can_set_visibility(&anonymous(), Visibility::InviteOnly));
        assert!(!can_set_visibility(&anonymous(), Visibility::Private));
    }

    #[test]
    fn test_visibility_matrix_for_user() {
        assert!(!can_set_visibility(&user("u"), Visibility::Public));
        assert!(can_set_visibility(&user("u"), Visibility::InviteOnly));
        assert!(can_set_visibility(&user("u"), Visibility::Private));
    }

    #[test]
    fn test_visibility_matrix_for_admin() {
        assert!(can_set_visibility(&admin("a"), Visibility::Public));
        assert!(can_set_visibility(&admin("a"), Visibility::InviteOnly));
        assert!(can_set_visibility(&admin("a"), Visibility::Private));
    }

    #[test]
    fn test_guest_treated_like_anonymous_for_visibility() {
        assert!(can_set_visibility(&guest(), Visibility::Public));
        assert!(!can_set_visibility(&guest(), Visibility::Private));
    }

    #[test]
    fn test_default_visibility() {
        assert_eq!(default_visibility(&anonymous()), Visibility::Public);
        assert_eq!(default_visibility(&guest()), Visibility::Public);
        assert_eq!(default_visibility(&user("u")), Visibility::InviteOnly);
        assert_eq!(default_visibility(&admin("a")), Visibility::InviteOnly);
    }
}
