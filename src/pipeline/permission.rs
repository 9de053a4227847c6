use std::sync::Arc;

use super::domain::{CompanyId, StageId, UserId};
use super::repository::{CompanyDirectory, StageAssignments, StoreError};

/// What happens when a stage carries no explicit user/role assignment. The
/// source system left this ambiguous; it is an explicit policy knob here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnassignedStagePolicy {
    /// Any member of the owning company may act on the stage.
    #[default]
    OpenToCompany,
    /// Only explicitly assigned users/roles may act; everyone else is denied.
    Deny,
}

/// Answers "can user U act on an application currently at stage S of company
/// C". Read-only and cheap; consulted on every transition attempt.
pub trait StageAccessPolicy: Send + Sync {
    fn can_act(
        &self,
        user: &UserId,
        stage: &StageId,
        company: &CompanyId,
    ) -> Result<bool, PermissionError>;
}

/// Default access policy: explicit stage assignments win, with a
/// configurable fallback for unassigned stages.
pub struct PermissionService<A, C> {
    assignments: Arc<A>,
    directory: Arc<C>,
    fallback: UnassignedStagePolicy,
}

impl<A, C> PermissionService<A, C>
where
    A: StageAssignments,
    C: CompanyDirectory,
{
    pub fn new(assignments: Arc<A>, directory: Arc<C>, fallback: UnassignedStagePolicy) -> Self {
        Self {
            assignments,
            directory,
            fallback,
        }
    }
}

impl<A, C> StageAccessPolicy for PermissionService<A, C>
where
    A: StageAssignments,
    C: CompanyDirectory,
{
    fn can_act(
        &self,
        user: &UserId,
        stage: &StageId,
        company: &CompanyId,
    ) -> Result<bool, PermissionError> {
        let assignment = self.assignments.assignment_for_stage(stage)?;

        if assignment.is_empty() {
            return match self.fallback {
                UnassignedStagePolicy::OpenToCompany => {
                    Ok(self.directory.is_member(user, company)?)
                }
                UnassignedStagePolicy::Deny => Ok(false),
            };
        }

        if assignment.user_ids.contains(user) {
            return Ok(true);
        }

        let roles = self.directory.roles_for_user(user, company)?;
        Ok(roles.iter().any(|role| assignment.role_ids.contains(role)))
    }
}

/// Error raised while resolving an access decision.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
