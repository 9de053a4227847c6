//! In-process implementations of the engine's storage and collaborator
//! traits, backed by mutex-guarded maps. Persistence technology is an
//! external concern; these are the single-process reference stores used by
//! the server wiring, the demo command, and the test suite.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::domain::{
    ApplicationId, CompanyId, DateRange, Phase, PhaseId, RoleId, Stage, StageHistoryEntry, StageId,
    UserId, Workflow, WorkflowId,
};
use super::repository::{
    ApplicationDirectory, ApplicationProfile, CompanyDirectory, EventError, LedgerError,
    LedgerTransition, PipelineStore, StageAssignment, StageAssignments, StageChangedEvent,
    StageEventPublisher, StageHistoryStore, StoreError,
};

#[derive(Default)]
struct Topology {
    phases: HashMap<PhaseId, Phase>,
    workflows: HashMap<WorkflowId, Workflow>,
    stages: HashMap<StageId, Stage>,
}

/// Mutex-guarded topology store.
#[derive(Default, Clone)]
pub struct MemoryPipelineStore {
    inner: Arc<Mutex<Topology>>,
}

impl PipelineStore for MemoryPipelineStore {
    fn insert_phase(&self, phase: Phase) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().expect("pipeline store mutex poisoned");
        if guard.phases.contains_key(&phase.id) {
            return Err(StoreError::Conflict);
        }
        guard.phases.insert(phase.id.clone(), phase);
        Ok(())
    }

    fn phase(&self, id: &PhaseId) -> Result<Option<Phase>, StoreError> {
        let guard = self.inner.lock().expect("pipeline store mutex poisoned");
        Ok(guard.phases.get(id).cloned())
    }

    fn phases_for_company(&self, company: &CompanyId) -> Result<Vec<Phase>, StoreError> {
        let guard = self.inner.lock().expect("pipeline store mutex poisoned");
        let mut phases: Vec<Phase> = guard
            .phases
            .values()
            .filter(|phase| &phase.company_id == company)
            .cloned()
            .collect();
        phases.sort_by_key(|phase| phase.sort_order);
        Ok(phases)
    }

    fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().expect("pipeline store mutex poisoned");
        if guard.workflows.contains_key(&workflow.id) {
            return Err(StoreError::Conflict);
        }
        guard.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    fn update_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().expect("pipeline store mutex poisoned");
        if !guard.workflows.contains_key(&workflow.id) {
            return Err(StoreError::NotFound);
        }
        guard.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    fn workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let guard = self.inner.lock().expect("pipeline store mutex poisoned");
        Ok(guard.workflows.get(id).cloned())
    }

    fn workflows_for_phase(&self, phase: &PhaseId) -> Result<Vec<Workflow>, StoreError> {
        let guard = self.inner.lock().expect("pipeline store mutex poisoned");
        let mut workflows: Vec<Workflow> = guard
            .workflows
            .values()
            .filter(|workflow| &workflow.phase_id == phase)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    fn default_workflow_for_phase(&self, phase: &PhaseId) -> Result<Option<Workflow>, StoreError> {
        let guard = self.inner.lock().expect("pipeline store mutex poisoned");
        Ok(guard
            .workflows
            .values()
            .find(|workflow| &workflow.phase_id == phase && workflow.is_default)
            .cloned())
    }

    fn set_default_workflow(
        &self,
        phase: &PhaseId,
        workflow: &WorkflowId,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().expect("pipeline store mutex poisoned");
        match guard.workflows.get(workflow) {
            Some(found) if &found.phase_id == phase => {}
            Some(_) => return Err(StoreError::Conflict),
            None => return Err(StoreError::NotFound),
        }
        // Clear-then-set under the single lock keeps "exactly one default
        // per phase" from racing concurrent swaps.
        for entry in guard.workflows.values_mut() {
            if &entry.phase_id == phase {
                entry.is_default = &entry.id == workflow;
            }
        }
        Ok(())
    }

    fn insert_stage(&self, stage: Stage) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().expect("pipeline store mutex poisoned");
        if guard.stages.contains_key(&stage.id) {
            return Err(StoreError::Conflict);
        }
        guard.stages.insert(stage.id.clone(), stage);
        Ok(())
    }

    fn update_stage(&self, stage: Stage) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().expect("pipeline store mutex poisoned");
        if !guard.stages.contains_key(&stage.id) {
            return Err(StoreError::NotFound);
        }
        guard.stages.insert(stage.id.clone(), stage);
        Ok(())
    }

    fn stage(&self, id: &StageId) -> Result<Option<Stage>, StoreError> {
        let guard = self.inner.lock().expect("pipeline store mutex poisoned");
        Ok(guard.stages.get(id).cloned())
    }

    fn stages_for_workflow(&self, workflow: &WorkflowId) -> Result<Vec<Stage>, StoreError> {
        let guard = self.inner.lock().expect("pipeline store mutex poisoned");
        let mut stages: Vec<Stage> = guard
            .stages
            .values()
            .filter(|stage| &stage.workflow_id == workflow)
            .cloned()
            .collect();
        stages.sort_by_key(|stage| stage.order);
        Ok(stages)
    }
}

/// Mutex-guarded stage-history ledger with the optimistic close-and-open
/// write described in the ledger trait.
#[derive(Default, Clone)]
pub struct MemoryStageHistory {
    entries: Arc<Mutex<Vec<StageHistoryEntry>>>,
}

impl MemoryStageHistory {
    /// Test/debug view of the full ledger.
    pub fn snapshot(&self) -> Vec<StageHistoryEntry> {
        self.entries.lock().expect("ledger mutex poisoned").clone()
    }
}

impl StageHistoryStore for MemoryStageHistory {
    fn open_entry(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<StageHistoryEntry>, LedgerError> {
        let guard = self.entries.lock().expect("ledger mutex poisoned");
        Ok(guard
            .iter()
            .find(|entry| &entry.application_id == application && entry.is_open())
            .cloned())
    }

    fn record_transition(
        &self,
        transition: LedgerTransition,
    ) -> Result<StageHistoryEntry, LedgerError> {
        let mut guard = self.entries.lock().expect("ledger mutex poisoned");

        match &transition.expected_current {
            Some((workflow, stage)) => {
                let open = guard.iter_mut().find(|entry| {
                    entry.application_id == transition.application_id
                        && &entry.workflow_id == workflow
                        && &entry.stage_id == stage
                        && entry.is_open()
                });
                match open {
                    Some(entry) => entry.left_at = Some(transition.occurred_at),
                    None => return Err(LedgerError::Conflict(transition.application_id)),
                }
            }
            None => {
                let any_open = guard
                    .iter()
                    .any(|entry| entry.application_id == transition.application_id && entry.is_open());
                if any_open {
                    return Err(LedgerError::Conflict(transition.application_id));
                }
            }
        }

        let entry = StageHistoryEntry {
            application_id: transition.application_id,
            workflow_id: transition.target_workflow,
            stage_id: transition.target_stage,
            entered_at: transition.occurred_at,
            left_at: None,
        };
        guard.push(entry.clone());
        Ok(entry)
    }

    fn entries_for_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Vec<StageHistoryEntry>, LedgerError> {
        let guard = self.entries.lock().expect("ledger mutex poisoned");
        let mut entries: Vec<StageHistoryEntry> = guard
            .iter()
            .filter(|entry| &entry.application_id == application)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.entered_at);
        Ok(entries)
    }

    fn entries_for_workflow(
        &self,
        workflow: &WorkflowId,
        range: Option<&DateRange>,
    ) -> Result<Vec<StageHistoryEntry>, LedgerError> {
        let guard = self.entries.lock().expect("ledger mutex poisoned");
        let mut entries: Vec<StageHistoryEntry> = guard
            .iter()
            .filter(|entry| &entry.workflow_id == workflow)
            .filter(|entry| range.map(|r| r.contains(entry.entered_at)).unwrap_or(true))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.entered_at);
        Ok(entries)
    }
}

/// Per-stage assignment table.
#[derive(Default, Clone)]
pub struct MemoryStageAssignments {
    assignments: Arc<Mutex<HashMap<StageId, StageAssignment>>>,
}

impl MemoryStageAssignments {
    pub fn assign(&self, stage: StageId, assignment: StageAssignment) {
        self.assignments
            .lock()
            .expect("assignment mutex poisoned")
            .insert(stage, assignment);
    }
}

impl StageAssignments for MemoryStageAssignments {
    fn assignment_for_stage(&self, stage: &StageId) -> Result<StageAssignment, StoreError> {
        let guard = self.assignments.lock().expect("assignment mutex poisoned");
        Ok(guard.get(stage).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct Memberships {
    members: HashMap<CompanyId, Vec<UserId>>,
    roles: HashMap<(CompanyId, UserId), Vec<RoleId>>,
}

/// Company membership and role grants.
#[derive(Default, Clone)]
pub struct MemoryCompanyDirectory {
    inner: Arc<Mutex<Memberships>>,
}

impl MemoryCompanyDirectory {
    pub fn add_member(&self, company: CompanyId, user: UserId, roles: Vec<RoleId>) {
        let mut guard = self.inner.lock().expect("directory mutex poisoned");
        guard
            .members
            .entry(company.clone())
            .or_default()
            .push(user.clone());
        guard.roles.insert((company, user), roles);
    }
}

impl CompanyDirectory for MemoryCompanyDirectory {
    fn is_member(&self, user: &UserId, company: &CompanyId) -> Result<bool, StoreError> {
        let guard = self.inner.lock().expect("directory mutex poisoned");
        Ok(guard
            .members
            .get(company)
            .map(|users| users.contains(user))
            .unwrap_or(false))
    }

    fn roles_for_user(
        &self,
        user: &UserId,
        company: &CompanyId,
    ) -> Result<Vec<RoleId>, StoreError> {
        let guard = self.inner.lock().expect("directory mutex poisoned");
        Ok(guard
            .roles
            .get(&(company.clone(), user.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Candidate application directory.
#[derive(Default, Clone)]
pub struct MemoryApplicationDirectory {
    applications: Arc<Mutex<HashMap<ApplicationId, ApplicationProfile>>>,
}

impl MemoryApplicationDirectory {
    pub fn register(&self, profile: ApplicationProfile) {
        self.applications
            .lock()
            .expect("application mutex poisoned")
            .insert(profile.id.clone(), profile);
    }
}

impl ApplicationDirectory for MemoryApplicationDirectory {
    fn application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<ApplicationProfile>, StoreError> {
        let guard = self.applications.lock().expect("application mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

/// Event sink that records published facts. `fail_delivery` simulates a
/// notification transport outage so callers can assert that transitions
/// survive it.
#[derive(Default, Clone)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<StageChangedEvent>>>,
    fail_delivery: Arc<Mutex<bool>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<StageChangedEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }

    pub fn set_fail_delivery(&self, fail: bool) {
        *self.fail_delivery.lock().expect("event mutex poisoned") = fail;
    }
}

impl StageEventPublisher for RecordingEventPublisher {
    fn publish(&self, event: StageChangedEvent) -> Result<(), EventError> {
        if *self.fail_delivery.lock().expect("event mutex poisoned") {
            return Err(EventError::Transport("notification queue offline".to_string()));
        }
        self.events.lock().expect("event mutex poisoned").push(event);
        Ok(())
    }
}
