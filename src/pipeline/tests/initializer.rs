use super::common::*;
use crate::pipeline::domain::validate_stage_set;
use crate::pipeline::{CompanyId, InitializationOutcome, PipelineStore, StageKind, WorkflowStatus};

#[test]
fn seeds_four_phases_in_funnel_order() {
    let harness = harness();
    let company = company();

    let outcome = harness
        .initializer
        .initialize_default_phases(&company, t0())
        .expect("seeding succeeds");
    let phase_ids = match outcome {
        InitializationOutcome::Seeded(ids) => ids,
        other => panic!("expected a seeded topology, got {other:?}"),
    };
    assert_eq!(phase_ids.len(), 4);

    let phases = harness
        .pipeline
        .phases_for_company(&company)
        .expect("phases load");
    let names: Vec<&str> = phases.iter().map(|phase| phase.name.as_str()).collect();
    assert_eq!(
        names,
        ["Sourcing", "Evaluation", "Offer & Pre-Onboarding", "Talent Pool"]
    );
    for (index, phase) in phases.iter().enumerate() {
        assert_eq!(phase.sort_order, index as u32);
        assert_eq!(phase.id, phase_ids[index], "seeded ids come back in funnel order");
    }
}

#[test]
fn each_phase_gets_one_default_active_workflow_with_a_valid_stage_set() {
    let harness = harness();
    let phases = harness.seed(&company());

    let expected_stage_counts = [5usize, 6, 5, 3];
    for (phase, expected) in phases.iter().zip(expected_stage_counts) {
        let workflows = harness
            .pipeline
            .workflows_for_phase(&phase.id)
            .expect("workflows load");
        assert_eq!(workflows.len(), 1);
        assert!(workflows[0].is_default);
        assert_eq!(workflows[0].status, WorkflowStatus::Active);

        let stages = harness.stages(&workflows[0].id);
        assert_eq!(stages.len(), expected, "phase '{}'", phase.name);
        validate_stage_set(&workflows[0].id, &stages).expect("seeded graph is valid");
        assert_eq!(stages[0].kind, StageKind::Initial);
        assert_eq!(stages[0].order, 0);
    }
}

#[test]
fn success_stages_chain_into_the_next_phase() {
    let harness = harness();
    let phases = harness.seed(&company());

    for index in 0..phases.len() {
        let workflow = harness.default_workflow(&phases[index]);
        let success = harness.stage_of_kind(&workflow.id, StageKind::Success);
        let expected = phases.get(index + 1).map(|phase| phase.id.clone());
        assert_eq!(
            success.next_phase_id, expected,
            "phase '{}' cascade wiring",
            phases[index].name
        );
    }
}

#[test]
fn stage_templates_carry_skip_flags_and_deadlines() {
    let harness = harness();
    let phases = harness.seed(&company());

    let sourcing = harness.default_workflow(&phases[0]);
    let recruiter_call = harness.stage_at(&sourcing.id, 2);
    assert_eq!(recruiter_call.name, "Recruiter Call");
    assert_eq!(recruiter_call.deadline_days, Some(7));
    assert_eq!(recruiter_call.stuck_threshold_days(), Some(7));

    let evaluation = harness.default_workflow(&phases[1]);
    let reference_check = harness.stage_at(&evaluation.id, 3);
    assert_eq!(reference_check.name, "Reference Check");
    assert!(reference_check.allow_skip);
}

#[test]
fn rerun_leaves_the_existing_topology_untouched() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    let sourcing = harness.default_workflow(&phases[0]);
    let stage_ids_before: Vec<_> = harness
        .stages(&sourcing.id)
        .into_iter()
        .map(|stage| stage.id)
        .collect();

    let outcome = harness
        .initializer
        .initialize_default_phases(&company, t0())
        .expect("rerun succeeds");
    assert_eq!(outcome, InitializationOutcome::AlreadyInitialized);

    let phases_after = harness
        .pipeline
        .phases_for_company(&company)
        .expect("phases load");
    assert_eq!(phases_after.len(), 4);
    let stage_ids_after: Vec<_> = harness
        .stages(&sourcing.id)
        .into_iter()
        .map(|stage| stage.id)
        .collect();
    assert_eq!(stage_ids_after, stage_ids_before);
}

#[test]
fn default_workflow_swap_keeps_exactly_one_default_per_phase() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    let sourcing = &phases[0];
    let evaluation = &phases[1];
    let original = harness.default_workflow(sourcing);

    let replacement = crate::pipeline::Workflow::new(
        crate::pipeline::WorkflowId("wf-referrals".to_string()),
        company.clone(),
        sourcing.id.clone(),
        "Referral Intake",
        "Alternate funnel for employee referrals.",
        false,
        t0(),
    )
    .expect("workflow builds");
    harness
        .pipeline
        .insert_workflow(replacement.clone())
        .expect("workflow inserts");

    harness
        .pipeline
        .set_default_workflow(&sourcing.id, &replacement.id)
        .expect("swap succeeds");

    let defaults: Vec<_> = harness
        .pipeline
        .workflows_for_phase(&sourcing.id)
        .expect("workflows load")
        .into_iter()
        .filter(|workflow| workflow.is_default)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, replacement.id);
    assert_ne!(defaults[0].id, original.id);

    // A workflow of another phase cannot become this phase's default.
    let foreign = harness
        .pipeline
        .set_default_workflow(&evaluation.id, &replacement.id);
    assert!(foreign.is_err());
}

#[test]
fn companies_are_seeded_independently() {
    let harness = harness();
    let first = company();
    let second = CompanyId("co-globex".to_string());

    harness.seed(&first);
    harness.seed(&second);

    let first_phases = harness
        .pipeline
        .phases_for_company(&first)
        .expect("phases load");
    let second_phases = harness
        .pipeline
        .phases_for_company(&second)
        .expect("phases load");
    assert_eq!(first_phases.len(), 4);
    assert_eq!(second_phases.len(), 4);
    for (a, b) in first_phases.iter().zip(&second_phases) {
        assert_ne!(a.id, b.id, "phase ids never collide across companies");
    }
}
