//! Integration tests for the coupled stepping loop
//!
//! These tests drive two in-memory engines through the orchestrator and
//! check call ordering, the first-step bootstrap, and the exchange push.

use dfwr_core_rs::engine::{CallJournal, CallOp, MemoryEngine};
use dfwr_core_rs::exchange::{Dataset, ExchangeChannel, JsonCodec, NetcdfCodec};
use dfwr_core_rs::models::Event;
use dfwr_core_rs::{
    ChannelError, CouplingConfig, CouplingError, FieldArray, LifecyclePhase, ModelConfig,
    ModelKind, Orchestrator, Sign, VariableMap, VariableMapping,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Create `<root>/DFM_OUTPUT_bay/<file>` holding a 3-cell bed level field
/// plus an untouched water level field
fn seed_exchange(root: &Path, file: &str) -> PathBuf {
    let out = root.join("DFM_OUTPUT_bay");
    std::fs::create_dir_all(&out).unwrap();
    let ds = Dataset::new()
        .with_dimension("nFlowElem", 3)
        .with_variable("FlowElem_zcc", &["nFlowElem"], vec![0.0, 0.0, 0.0])
        .with_variable_attribute("coordinates", "FlowElem_xcc FlowElem_ycc")
        .with_variable("s1", &["nFlowElem"], vec![0.5, 0.6, 0.7]);
    let path = out.join(file);
    ExchangeChannel::create(&path, &ds, Arc::new(NetcdfCodec)).unwrap();
    path
}

fn config(root: &Path) -> CouplingConfig {
    CouplingConfig::new(
        ModelConfig::new(ModelKind::Flow, "bay.mdu", root),
        ModelConfig::new(ModelKind::Wave, "bay.mdw", root),
    )
}

fn engines(journal: &CallJournal) -> (MemoryEngine, MemoryEngine) {
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, 2.0, 3.0]))
        .with_default_step(60.0)
        .with_journal(journal.clone());
    let wave = MemoryEngine::new("wave")
        .with_default_step(60.0)
        .with_journal(journal.clone());
    (flow, wave)
}

fn initialized(root: &Path, journal: &CallJournal) -> Orchestrator {
    let (flow, wave) = engines(journal);
    let mut orch = Orchestrator::new(config(root), Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();
    orch
}

/// (engine, dt) for every update call, in order
fn update_sequence(journal: &CallJournal) -> Vec<(String, f64)> {
    journal
        .calls()
        .into_iter()
        .filter_map(|c| match c.op {
            CallOp::Update(dt) => Some((c.engine, dt)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_initialize_locates_exchange_file() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let orch = initialized(run.path(), &journal);

    assert_eq!(orch.phase(), LifecyclePhase::Initialized);
    assert_eq!(orch.exchange_path(), Some(path.as_path()));

    // Flow starts first
    let inits: Vec<String> = journal
        .calls()
        .into_iter()
        .filter(|c| c.op == CallOp::Initialize)
        .map(|c| c.engine)
        .collect();
    assert_eq!(inits, vec!["flow", "wave"]);
}

#[test]
fn test_first_update_bootstraps_both_models() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);

    let result = orch.update(60.0).unwrap();

    assert!(result.bootstrapped);
    assert_eq!(result.step, 1);
    assert_eq!(result.flow_time, 60.0);
    assert_eq!(
        update_sequence(&journal),
        vec![
            ("wave".to_string(), 0.0),
            ("flow".to_string(), 0.0),
            ("flow".to_string(), 60.0),
        ]
    );
}

#[test]
fn test_bootstrap_happens_exactly_once() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);

    assert!(orch.update(60.0).unwrap().bootstrapped);
    journal.clear();
    for _ in 0..3 {
        assert!(!orch.update(60.0).unwrap().bootstrapped);
    }

    assert_eq!(
        update_sequence(&journal),
        vec![
            ("wave".to_string(), 60.0),
            ("flow".to_string(), 60.0),
            ("wave".to_string(), 60.0),
            ("flow".to_string(), 60.0),
            ("wave".to_string(), 60.0),
            ("flow".to_string(), 60.0),
        ]
    );
    assert_eq!(orch.event_log().events_of_type("Bootstrap").len(), 1);
    assert_eq!(orch.current_time().unwrap(), 240.0);
}

#[test]
fn test_zero_steps_at_time_zero_bootstrap_once() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);

    let flags: Vec<bool> = (0..3)
        .map(|_| orch.update(0.0).unwrap().bootstrapped)
        .collect();

    assert_eq!(flags, vec![true, false, false]);
    assert_eq!(orch.current_time().unwrap(), 0.0);
    assert_eq!(orch.event_log().events_of_type("Bootstrap").len(), 1);
    // One zero-length wave call per update; flow gets the extra
    // confirmatory call only on the first
    assert_eq!(journal.updates_of("wave"), vec![0.0, 0.0, 0.0]);
    assert_eq!(journal.updates_of("flow"), vec![0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_non_finite_bed_level_is_pushed_intact() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, f64::NAN, 3.0]));
    let wave = MemoryEngine::new("wave");
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();

    orch.update(60.0).unwrap();
    orch.update(60.0).unwrap();

    let channel = ExchangeChannel::open(&path);
    let zcc = channel.read_field("FlowElem_zcc").unwrap();
    assert_eq!(zcc.values()[0], -1.0);
    assert!(zcc.values()[1].is_nan());
    assert_eq!(zcc.values()[2], -3.0);
    assert_eq!(channel.read_field("s1").unwrap().values(), &[0.5, 0.6, 0.7]);
}

#[test]
fn test_json_exchange_refuses_non_finite_push() {
    let run = tempfile::tempdir().unwrap();
    let out = run.path().join("DFM_OUTPUT_bay");
    std::fs::create_dir_all(&out).unwrap();
    let path = out.join("bay_com.nc");
    let ds = Dataset::new()
        .with_dimension("nFlowElem", 3)
        .with_variable("FlowElem_zcc", &["nFlowElem"], vec![0.0, 0.0, 0.0])
        .with_variable("s1", &["nFlowElem"], vec![0.5, 0.6, 0.7]);
    ExchangeChannel::create(&path, &ds, Arc::new(JsonCodec)).unwrap();
    let before = std::fs::read(&path).unwrap();

    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, f64::NAN, 3.0]));
    let wave = MemoryEngine::new("wave");
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave))
        .unwrap()
        .with_codec(Arc::new(JsonCodec));
    orch.initialize().unwrap();

    let err = orch.update(60.0).unwrap_err();

    assert!(matches!(
        err,
        CouplingError::Channel(ChannelError::WriteFailed { .. })
    ));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    let channel = ExchangeChannel::with_codec(&path, Arc::new(JsonCodec));
    assert_eq!(channel.read_field("s1").unwrap().values(), &[0.5, 0.6, 0.7]);
}

#[test]
fn test_default_step_is_forwarded_unchanged() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);

    orch.update(-1.0).unwrap();
    orch.update(-1.0).unwrap();

    assert_eq!(journal.updates_of("wave"), vec![0.0, -1.0]);
    assert_eq!(journal.updates_of("flow"), vec![0.0, -1.0, -1.0]);
    assert_eq!(orch.current_time().unwrap(), 120.0);
}

#[test]
fn test_update_pushes_negated_bed_level() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);

    let result = orch.update(60.0).unwrap();
    assert_eq!(result.fields_pushed, 1);

    let channel = ExchangeChannel::open(&path);
    assert_eq!(
        channel.read_field("FlowElem_zcc").unwrap().values(),
        &[-1.0, -2.0, -3.0]
    );
    // Other fields are untouched; coordinates attribute is gone
    assert_eq!(channel.read_field("s1").unwrap().values(), &[0.5, 0.6, 0.7]);
    let ds = channel.load().unwrap();
    assert!(ds
        .variables
        .iter()
        .all(|v| !v.attributes.contains_key("coordinates")));
    assert_eq!(ds.format, "classic");
}

#[test]
fn test_push_follows_flow_updates() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![0.0, 0.0, 0.0]))
        .with_step_hook(|time, fields| {
            fields.insert("bl".to_string(), FieldArray::vector(vec![time; 3]));
        })
        .with_journal(journal.clone());
    let wave = MemoryEngine::new("wave").with_journal(journal.clone());
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();

    orch.update(10.0).unwrap();
    orch.update(10.0).unwrap();

    let pushed = ExchangeChannel::open(&path).read_field("FlowElem_zcc").unwrap();
    assert_eq!(pushed.values(), &[-20.0, -20.0, -20.0]);
}

#[test]
fn test_wave_reads_exchange_before_flow_moves() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);

    orch.update(60.0).unwrap();
    journal.clear();
    orch.update(60.0).unwrap();

    let ops: Vec<(String, CallOp)> = journal
        .calls()
        .into_iter()
        .filter(|c| !matches!(c.op, CallOp::GetVar(_)))
        .map(|c| (c.engine, c.op))
        .collect();
    assert_eq!(
        ops,
        vec![
            ("wave".to_string(), CallOp::Update(60.0)),
            ("flow".to_string(), CallOp::Update(60.0)),
        ]
    );

    // Event order within the step: wave, flow, push
    let kinds: Vec<&str> = orch
        .event_log()
        .events_at_step(2)
        .into_iter()
        .map(|e| e.event_type())
        .collect();
    assert_eq!(kinds, vec!["ModelAdvanced", "ModelAdvanced", "ExchangePushed"]);
    assert_eq!(orch.event_log().advances_of(ModelKind::Wave), vec![0.0, 60.0]);
}

#[test]
fn test_set_var_on_mapped_variable_updates_exchange_and_flow() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);

    orch.set_var("bl", &FieldArray::vector(vec![4.0, 5.0, 6.0]))
        .unwrap();

    assert_eq!(orch.get_var("bl").unwrap().values(), &[4.0, 5.0, 6.0]);
    assert_eq!(
        ExchangeChannel::open(&path)
            .read_field("FlowElem_zcc")
            .unwrap()
            .values(),
        &[-4.0, -5.0, -6.0]
    );
    let overrides = orch.event_log().events_of_type("ExchangeOverride");
    assert_eq!(overrides.len(), 1);
    assert_eq!(
        overrides[0],
        &Event::ExchangeOverride {
            step: 0,
            host_var: "bl".to_string(),
            exchange_field: "FlowElem_zcc".to_string(),
            sign: Sign::Negative,
        }
    );
}

#[test]
fn test_set_var_rejected_by_flow_leaves_exchange_alone() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, 2.0, 3.0]))
        .failing_on("set_var", "bed level is read-only");
    let wave = MemoryEngine::new("wave");
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();
    let before = std::fs::read(&path).unwrap();

    let err = orch
        .set_var("bl", &FieldArray::vector(vec![4.0, 5.0, 6.0]))
        .unwrap_err();

    assert!(matches!(err, CouplingError::Model(ref e) if e.kind == ModelKind::Flow));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(orch.event_log().events_of_type("ExchangeOverride").is_empty());
}

#[test]
fn test_set_var_with_wrong_shape_changes_nothing() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let mut orch = initialized(run.path(), &journal);
    let before = std::fs::read(&path).unwrap();

    let err = orch
        .set_var("bl", &FieldArray::vector(vec![4.0, 5.0]))
        .unwrap_err();

    assert!(matches!(err, CouplingError::Model(_)));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(orch.get_var("bl").unwrap().values(), &[1.0, 2.0, 3.0]);
}

#[test]
fn test_set_var_on_unmapped_variable_leaves_exchange_alone() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, 2.0, 3.0]))
        .with_field("s1", FieldArray::vector(vec![0.0, 0.0, 0.0]))
        .with_journal(journal.clone());
    let wave = MemoryEngine::new("wave");
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();
    let before = std::fs::read(&path).unwrap();

    orch.set_var("s1", &FieldArray::vector(vec![9.0, 9.0, 9.0]))
        .unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(orch.get_var("s1").unwrap().values(), &[9.0, 9.0, 9.0]);
}

#[test]
fn test_positive_sign_mapping_copies_values() {
    let run = tempfile::tempdir().unwrap();
    let path = seed_exchange(run.path(), "bay_com.nc");
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, 2.0, 3.0]))
        .with_field("s1", FieldArray::vector(vec![7.0, 8.0, 9.0]));
    let wave = MemoryEngine::new("wave");
    let cfg = config(run.path()).with_variables(VariableMap::from_entries([
        ("bl", VariableMapping::new("FlowElem_zcc", Sign::Negative)),
        ("s1", VariableMapping::new("s1", Sign::Positive)),
    ]));
    let mut orch = Orchestrator::new(cfg, Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();

    assert_eq!(orch.update(30.0).unwrap().fields_pushed, 2);

    let channel = ExchangeChannel::open(&path);
    assert_eq!(channel.read_field("s1").unwrap().values(), &[7.0, 8.0, 9.0]);
    assert_eq!(
        channel.read_field("FlowElem_zcc").unwrap().values(),
        &[-1.0, -2.0, -3.0]
    );
    let pushes = orch.event_log().events_of_type("ExchangePushed");
    assert!(matches!(
        pushes[0],
        Event::ExchangePushed { host_var, .. } if host_var == "bl"
    ));
}

#[test]
fn test_missing_exchange_file_fails_initialize() {
    let run = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(run.path().join("DFM_OUTPUT_bay")).unwrap();
    let journal = CallJournal::new();
    let (flow, wave) = engines(&journal);
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave)).unwrap();

    let err = orch.initialize().unwrap_err();

    assert!(matches!(
        err,
        CouplingError::Channel(ChannelError::NotFound { .. })
    ));
    assert_eq!(orch.phase(), LifecyclePhase::Finalized);
    // Both started engines were shut down
    let finalized: Vec<String> = journal
        .calls()
        .into_iter()
        .filter(|c| c.op == CallOp::Finalize)
        .map(|c| c.engine)
        .collect();
    assert_eq!(finalized, vec!["flow", "wave"]);
    assert!(orch.update(60.0).is_err());
}

#[test]
fn test_ambiguous_exchange_files_pick_first_match() {
    let run = tempfile::tempdir().unwrap();
    let first = seed_exchange(run.path(), "bay_0000_com.nc");
    seed_exchange(run.path(), "bay_0001_com.nc");
    let journal = CallJournal::new();
    let orch = initialized(run.path(), &journal);

    assert_eq!(orch.exchange_path(), Some(first.as_path()));
}

#[test]
fn test_unknown_exchange_field_fails_initialize() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let journal = CallJournal::new();
    let (flow, wave) = engines(&journal);
    let cfg = config(run.path()).with_variables(VariableMap::from_entries([(
        "bl",
        VariableMapping::new("bed_level_missing", Sign::Negative),
    )]));
    let mut orch = Orchestrator::new(cfg, Box::new(flow), Box::new(wave)).unwrap();

    assert!(matches!(
        orch.initialize(),
        Err(CouplingError::Mapping(_))
    ));
    assert_eq!(orch.phase(), LifecyclePhase::Finalized);
}

#[test]
fn test_run_until_end_steps_to_flow_end_time() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, 2.0, 3.0]))
        .with_time_window(0.0, 300.0);
    let wave = MemoryEngine::new("wave").with_time_window(0.0, 300.0);
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();

    assert_eq!(orch.run_until_end(100.0).unwrap(), 3);
    assert_eq!(orch.current_time().unwrap(), 300.0);
    assert_eq!(orch.step_count(), 3);
}

#[test]
fn test_run_until_end_detects_stalled_flow_time() {
    let run = tempfile::tempdir().unwrap();
    seed_exchange(run.path(), "bay_com.nc");
    let flow = MemoryEngine::new("flow")
        .with_field("bl", FieldArray::vector(vec![1.0, 2.0, 3.0]))
        .with_default_step(0.0);
    let wave = MemoryEngine::new("wave");
    let mut orch = Orchestrator::new(config(run.path()), Box::new(flow), Box::new(wave)).unwrap();
    orch.initialize().unwrap();

    assert_eq!(
        orch.run_until_end(-1.0).unwrap_err(),
        CouplingError::Stalled { time: 0.0 }
    );
    assert!(matches!(
        orch.run_until_end(0.0),
        Err(CouplingError::InvalidConfig(_))
    ));
}
