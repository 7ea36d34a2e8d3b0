//! Scoped coupled run
//!
//! `CoupledSession` finalizes both engines when it goes out of scope, so a
//! run abandoned early (an error returned with `?`, a panic) still shuts
//! its engines down. Call [`CoupledSession::finish`] to observe the
//! finalize result instead of having it logged.
//!
//! # Example
//!
//! ```rust,no_run
//! use dfwr_core_rs::engine::MemoryEngine;
//! use dfwr_core_rs::{CouplingConfig, CouplingError, ModelConfig, ModelKind, Orchestrator};
//!
//! fn run() -> Result<(), CouplingError> {
//!     let config = CouplingConfig::new(
//!         ModelConfig::new(ModelKind::Flow, "bay.mdu", "/runs/bay"),
//!         ModelConfig::new(ModelKind::Wave, "bay.mdw", "/runs/bay"),
//!     );
//!     let orch = Orchestrator::new(
//!         config,
//!         Box::new(MemoryEngine::new("flow")),
//!         Box::new(MemoryEngine::new("wave")),
//!     )?;
//!
//!     let mut session = orch.session()?;
//!     session.update(-1.0)?;
//!     session.finish()
//! }
//! ```

use crate::orchestrator::{CouplingError, Orchestrator};
use std::ops::{Deref, DerefMut};
use tracing::warn;

/// Initialized orchestrator that finalizes itself on drop
#[derive(Debug)]
pub struct CoupledSession {
    orchestrator: Orchestrator,
}

impl Orchestrator {
    /// Initialize and wrap in a session guard
    ///
    /// On initialization failure the engines are already shut down and the
    /// error is returned; no session is created.
    pub fn session(mut self) -> Result<CoupledSession, CouplingError> {
        self.initialize()?;
        Ok(CoupledSession { orchestrator: self })
    }
}

impl CoupledSession {
    /// Finalize now and surface the result
    ///
    /// A session that was already finalized through `Deref` finishes
    /// cleanly.
    pub fn finish(mut self) -> Result<(), CouplingError> {
        if self.orchestrator.phase().is_active() {
            self.orchestrator.finalize()
        } else {
            Ok(())
        }
    }
}

impl Deref for CoupledSession {
    type Target = Orchestrator;

    fn deref(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

impl DerefMut for CoupledSession {
    fn deref_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }
}

impl Drop for CoupledSession {
    fn drop(&mut self) {
        if self.orchestrator.phase().is_active() {
            if let Err(e) = self.orchestrator.finalize() {
                warn!(error = %e, "finalize on scope exit failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LifecyclePhase;
    use crate::engine::{CallJournal, CallOp, MemoryEngine, ModelConfig, ModelKind};
    use crate::exchange::{Dataset, ExchangeChannel, NetcdfCodec};
    use crate::models::FieldArray;
    use crate::orchestrator::CouplingConfig;
    use std::sync::Arc;

    fn setup(journal: &CallJournal) -> (tempfile::TempDir, Orchestrator) {
        let run = tempfile::tempdir().unwrap();
        let out = run.path().join("DFM_OUTPUT_bay");
        std::fs::create_dir_all(&out).unwrap();
        let seed = Dataset::new()
            .with_dimension("nFlowElem", 2)
            .with_variable("FlowElem_zcc", &["nFlowElem"], vec![0.0, 0.0]);
        ExchangeChannel::create(out.join("bay_com.nc"), &seed, Arc::new(NetcdfCodec)).unwrap();

        let config = CouplingConfig::new(
            ModelConfig::new(ModelKind::Flow, "bay.mdu", run.path()),
            ModelConfig::new(ModelKind::Wave, "bay.mdw", run.path()),
        );
        let flow = MemoryEngine::new("flow")
            .with_field("bl", FieldArray::vector(vec![1.0, 2.0]))
            .with_journal(journal.clone());
        let wave = MemoryEngine::new("wave").with_journal(journal.clone());
        let orch = Orchestrator::new(config, Box::new(flow), Box::new(wave)).unwrap();
        (run, orch)
    }

    fn finalize_calls(journal: &CallJournal) -> usize {
        journal
            .calls()
            .iter()
            .filter(|c| c.op == CallOp::Finalize)
            .count()
    }

    #[test]
    fn test_drop_finalizes_both_engines() {
        let journal = CallJournal::new();
        let (_run, orch) = setup(&journal);
        {
            let mut session = orch.session().unwrap();
            session.update(-1.0).unwrap();
        }
        assert_eq!(finalize_calls(&journal), 2);
    }

    #[test]
    fn test_finish_does_not_finalize_twice() {
        let journal = CallJournal::new();
        let (_run, orch) = setup(&journal);
        let mut session = orch.session().unwrap();
        session.finalize().unwrap();
        assert_eq!(session.phase(), LifecyclePhase::Finalized);
        session.finish().unwrap();
        assert_eq!(finalize_calls(&journal), 2);
    }
}
