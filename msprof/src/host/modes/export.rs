use std::collections::HashSet;

use crate::domain::ModeError;
use crate::host::cancel::CancelToken;
use crate::host::params::{ArgKind, ProfileParams};
use crate::host::running_mode::{ModeBase, ParamContract, RunningMode};

/// Export summary or timeline data from a result directory
pub struct ExportMode {
    base: ModeBase,
}

impl ExportMode {
    #[must_use]
    pub fn new(params: ProfileParams, used: HashSet<ArgKind>, cancel: CancelToken) -> Self {
        let contract = ParamContract::new(
            &[ArgKind::Application, ArgKind::SysDevices, ArgKind::HostSys, ArgKind::Parse, ArgKind::Query],
            &[ArgKind::Output, ArgKind::Export],
            &[
                ArgKind::ExportType,
                ArgKind::IterationId,
                ArgKind::ModelId,
                ArgKind::SummaryFormat,
                ArgKind::PythonPath,
            ],
        );
        Self { base: ModeBase::new("export", params, used, contract, cancel) }
    }
}

impl RunningMode for ExportMode {
    fn name(&self) -> &'static str {
        self.base.name
    }

    fn mode_params_check(&mut self) -> Result<(), ModeError> {
        self.base.check_params()?;
        if self.base.params.model_id.is_some() && self.base.params.iteration_id.is_none() {
            return Err(ModeError::MissingParam { mode: self.base.name, arg: "--iteration-id" });
        }
        Ok(())
    }

    fn run_mode_tasks(&mut self) -> Result<(), ModeError> {
        let step = self.base.export_step(self.base.params.export_type);
        super::run_single_step(&mut self.base, &step)
    }

    fn stop_running_tasks(&mut self) {
        self.base.stop_running_tasks();
    }
}
