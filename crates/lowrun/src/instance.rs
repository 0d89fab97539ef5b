//! VM instances.

use std::sync::Arc;

use crate::engine::Vm;
use crate::error::CheckStatus;
use crate::error::Result;

/// A created VM. Cheap to clone; every clone shares the same VM.
#[derive(Clone)]
pub struct RuntimeInstance {
    vm: Arc<dyn Vm>,
}

impl RuntimeInstance {
    pub fn create(vm: Arc<dyn Vm>) -> Result<Self> {
        vm.create_instance().check("Error creating instance")?;
        tracing::debug!("created runtime instance");
        Ok(Self { vm })
    }

    pub fn vm(&self) -> &Arc<dyn Vm> {
        &self.vm
    }
}

impl std::fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInstance").finish_non_exhaustive()
    }
}
