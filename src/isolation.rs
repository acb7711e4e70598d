//! Isolations: execution scopes that own instances.
//!
//! An isolation is the unit of interpreter state: it owns its instances
//! outright (deleting the isolation deletes them) and is intended to be
//! pinned to one thread. The runtime it was created on stays shared and
//! read-only.

use crate::instance::Instance;
use crate::module::Module;
use crate::runtime::Runtime;
use std::sync::Arc;
use wasmet_core::{Error, Value};

/// Handle to an instance owned by an [`Isolation`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InstanceHandle(usize);

/// An execution scope owning instances. See the module docs.
pub struct Isolation {
    runtime: Arc<Runtime>,
    instances: Vec<Option<Box<Instance>>>,
}

impl Isolation {
    /// Creates an isolation on the given runtime.
    pub fn new(runtime: &Arc<Runtime>) -> Isolation {
        Isolation {
            runtime: runtime.clone(),
            instances: Vec::new(),
        }
    }

    /// The runtime this isolation belongs to.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Instantiates `module` with the given gas budget.
    ///
    /// The start function, if any, runs before this returns; a trap inside
    /// it surfaces as the instantiation error.
    pub fn instantiate(
        &mut self,
        module: &Arc<Module>,
        gas_limit: u64,
    ) -> Result<InstanceHandle, Error> {
        let instance = Instance::instantiate(&self.runtime, module, gas_limit)?;
        let slot = self.instances.iter().position(Option::is_none);
        let index = match slot {
            Some(index) => {
                self.instances[index] = Some(instance);
                index
            }
            None => {
                self.instances.push(Some(instance));
                self.instances.len() - 1
            }
        };
        Ok(InstanceHandle(index))
    }

    /// Borrows an instance.
    pub fn instance(&self, handle: InstanceHandle) -> Option<&Instance> {
        self.instances.get(handle.0)?.as_deref()
    }

    /// Borrows an instance mutably, e.g. to inspect or clear its error.
    pub fn instance_mut(&mut self, handle: InstanceHandle) -> Option<&mut Instance> {
        self.instances.get_mut(handle.0)?.as_deref_mut()
    }

    /// Calls an exported function of the given instance.
    ///
    /// # Panics
    ///
    /// Panics if `handle` does not refer to a live instance of this
    /// isolation.
    pub fn call(
        &mut self,
        handle: InstanceHandle,
        name: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, Error> {
        self.instance_mut(handle)
            .expect("unknown instance handle")
            .call_function(name, args)
    }

    /// Deletes an instance, releasing its memories and tables.
    pub fn delete_instance(&mut self, handle: InstanceHandle) {
        if let Some(slot) = self.instances.get_mut(handle.0) {
            *slot = None;
        }
    }
}
