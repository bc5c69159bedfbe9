//! Interfaces hosted in the subprocess.

use serde::Serialize;
use tether_ipc::{CallArgs, InterfaceSpec};

use crate::channel::Emitter;
use crate::error::InvokeError;
use crate::methods::MethodTable;
use crate::toolkit::Toolkit;
use crate::HostResult;

/// What an interface method can reach while it runs: the toolkit root and
/// the event emitter.
pub struct Context<'a, T: Toolkit> {
    root: &'a mut T::Root,
    emitter: &'a Emitter,
}

impl<'a, T: Toolkit> Context<'a, T> {
    pub(crate) fn new(root: &'a mut T::Root, emitter: &'a Emitter) -> Self {
        Self { root, emitter }
    }

    /// The toolkit's root window.
    pub fn root(&mut self) -> &mut T::Root {
        self.root
    }

    /// Emit an event to the controller.
    pub fn emit<P: Serialize>(&self, name: &str, payload: P) -> HostResult<()> {
        self.emitter.emit(name, payload)
    }

    /// A clone of the emitter, for toolkit callbacks that outlive the call.
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }
}

/// The real interface object living in the subprocess.
///
/// Implementors declare their name and method list through
/// [`InterfaceSpec`], shared with the controller, and provide the method
/// table the host loop dispatches calls through.
pub trait Interface: InterfaceSpec + Sized + 'static {
    /// Toolkit this interface is built on.
    type Toolkit: Toolkit;

    /// Build the interface on the toolkit root from the constructor
    /// arguments the controller passed.
    fn build(ctx: &mut Context<'_, Self::Toolkit>, args: CallArgs) -> Result<Self, InvokeError>;

    /// Methods the controller may call, by name.
    fn methods() -> MethodTable<Self>;
}
