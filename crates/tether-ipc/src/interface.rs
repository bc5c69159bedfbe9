//! The contract an interface type publishes to both processes.

/// Identity and method surface of a remotely hosted interface.
///
/// The controller uses it to validate method names before queueing a call;
/// the subprocess uses it to pick the interface it was asked to build.
pub trait InterfaceSpec {
    /// Stable name used in the handshake.
    const NAME: &'static str;

    /// Names of the methods the controller may call.
    const METHODS: &'static [&'static str];

    /// Returns true if `name` is a declared method.
    fn has_method(name: &str) -> bool {
        Self::METHODS.contains(&name)
    }
}
