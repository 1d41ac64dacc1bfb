pub mod mongo;
pub mod simulated;

pub use mongo::MongoAdmin;
pub use simulated::SimulatedAdmin;

use anyhow::Result;

use crate::sample::Op;

/// Namespace the server reports for admin commands, including our own
/// `currentOp` polls.
pub const ADMIN_COMMAND_NS: &str = "admin.$cmd";

/// The narrow slice of the database the sampler needs.
///
/// Implementations must be shareable: the sampler thread is the only caller,
/// but the capability is handed over behind an `Arc`.
pub trait AdminClient: Send + Sync {
    /// Opaque identity of the connection issuing our commands
    /// (`whatsmyuri` on MongoDB).
    fn whoami(&self) -> Result<String>;

    /// The list of operations currently in progress on the server.
    fn current_ops(&self) -> Result<Vec<Op>>;
}

/// Decides whether an op is the sampler's own inspection command.
pub trait OwnOpMatcher: Send + Sync {
    fn is_own_op(&self, op: &Op, me: &str) -> bool;
}

/// Matches ops issued from our client address against a namespace list.
#[derive(Debug, Clone)]
pub struct ClientNamespaceMatcher {
    namespaces: Vec<String>,
}

impl ClientNamespaceMatcher {
    pub fn new(namespaces: Vec<String>) -> Self {
        Self { namespaces }
    }
}

impl Default for ClientNamespaceMatcher {
    fn default() -> Self {
        Self::new(vec![ADMIN_COMMAND_NS.to_string()])
    }
}

impl OwnOpMatcher for ClientNamespaceMatcher {
    fn is_own_op(&self, op: &Op, me: &str) -> bool {
        let client = op.get_str("client").ok();
        let ns = op.get_str("ns").ok();
        client == Some(me) && ns.is_some_and(|ns| self.namespaces.iter().any(|n| n == ns))
    }
}
