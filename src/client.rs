//! The client-ingress boundary: a request carrying an
//! opaque payload and a completion handle. Ingress parsing itself lives
//! outside this crate; this module only defines the handle shape the
//! engine completes.

use crate::error::RaftError;
use crate::state_machine::Reply;

/// Outcome handed back to whoever submitted a command.
pub type CommandOutcome = Result<Reply, RaftError>;

/// A one-shot completion callback. Invoked exactly once: either when the
/// entry's index is applied, or immediately with `NotLeader` if this node
/// loses leadership before that happens.
pub struct CommandHandle {
    callback: Box<dyn FnOnce(CommandOutcome)>,
}

impl CommandHandle {
    pub fn new(callback: impl FnOnce(CommandOutcome) + 'static) -> CommandHandle {
        CommandHandle {
            callback: Box::new(callback),
        }
    }

    pub fn complete(self, outcome: CommandOutcome) {
        (self.callback)(outcome)
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandHandle(..)")
    }
}

/// A parsed client command ready to be handed to `ConsensusEngine::submit`.
pub struct ClientRequest {
    pub command_name: String,
    pub command_payload: Vec<u8>,
    pub handle: CommandHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn completes_exactly_once_with_given_outcome() {
        let seen: Rc<RefCell<Option<CommandOutcome>>> = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        let handle = CommandHandle::new(move |outcome| {
            *seen2.borrow_mut() = Some(outcome);
        });
        handle.complete(Ok(b"done".to_vec()));
        assert_eq!(seen.borrow().as_ref().unwrap().as_ref().unwrap(), b"done");
    }
}
