//! Outgoing commands waiting for their status.

use crate::command::Command;

/// Keeps every issued command until the remote resolved all its issuances.
///
/// Order is the issue order, so an unfinished Sync bracket is found before
/// the operations sent inside it.
#[derive(Debug, Default)]
pub(crate) struct StatusTracker {
    commands: Vec<Command>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Returns the index of the command a status refers to.
    pub fn position(&self, msg_ref: u32, cmd_ref: u32) -> Option<usize> {
        self.commands.iter().position(|c| c.matches(msg_ref, cmd_ref))
    }

    /// Removes the command at `index`.
    pub fn take(&mut self, index: usize) -> Command {
        self.commands.remove(index)
    }

    /// Puts a command back where it was taken from.
    pub fn restore(&mut self, index: usize, command: Command) {
        let index = index.min(self.commands.len());
        self.commands.insert(index, command);
    }

    /// Removes the first command matching `pred`.
    pub fn take_where(&mut self, pred: impl Fn(&Command) -> bool) -> Option<Command> {
        let index = self.commands.iter().position(pred)?;
        Some(self.commands.remove(index))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Counts essential commands still lacking a status or not fully issued.
    pub fn missing_essential(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| c.common.essential && (c.common.waiting_for_status > 0 || !c.finished()))
            .count()
    }

    /// Removes and returns all tracked commands.
    pub fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandBody, StatusCommand, UnimplementedCommand};
    use syncml_protocol::{CommandKind, StatusCmd, StatusCode};

    fn issued(cmd_id: u32) -> Command {
        let mut cmd = Command::outgoing(
            CommandKind::Alert,
            CommandBody::Unimplemented(UnimplementedCommand::new(StatusCode::OK)),
        );
        cmd.record_issue(1, cmd_id);
        cmd
    }

    #[test]
    fn statuses_resolve_by_reference() {
        let mut tracker = StatusTracker::new();
        tracker.push(issued(1));
        tracker.push(issued(2));
        assert_eq!(tracker.missing_essential(), 2);
        assert_eq!(tracker.position(1, 2), Some(1));
        assert_eq!(tracker.position(2, 2), None);

        let cmd = tracker.take(0);
        assert!(cmd.matches(1, 1));
        tracker.restore(0, cmd);
        assert_eq!(tracker.position(1, 1), Some(0));

        let mut cmd = tracker.take_where(|c| c.matches(1, 2)).unwrap();
        cmd.common.waiting_for_status = 0;
        cmd.common.issued.clear();
        tracker.push(cmd);
        assert_eq!(tracker.missing_essential(), 1);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.drain().len(), 2);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn statuses_are_never_tracked() {
        let mut cmd = Command::outgoing(
            CommandKind::Status,
            CommandBody::Status(StatusCommand::new(StatusCmd::new(
                1,
                1,
                CommandKind::Alert,
                StatusCode::OK,
            ))),
        );
        cmd.record_issue(2, 5);
        assert!(!cmd.needs_status());
        assert!(!cmd.matches(2, 5));
    }
}
