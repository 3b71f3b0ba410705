use std::sync::Arc;

use tracing::info;

use super::{AckStatus, CommandHistoryPublisher, PreparedCommand, TcLink, ACK_SENT};
use crate::timecode::TimeService;

/// Offers commands to links in order until one takes them.
pub struct CommandRouter {
    links: Vec<Arc<dyn TcLink>>,
    history: Arc<dyn CommandHistoryPublisher>,
    time_service: Arc<dyn TimeService>,
}

impl CommandRouter {
    pub const NO_LINK_AVAILABLE: &'static str = "no link available";

    pub fn new(history: Arc<dyn CommandHistoryPublisher>, time_service: Arc<dyn TimeService>) -> Self {
        Self {
            links: Vec::default(),
            history,
            time_service,
        }
    }

    pub fn add_link(&mut self, link: Arc<dyn TcLink>) {
        self.links.push(link);
    }

    /// Returns `true` if a link took `command`. Otherwise the command is failed with
    /// [CommandRouter::NO_LINK_AVAILABLE].
    pub fn route(&self, command: PreparedCommand) -> bool {
        if self
            .links
            .iter()
            .any(|link| link.send_command(command.clone()))
        {
            return true;
        }
        let reason = Self::NO_LINK_AVAILABLE;
        info!(cmd = %command.id, reason, "failing command");
        let now = self.time_service.now();
        self.history
            .publish_ack(&command.id, ACK_SENT, now, AckStatus::Nok, Some(reason));
        self.history.command_failed(&command.id, now, reason);
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::{
        testing::{command_id, HistoryRecorder},
        timecode::WallClock,
    };

    #[derive(Default)]
    struct FakeLink {
        accept: AtomicBool,
        offered: AtomicUsize,
    }

    impl TcLink for FakeLink {
        fn send_command(&self, _command: PreparedCommand) -> bool {
            self.offered.fetch_add(1, Ordering::SeqCst);
            self.accept.load(Ordering::SeqCst)
        }
    }

    fn router(history: &Arc<HistoryRecorder>, links: &[Arc<FakeLink>]) -> CommandRouter {
        let mut router = CommandRouter::new(
            history.clone() as Arc<dyn CommandHistoryPublisher>,
            Arc::new(WallClock),
        );
        for link in links {
            router.add_link(link.clone() as Arc<dyn TcLink>);
        }
        router
    }

    #[test]
    fn first_accepting_link_wins() {
        let history = Arc::new(HistoryRecorder::default());
        let a = Arc::new(FakeLink::default());
        let b = Arc::new(FakeLink::default());
        let c = Arc::new(FakeLink::default());
        b.accept.store(true, Ordering::SeqCst);
        c.accept.store(true, Ordering::SeqCst);

        assert!(router(&history, &[a.clone(), b.clone(), c.clone()])
            .route(PreparedCommand::new(command_id(1), vec![1])));
        assert_eq!(a.offered.load(Ordering::SeqCst), 1);
        assert_eq!(b.offered.load(Ordering::SeqCst), 1);
        assert_eq!(c.offered.load(Ordering::SeqCst), 0);
        assert!(history.entries().is_empty());
    }

    #[test]
    fn no_link_available() {
        let history = Arc::new(HistoryRecorder::default());
        let a = Arc::new(FakeLink::default());
        assert!(!router(&history, &[a]).route(PreparedCommand::new(command_id(1), vec![1])));
        assert_eq!(
            history.acks(),
            vec![(AckStatus::Nok, Some("no link available".to_string()))]
        );
        assert_eq!(history.failures(), vec!["no link available".to_string()]);
    }
}
