use std::sync::Arc;

use tracing::warn;
use typed_builder::TypedBuilder;

use super::{
    AttrValue, CommandHistoryPublisher, CommandPostprocessor, PreparedCommand, ATTR_BINARY,
    ATTR_CHECKSUM,
};
use crate::integrity::ErrorDetection;

/// Postprocessor that appends a check word computed over the whole command, if configured, and
/// otherwise sends commands unchanged.
#[derive(Debug, TypedBuilder)]
pub struct GenericCommandPostprocessor {
    #[builder(setter(into))]
    source: String,
    #[builder(default)]
    error_detection: Option<Box<dyn ErrorDetection>>,
    history: Arc<dyn CommandHistoryPublisher>,
}

impl CommandPostprocessor for GenericCommandPostprocessor {
    fn process(&self, command: &PreparedCommand) -> Option<Vec<u8>> {
        let mut binary = command.binary.clone();
        if let Some(alg) = &self.error_detection {
            match alg.compute(&binary, 0, binary.len()) {
                Ok(checkword) => {
                    binary.extend_from_slice(&checkword.to_be_bytes());
                    self.history.publish(
                        &command.id,
                        ATTR_CHECKSUM,
                        AttrValue::Int(i64::from(checkword)),
                    );
                }
                Err(err) => {
                    warn!(link = %self.source, cmd = %command.id, "cannot compute check word: {err}");
                }
            }
        }
        self.history
            .publish(&command.id, ATTR_BINARY, AttrValue::Binary(binary.clone()));
        Some(binary)
    }
}

#[cfg(test)]
mod tests {
    use hifitime::Epoch;

    use super::*;
    use crate::{
        integrity::{Iso16Checksum, Running16BitChecksum},
        tc::CommandId,
        testing::HistoryRecorder,
    };

    fn command(binary: &[u8]) -> PreparedCommand {
        PreparedCommand::new(
            CommandId {
                origin: "test".to_string(),
                sequence_number: 1,
                generation_time: Epoch::from_gregorian_utc_at_midnight(2024, 1, 1),
                command_name: "/CMD".to_string(),
            },
            binary.to_vec(),
        )
    }

    #[test]
    fn appends_check_word() {
        let history = Arc::new(HistoryRecorder::default());
        let pp = GenericCommandPostprocessor::builder()
            .source("test")
            .error_detection(Some(Box::new(Iso16Checksum) as Box<dyn ErrorDetection>))
            .history(history.clone() as Arc<dyn CommandHistoryPublisher>)
            .build();
        let out = pp.process(&command(&[1, 2, 3])).unwrap();
        assert_eq!(out.len(), 5);
        // appending ISO 8473 check bytes zeroes both running sums
        let (c0, c1) = Iso16Checksum::sums(&out);
        assert_eq!((c0 % 255, c1 % 255), (0, 0));
        assert_eq!(history.attr(ATTR_BINARY), vec![AttrValue::Binary(out)]);
    }

    #[test]
    fn failed_check_word_sends_unmodified() {
        let history = Arc::new(HistoryRecorder::default());
        let pp = GenericCommandPostprocessor::builder()
            .source("test")
            .error_detection(Some(Box::new(Running16BitChecksum) as Box<dyn ErrorDetection>))
            .history(history.clone() as Arc<dyn CommandHistoryPublisher>)
            .build();
        let out = pp.process(&command(&[1, 2, 3])).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert!(history.attr(ATTR_CHECKSUM).is_empty());
    }

    #[test]
    fn without_error_detection() {
        let history = Arc::new(HistoryRecorder::default());
        let pp = GenericCommandPostprocessor::builder()
            .source("test")
            .history(history.clone() as Arc<dyn CommandHistoryPublisher>)
            .build();
        assert_eq!(pp.process(&command(&[9, 8])).unwrap(), vec![9, 8]);
    }
}
