//! Log output of the message relay.
//!
//! `logtest` installs a process-wide logger, so this binary holds a single
//! test.

use logtest::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use stubrun_retriever::messaging::{
    DeliveryError, DestinationError, DestinationResolver, Message, MessageChannel, RelayError,
    StubMessageSender,
};

struct RejectingChannel;

impl MessageChannel for RejectingChannel {
    fn send(&self, _message: &Message) -> Result<(), DeliveryError> {
        Err(DeliveryError {
            reason: "broker unavailable".to_owned(),
        })
    }
}

struct OnlyOutput;

impl DestinationResolver for OnlyOutput {
    fn resolve_destination(&self, name: &str) -> Result<Arc<dyn MessageChannel>, DestinationError> {
        if name == "output" {
            Ok(Arc::new(RejectingChannel))
        } else {
            Err(DestinationError {
                reason: format!("no binding named {name}"),
            })
        }
    }
}

#[test]
fn relay_failures_are_logged_and_returned() {
    let mut logger = Logger::start();
    let sender = StubMessageSender::new(Arc::new(OnlyOutput));

    let delivery = sender.send_payload("book returned", BTreeMap::new(), "output");
    assert!(matches!(delivery, Err(RelayError::Delivery { .. })));
    let resolution = sender.send_payload("book returned", BTreeMap::new(), "nowhere");
    assert!(matches!(resolution, Err(RelayError::Resolution { .. })));

    let mut errors = Vec::new();
    while let Some(record) = logger.pop() {
        if record.level() == log::Level::Error {
            errors.push(record.args().to_string());
        }
    }
    assert!(
        errors
            .iter()
            .any(|line| line.contains("output") && line.contains("broker unavailable")),
        "errors: {errors:?}"
    );
    assert!(
        errors
            .iter()
            .any(|line| line.contains("nowhere") && line.contains("no binding named nowhere")),
        "errors: {errors:?}"
    );
}
