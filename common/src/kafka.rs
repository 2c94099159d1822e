use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

use crate::halfmsg::HalfMessage;
use crate::txn::{parse_name_servers, MessageSink, SinkError};

pub const TAG_HEADER: &str = "tag";

pub struct KafkaSink {
    producer: BaseProducer,
    flush_timeout: Duration,
}

impl KafkaSink {
    pub fn new(
        name_server: &str,
        send_timeout_ms: u64,
        flush_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let brokers = parse_name_servers(name_server);
        if brokers.is_empty() {
            return Err(SinkError::Broker(format!(
                "invalid name server configuration: {name_server}"
            )));
        }

        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", send_timeout_ms.to_string())
            .create::<BaseProducer>()
            .map_err(|e| SinkError::Broker(e.to_string()))?;

        Ok(Self {
            producer,
            flush_timeout,
        })
    }
}

impl MessageSink for KafkaSink {
    fn publish(&self, msg: &HalfMessage) -> Result<(), SinkError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: TAG_HEADER,
            value: Some(msg.tag.as_bytes()),
        });
        self.producer
            .send(
                BaseRecord::to(&msg.topic)
                    .payload(msg.body.as_bytes())
                    .key(&msg.key)
                    .headers(headers),
            )
            .map_err(|(e, _)| SinkError::Broker(e.to_string()))?;
        self.producer
            .flush(Timeout::After(self.flush_timeout))
            .map_err(|e| SinkError::Broker(e.to_string()))?;
        Ok(())
    }
}
