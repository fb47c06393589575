// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    msgs::Message,
    publisher::{PublishError, Sink},
};
use std::marker::PhantomData;
use tracing::debug;
use zenoh::{
    bytes::{Encoding, ZBytes},
    pubsub::Publisher,
    qos::{CongestionControl, Priority},
    Session, Wait,
};

/// Publishes CDR encoded messages of type `M` on a Zenoh topic.
///
/// Zenoh does not queue per publisher, so a congested link drops samples
/// instead of blocking the publisher thread.
pub struct ZenohSink<M> {
    topic: String,
    publisher: Publisher<'static>,
    encoding: Encoding,
    _message: PhantomData<fn(M)>,
}

impl<M: Message> ZenohSink<M> {
    /// Declares a publisher on `topic`.
    pub fn new(session: &Session, topic: impl Into<String>) -> Result<Self, PublishError> {
        let topic = topic.into();
        let publisher = session
            .declare_publisher(topic.clone())
            .priority(Priority::DataHigh)
            .congestion_control(CongestionControl::Drop)
            .wait()?;
        debug!("declared publisher {} for {}", topic, M::SCHEMA);

        Ok(ZenohSink {
            topic,
            publisher,
            encoding: Encoding::APPLICATION_CDR.with_schema(M::SCHEMA),
            _message: PhantomData,
        })
    }
}

impl<M: Message> Sink<Box<M>> for ZenohSink<M> {
    fn publish(&mut self, item: Box<M>) -> Result<(), PublishError> {
        let payload = ZBytes::from(item.to_cdr()?);
        self.publisher
            .put(payload)
            .encoding(self.encoding.clone())
            .wait()
    }

    fn ready(&self) -> bool {
        !self.topic.is_empty()
    }

    fn target(&self) -> &str {
        &self.topic
    }
}
