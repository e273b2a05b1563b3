use teq_transport::{StateInfo, TeqError};

pub fn channel(capacity: usize) -> (StateInfoSender, StateInfoReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::<StateInfo>::new(capacity);
    (
        StateInfoSender { producer },
        StateInfoReceiver { consumer },
    )
}

/// Audio-thread side. Publishing is best effort: a full channel drops the sample.
pub struct StateInfoSender {
    producer: rtrb::Producer<StateInfo>,
}

impl StateInfoSender {
    pub fn publish(&mut self, info: StateInfo) -> bool {
        self.producer.push(info).is_ok()
    }
}

pub struct StateInfoReceiver {
    consumer: rtrb::Consumer<StateInfo>,
}

impl StateInfoReceiver {
    pub fn has_state_info(&self) -> bool {
        !self.consumer.is_empty()
    }

    /// Oldest unread sample.
    pub fn get_state_info(&mut self) -> Result<StateInfo, TeqError> {
        self.consumer.pop().map_err(|_| TeqError::NoStateAvailable)
    }

    /// Drains the channel and returns the freshest sample, if any.
    pub fn latest(&mut self) -> Option<StateInfo> {
        let mut latest = None;
        while let Ok(info) = self.consumer.pop() {
            latest = Some(info);
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}
