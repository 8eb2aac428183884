//! Scripted in-memory transport for tests

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transport::{ConnectRequest, InboundMessage, Qos, Transport, TransportError};

pub(crate) enum Step {
    Deliver(Vec<u8>),
    End,
    Fail(TransportError),
}

/// One scripted connection: how `connect` answers, then what `recv`
/// returns. A session whose steps run out blocks in `recv` forever.
pub(crate) struct Session {
    connect: Option<TransportError>,
    steps: VecDeque<Step>,
}

impl Session {
    pub(crate) fn hang() -> Self {
        Self {
            connect: None,
            steps: VecDeque::new(),
        }
    }

    pub(crate) fn refuse(err: TransportError) -> Self {
        Self {
            connect: Some(err),
            steps: VecDeque::new(),
        }
    }

    pub(crate) fn steps(steps: Vec<Step>) -> Self {
        Self {
            connect: None,
            steps: steps.into(),
        }
    }
}

#[derive(Default)]
pub(crate) struct TransportLog {
    pub connects: Vec<ConnectRequest>,
    pub subscribed: Vec<String>,
    pub unsubscribed: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub disconnects: usize,
}

pub(crate) struct RecordingTransport {
    sessions: VecDeque<Session>,
    current: VecDeque<Step>,
    fail_publish: bool,
    log: Arc<Mutex<TransportLog>>,
}

impl RecordingTransport {
    pub(crate) fn new(sessions: Vec<Session>) -> (Self, Arc<Mutex<TransportLog>>) {
        let log = Arc::new(Mutex::new(TransportLog::default()));
        (
            Self {
                sessions: sessions.into(),
                current: VecDeque::new(),
                fail_publish: false,
                log: log.clone(),
            },
            log,
        )
    }

    pub(crate) fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }
}

impl Transport for RecordingTransport {
    fn connect(
        &mut self,
        request: ConnectRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<()>> + Send + '_>> {
        self.log.lock().unwrap().connects.push(request);
        let result = match self.sessions.pop_front() {
            None => Err(TransportError::Connect("no scripted session left".into())),
            Some(Session {
                connect: Some(err), ..
            }) => Err(err),
            Some(Session { steps, .. }) => {
                self.current = steps;
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn subscribe<'a>(
        &'a mut self,
        topic: &'a str,
        _qos: Qos,
    ) -> Pin<Box<dyn Future<Output = transport::Result<()>> + Send + 'a>> {
        self.log.lock().unwrap().subscribed.push(topic.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn unsubscribe<'a>(
        &'a mut self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = transport::Result<()>> + Send + 'a>> {
        self.log.lock().unwrap().unsubscribed.push(topic.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: Vec<u8>,
        _qos: Qos,
        _retained: bool,
    ) -> Pin<Box<dyn Future<Output = transport::Result<()>> + Send + 'a>> {
        if self.fail_publish {
            return Box::pin(async { Err(TransportError::Io("publish refused".into())) });
        }
        self.log
            .lock()
            .unwrap()
            .published
            .push((topic.to_owned(), payload));
        Box::pin(async { Ok(()) })
    }

    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = transport::Result<Option<InboundMessage>>> + Send + '_>> {
        let step = self.current.pop_front();
        Box::pin(async move {
            match step {
                Some(Step::Deliver(payload)) => Ok(Some(InboundMessage {
                    topic: String::new(),
                    payload,
                    qos: Qos::AtLeastOnce,
                    retained: false,
                    duplicate: false,
                    message_id: 1,
                })),
                Some(Step::End) => Ok(None),
                Some(Step::Fail(err)) => Err(err),
                None => std::future::pending().await,
            }
        })
    }

    fn disconnect(
        &mut self,
        _grace: Duration,
    ) -> Pin<Box<dyn Future<Output = transport::Result<()>> + Send + '_>> {
        self.log.lock().unwrap().disconnects += 1;
        Box::pin(async { Ok(()) })
    }
}
