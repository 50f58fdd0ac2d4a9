//! Test doubles shared by the unit tests of this crate

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::candidate::CandidateHost;
use crate::error::{NegotiationError, Result};
use crate::messages::{BytestreamReply, Request};
use crate::messaging::{LocalRelay, MessagingChannel};
use crate::socks5;

type Responder = Box<dyn Fn(&str, &Request) -> Result<BytestreamReply> + Send + Sync>;

/// Messaging channel that records traffic and answers from a closure
pub(crate) struct MockChannel {
    identity: String,
    responder: Responder,
    pub(crate) supports: bool,
    pub(crate) proxies: Vec<String>,
    pub(crate) fail_replies: bool,
    pub(crate) reply_timeout: Duration,
    pub(crate) timeouts: Mutex<Vec<Duration>>,
    pub(crate) requests: Mutex<Vec<(String, Request)>>,
    pub(crate) replies: Mutex<Vec<(String, String, BytestreamReply)>>,
}

impl MockChannel {
    pub(crate) fn new(
        identity: &str,
        responder: impl Fn(&str, &Request) -> Result<BytestreamReply> + Send + Sync + 'static,
    ) -> Self {
        Self {
            identity: identity.to_string(),
            responder: Box::new(responder),
            supports: true,
            proxies: Vec::new(),
            fail_replies: false,
            reply_timeout: crate::messaging::DEFAULT_REPLY_TIMEOUT,
            timeouts: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
        }
    }

    /// Channel that acknowledges every request
    pub(crate) fn acking(identity: &str) -> Self {
        Self::new(identity, |_, _| Ok(BytestreamReply::Ack))
    }

    pub(crate) fn sent_requests(&self) -> Vec<(String, Request)> {
        self.requests.lock().unwrap().clone()
    }

    /// Timeout each request was sent with, in order
    pub(crate) fn sent_timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }

    pub(crate) fn sent_replies(&self) -> Vec<(String, String, BytestreamReply)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingChannel for MockChannel {
    fn local_identity(&self) -> String {
        self.identity.clone()
    }

    fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    async fn request(
        &self,
        to: &str,
        request: Request,
        timeout: Duration,
    ) -> Result<BytestreamReply> {
        let reply = (self.responder)(to, &request);
        self.timeouts.lock().unwrap().push(timeout);
        self.requests
            .lock()
            .unwrap()
            .push((to.to_string(), request));
        reply
    }

    async fn reply(&self, to: &str, correlation_id: &str, reply: BytestreamReply) -> Result<()> {
        if self.fail_replies {
            return Err(NegotiationError::messaging("not connected"));
        }
        self.replies
            .lock()
            .unwrap()
            .push((to.to_string(), correlation_id.to_string(), reply));
        Ok(())
    }

    async fn supports_bytestreams(&self, _peer: &str) -> Result<bool> {
        Ok(self.supports)
    }

    async fn discover_proxies(&self) -> Result<Vec<String>> {
        Ok(self.proxies.clone())
    }
}

/// In-process relay holding pre-registered connections
#[derive(Default)]
pub(crate) struct MockLocalRelay {
    pub(crate) connections: Mutex<HashMap<String, TcpStream>>,
    pub(crate) transfers: Mutex<HashSet<String>>,
    pub(crate) added: Mutex<Vec<String>>,
    pub(crate) hosts: Vec<(String, u16)>,
    pub(crate) lookups: AtomicUsize,
}

impl MockLocalRelay {
    pub(crate) fn with_hosts(hosts: Vec<(&str, u16)>) -> Self {
        Self {
            hosts: hosts
                .into_iter()
                .map(|(address, port)| (address.to_string(), port))
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn insert(&self, digest: &str, stream: TcpStream) {
        self.connections
            .lock()
            .unwrap()
            .insert(digest.to_string(), stream);
    }
}

impl LocalRelay for MockLocalRelay {
    fn connection_for_digest(&self, digest: &str) -> Option<TcpStream> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().unwrap().remove(digest)
    }

    fn add_transfer(&self, digest: &str) {
        self.transfers.lock().unwrap().insert(digest.to_string());
        self.added.lock().unwrap().push(digest.to_string());
    }

    fn remove_transfer(&self, digest: &str) {
        self.transfers.lock().unwrap().remove(digest);
    }

    fn stream_hosts(&self, owner: &str) -> Vec<CandidateHost> {
        self.hosts
            .iter()
            .map(|(address, port)| CandidateHost::new(owner, address.clone(), *port))
            .collect()
    }
}

/// Loopback relay echoing every CONNECT; returns its candidate and accept counter
pub(crate) async fn spawn_relay(owner: &str) -> (CandidateHost, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut greeting = [0u8; 3];
                socket.read_exact(&mut greeting).await?;
                socket.write_all(&[0x05, 0x00]).await?;
                let mut request = socks5::read_message(&mut socket)
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                request[1] = 0x00;
                socket.write_all(&request).await?;
                let mut sink = Vec::new();
                socket.read_to_end(&mut sink).await?;
                Ok::<_, std::io::Error>(())
            });
        }
    });

    (CandidateHost::new(owner, "127.0.0.1", port), accepted)
}

/// Candidate on a loopback port nothing listens on
pub(crate) async fn dead_candidate(owner: &str) -> CandidateHost {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    CandidateHost::new(owner, "127.0.0.1", port)
}

/// Connected loopback stream pair
pub(crate) async fn stream_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}
