//! In-process network: routes the outbound messages of root validators running in the
//! same process to each other, and collects the certificates they issue to shards.
//! A validator can be taken offline, which drops everything it sends or receives.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, RwLock},
    time::Duration,
};

use rootchain_roles::{
    shard::BlockCertificationRequest, unicity::UnicityCertificate, validator::PublicKey,
};
use tokio::sync::mpsc;

use crate::{deliver, FromNetworkMessage, InboundMsg, OutboundMsg, Target, ToNetworkMessage};

/// Certificate issued by a root validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Issuing validator.
    pub issuer: PublicKey,
    /// The certificate.
    pub certificate: UnicityCertificate,
}

/// Handle to an in-process network. Cloning it gives another handle to the same network.
#[derive(Debug, Clone)]
pub struct LocalNetwork {
    send_timeout: Duration,
    inbound: Arc<BTreeMap<PublicKey, mpsc::Sender<FromNetworkMessage>>>,
    offline: Arc<RwLock<BTreeSet<PublicKey>>>,
    certificates: mpsc::UnboundedSender<IssuedCertificate>,
}

impl LocalNetwork {
    /// Creates a network between the given validators' inbound channels. Issued
    /// certificates are sent to the returned receiver.
    pub fn new(
        send_timeout: Duration,
        inbound: BTreeMap<PublicKey, mpsc::Sender<FromNetworkMessage>>,
    ) -> (Self, mpsc::UnboundedReceiver<IssuedCertificate>) {
        let (send, recv) = mpsc::unbounded_channel();
        let this = Self {
            send_timeout,
            inbound: Arc::new(inbound),
            offline: Arc::default(),
            certificates: send,
        };
        (this, recv)
    }

    /// Connects or disconnects a validator.
    pub fn set_online(&self, key: &PublicKey, online: bool) {
        let mut offline = self.offline.write().expect("lock is poisoned");
        if online {
            offline.remove(key);
        } else {
            offline.insert(*key);
        }
        tracing::info!("LocalNetwork - {key:?} online: {online}.");
    }

    /// Whether the validator is connected.
    pub fn is_online(&self, key: &PublicKey) -> bool {
        !self.offline.read().expect("lock is poisoned").contains(key)
    }

    /// Sends a shard certification request to every online root validator.
    pub async fn submit(&self, req: BlockCertificationRequest) {
        for (key, sender) in self.inbound.iter() {
            if !self.is_online(key) {
                continue;
            }
            let msg = FromNetworkMessage {
                peer: None,
                msg: InboundMsg::CertificationRequest(req.clone()),
            };
            deliver(sender, msg, self.send_timeout).await;
        }
    }

    /// Routes the outbound messages of validator `from` until its channel is closed.
    pub async fn run(self, from: PublicKey, mut outbound: mpsc::UnboundedReceiver<ToNetworkMessage>) {
        while let Some(msg) = outbound.recv().await {
            if !self.is_online(&from) {
                continue;
            }
            match (msg.target, msg.msg) {
                (Target::Shard(_), OutboundMsg::Certificate(certificate)) => {
                    let _ = self.certificates.send(IssuedCertificate {
                        issuer: from,
                        certificate,
                    });
                }
                (Target::Broadcast, OutboundMsg::Root(msg)) => {
                    for (key, sender) in self.inbound.iter() {
                        if self.is_online(key) {
                            let msg = FromNetworkMessage {
                                peer: Some(from),
                                msg: msg.clone().into(),
                            };
                            deliver(sender, msg, self.send_timeout).await;
                        }
                    }
                }
                (Target::Validator(key), OutboundMsg::Root(msg)) => {
                    let Some(sender) = self.inbound.get(&key) else {
                        tracing::warn!("LocalNetwork - Unknown validator {key:?}");
                        continue;
                    };
                    if self.is_online(&key) {
                        let msg = FromNetworkMessage {
                            peer: Some(from),
                            msg: msg.into(),
                        };
                        deliver(sender, msg, self.send_timeout).await;
                    }
                }
                (target, msg) => {
                    tracing::warn!("LocalNetwork - Cannot route {msg:?} to {target:?}");
                }
            }
        }
    }
}
