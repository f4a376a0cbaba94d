// Poller: keeps pulling new messages from the user's swarm
//
// One round: refresh the swarm, then poll its nodes one at a time. A node is
// polled repeatedly until it fails; a failing node is dropped from the swarm
// and the next unused node takes over. When every node has been used the
// round ends and the next one starts after the poll interval.
//
// The stop flag is checked after every network call and before every new
// one. A call already in flight is not cancelled, but nothing it returns is
// delivered once the poller is stopped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::api::{ReceivedEnvelope, SnodeApi};
use crate::error::Result;
use crate::snode::Snode;
use crate::util::random::random_from_set;

pub struct Poller {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Start polling for `api`'s user. Batches arrive on the returned
    /// receiver in the order they were pulled.
    pub fn start(
        api: Arc<SnodeApi>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Vec<ReceivedEnvelope>>) {
        let (stop, stop_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        info!("Started polling for {}", api.user_public_key());
        let task = tokio::spawn(run(api, stop_rx, tx));
        (Self { stop, task }, rx)
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Stop and wait for the loop to wind down
    pub async fn join(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!("Poller task ended abnormally: {}", e);
        }
    }
}

struct PollContext {
    api: Arc<SnodeApi>,
    stop: watch::Receiver<bool>,
    tx: mpsc::Sender<Vec<ReceivedEnvelope>>,
    interval: Duration,
}

impl PollContext {
    fn halted(&self) -> bool {
        *self.stop.borrow() || self.tx.is_closed()
    }

    /// Sleep for the poll interval; true if stopped in the meantime
    async fn pause(&mut self) -> bool {
        if self.halted() {
            return true;
        }
        let sender_gone = tokio::select! {
            _ = tokio::time::sleep(self.interval) => false,
            changed = self.stop.changed() => changed.is_err(),
        };
        sender_gone || self.halted()
    }
}

async fn run(
    api: Arc<SnodeApi>,
    stop: watch::Receiver<bool>,
    tx: mpsc::Sender<Vec<ReceivedEnvelope>>,
) {
    let interval = api.config().poll_interval();
    let mut ctx = PollContext {
        api,
        stop,
        tx,
        interval,
    };
    loop {
        if let Err(e) = poll_swarm(&mut ctx).await {
            warn!("Polling round failed: {}", e);
        }
        if ctx.pause().await {
            break;
        }
    }
    info!("Stopped polling for {}", ctx.api.user_public_key());
}

async fn poll_swarm(ctx: &mut PollContext) -> Result<()> {
    if ctx.halted() {
        return Ok(());
    }
    let api = ctx.api.clone();
    let user = api.user_public_key();
    api.directory().get_swarm(user, api.as_ref()).await?;

    let mut used: HashSet<Snode> = HashSet::new();
    loop {
        if ctx.halted() {
            return Ok(());
        }
        let unused: HashSet<Snode> = api
            .directory()
            .cached_swarm(user)
            .difference(&used)
            .cloned()
            .collect();
        let Some(node) = random_from_set(&unused).cloned() else {
            debug!("Polled every node in the swarm");
            return Ok(());
        };
        used.insert(node.clone());

        if let Err(e) = poll_node(ctx, &node).await {
            if ctx.halted() {
                return Ok(());
            }
            debug!("Polling {} failed: {}; trying next node", node, e);
            api.directory().drop_from_swarm(&node, user);
        }
    }
}

/// Poll `node` until it fails or the poller stops
async fn poll_node(ctx: &mut PollContext, node: &Snode) -> Result<()> {
    loop {
        if ctx.halted() {
            return Ok(());
        }
        let raw = ctx.api.get_raw_messages(node).await?;
        if ctx.halted() {
            return Ok(());
        }

        let messages = ctx.api.parse_raw_messages(&raw, node);
        if !messages.is_empty() {
            debug!("Received {} message(s) from {}", messages.len(), node);
            if ctx.tx.send(messages).await.is_err() {
                return Ok(());
            }
        }
        if ctx.pause().await {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::store::database::SnodeDatabase;
    use crate::testing::MockSnodeNetwork;
    use std::time::Duration;
    use tokio::time::timeout;

    const BOB: &str = "05bob";

    fn direct_config(network: &MockSnodeNetwork) -> NetworkConfig {
        NetworkConfig {
            use_onion_requests: false,
            ..network.config()
        }
    }

    #[tokio::test]
    async fn test_delivers_new_messages_once() {
        let network = MockSnodeNetwork::new(8);
        let client = network.client(BOB, direct_config(&network));
        network.store_message(BOB, b"first");
        network.store_message(BOB, b"second");

        let (poller, mut rx) = Poller::start(Arc::new(client.api), 8);
        let batch = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let contents: Vec<&[u8]> = batch.iter().map(|e| e.content.as_slice()).collect();
        assert_eq!(contents, vec![&b"first"[..], &b"second"[..]]);

        network.store_message(BOB, b"third");
        let batch = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].content, b"third");

        poller.join().await;
    }

    #[tokio::test]
    async fn test_no_requests_after_stop() {
        let network = MockSnodeNetwork::new(8);
        let client = network.client(BOB, direct_config(&network));
        let (poller, _rx) = Poller::start(Arc::new(client.api), 8);

        tokio::time::sleep(Duration::from_millis(50)).await;
        poller.join().await;

        let after_stop = network.request_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(network.request_count(), after_stop);
    }

    #[tokio::test]
    async fn test_failing_node_dropped_from_swarm() {
        let network = MockSnodeNetwork::new(8);
        let config = NetworkConfig {
            poll_interval_ms: 200,
            ..direct_config(&network)
        };
        let client = network.client(BOB, config);
        let swarm = network.swarm();
        let (broken, healthy) = (swarm[0].clone(), swarm[1].clone());
        client
            .database
            .set_swarm(BOB, &[broken.clone(), healthy.clone()].into_iter().collect());
        network.set_status(&broken, 418);
        network.store_message(BOB, b"still arrives");

        let database = client.database.clone();
        let (poller, mut rx) = Poller::start(Arc::new(client.api), 8);
        let batch = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].content, b"still arrives");

        // Once the healthy node fails too the broken one gets its turn
        network.set_status(&healthy, 418);
        timeout(Duration::from_secs(5), async {
            while database.swarm(BOB).unwrap().contains(&broken) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        poller.join().await;
    }

    #[tokio::test]
    async fn test_dropping_receiver_ends_loop() {
        let network = MockSnodeNetwork::new(8);
        let client = network.client(BOB, direct_config(&network));
        let (poller, rx) = Poller::start(Arc::new(client.api), 1);
        drop(rx);
        timeout(Duration::from_secs(5), poller.join()).await.unwrap();
    }
}
