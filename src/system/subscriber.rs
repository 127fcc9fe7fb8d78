/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{collections::HashMap, sync::Arc};

use log::warn;
use rand::{rngs::OsRng, Rng};
use smol::lock::Mutex;

pub type SubscriberPtr<T> = Arc<Subscriber<T>>;

pub type SubscriptionId = u64;

/// Receiving end of a [`Subscriber`]. Messages queue up unbounded until
/// received.
pub struct Subscription<T> {
    id: SubscriptionId,
    recv_queue: smol::channel::Receiver<T>,
    parent: Arc<Subscriber<T>>,
}

impl<T: Clone> Subscription<T> {
    pub fn get_id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn receive(&self) -> T {
        let message_result = self.recv_queue.recv().await;

        match message_result {
            Ok(message_result) => message_result,
            Err(err) => {
                // The parent holds the sending half for as long as we hold
                // the parent, so this can only happen on a broken invariant.
                panic!("Subscription::receive() recv_queue failed! {}", err);
            }
        }
    }

    /// Non-blocking receive, returns `None` if nothing is queued.
    pub fn try_receive(&self) -> Option<T> {
        self.recv_queue.try_recv().ok()
    }

    // Must be called manually since async Drop is not possible in Rust
    pub async fn unsubscribe(&self) {
        self.parent.clone().unsubscribe(self.id).await
    }
}

/// Simple broadcast (publish-subscribe) class
pub struct Subscriber<T> {
    subs: Mutex<HashMap<u64, smol::channel::Sender<T>>>,
}

impl<T: Clone> Subscriber<T> {
    /// Construct a new subscriber.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { subs: Mutex::new(HashMap::new()) })
    }

    fn random_id() -> SubscriptionId {
        OsRng.gen()
    }

    /// Make sure you call this method early in your setup. That way the subscription
    /// will begin accumulating messages from notify.
    /// Then when your main loop begins calling `sub.receive().await`, the messages will
    /// already be queued.
    pub async fn subscribe(self: Arc<Self>) -> Subscription<T> {
        let (sender, recvr) = smol::channel::unbounded();

        let sub_id = Self::random_id();

        self.subs.lock().await.insert(sub_id, sender);

        Subscription { id: sub_id, recv_queue: recvr, parent: self.clone() }
    }

    async fn unsubscribe(self: Arc<Self>, sub_id: SubscriptionId) {
        self.subs.lock().await.remove(&sub_id);
    }

    /// Number of live subscriptions
    pub async fn len(&self) -> usize {
        self.subs.lock().await.len()
    }

    /// Queue `message` on every subscription. Subscriptions that were
    /// dropped without unsubscribing are pruned.
    pub async fn notify(&self, message: T) {
        self.subs.lock().await.retain(|id, queue| match queue.try_send(message.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(target: "system::subscriber::notify()", "Dropping closed subscription {:x}", id);
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_broadcasts_to_all() {
        smol::block_on(async {
            let subscriber: SubscriberPtr<usize> = Subscriber::new();
            let a = subscriber.clone().subscribe().await;
            let b = subscriber.clone().subscribe().await;
            assert_eq!(subscriber.len().await, 2);

            subscriber.notify(7).await;
            assert_eq!(a.receive().await, 7);
            assert_eq!(b.receive().await, 7);

            b.unsubscribe().await;
            subscriber.notify(8).await;
            assert_eq!(a.try_receive(), Some(8));
            assert_eq!(b.try_receive(), None);
        });
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        smol::block_on(async {
            let subscriber: SubscriberPtr<u8> = Subscriber::new();
            let kept = subscriber.clone().subscribe().await;
            drop(subscriber.clone().subscribe().await);
            assert_eq!(subscriber.len().await, 2);

            subscriber.notify(1).await;
            assert_eq!(subscriber.len().await, 1);
            assert_eq!(kept.try_receive(), Some(1));
        });
    }
}
