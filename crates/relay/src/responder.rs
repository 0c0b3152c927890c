use blink_core::{ChatTransport, Message, OutgoingMessage};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::relay::RelayClient;

/// Demo contact that answers everything it receives.
pub struct AutoResponder {
    cancel_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AutoResponder {
    pub fn spawn(client: RelayClient, display_name: impl Into<String>) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(Self::run(client, display_name.into(), cancel_rx));

        Self {
            cancel_tx: Some(cancel_tx),
            task: Some(task),
        }
    }

    /// Stops answering and disconnects the contact.
    pub async fn stop(mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(error) = task.await
        {
            tracing::warn!(error = %error, "auto responder task failed");
        }
    }

    async fn run(client: RelayClient, display_name: String, mut cancel_rx: oneshot::Receiver<()>) {
        let mut feed = match client.subscribe().await {
            Ok(feed) => feed,
            Err(error) => {
                tracing::error!(
                    user_id = %client.user_id(),
                    error = %error,
                    "auto responder could not listen"
                );
                return;
            }
        };

        loop {
            tokio::select! {
                _ = &mut cancel_rx => break,
                next = feed.next() => {
                    let Some(message) = next else {
                        break;
                    };
                    let reply = reply_to(&display_name, &message);
                    let Ok(reply) = OutgoingMessage::new(message.sender_id.clone(), reply, None) else {
                        continue;
                    };
                    if let Err(error) = client.send(reply).await {
                        tracing::warn!(
                            user_id = %client.user_id(),
                            error = %error,
                            "auto responder reply failed"
                        );
                    }
                }
            }
        }

        if let Err(error) = feed.unsubscribe().await {
            tracing::debug!(error = %error, "auto responder unsubscribe failed");
        }
        client.disconnect().await;
    }
}

impl Drop for AutoResponder {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

fn reply_to(display_name: &str, message: &Message) -> String {
    match (message.text.is_empty(), message.image.is_some()) {
        (true, _) => format!("{display_name}: nice picture!"),
        (false, true) => format!("{display_name}: nice picture, and \"{}\" to you too", message.text),
        (false, false) => format!("{display_name}: you said \"{}\"", message.text),
    }
}

#[cfg(test)]
mod tests {
    use blink_core::{ImagePayload, UserId};

    use super::*;
    use crate::relay::Relay;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn responder_answers_and_disconnects_on_stop() {
        let relay = Relay::default();
        let responder = AutoResponder::spawn(relay.connect(user("echo")), "Echo");
        let me = relay.connect(user("me"));
        let mut feed = me.subscribe().await.unwrap();

        // The responder subscribes on its own task.
        while relay.listener_count(&user("echo")).await == 0 {
            tokio::task::yield_now().await;
        }

        me.send(OutgoingMessage::new(user("echo"), "hello", None).unwrap())
            .await
            .unwrap();
        let reply = feed.recv().await.unwrap();
        assert_eq!(reply.sender_id, user("echo"));
        assert_eq!(reply.text, "Echo: you said \"hello\"");

        responder.stop().await;
        assert!(!relay.is_online(&user("echo")));
        assert_eq!(relay.listener_count(&user("echo")).await, 0);
    }

    #[test]
    fn image_only_messages_get_a_picture_reply() {
        let message = Message::new(
            blink_core::MessageKey::Local(blink_core::LocalMessageId::new_v7()),
            user("me"),
            user("echo"),
            "",
            Some(ImagePayload::inline("image/png", vec![1u8])),
            chrono::Utc::now(),
        )
        .unwrap();

        assert_eq!(reply_to("Echo", &message), "Echo: nice picture!");
    }
}
