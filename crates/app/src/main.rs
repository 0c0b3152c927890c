mod console;
mod settings;

use std::sync::Arc;

use blink_core::{
    Collaborators, ContactList, Presence, SessionController, SessionError, UserId,
    ValidationError,
};
use blink_relay::{AutoResponder, Relay};
use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use console::Console;
use settings::SettingsStore;

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("configured user id is invalid on `{stage}`: {source}"))]
    LocalUser {
        stage: &'static str,
        source: ValidationError,
    },
    #[snafu(display("chat session failed on `{stage}`: {source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never interleave with the transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "blink exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let settings_store = SettingsStore::open_default();
    let settings = settings_store.current();
    tracing::info!(
        path = ?settings_store.path(),
        user_id = %settings.user_id,
        contacts = settings.contacts.len(),
        "settings loaded"
    );

    let local_user_id = UserId::parse(&settings.user_id).context(LocalUserSnafu {
        stage: "parse-local-user-id",
    })?;
    let relay = Relay::new(settings.relay_latency());

    let mut responders = Vec::new();
    let mut contacts = ContactList::default();
    for contact in &settings.contacts {
        let Some(peer) = contact.to_peer() else {
            tracing::warn!(contact_id = %contact.id, "skipping contact with an invalid id");
            continue;
        };
        if contact.auto_reply {
            responders.push(AutoResponder::spawn(
                relay.connect(peer.id.clone()),
                &peer.display_name,
            ));
        }
        contacts.upsert(peer);
    }

    let client = Arc::new(relay.connect(local_user_id.clone()));
    let presence: Arc<dyn Presence> = client.clone();
    let handle =
        SessionController::new(Collaborators::from_client(client.clone()), settings.session_config())
            .spawn();

    println!("Signed in as {} ({local_user_id})", settings.display_name());
    let console = Console::new(handle, contacts, presence, settings_store, local_user_id);
    let result = console.run().await.context(SessionSnafu {
        stage: "run-console",
    });

    for responder in responders {
        responder.stop().await;
    }
    relay.disconnect(client.user_id()).await;
    tracing::info!("signed out");
    result
}
