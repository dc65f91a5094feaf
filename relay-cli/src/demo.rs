//! Demo plug-ins wired into `relayd run`: two actions and one producer.

use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::json;
use tokio::sync::broadcast;

use relay_core::{CommandMessage, DaemonConfig};
use relay_daemon::{Daemon, Producers, Publisher};

pub const ANIMALS: [&str; 8] = ["Cat", "Dog", "Duck", "Sheep", "Horse", "Cow", "Goat", "Rabbit"];

const PING_ROUNDS: u32 = 3;
const PING_PAUSE: Duration = Duration::from_secs(2);

/// Actions the demo daemon understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoAction {
    Think,
    Ping,
}

impl DemoAction {
    pub const ALL: [DemoAction; 2] = [DemoAction::Think, DemoAction::Ping];

    pub fn name(self) -> &'static str {
        match self {
            DemoAction::Think => "think",
            DemoAction::Ping => "ping",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }
}

/// Build the demo daemon: every [`DemoAction`] registered, the animal
/// producer started on launch.
pub fn daemon(config: DaemonConfig) -> Daemon {
    let mut daemon = Daemon::new(config);
    for action in DemoAction::ALL {
        daemon = match action {
            DemoAction::Think => daemon.on_action(action.name(), think),
            DemoAction::Ping => daemon.on_action(action.name(), ping),
        };
    }

    daemon
        .on_start(|producers: &mut Producers, publisher: &Publisher| {
            let publisher = publisher.clone();
            producers.spawn("animals", move |shutdown| search_animals(publisher, shutdown));
        })
        .on_stop(|| tracing::info!("demo plug-ins released"))
}

/// Announce a nap of 3 to 15 seconds about `message`, take it, report back.
pub async fn think(message: CommandMessage, publisher: Publisher) -> Result<()> {
    let topic = message
        .field_str("message")
        .context("think needs a 'message' field")?
        .to_string();
    let secs: u64 = rand::thread_rng().gen_range(3..=15);
    tracing::info!(topic = %topic, secs, "thinking");

    publisher
        .send(&json!({ "alert": format!("Let me think about '{topic}' during {secs}s") }))
        .await?;
    tokio::time::sleep(Duration::from_secs(secs)).await;
    publisher
        .send(&json!({
            "alert": format!("'{topic}' was an interesting information, thanks for the nap")
        }))
        .await?;
    tracing::info!(topic = %topic, "done thinking");
    Ok(())
}

/// Three ping/pong rounds sent immediately, two seconds apart.
pub async fn ping(_message: CommandMessage, publisher: Publisher) -> Result<()> {
    for round in 1..=PING_ROUNDS {
        publisher.send(&json!({ "pingpong": format!("ping {round}") })).await?;
        tokio::time::sleep(PING_PAUSE).await;
        publisher.send(&json!({ "pingpong": format!("pong {round}") })).await?;
        tokio::time::sleep(PING_PAUSE).await;
    }
    Ok(())
}

/// Record a random animal count every 0, 1 or 2 seconds until shutdown.
pub async fn search_animals(publisher: Publisher, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!("start searching animals");
    loop {
        let (animal, count, pause) = {
            let mut rng = rand::thread_rng();
            (
                ANIMALS[rng.gen_range(0..ANIMALS.len())],
                rng.gen_range(0..=97u32),
                Duration::from_secs(rng.gen_range(0..=2)),
            )
        };
        tracing::info!(animal, count, "animals found");
        publisher.record_change(animal, count);

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    tracing::info!("stop searching animals");
}
