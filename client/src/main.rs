use clap::Parser;
use client::game::ClientWorld;
use client::input::InputSequencer;
use client::network::Connection;
use log::{error, info};
use rand::Rng;
use shared::protocol::{InputPayload, ServerMessage};
use shared::sim::MoveIntent;
use shared::{default_terrain, FIXED_DT};
use std::time::Duration;

#[derive(Parser)]
#[command(about = "Headless game client")]
struct Args {
    /// Server to connect to
    #[arg(long, default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Display name sent on join
    #[arg(long, default_value = "wanderbot")]
    name: String,

    /// Character class sent on join
    #[arg(long, default_value = "warden")]
    class: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("client stopped: {}", e);
        std::process::exit(1);
    }
}

/// Connects, joins, and wanders: sends inputs at the simulation rate while
/// folding server snapshots into the predicted world.
async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let connection = Connection::connect(&args.url).await?;
    let (mut sink, mut source) = connection.into_split();
    sink.join(Some(args.name), Some(args.class), None).await?;

    // Reader task feeds decoded messages into the main loop
    let (messages_tx, mut messages) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(message) = source.next_message().await {
            if messages_tx.send(message).is_err() {
                break;
            }
        }
    });

    let mut world = ClientWorld::new(default_terrain());
    let mut sequencer = InputSequencer::new();
    let mut ticker = tokio::time::interval(Duration::from_secs_f32(FIXED_DT));
    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    let mut direction = 1.0f32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if world.player_id().is_none() {
                    continue;
                }
                let jump = {
                    let mut rng = rand::thread_rng();
                    if rng.gen_bool(0.01) {
                        direction = -direction;
                    }
                    rng.gen_bool(0.005)
                };
                let payload = InputPayload {
                    move_direction: Some(direction),
                    jump: Some(jump),
                    ..Default::default()
                };
                let (sequence, payload) = sequencer.stamp(payload);
                sink.send_input(sequence, payload).await?;
                world.predict(sequence, MoveIntent { move_dir: direction, jump });
            }
            _ = heartbeat.tick() => {
                sink.heartbeat().await?;
            }
            message = messages.recv() => {
                let Some(message) = message else {
                    info!("server closed the connection");
                    return Ok(());
                };
                match message {
                    ServerMessage::JoinResponse { player_id, player_data, .. } => {
                        info!("joined as entity {}", player_id);
                        world.set_player(player_id, player_data.position);
                    }
                    ServerMessage::JoinError { error } => {
                        error!("join rejected: {}", error);
                        return Ok(());
                    }
                    ServerMessage::WorldState { entities, .. }
                    | ServerMessage::EntityUpdates { entities, .. } => {
                        world.apply_snapshot(&entities);
                    }
                    ServerMessage::PlayerLeft { player_id } => {
                        world.remove_entity(player_id);
                    }
                    ServerMessage::Chat { from_name, message, .. } => {
                        info!("[chat] {}: {}", from_name, message);
                    }
                    _ => {}
                }
            }
        }
    }
}
