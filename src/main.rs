use log::{error, info};
use realtime::RealtimeClient;
use service::{config::Config, logging::Logger};

mod output;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    let client = match RealtimeClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build realtime client: {e}");
            std::process::exit(1);
        }
    };

    let mut states = client.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            output::print_state(state);
        }
    });

    let subscriptions: Vec<_> = config
        .channels
        .iter()
        .map(|channel| {
            let label = channel.clone();
            client.subscribe_to(channel, move |event| output::print_event(&label, event))
        })
        .collect();

    info!(
        "Listening on {} channel(s): {}",
        subscriptions.len(),
        config.channels.join(", ")
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down realtime listener");
    drop(subscriptions);
}
