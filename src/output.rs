use colored::*;
use events::{Event, AUTH_ERROR_CHANNEL};
use realtime::ConnectionState;

pub fn print_event(channel: &str, event: &Event) {
    let event_type = if event.event_type == AUTH_ERROR_CHANNEL {
        event.event_type.bright_red()
    } else {
        event.event_type.yellow()
    };

    println!(
        "\n[{}] {} event received {}",
        channel.bright_blue().bold(),
        event_type,
        event.server_id.dimmed()
    );

    if let Ok(pretty) = serde_json::to_string_pretty(&event.payload) {
        println!("   {}", pretty.dimmed());
    }
}

pub fn print_state(state: ConnectionState) {
    let label = match state {
        ConnectionState::Connected => "connected".green(),
        ConnectionState::Connecting => "connecting".blue(),
        ConnectionState::Backoff => "backing off".yellow(),
        ConnectionState::Idle => "idle".dimmed(),
    };
    println!("{} Realtime connection {}", "→".blue(), label);
}
