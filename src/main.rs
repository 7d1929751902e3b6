mod chatbot;
mod commands;
mod config;
mod openai;

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::ChatKind;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use chatbot::{deliver_with, EnqueueOutcome, InboundMessage, TelegramClient, UserKey};
use commands::Command;
use config::Config;

type AiDispatcher = chatbot::Dispatcher<openai::Client>;

struct BotState {
    config: Config,
    telegram: TelegramClient,
    dispatcher: AiDispatcher,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "replybot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = tracing_appender::rolling::never(&log_dir, "replybot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting replybot...");
    info!("Loaded config from {config_path}");
    info!(
        "Batch delay {:?}, cooldown {:?}, history cap {}",
        config.batch_delay, config.cooldown_delay, config.max_history_length
    );

    let provider = match openai::Client::new(
        config.openai_api_key.clone(),
        config.api_base.clone(),
        config.model.clone(),
        config.max_tokens,
        config.temperature,
        config.request_timeout,
    ) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to build completion client: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let scheduler = chatbot::BatchScheduler::new(config.scheduler_config(), provider);
    let dispatcher = AiDispatcher::new(config.eligibility_policy(), scheduler);

    let state = Arc::new(BotState {
        telegram: TelegramClient::new(bot.clone()),
        config,
        dispatcher,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_new_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let is_group = matches!(msg.chat.kind, ChatKind::Public(_));

    let user = match msg.from {
        Some(ref u) if !u.is_bot => u,
        _ => return Ok(()),
    };

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    let display_name = user
        .username
        .clone()
        .unwrap_or_else(|| user.first_name.clone());
    let user_id = user.id.0 as i64;
    let chat_id = msg.chat.id.0;
    let key = if is_group {
        UserKey::group_member(chat_id, user_id)
    } else {
        UserKey::private(user_id)
    };

    let text_preview: String = text.chars().take(50).collect();
    info!("📨 {} ({}): \"{}\"", display_name, key, text_preview);

    if let Some(command) = Command::parse(text) {
        handle_command(&state, command, &key, user.id, chat_id, is_group, msg.id.0).await;
        return Ok(());
    }

    // In groups, reply to the triggering message so the answer is threaded
    let reply_to = is_group.then_some(msg.id.0);
    let telegram = state.telegram.clone();
    let deliver = deliver_with(move |reply: String| async move {
        if let Err(e) = telegram.send_message(chat_id, &reply, reply_to).await {
            warn!("Failed to deliver reply to {}: {}", chat_id, e);
        }
    });

    let inbound = InboundMessage {
        user: key,
        display_name,
        text: text.to_string(),
        is_group,
    };
    if let Some(outcome @ (EnqueueOutcome::Busy | EnqueueOutcome::CoolingDown)) =
        state.dispatcher.dispatch(inbound, deliver).await
    {
        info!("Message dropped: {:?}", outcome);
    }

    Ok(())
}

async fn handle_command(
    state: &BotState,
    command: Command,
    key: &UserKey,
    user_id: UserId,
    chat_id: i64,
    is_group: bool,
    message_id: i32,
) {
    let reply = match command {
        Command::Help => commands::help_text(&state.config.persona_name),
        Command::Ping => "pong".to_string(),
        Command::ClearAi => {
            state.dispatcher.scheduler().clear_user(key).await;
            "Done, I've forgotten our conversation. Fresh start!".to_string()
        }
        Command::AiStats => {
            if state.config.may_view_stats(user_id) {
                commands::format_stats(&state.dispatcher.scheduler().stats().await)
            } else {
                "Nice try! That one's only for the admin.".to_string()
            }
        }
        Command::Admin => commands::admin_text(state.config.is_owner(user_id)).to_string(),
        Command::Greeting if is_group => return,
        Command::Greeting => commands::greeting_text(&state.config.persona_name),
        // Stray "!" chatter in groups is not ours to answer
        Command::Unknown if is_group => return,
        Command::Unknown => "Unknown command. Type 'help' to see what I can do.".to_string(),
    };

    let reply_to = is_group.then_some(message_id);
    if let Err(e) = state.telegram.send_message(chat_id, &reply, reply_to).await {
        warn!("Failed to answer command {:?}: {}", command, e);
    }
}
