use crate::backend::telegram::TelegramBackend;
use crate::bot::handlers::{self, Command};
use crate::bot::media::{has_saveable_media, to_notification};
use crate::bot::{Aggregator, Processor};
use crate::config::{Settings, DEFAULT_FOLDER};
use crate::ingest::{AlbumAggregator, BatchProcessor, FileWriter, FolderStore};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};

/// Run the Telegram transport runtime.
///
/// # Errors
///
/// Returns an error if the Bot API stays unreachable, the folder policy does
/// not compile, or the download root cannot be created.
pub async fn run_bot(settings: Arc<Settings>) -> anyhow::Result<()> {
    let backend = Arc::new(TelegramBackend::connect(&settings).await?);
    let bot = backend.bot();
    register_commands(&bot).await;

    let folders = Arc::new(FolderStore::new(settings.folder_name_regex()?));
    let writer = Arc::new(FileWriter::new(settings.download_root.clone()));
    writer.ensure_folder(DEFAULT_FOLDER).await?;
    info!(root = %writer.root().display(), "Download root ready");

    let processor: Arc<Processor> = Arc::new(BatchProcessor::new(
        Arc::clone(&backend),
        Arc::clone(&folders),
        (*writer).clone(),
        settings.max_concurrent_downloads,
    ));
    let aggregator: Arc<Aggregator> = AlbumAggregator::new(
        Arc::clone(&processor),
        settings.album_quiescence(),
        settings.closed_album_retention(),
    );
    info!(
        quiescence_ms = settings.album_quiescence_ms,
        max_concurrent = settings.max_concurrent_downloads,
        "Album aggregator initialized"
    );

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![
            folders,
            writer,
            processor,
            Arc::clone(&aggregator)
        ])
        .default_handler(|upd| async move {
            debug!(update_id = ?upd.id, "Ignoring update without saveable media");
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    aggregator.shutdown().await;
    info!("Bot stopped");
    Ok(())
}

async fn register_commands(bot: &Bot) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::filter(|msg: Message| has_saveable_media(&msg)).endpoint(handle_media))
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    folders: Arc<FolderStore>,
    writer: Arc<FileWriter>,
    processor: Arc<Processor>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg).await,
        Command::NewFolder(name) => handlers::new_folder(bot, msg, name, folders, writer).await,
        Command::Status => handlers::status(bot, msg, folders, writer, processor).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_media(msg: Message, aggregator: Arc<Aggregator>) -> Result<(), teloxide::RequestError> {
    if let Some(notification) = to_notification(&msg) {
        let chat_id = notification.chat_id;
        let kind = notification.kind.as_str();
        let outcome = aggregator.ingest(notification);
        debug!(chat_id, kind, ?outcome, "Media routed");
    }
    respond(())
}
