#![deny(clippy::all)]

mod capture;
mod chat;
mod config;
mod console;
mod conversation;
mod error;
mod extraction;
mod frame;
mod scene;
mod session;
mod transport;

use std::sync::Arc;
use tracing::{info, warn};

use error::AppError;
use transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so the conversation on stdout stays readable
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    run().await?;
    Ok(())
}

async fn run() -> Result<(), AppError> {
    let config = config::load_config()?;
    let mut credentials = config::Credentials::from_env();
    let mut input = console::stdin_lines();

    if credentials.chat_api_key.is_none() {
        info!(
            "{} not set, asking for the chat API key",
            config::CHAT_API_KEY_VAR
        );
        credentials.chat_api_key = console::prompt_api_key(&mut input).await?;
        if credentials.chat_api_key.is_none() {
            println!("Please enter your Groq API key");
            return Ok(());
        }
    }
    if credentials.vision_api_token.is_none() {
        warn!(
            "{} not set - text extraction and scene description are unavailable",
            config::VISION_API_TOKEN_VAR
        );
    }
    info!("Credentials: {:?}", credentials);

    let transport: Arc<dyn HttpTransport> = Arc::new(
        transport::ReqwestTransport::new().map_err(|e| AppError::Http(format!("{:#}", e)))?,
    );

    let extractor = extraction::TextExtractor::new(&config.ocr, &credentials, transport.clone());
    let describer = scene::SceneDescriber::remote(&config.caption, &credentials, transport.clone());
    let coordinator = capture::CaptureCoordinator::new(Arc::new(extractor), Arc::new(describer));
    let chat = chat::ChatClient::new(&config.chat, &credentials, transport);
    drop(credentials);

    let (controller, events) =
        session::SessionController::new(Arc::new(coordinator), Arc::new(chat));
    info!(session = %controller.session_id(), "Session ready");

    console::Console::new(controller, events).run(input).await
}
