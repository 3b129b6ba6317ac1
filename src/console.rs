//! Terminal front end
//!
//! Reads commands and messages from stdin and renders the conversation.
//! This is the interactive task: it alone drives the `SessionController`,
//! applying background results as they arrive on the event channel.

use crate::conversation::Turn;
use crate::error::AppError;
use crate::frame::{FrameSource, ImageFileSource};
use crate::session::{Applied, SessionController, SessionError, SessionEvent};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

const HELP: &str = "Commands:
  /capture <image path>  read a photographed page
  /new                   start over with a new page
  /help                  show this help
  /quit                  exit
Anything else is sent to the discussion.";

/// Line reader over stdin
pub(crate) type Input = Lines<BufReader<Stdin>>;

pub(crate) fn stdin_lines() -> Input {
    BufReader::new(tokio::io::stdin()).lines()
}

/// One parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Capture(PathBuf),
    NewPage,
    Help,
    Quit,
    Message(String),
    Blank,
    Unknown(String),
}

pub(crate) fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Blank;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Message(line.to_string());
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    match name {
        "capture" | "c" if !argument.is_empty() => Command::Capture(PathBuf::from(argument)),
        "new" => Command::NewPage,
        "help" | "h" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Interpret an answer to a yes/no prompt
pub(crate) fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// A line typed while a yes/no prompt is pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecisionLine {
    Answer(bool),
    /// Leaves the prompt unanswered
    Command(Command),
    Invalid,
}

pub(crate) fn parse_decision_line(line: &str) -> DecisionLine {
    if let Some(answer) = parse_answer(line) {
        return DecisionLine::Answer(answer);
    }
    match parse_command(line) {
        command @ (Command::Quit | Command::NewPage) => DecisionLine::Command(command),
        _ => DecisionLine::Invalid,
    }
}

/// Ask for the chat API key on the terminal
pub(crate) async fn prompt_api_key(input: &mut Input) -> Result<Option<String>, AppError> {
    println!("Book Discussion - capture, read, and discuss your books with AI");
    println!();
    println!("Get your free API key:");
    println!("  1. Visit console.groq.com");
    println!("  2. Sign up for a free account");
    println!("  3. Generate an API key");
    println!("  4. Paste it below");
    println!();
    println!("Groq API Key:");
    let key = input
        .next_line()
        .await?
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty());
    Ok(key)
}

fn render_turn(turn: &Turn) {
    println!();
    println!("{} [{}]:", turn.role, turn.timestamp.format("%H:%M"));
    println!("{}", turn.content);
}

fn status(message: &str) {
    println!("-- {}", message);
}

/// Interactive loop state
pub(crate) struct Console {
    controller: SessionController,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    decision: Option<oneshot::Sender<bool>>,
}

impl Console {
    pub fn new(
        controller: SessionController,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            controller,
            events,
            decision: None,
        }
    }

    /// Run until the user quits or stdin closes
    pub async fn run(mut self, mut input: Input) -> Result<(), AppError> {
        println!("{}", HELP);
        status("Use /capture <image path> to begin");

        loop {
            tokio::select! {
                line = input.next_line() => {
                    let Some(line) = line? else {
                        info!("Input closed");
                        break;
                    };
                    if !self.handle_line(&line) {
                        break;
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }
        Ok(())
    }

    /// Returns false when the user asked to quit
    fn handle_line(&mut self, line: &str) -> bool {
        let command = if let Some(reply) = self.decision.take() {
            match parse_decision_line(line) {
                DecisionLine::Answer(answer) => {
                    // The pipeline may already be gone after a reset
                    let _ = reply.send(answer);
                    if answer {
                        status("Describing the scene...");
                    }
                    return true;
                }
                // Dropping `reply` declines the scene description
                DecisionLine::Command(command) => command,
                DecisionLine::Invalid => {
                    status("Please answer y or n");
                    self.decision = Some(reply);
                    return true;
                }
            }
        } else {
            parse_command(line)
        };

        match command {
            Command::Capture(path) => self.capture(path),
            Command::NewPage => {
                info!(
                    discarded_turns = self.controller.conversation().turns().len(),
                    "New page requested"
                );
                self.controller.reset();
                status("New page. Use /capture <image path> to read it");
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
            Command::Message(text) => match self.controller.send(&text) {
                Ok(turn) => render_turn(&turn),
                Err(e) => status(&e.to_string()),
            },
            Command::Blank => {}
            Command::Unknown(text) => status(&format!("Unknown command: {} (try /help)", text)),
        }
        true
    }

    fn capture(&mut self, path: PathBuf) {
        if self.controller.is_busy() {
            status(&SessionError::Busy.to_string());
            return;
        }
        let frame = match ImageFileSource::new(path).next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Frame capture failed: {}", e);
                status(&format!("Could not access the image: {}", e));
                return;
            }
        };
        info!(state = ?self.controller.capture_state(), "Capture requested");
        match self.controller.capture(frame) {
            Ok(_) => status("Processing image..."),
            Err(e) => status(&e.to_string()),
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match self.controller.apply(event) {
            Applied::Capture { status: line, turns } => {
                turns.iter().for_each(render_turn);
                status(line);
            }
            Applied::Reply(turn) => render_turn(&turn),
            Applied::Decision { prompt, reply } => {
                println!();
                println!("{} [y/n]", prompt);
                self.decision = Some(reply);
            }
            Applied::Stale => {}
        }
    }
}
