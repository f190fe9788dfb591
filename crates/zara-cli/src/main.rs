use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use zara_core::config::{Config, expand_path};
use zara_media::tts_stream::ElevenLabsSynthesizer;
use zara_media::{
    SpeechInputAdapter, sink_factory_from_config, speech_input_from_config,
    synthesizer_from_config, visual_source_from_config,
};
use zara_session::{SessionCommand, SessionController, SessionNotice, SessionState};
use zara_transport::ChatClient;

mod logging;

#[derive(Parser)]
#[command(
    name = "zara",
    about = "Voice client for the Zara assistant: speak, and hear the reply as it streams",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation: Enter toggles listening, /stop cancels, /quit exits
    Talk,
    /// Run one turn with a fixed transcript
    Ask {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the effective setup
    Status,
    /// List the ElevenLabs voices available to the configured API key
    Voices,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

/// One line typed at the `talk` prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Toggle,
    Cancel,
    Quit,
    Text(String),
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "" => Input::Toggle,
        "/stop" => Input::Cancel,
        "/quit" | "/exit" => Input::Quit,
        text => Input::Text(text.to_string()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init(&config.logging(), cli.verbose);

    match cli.command {
        Commands::Talk => talk(&config).await,
        Commands::Ask { text } => ask(&config, text.join(" ")).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        },
        Commands::Status => {
            status(&config_path, &config);
            Ok(())
        }
        Commands::Voices => voices(&config).await,
    }
}

/// Wire the session from config. The sender feeds typed utterances when the
/// console speech input is in use.
fn build_session(
    config: &Config,
) -> anyhow::Result<(SessionController, Option<mpsc::UnboundedSender<String>>)> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        warn!("{warning}");
    }
    if let Some(first) = errors.first() {
        anyhow::bail!("invalid configuration: {first}");
    }

    let (input, lines) = speech_input_from_config(config)?;
    let client = ChatClient::from_config(config)?;
    let sinks = sink_factory_from_config(config)?;
    let synthesizer = synthesizer_from_config(config).unwrap_or_else(|e| {
        warn!(%e, "Text replies cannot be spoken");
        None
    });

    let controller = SessionController::new(SpeechInputAdapter::new(input), client, sinks)
        .with_assistant_name(config.assistant_name())
        .with_synthesizer(synthesizer)
        .with_visual_source(visual_source_from_config(config));
    Ok((controller, lines))
}

async fn print_notices(mut notices: broadcast::Receiver<SessionNotice>) {
    loop {
        match notices.recv().await {
            Ok(notice) if notice.message.is_empty() => {}
            Ok(notice) => println!("{}", notice.message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Notice printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn talk(config: &Config) -> anyhow::Result<()> {
    let (mut controller, lines) = build_session(config)?;
    let (commands, rx) = mpsc::unbounded_channel();

    tokio::spawn(print_notices(controller.subscribe()));
    tokio::spawn(read_console(commands, lines, controller.subscribe()));

    controller.run(rx).await;
    Ok(())
}

/// Translate typed lines into session commands. While listening with the
/// console speech input, a typed line is the utterance itself.
async fn read_console(
    commands: mpsc::UnboundedSender<SessionCommand>,
    utterances: Option<mpsc::UnboundedSender<String>>,
    mut notices: broadcast::Receiver<SessionNotice>,
) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut state = SessionState::Idle;

    loop {
        let line = match stdin.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%e, "Failed to read from stdin");
                break;
            }
        };
        state = latest_state(&mut notices, state);

        let command = match parse_input(&line) {
            Input::Toggle => SessionCommand::Toggle,
            Input::Cancel => SessionCommand::Cancel,
            Input::Quit => break,
            Input::Text(text) => match &utterances {
                Some(utterances) if state == SessionState::Listening => {
                    let _ = utterances.send(text);
                    continue;
                }
                _ => SessionCommand::Submit(text),
            },
        };
        if commands.send(command).is_err() {
            return;
        }
    }
    let _ = commands.send(SessionCommand::Shutdown);
}

/// Drain pending notices and return the newest state. A lagged receiver
/// skips ahead rather than stopping at the gap.
fn latest_state(
    notices: &mut broadcast::Receiver<SessionNotice>,
    mut state: SessionState,
) -> SessionState {
    loop {
        match notices.try_recv() {
            Ok(notice) => state = notice.state,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!(skipped, "Console state tracker lagged");
            }
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                return state;
            }
        }
    }
}

async fn ask(config: &Config, text: String) -> anyhow::Result<()> {
    let (mut controller, _) = build_session(config)?;
    let printer = tokio::spawn(print_notices(controller.subscribe()));

    controller.submit(text).await;
    controller.run_until_idle().await;

    let failure = controller.last_error().cloned();
    drop(controller);
    let _ = printer.await;

    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn voices(config: &Config) -> anyhow::Result<()> {
    let synthesizer = ElevenLabsSynthesizer::from_config(&config.synthesis())
        .context("set synthesis.api_key or synthesis.api_key_env to list voices")?;
    let voices = synthesizer.list_voices().await?;

    println!("--- Available voices ---");
    for voice in &voices {
        println!("Name: {}\tVoice ID: {}", voice.name, voice.voice_id);
    }
    println!("------------------------");
    println!("Put the name or ID in synthesis.default_voice.");
    Ok(())
}

fn status(config_path: &Path, config: &Config) {
    println!("Zara v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());
    println!("Assistant: {}", config.assistant_name());
    println!("Chat endpoint: {}", config.chat_url());
    println!("Speech input: {}", config.speech().provider);
    println!("Synthesis: {}", config.synthesis().provider);
    let playback = config.playback();
    match playback.sink.as_str() {
        "file" => println!("Playback: file ({})", config.replies_dir().display()),
        other => println!("Playback: {other}"),
    }
    println!("Visual context: {}", config.visual().source);

    let (warnings, errors) = config.validate();
    for warning in warnings {
        println!("warning: {warning}");
    }
    for error in errors {
        println!("error: {error}");
    }
}
