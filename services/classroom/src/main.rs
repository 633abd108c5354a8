mod config;
mod prompt_loader;
mod shell;
mod speech;

use crate::config::Config;
use crate::shell::{Renderer, ShellCommand};
use crate::speech::SpeechApi;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use classroom_core::responder::{ChatCompletionsClient, ResponderConfig};
use classroom_core::session::{ClassroomSession, SessionHandle, SessionOptions};
use classroom_core::speech::{SpeechCapture, SpeechPlayback, UnsupportedCapture, UnsupportedPlayback};
use classroom_core::subject::{get_subject_by_id, search_subjects};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Talk to an AI teacher from your terminal")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Print the subject catalog
    List {
        /// Only show subjects whose name or description matches
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the available audio input and output devices
    Devices,
    /// Enter the classroom for a subject
    Start {
        /// Subject id, e.g. "mathematics"
        subject: String,
        /// Type questions only; do not open the microphone
        #[arg(long)]
        no_voice: bool,
        /// Do not play speech through the speakers
        #[arg(long)]
        mute: bool,
    },
}

fn init_logging(level: Level) {
    // Logs go to stderr so they do not interleave with the classroom transcript.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::List { search } => {
            let subjects = search_subjects(search.as_deref().unwrap_or_default());
            println!("{}", shell::render_catalog(&subjects));
            Ok(())
        }
        CliCommand::Devices => {
            init_logging(Level::WARN);
            let inputs = classroom_native_utils::device::get_available_inputs()
                .context("Failed to list input devices")?;
            let outputs = classroom_native_utils::device::get_available_outputs()
                .context("Failed to list output devices")?;
            println!("Input devices:\n{inputs}\n\nOutput devices:\n{outputs}");
            Ok(())
        }
        CliCommand::Start {
            subject,
            no_voice,
            mute,
        } => run_classroom(&subject, no_voice, mute).await,
    }
}

async fn run_classroom(subject_id: &str, no_voice: bool, mute: bool) -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    init_logging(config.log_level);
    tracing::info!("Configuration loaded successfully. Opening the classroom...");

    // --- 3. Resolve the Subject and Persona ---
    let subject = get_subject_by_id(subject_id).with_context(|| {
        format!("Unknown subject '{subject_id}'. Run `classroom list` to see the catalog.")
    })?;
    let persona = prompt_loader::persona_for(subject, config.persona_prompt_dir.as_deref())
        .context("Failed to load persona template")?;

    // --- 4. Initialize API Clients ---
    let responder = ChatCompletionsClient::new(
        ResponderConfig::builder()
            .with_base_url(&config.base_url)
            .with_api_key(config.openai_api_key.expose_secret())
            .with_model(&config.chat_model)
            .with_timeout(config.request_timeout)
            .build(),
    )
    .context("Failed to create the chat client")?;
    let speech_api = SpeechApi::new(&config).context("Failed to create the speech client")?;

    // --- 5. Audio Setup ---
    // The cpal streams are not Send; they live here until the classroom closes.
    let mut streams: Vec<cpal::Stream> = Vec::new();

    let playback: Box<dyn SpeechPlayback> = if mute {
        Box::new(UnsupportedPlayback)
    } else {
        match speech::playback::open_output(config.output_device.as_deref(), speech_api.clone()) {
            Ok((stream, playback)) => {
                streams.push(stream);
                Box::new(playback)
            }
            Err(e) => {
                tracing::warn!("Speech output unavailable: {e:#}");
                Box::new(UnsupportedPlayback)
            }
        }
    };

    let capture: Box<dyn SpeechCapture> = if no_voice {
        Box::new(UnsupportedCapture)
    } else {
        match speech::capture::open_input(
            config.input_device.as_deref(),
            speech_api,
            config.interim_interval,
        ) {
            Ok((stream, capture)) => {
                streams.push(stream);
                Box::new(capture)
            }
            Err(e) => {
                tracing::warn!("Voice input unavailable: {e:#}");
                Box::new(UnsupportedCapture)
            }
        }
    };

    // --- 6. Run the Session ---
    println!("{}", shell::avatar_line(subject));
    println!("{}", shell::HELP);

    let (session, handle, mut events) = ClassroomSession::new(
        subject,
        persona,
        Arc::new(responder),
        playback,
        capture,
        SessionOptions {
            silent_policy: config.silent_policy,
            history_window: config.history_window,
            words_per_minute: config.words_per_minute,
        },
    );
    let session_task = tokio::spawn(session.run());

    let render_task = tokio::spawn(async move {
        let mut renderer = Renderer::new();
        while let Some(event) = events.recv().await {
            for line in renderer.render(&event) {
                println!("{line}");
            }
        }
    });

    read_commands(&handle).await?;

    if handle.end().await.is_err() {
        tracing::debug!("Session already closed");
    }
    let conversation = session_task.await.context("Session task failed")?;
    render_task.await.context("Render task failed")?;
    drop(streams);

    tracing::info!(turns = conversation.len(), "Classroom closed");
    Ok(())
}

/// Forwards typed commands to the session until the user leaves.
async fn read_commands(handle: &SessionHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, leaving the classroom.");
                return Ok(());
            }
        };
        // End of input.
        let Some(line) = line else {
            return Ok(());
        };

        let sent = match shell::parse_line(&line) {
            None => Ok(()),
            Some(ShellCommand::Quit) => return Ok(()),
            Some(ShellCommand::Ask(text)) => handle.submit_text(text).await,
            Some(ShellCommand::Skip) => handle.skip().await,
            Some(ShellCommand::Talk) => handle.toggle_capture().await,
            Some(ShellCommand::Help) => {
                println!("{}", shell::HELP);
                Ok(())
            }
            Some(ShellCommand::Unknown(command)) => {
                println!("Unknown command {command}. {}", shell::HELP);
                Ok(())
            }
        };
        if sent.is_err() {
            return Ok(());
        }
    }
}
