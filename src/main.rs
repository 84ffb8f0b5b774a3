use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hugo_voice::agent::{self, Responder};
use hugo_voice::config::file::{config_file_path, load_config_file, load_config_file_from};
use hugo_voice::voice::{AudioIo, CpalAudio, SpeechSynthesisService, calculate_rms, chunk_queue};
use hugo_voice::{Config, VoicePipeline};

/// Spoken when the responder fails
const APOLOGY: &str = "Sorry, I couldn't come up with an answer to that.";

/// Hugo - voice-first personal assistant
#[derive(Parser)]
#[command(name = "hugo", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/hugo/config.toml)
    #[arg(short, long, env = "HUGO_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Listen, answer and speak until Ctrl-C (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Print the config file path
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hugo_voice=info",
        1 => "info,hugo_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Run);

    if matches!(command, Command::ConfigPath) {
        return config_path();
    }

    let file = cli
        .config
        .as_deref()
        .map_or_else(load_config_file, load_config_file_from);
    let config = Config::resolve(file, |key| std::env::var(key).ok())?;
    tracing::debug!(?config, "loaded configuration");

    match command {
        Command::Run => run_assistant(&config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::ConfigPath => config_path(),
    }
}

/// Listen for utterances, answer them and speak the answers
async fn run_assistant(config: &Config) -> anyhow::Result<()> {
    let responder = agent::from_config(&config.agent, &config.api_keys)?;
    let pipeline = VoicePipeline::from_config(config)?;
    let mut transcripts = pipeline.subscribe_transcripts();

    pipeline.start().await?;
    tracing::info!(responder = responder.name(), "hugo ready - start talking");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            transcript = transcripts.recv() => {
                let Some(transcript) = transcript else {
                    break;
                };
                tokio::select! {
                    () = answer(&pipeline, responder.as_ref(), &transcript.text) => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    pipeline.stop().await;
    Ok(())
}

/// One conversational turn; failures are logged, never fatal
async fn answer(pipeline: &VoicePipeline, responder: &dyn Responder, transcript: &str) {
    let reply = match responder.respond(transcript).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "responder failed");
            APOLOGY.to_string()
        }
    };

    if let Err(e) = pipeline.speak(&reply).await {
        tracing::warn!(error = %e, "failed to speak reply");
    }
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let sample_rate = config.pipeline.sample_rate;
    let (sender, mut receiver) = chunk_queue(config.pipeline.queue_capacity);
    let mut input = CpalAudio::new().open_input(sample_rate, config.pipeline.chunk_samples, sender)?;
    input.start()?;

    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(chunk)) =
            tokio::time::timeout_at(deadline.into(), receiver.recv()).await
        {
            samples.extend_from_slice(chunk.samples());
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    input.stop()?;
    input.close();

    if receiver.dropped() > 0 {
        println!("\n{} chunks were dropped (queue full)", receiver.dropped());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Play samples on the default output device and wait for them to finish
async fn play(samples: Vec<f32>, sample_rate: u32) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut output = CpalAudio::new().open_output(sample_rate)?;
        output.write(&samples)?;
        output.block_until_drained()
    })
    .await??;
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    if let (_, Some(name)) = CpalAudio::default_device_names() {
        println!("Output device: {name}");
    }

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    play(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output with the configured backend
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = SpeechSynthesisService::from_config(&config.tts, &config.api_keys)?;

    println!("Synthesizing speech...");
    let audio = tts.synthesize(text).await?;
    println!(
        "Got {} samples at {} Hz ({:.1}s)",
        audio.samples.len(),
        audio.sample_rate,
        audio.duration_s()
    );

    println!("Playing audio...");
    let sample_rate = audio.sample_rate;
    play(audio.samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print where the config file is read from
fn config_path() -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
    let state = if path.exists() { "exists" } else { "not found" };
    println!("{} ({state})", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["hugo"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["hugo", "-vv", "test-mic", "--duration", "3"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Some(Command::TestMic { duration: 3 })));

        let cli = Cli::parse_from(["hugo", "test-tts", "hi there"]);
        assert!(matches!(cli.command, Some(Command::TestTts { ref text }) if text == "hi there"));
    }
}
