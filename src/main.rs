use anyhow::{bail, Context};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use vac_core::{StreamDescriptor, TARGET_SAMPLE_RATE};
use vac_enc::{open_file, opus_pipeline, AudioSource, ConsoleProgress};
use vac_opus::{library_version, BitrateMode, EncoderSettings, ResolvedSettings};

#[derive(Parser, Debug)]
#[command(
    name = "vac-enc",
    about = "Encode a WAVE or FLAC file to Ogg Opus",
    version
)]
struct Cli {
    /// Target bitrate in kbps [default: 64 + 32 per channel]
    #[arg(short = 'b', value_name = "KBPS", allow_negative_numbers = true)]
    bitrate: Option<f64>,

    /// LSB depth hint, 8 to 24 [default: source bit depth]
    #[arg(short = 'l', value_name = "BITS")]
    lsb: Option<u8>,

    /// Bitrate mode: 0 CBR, 1 constrained VBR, 2 VBR
    #[arg(short = 'v', value_name = "MODE", default_value_t = 2)]
    vbr: u8,

    /// WAVE or FLAC file to read
    input: PathBuf,

    /// Ogg Opus file to write
    output: PathBuf,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<EncoderSettings> {
        Ok(EncoderSettings {
            bitrate: self.bitrate.map(|kbps| (kbps * 1000.0) as u32),
            mode: BitrateMode::from_level(self.vbr)?,
            lsb_depth: self.lsb,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_summary(descriptor: &StreamDescriptor, settings: &ResolvedSettings) {
    eprintln!("\n\tEncoding library  ::  {}", library_version());
    eprintln!(
        "\n\tTarget bitrate    ::  {:.3} kbps ({})",
        settings.bitrate as f64 / 1000.0,
        settings.mode.label()
    );
    let rate = if descriptor.sampling_rate() == TARGET_SAMPLE_RATE {
        String::new()
    } else {
        format!("{:.1} kHz -> ", descriptor.sampling_rate() as f64 / 1000.0)
    };
    eprintln!("\n\tSample rate       ::  {}48.0 kHz\n", rate);
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if cli.input.as_os_str() == "-" || cli.output.as_os_str() == "-" {
        bail!("stdin/stdout is not supported");
    }
    if cli.input == cli.output {
        bail!("input and output file cannot be the same");
    }

    let source = open_file(&cli.input)
        .with_context(|| format!("failed to open {}", cli.input.display()))?;
    let descriptor = source.descriptor().clone();
    let settings = cli
        .settings()?
        .resolve(descriptor.channel_count(), descriptor.bits_per_sample())?;

    let output = File::create(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let encoded = encode(source, output, &settings, &cli.input);
    if encoded.is_err() {
        // Leave no partial Ogg stream behind.
        if let Err(err) = fs::remove_file(&cli.output) {
            debug!(error = %err, path = %cli.output.display(), "could not remove partial output");
        }
    }
    encoded
}

fn encode<R: Read>(
    source: AudioSource<R>,
    output: File,
    settings: &ResolvedSettings,
    input: &Path,
) -> anyhow::Result<()> {
    let descriptor = source.descriptor().clone();
    let mut pipeline = opus_pipeline(source, BufWriter::new(output), settings)?;

    print_summary(&descriptor, settings);
    let samples_per_sec = descriptor.sampling_rate() as u64 * descriptor.channel_count() as u64;
    let mut progress = ConsoleProgress::new(io::stderr(), samples_per_sec);
    let report = pipeline
        .run(&mut progress)
        .with_context(|| format!("failed to encode {}", input.display()))?;
    debug!(?report, "done");
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{:#}", err), "encoding failed");
            eprintln!("vac-enc: {:#}", err);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use vac_core::test_utils::{build_wav, encode_pcm, sine_wave, WavFixture};
    use vac_flac::test_utils::{sine_i32, FlacStreamWriter, Stereo, Subframe};

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["vac-enc", "in.wav", "out.opus"]).unwrap();
        let settings = cli.settings().unwrap();
        assert_eq!(settings.bitrate, None);
        assert_eq!(settings.mode, BitrateMode::Vbr);
        assert_eq!(settings.lsb_depth, None);
    }

    #[test]
    fn test_cli_flags() {
        let cli =
            Cli::try_parse_from(["vac-enc", "-b", "96.5", "-l", "16", "-v", "0", "a.flac", "b.opus"])
                .unwrap();
        let settings = cli.settings().unwrap();
        assert_eq!(settings.bitrate, Some(96_500));
        assert_eq!(settings.mode, BitrateMode::Cbr);
        assert_eq!(settings.lsb_depth, Some(16));
    }

    #[test]
    fn test_cli_rejects_same_path_and_stdio() {
        let same = Cli::try_parse_from(["vac-enc", "x.wav", "x.wav"]).unwrap();
        assert!(run(&same).is_err());
        let stdin = Cli::try_parse_from(["vac-enc", "-", "x.opus"]).unwrap();
        assert!(run(&stdin).is_err());
        let bad_mode = Cli::try_parse_from(["vac-enc", "-v", "3", "a.wav", "b.opus"]).unwrap();
        assert!(bad_mode.settings().is_err());
    }

    #[test]
    fn test_failed_encode_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.flac");
        let output = dir.path().join("broken.opus");

        let samples = sine_i32(4_096, 2, 44_100, 16);
        let mut writer = FlacStreamWriter::new(44_100, 2, 16);
        writer.add_interleaved(&samples, 1_024, &Subframe::Fixed(2), Stereo::LeftSide);
        let mut bytes = writer.finish();
        // Break the CRC of the last frame.
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&input, &bytes).unwrap();

        let cli = Cli::try_parse_from([
            OsStr::new("vac-enc"),
            input.as_os_str(),
            output.as_os_str(),
        ])
        .unwrap();
        assert!(run(&cli).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_successful_encode_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        let output = dir.path().join("tone.opus");

        let sine = sine_wave(4_800, 1, 48_000, 440.0, 0.5);
        fs::write(&input, build_wav(&WavFixture::pcm(1, 48_000, 16), &encode_pcm(&sine, 16)))
            .unwrap();

        let cli = Cli::try_parse_from([
            OsStr::new("vac-enc"),
            input.as_os_str(),
            output.as_os_str(),
        ])
        .unwrap();
        run(&cli).unwrap();
        assert!(fs::read(&output).unwrap().starts_with(b"OggS"));
    }
}
