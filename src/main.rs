//! sout-rs Command Line Interface
//!
//! Pushes raw elementary streams read from files or standard input through a
//! stream output chain.

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sout_rs::access::{self, read_retrying};
use sout_rs::config::FileOptions;
use sout_rs::core::block::ticks;
use sout_rs::{
    Block, ConfigChain, EsCategory, EsFormat, FourCC, SoutConfig, SoutContext, SoutInput,
    SoutError, SoutInstance, SoutResult, Tick, mux, stream,
};

/// Nominal duration of one non-audio chunk
const CHUNK_DURATION: Duration = Duration::from_millis(40);

#[derive(Parser)]
#[command(name = "sout-rs")]
#[command(about = "Stream output pipeline - mux elementary streams into files", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send raw elementary streams through a stream output chain
    Stream {
        /// Chain description, e.g. "#std{access=file,mux=wav,dst=out.wav}"
        #[arg(long, value_name = "CHAIN")]
        sout: String,

        /// Track category of every input (audio, video, spu)
        #[arg(long, default_value = "audio")]
        category: EsCategory,

        /// Codec fourcc of every input
        #[arg(long, default_value = "araw")]
        codec: FourCC,

        /// Audio sample rate
        #[arg(long, default_value = "44100")]
        rate: u32,

        /// Audio channels
        #[arg(long, default_value = "2")]
        channels: u16,

        /// Audio bits per sample
        #[arg(long, default_value = "16")]
        bits: u16,

        /// Video width
        #[arg(long, default_value = "0")]
        width: u32,

        /// Video height
        #[arg(long, default_value = "0")]
        height: u32,

        /// Bytes per block
        #[arg(long, default_value = "4096")]
        chunk_size: usize,

        /// Overwrite existing files without asking
        #[arg(short, long)]
        yes: bool,

        /// Ask before replacing an existing file
        #[arg(long)]
        no_overwrite: bool,

        /// Append to existing files
        #[arg(long)]
        append: bool,

        /// Expand strftime sequences in file names
        #[arg(long)]
        format: bool,

        /// Synchronous writes
        #[arg(long)]
        sync: bool,

        /// How long muxers wait for all streams, in milliseconds
        #[arg(long, default_value = "1500")]
        mux_caching: u64,

        /// Input files, "-" for standard input; one track each
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Parse a chain description and print it
    Parse {
        /// Chain description
        #[arg(value_name = "CHAIN")]
        chain: String,
    },

    /// List stream, mux and access modules
    Modules,
}

/// One producer: a byte source cut into timestamped blocks
struct Source {
    name: PathBuf,
    reader: Box<dyn Read>,
    input: Option<SoutInput>,
    byte_rate: u64,
    sent: u64,
    chunks: i64,
}

impl Source {
    fn open(path: &Path) -> io::Result<Box<dyn Read>> {
        if path == Path::new("-") {
            Ok(Box::new(io::stdin()))
        } else {
            Ok(Box::new(File::open(path)?))
        }
    }

    /// Timestamp and duration of the next block of `len` bytes
    fn timing(&self, len: usize) -> (Tick, Tick) {
        if self.byte_rate > 0 {
            let at = |bytes: u64| (bytes * 1_000_000 / self.byte_rate) as Tick;
            let pts = at(self.sent);
            (pts, at(self.sent + len as u64) - pts)
        } else {
            let length = ticks(CHUNK_DURATION);
            (self.chunks * length, length)
        }
    }
}

/// Fill `buf` as far as the reader allows; 0 means end of input
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> SoutResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_retrying(&mut *reader, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn ask_overwrite(path: &Path) -> bool {
    eprint!("File {} already exists. Overwrite? [y/N] ", path.display());
    if let Err(e) = io::stderr().flush() {
        warn!("cannot flush the overwrite prompt: {}", e);
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

fn run_stream(
    sout: &str,
    template: EsFormat,
    chunk_size: usize,
    yes: bool,
    file: FileOptions,
    mux_caching: Duration,
    inputs: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SoutConfig { file, mux_caching };
    let stdin_is_input = inputs.iter().any(|p| p == Path::new("-"));
    let ctx = SoutContext::new(config).with_confirm_overwrite(move |path| {
        if yes {
            return true;
        }
        if stdin_is_input {
            warn!("not asking about {}: standard input carries data", path.display());
            return false;
        }
        ask_overwrite(path)
    });
    let instance = SoutInstance::new(sout, Arc::new(ctx))?;

    let byte_rate = match template.category {
        EsCategory::Audio => template.audio.byte_rate().map(u64::from).ok_or_else(|| {
            SoutError::InvalidFormat(format!(
                "{} channels of {} bits at {} Hz overflow the byte rate",
                template.audio.channels, template.audio.bits_per_sample, template.audio.rate
            ))
        })?,
        _ => 0,
    };
    let mut sources = Vec::with_capacity(inputs.len());
    for (i, path) in inputs.iter().enumerate() {
        let reader = Source::open(path)?;
        let format = template.clone().with_id(i as i32);
        let input = instance.add_input(format)?;
        sources.push(Source {
            name: path.clone(),
            reader,
            input: Some(input),
            byte_rate,
            sent: 0,
            chunks: 0,
        });
    }

    let mut buf = vec![0u8; chunk_size.max(1)];
    while sources.iter().any(|s| s.input.is_some()) {
        for source in sources.iter_mut() {
            let Some(input) = &source.input else {
                continue;
            };
            let n = read_chunk(source.reader.as_mut(), &mut buf)?;
            if n == 0 {
                info!(
                    "{}: {} bytes in {} blocks",
                    source.name.display(),
                    source.sent,
                    source.chunks
                );
                if let Some(input) = source.input.take() {
                    instance.del_input(input)?;
                }
                continue;
            }
            let (pts, length) = source.timing(n);
            let block = Block::from_slice(&buf[..n])
                .with_timestamps(pts, pts)
                .with_length(length);
            instance.send(input, block)?;
            source.sent += n as u64;
            source.chunks += 1;
        }
        instance.tick()?;
    }
    Ok(())
}

fn print_modules(kind: &str, modules: &[(&str, &str)]) {
    println!("{kind}:");
    for (name, about) in modules {
        println!("  {name:<12} {about}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    info!("sout-rs {}", sout_rs::VERSION);

    match cli.command {
        Commands::Stream {
            sout,
            category,
            codec,
            rate,
            channels,
            bits,
            width,
            height,
            chunk_size,
            yes,
            no_overwrite,
            append,
            format,
            sync,
            mux_caching,
            inputs,
        } => {
            let template = match category {
                EsCategory::Audio => EsFormat::audio(codec, rate, channels, bits),
                EsCategory::Video => EsFormat::video(codec, width, height),
                other => EsFormat::new(other, codec),
            };
            let file = FileOptions {
                overwrite: !no_overwrite,
                append,
                format,
                sync,
            };
            run_stream(
                &sout,
                template,
                chunk_size,
                yes,
                file,
                Duration::from_millis(mux_caching),
                &inputs,
            )?;
        }
        Commands::Parse { chain } => {
            let parsed = ConfigChain::parse(&chain)?;
            for element in parsed.elements() {
                println!("{}", element.name());
                for option in element.options() {
                    match &option.value {
                        Some(value) => println!("  {} = {}", option.key, value),
                        None => println!("  {}", option.key),
                    }
                }
            }
            println!("{parsed}");
        }
        Commands::Modules => {
            print_modules("stream", stream::MODULES);
            print_modules("mux", mux::MODULES);
            print_modules("access", access::MODULES);
        }
    }

    Ok(())
}
