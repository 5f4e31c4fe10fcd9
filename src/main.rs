//! roger-renderer - 时钟同步音频渲染器
//!
//! 把解码后的文件或测试音按时间戳送进虚拟声卡的循环 buffer：
//! - 参考时钟对齐：迟到的数据被跳过，提前的数据留出空隙
//! - 反压：buffer 里超过 150ms 未播放的数据时生产者等待
//! - 流结束：等待硬件播完后报告统计

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use roger_renderer::audio::{
    Clock, VirtualDevice, VirtualDeviceConfig, WaveFormat, TICKS_PER_MILLISECOND,
    TICKS_PER_SECOND,
};
use roger_renderer::decode::{AudioDecoder, SampleSource, ToneSource};
use roger_renderer::engine::{
    MediaSample, Receipt, RenderError, RenderEvent, Renderer, RendererConfig,
};

/// 从开始播放到第一个样本呈现的延迟
const START_LATENCY_MS: i64 = 50;

/// Clock-synchronized audio renderer
#[derive(Parser)]
#[command(name = "roger-renderer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Hardware buffer length in milliseconds
    #[arg(short, long, global = true, default_value = "1000")]
    buffer_ms: u64,

    /// Block writes once this much audio is queued (milliseconds)
    #[arg(long, global = true, default_value = "150")]
    max_fill_ms: u64,

    /// Timestamp drift tolerated before skipping or padding (milliseconds)
    #[arg(long, global = true, default_value = "50")]
    max_lag_ms: u64,

    /// Volume in hundredths of a dB (-10000..=0)
    #[arg(long, global = true, default_value = "0", allow_hyphen_values = true)]
    volume: i32,

    /// Pan (-10000 left ..= 10000 right)
    #[arg(long, global = true, default_value = "0", allow_hyphen_values = true)]
    pan: i32,

    /// Ignore timestamps and write samples back to back
    #[arg(long, global = true)]
    no_clock: bool,

    /// Lock the output buffer in memory (mlock)
    #[arg(long, global = true)]
    lock_memory: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render an audio file
    Play {
        /// Audio file to render
        file: PathBuf,
    },

    /// Render a sine tone
    Tone {
        /// Tone frequency in Hz
        #[arg(long, default_value = "440")]
        freq: f64,

        /// Duration in seconds
        #[arg(long, default_value = "2")]
        secs: f64,

        /// Sample rate in Hz
        #[arg(long, default_value = "44100")]
        rate: u32,

        /// Channel count
        #[arg(long, default_value = "2")]
        channels: u16,

        /// Bits per sample (8, 16, 24 or 32)
        #[arg(long, default_value = "16")]
        bits: u16,
    },

    /// Show file information and the buffer it would use
    Info {
        /// Audio file to inspect
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match &cli.command {
        Commands::Info { file } => show_file_info(file, &cli),
        Commands::Play { file } => {
            let decoder = AudioDecoder::open(file)
                .with_context(|| format!("failed to open {}", file.display()))?;
            println!("roger-renderer - Playing: {}", file.display());
            render(decoder, &cli)
        }
        Commands::Tone {
            freq,
            secs,
            rate,
            channels,
            bits,
        } => {
            let duration =
                Duration::try_from_secs_f64(*secs).context("invalid tone duration")?;
            let format = WaveFormat::pcm(*rate, *channels, *bits);
            let tone = ToneSource::new(*freq, duration, format)?;
            println!("roger-renderer - Tone: {} Hz for {:.1}s", freq, secs);
            render(tone, &cli)
        }
    }
}

fn renderer_config(cli: &Cli) -> RendererConfig {
    RendererConfig {
        max_fill: Duration::from_millis(cli.max_fill_ms),
        max_lag: Duration::from_millis(cli.max_lag_ms),
        buffer_duration: Duration::from_millis(cli.buffer_ms),
        ..Default::default()
    }
}

fn show_file_info(file: &Path, cli: &Cli) -> anyhow::Result<()> {
    let decoder = AudioDecoder::open(file)
        .with_context(|| format!("failed to open {}", file.display()))?;
    let info = decoder.info();
    let format = info.wave_format();
    let config = renderer_config(cli);

    println!("=== {} ===\n", file.display());
    println!("Container:  {}", info.format);
    println!("Codec:      {}", info.codec);
    println!("Sample rate: {} Hz", info.sample_rate);
    println!("Channels:   {}", info.channels);
    match info.bit_depth {
        Some(bits) => println!("Bit depth:  {}", bits),
        None => println!("Bit depth:  unknown"),
    }
    match info.duration_secs {
        Some(secs) => println!("Duration:   {:.2}s", secs),
        None => println!("Duration:   unknown"),
    }
    println!();
    println!("Output:     {}", format);
    println!(
        "Buffer:     {} bytes ({} ms)",
        config.buffer_bytes(&format),
        cli.buffer_ms
    );
    Ok(())
}

/// 把样本源送进渲染器直到结束或被 Ctrl+C 打断
fn render<S: SampleSource>(mut source: S, cli: &Cli) -> anyhow::Result<()> {
    let device = VirtualDevice::new(VirtualDeviceConfig {
        lock_memory: cli.lock_memory,
        ..Default::default()
    });
    let renderer = Renderer::new(device.clone(), renderer_config(cli))?;

    let (tx, rx) = mpsc::channel();
    renderer.set_event_sink(tx);
    renderer.set_volume(cli.volume)?;
    renderer.set_pan(cli.pan)?;
    if !cli.no_clock {
        renderer.use_reference_clock();
    }

    let format = source.format();
    renderer.connect(format)?;
    println!("Output: {} on {}", format, renderer.device_name());
    if cli.lock_memory && !device.is_memory_locked() {
        println!("Warning: output buffer could not be locked in memory");
    }

    // Ctrl+C 停止渲染器，阻塞中的写入立即返回
    {
        let renderer = renderer.clone();
        ctrlc::set_handler(move || renderer.stop())?;
    }

    let clock = renderer.reference_clock();
    renderer.pause()?;
    renderer.start(clock.now() + START_LATENCY_MS * TICKS_PER_MILLISECOND)?;
    println!("Rendering. Press Ctrl+C to stop.\n");

    let mut interrupted = false;
    while let Some(chunk) = source.next_chunk()? {
        let sample = MediaSample::new(&chunk.data).with_times(chunk.start, chunk.stop);
        match renderer.receive(sample) {
            Ok(Receipt::Declined) => break,
            Ok(_) => {}
            Err(RenderError::WrongState) => {
                interrupted = true;
                break;
            }
            Err(e) => return Err(e.into()),
        }

        print!("\r{:>8.2}s", chunk.stop as f64 / TICKS_PER_SECOND as f64);
        io::stdout().flush()?;
    }

    if !interrupted {
        renderer.end_of_stream()?;
    }

    let mut completed = false;
    for event in rx.try_iter() {
        match event {
            RenderEvent::Complete => completed = true,
            RenderEvent::FormatChanged { from_rate, to_rate } => {
                println!("\nSample rate changed: {} -> {} Hz", from_rate, to_rate);
            }
            RenderEvent::FormatRejected { reason } => {
                println!("\nFormat rejected: {}", reason);
            }
        }
    }
    renderer.stop();

    if completed {
        println!("\n\nPlayback complete.");
    } else {
        println!("\n\nPlayback interrupted.");
    }

    let consumed = device.consumed_bytes();
    println!("\n{}", renderer.report());
    println!(
        "Device consumed: {} bytes ({:.2}s)",
        consumed,
        consumed as f64 / format.avg_bytes_per_sec as f64
    );
    Ok(())
}
