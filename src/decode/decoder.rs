//! 音频文件解码器
//!
//! 使用 symphonia 库解码，支持：FLAC, WAV, AIFF, MP3
//!
//! 输出按文件原始位深打包的交错 PCM 字节，
//! 每块附带以 tick 为单位的呈现时间，直接交给渲染器

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{DecodeError, PcmChunk, SampleSource};
use crate::audio::{WaveFormat, TICKS_PER_SECOND};

/// 音频文件信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    /// 采样率
    pub sample_rate: u32,
    /// 声道数
    pub channels: u16,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果已知）
    pub total_frames: Option<u64>,
    /// 总时长（秒）
    pub duration_secs: Option<f64>,
    /// 格式名称
    pub format: String,
    /// 编解码器名称
    pub codec: String,
}

impl AudioInfo {
    /// 输出格式：整数 PCM，位深取 8/16/24/32 中最接近的一档
    pub fn wave_format(&self) -> WaveFormat {
        let bits = match self.bit_depth {
            Some(0..=8) => 8,
            Some(9..=16) | None => 16,
            Some(17..=24) => 24,
            Some(_) => 32,
        };
        WaveFormat::pcm(self.sample_rate, self.channels, bits)
    }
}

/// 音频文件解码器
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
    format: WaveFormat,
    /// 交错 i32 样本缓冲区，按需重建
    samples: Option<SampleBuffer<i32>>,
    /// 已输出的帧数，用于计算时间戳
    frames_out: u64,
}

impl AudioDecoder {
    /// 打开音频文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // 提示文件扩展名
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|_| DecodeError::UnsupportedFormat)?;

        let reader = probed.format;
        let format_name = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "Unknown".to_string());

        // 查找第一个音频轨道
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let total_frames = codec_params.n_frames;

        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = AudioInfo {
            sample_rate,
            channels,
            bit_depth: codec_params.bits_per_sample,
            total_frames,
            duration_secs: total_frames.map(|f| f as f64 / sample_rate as f64),
            format: format_name,
            codec: codec_name,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        let format = info.wave_format();
        log::info!(
            "Opened {}: {} / {} -> {}",
            path.display(),
            info.format,
            info.codec,
            format
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            format,
            samples: None,
            frames_out: 0,
        })
    }

    /// 获取音频信息
    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// 解码下一个 packet
    ///
    /// 文件结束时返回 None
    pub fn next_chunk(&mut self) -> Result<Option<PcmChunk>, DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    log::warn!("Decoder reset required, treating as end of stream");
                    return Ok(None);
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            // 跳过非目标轨道
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    // 跳过损坏的帧
                    log::warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }

            // symphonia 把整数样本左对齐到 i32 高位，浮点样本缩放到满幅
            let spec = *decoded.spec();
            let capacity = decoded.capacity();
            if self
                .samples
                .as_ref()
                .is_some_and(|buf| buf.capacity() < capacity * spec.channels.count())
            {
                self.samples = None;
            }
            let samples = self
                .samples
                .get_or_insert_with(|| SampleBuffer::new(capacity as u64, spec));
            samples.copy_interleaved_ref(decoded);

            let mut data = vec![0u8; samples.samples().len() * self.format.bytes_per_sample()];
            let written = self.format.samples_to_bytes(samples.samples(), &mut data);
            data.truncate(written);

            let start = self.ticks_at(self.frames_out);
            self.frames_out += frames as u64;
            let stop = self.ticks_at(self.frames_out);

            return Ok(Some(PcmChunk { data, start, stop }));
        }
    }

    fn ticks_at(&self, frames: u64) -> i64 {
        (frames as i128 * TICKS_PER_SECOND as i128 / self.info.sample_rate as i128) as i64
    }
}

impl SampleSource for AudioDecoder {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn next_chunk(&mut self) -> Result<Option<PcmChunk>, DecodeError> {
        AudioDecoder::next_chunk(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    /// 写一个 16-bit 单声道 WAV 文件
    fn write_wav(name: &str, sample_rate: u32, samples: &[i16]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "roger-renderer-{}-{}.wav",
            std::process::id(),
            name
        ));
        let data_len = (samples.len() * 2) as u32;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let mut file = File::create(&path).unwrap();
        file.write_all(&bytes).unwrap();
        path
    }

    #[test]
    fn test_wave_format_bit_depth() {
        let mut info = AudioInfo {
            sample_rate: 44100,
            channels: 2,
            bit_depth: Some(24),
            total_frames: None,
            duration_secs: None,
            format: "FLAC".into(),
            codec: "flac".into(),
        };
        assert_eq!(info.wave_format(), WaveFormat::pcm(44100, 2, 24));

        info.bit_depth = None;
        assert_eq!(info.wave_format().bits_per_sample, 16);
        info.bit_depth = Some(20);
        assert_eq!(info.wave_format().bits_per_sample, 24);
    }

    #[test]
    fn test_decode_wav_roundtrips_pcm() {
        let samples: Vec<i16> = (0..800).map(|i| (i * 37 - 12000) as i16).collect();
        let path = write_wav("pcm16", 8000, &samples);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.info().sample_rate, 8000);
        assert_eq!(decoder.info().total_frames, Some(800));
        assert_eq!(SampleSource::format(&decoder), WaveFormat::pcm(8000, 1, 16));

        let mut bytes = Vec::new();
        let mut expected_start = 0;
        let mut last_stop = 0;
        while let Some(chunk) = decoder.next_chunk().unwrap() {
            // 时间戳首尾相接
            assert_eq!(chunk.start, expected_start);
            expected_start = chunk.stop;
            last_stop = chunk.stop;
            bytes.extend_from_slice(&chunk.data);
        }
        std::fs::remove_file(&path).ok();

        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(bytes, expected);
        // 800 帧 @ 8kHz = 100ms
        assert_eq!(last_stop, 1_000_000);
    }

    #[test]
    fn test_open_missing_file() {
        let result = AudioDecoder::open("/nonexistent/roger-renderer.wav");
        assert!(matches!(result, Err(DecodeError::FileOpen(_))));
    }
}
