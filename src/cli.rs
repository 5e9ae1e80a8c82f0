//! Command line surface.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{Config, ConfigError, RestreamTarget, SourceTransport, SrtMode, DEFAULT_STUN_SERVER};

#[derive(Parser, Debug)]
#[command(name = "whip-mpegts")]
#[command(about = "Publish an MPEG-TS stream to a WHIP endpoint", long_about = None)]
pub struct Cli {
    /// Address the UDP/SRT source binds to (or calls, in SRT caller mode)
    #[arg(short = 'a', long = "udpSourceAddress", default_value = "0.0.0.0")]
    pub source_address: String,

    /// Port of the UDP/SRT source
    #[arg(short = 'p', long = "udpSourcePort", default_value_t = 0)]
    pub source_port: u16,

    /// WHIP endpoint URL
    #[arg(short = 'u', long = "whipEndpointUrl", default_value = "")]
    pub whip_endpoint_url: String,

    /// Bearer token for the WHIP endpoint
    #[arg(short = 'k', long = "whipEndpointAuthKey")]
    pub whip_auth_key: Option<String>,

    /// Minimum data (ms) buffered by the source queue before playback starts
    #[arg(short = 'd', long = "udpSourceQueueMinTime", default_value_t = 0)]
    pub source_queue_min_time_ms: u64,

    /// Pass-through restream destination address
    #[arg(short = 'r', long = "restreamAddress")]
    pub restream_address: Option<String>,

    /// Pass-through restream destination port
    #[arg(short = 'o', long = "restreamPort", default_value_t = 0)]
    pub restream_port: u16,

    /// Video bitrate (Kb)
    #[arg(short = 'b', long = "h264EncodeBitrate", default_value_t = 2000)]
    pub video_bitrate_kbps: u32,

    /// Burn a clock overlay into the video
    #[arg(short = 't', long = "showTimer")]
    pub show_timer: bool,

    /// Receive over SRT instead of UDP
    #[arg(short = 's', long = "srtTransport")]
    pub srt_transport: bool,

    /// SRT mode (1=caller, 2=listener)
    #[arg(short = 'm', long = "srtMode", default_value_t = 2)]
    pub srt_mode: u32,

    /// Read a packaged MPEG-TS file instead of a network source
    #[arg(long = "file", conflicts_with = "srt_transport")]
    pub file: Option<PathBuf>,

    #[arg(long = "tsDemuxLatency", default_value_t = 0)]
    pub ts_demux_latency_ms: u32,

    #[arg(long = "jitterBufferLatency", default_value_t = 0)]
    pub jitter_buffer_latency_ms: u32,

    #[arg(long = "srtSourceLatency", default_value_t = 125)]
    pub srt_latency_ms: u32,

    #[arg(long = "stunServer", default_value = DEFAULT_STUN_SERVER)]
    pub stun_server: String,

    #[arg(long = "no-audio")]
    pub no_audio: bool,

    #[arg(long = "no-video")]
    pub no_video: bool,

    /// Forward Opus audio without transcoding
    #[arg(long = "bypass-audio")]
    pub bypass_audio: bool,

    /// Forward H.264 video without transcoding
    #[arg(long = "bypass-video")]
    pub bypass_video: bool,
}

impl Cli {
    /// Turn parsed flags into a validated [`Config`].
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let source_transport = match (self.file, self.srt_transport) {
            (Some(path), _) => SourceTransport::File(path),
            (None, true) => SourceTransport::Srt(SrtMode::from_number(self.srt_mode)?),
            (None, false) => SourceTransport::Udp,
        };

        let restream = self
            .restream_address
            .filter(|address| !address.is_empty())
            .map(|address| RestreamTarget { address, port: self.restream_port });

        let config = Config {
            whip_endpoint_url: self.whip_endpoint_url,
            whip_auth_key: self.whip_auth_key.filter(|key| !key.is_empty()),
            source_address: self.source_address,
            source_port: self.source_port,
            source_transport,
            source_queue_min_time: Duration::from_millis(self.source_queue_min_time_ms),
            restream,
            show_timer: self.show_timer,
            ts_demux_latency_ms: self.ts_demux_latency_ms,
            jitter_buffer_latency_ms: self.jitter_buffer_latency_ms,
            srt_latency_ms: self.srt_latency_ms,
            video_bitrate_kbps: self.video_bitrate_kbps,
            stun_server: self.stun_server,
            audio: !self.no_audio,
            video: !self.no_video,
            bypass_audio: self.bypass_audio,
            bypass_video: self.bypass_video,
        };
        config.validate()?;
        Ok(config)
    }
}
