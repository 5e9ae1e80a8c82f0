//! Process configuration.
//!
//! Built once at startup (normally from the command line, see [`crate::cli`]),
//! validated, then lent by reference to the components that need it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default STUN server handed to the WebRTC sink.
pub const DEFAULT_STUN_SERVER: &str = "stun://stun.l.google.com:19302";

/// Errors that make a configuration unusable
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("WHIP endpoint URL is required")]
    MissingEndpoint,

    #[error("Invalid WHIP endpoint URL {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Source port is required for {0} sources")]
    MissingSourcePort(&'static str),

    #[error("Restream port is required when a restream address is set")]
    MissingRestreamPort,

    #[error("SRT mode must be 1 (caller) or 2 (listener), got {0}")]
    InvalidSrtMode(u32),

    #[error("Audio and video are both disabled, nothing to publish")]
    NothingToPublish,

    #[error("{field} is {value}, maximum is {max}")]
    OutOfRange { field: &'static str, value: u64, max: u64 },
}

/// Largest value a signed 32-bit engine property accepts
const MAX_INT_PROPERTY: u64 = i32::MAX as u64;

fn check_range(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::OutOfRange { field, value, max });
    }
    Ok(())
}

/// SRT connection role
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SrtMode {
    Caller,
    Listener,
}

impl SrtMode {
    /// Map the numeric mode used on the command line (1=caller, 2=listener).
    pub fn from_number(mode: u32) -> Result<Self, ConfigError> {
        match mode {
            1 => Ok(SrtMode::Caller),
            2 => Ok(SrtMode::Listener),
            other => Err(ConfigError::InvalidSrtMode(other)),
        }
    }

    /// Enum nick understood by the SRT elements
    pub fn nick(&self) -> &'static str {
        match self {
            SrtMode::Caller => "caller",
            SrtMode::Listener => "listener",
        }
    }
}

/// Where the multiplexed input comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceTransport {
    Udp,
    Srt(SrtMode),
    File(PathBuf),
}

impl SourceTransport {
    fn label(&self) -> &'static str {
        match self {
            SourceTransport::Udp => "udp",
            SourceTransport::Srt(_) => "srt",
            SourceTransport::File(_) => "file",
        }
    }

    pub fn is_network(&self) -> bool {
        !matches!(self, SourceTransport::File(_))
    }
}

/// Pass-through destination for the untouched multiplex
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestreamTarget {
    pub address: String,
    pub port: u16,
}

/// Complete process configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// WHIP endpoint URL (e.g., "http://localhost:8889/mystream/whip")
    pub whip_endpoint_url: String,
    /// Bearer token for the WHIP endpoint
    pub whip_auth_key: Option<String>,
    pub source_address: String,
    pub source_port: u16,
    pub source_transport: SourceTransport,
    /// Data the source queue holds before releasing anything downstream
    pub source_queue_min_time: Duration,
    pub restream: Option<RestreamTarget>,
    /// Burn a wall clock into the outgoing video
    pub show_timer: bool,
    pub ts_demux_latency_ms: u32,
    pub jitter_buffer_latency_ms: u32,
    pub srt_latency_ms: u32,
    pub video_bitrate_kbps: u32,
    pub stun_server: String,
    pub audio: bool,
    pub video: bool,
    pub bypass_audio: bool,
    pub bypass_video: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whip_endpoint_url: String::new(),
            whip_auth_key: None,
            source_address: "0.0.0.0".to_string(),
            source_port: 0,
            source_transport: SourceTransport::Udp,
            source_queue_min_time: Duration::ZERO,
            restream: None,
            show_timer: false,
            ts_demux_latency_ms: 0,
            jitter_buffer_latency_ms: 0,
            srt_latency_ms: 125,
            video_bitrate_kbps: 2000,
            stun_server: DEFAULT_STUN_SERVER.to_string(),
            audio: true,
            video: true,
            bypass_audio: false,
            bypass_video: false,
        }
    }
}

impl Config {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.whip_endpoint_url.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        url::Url::parse(&self.whip_endpoint_url).map_err(|e| ConfigError::InvalidEndpoint {
            url: self.whip_endpoint_url.clone(),
            reason: e.to_string(),
        })?;

        if self.source_transport.is_network() && self.source_port == 0 {
            return Err(ConfigError::MissingSourcePort(self.source_transport.label()));
        }

        if let Some(restream) = &self.restream {
            if restream.port == 0 {
                return Err(ConfigError::MissingRestreamPort);
            }
        }

        if !self.audio && !self.video {
            return Err(ConfigError::NothingToPublish);
        }

        // Encoder bitrate (bit/s) and demuxer/SRT latencies are signed ints
        check_range("videoBitrate", u64::from(self.video_bitrate_kbps), MAX_INT_PROPERTY / 1000)?;
        check_range("tsDemuxLatency", u64::from(self.ts_demux_latency_ms), MAX_INT_PROPERTY)?;
        check_range("srtLatency", u64::from(self.srt_latency_ms), MAX_INT_PROPERTY)?;

        Ok(())
    }

    /// Number of media kinds this run publishes (1 or 2).
    pub fn media_count(&self) -> usize {
        usize::from(self.audio) + usize::from(self.video)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "whipEndpointUrl: {}", self.whip_endpoint_url)?;
        writeln!(
            f,
            "whipEndpointAuthKey: {}",
            if self.whip_auth_key.is_some() { "set" } else { "unset" }
        )?;
        writeln!(f, "sourceAddress: {}", self.source_address)?;
        writeln!(f, "sourcePort: {}", self.source_port)?;
        match &self.source_transport {
            SourceTransport::Udp => writeln!(f, "sourceTransport: udp")?,
            SourceTransport::Srt(mode) => writeln!(f, "sourceTransport: srt ({})", mode.nick())?,
            SourceTransport::File(path) => writeln!(f, "sourceTransport: file ({})", path.display())?,
        }
        writeln!(f, "sourceQueueMinTime: {}", self.source_queue_min_time.as_millis())?;
        match &self.restream {
            Some(target) => writeln!(f, "restream: {}:{}", target.address, target.port)?,
            None => writeln!(f, "restream: unset")?,
        }
        writeln!(f, "videoBitrate: {}", self.video_bitrate_kbps)?;
        writeln!(f, "showTimer: {}", self.show_timer)?;
        writeln!(f, "tsDemuxLatency: {}", self.ts_demux_latency_ms)?;
        writeln!(f, "jitterBufferLatency: {}", self.jitter_buffer_latency_ms)?;
        writeln!(f, "srtLatency: {}", self.srt_latency_ms)?;
        writeln!(f, "stunServer: {}", self.stun_server)?;
        writeln!(f, "audio: {}", self.audio)?;
        writeln!(f, "video: {}", self.video)?;
        writeln!(f, "bypass audio: {}", self.bypass_audio)?;
        write!(f, "bypass video: {}", self.bypass_video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            whip_endpoint_url: "http://localhost:8889/live/whip".to_string(),
            source_port: 5000,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_validate_once_required_fields_set() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn test_missing_endpoint() {
        let config = Config { whip_endpoint_url: String::new(), ..valid() };
        assert_eq!(config.validate(), Err(ConfigError::MissingEndpoint));
    }

    #[test]
    fn test_unparsable_endpoint() {
        let config = Config { whip_endpoint_url: "not a url".to_string(), ..valid() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_network_source_needs_port() {
        let config = Config { source_port: 0, ..valid() };
        assert_eq!(config.validate(), Err(ConfigError::MissingSourcePort("udp")));

        let config = Config {
            source_port: 0,
            source_transport: SourceTransport::File(PathBuf::from("/tmp/in.ts")),
            ..valid()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_restream_needs_port() {
        let config = Config {
            restream: Some(RestreamTarget { address: "10.0.0.2".to_string(), port: 0 }),
            ..valid()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingRestreamPort));
    }

    #[test]
    fn test_nothing_to_publish() {
        let config = Config { audio: false, video: false, ..valid() };
        assert_eq!(config.validate(), Err(ConfigError::NothingToPublish));
        assert_eq!(Config { audio: false, ..valid() }.media_count(), 1);
    }

    #[test]
    fn test_engine_int_ranges() {
        let config = Config { video_bitrate_kbps: 2_147_483, ..valid() };
        assert_eq!(config.validate(), Ok(()));

        let config = Config { video_bitrate_kbps: 2_147_484, ..valid() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "videoBitrate", value: 2_147_484, max: 2_147_483 })
        );

        let config = Config { ts_demux_latency_ms: 1 << 31, ..valid() };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "tsDemuxLatency", .. })));

        let config = Config { srt_latency_ms: u32::MAX, ..valid() };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "srtLatency", .. })));
    }

    #[test]
    fn test_srt_mode_numbers() {
        assert_eq!(SrtMode::from_number(1), Ok(SrtMode::Caller));
        assert_eq!(SrtMode::from_number(2), Ok(SrtMode::Listener));
        assert_eq!(SrtMode::from_number(3), Err(ConfigError::InvalidSrtMode(3)));
    }

    #[test]
    fn test_display_hides_auth_key() {
        let config = Config { whip_auth_key: Some("secret-token".to_string()), ..valid() };
        let text = config.to_string();
        assert!(text.contains("whipEndpointAuthKey: set"));
        assert!(!text.contains("secret-token"));
        assert!(text.contains("restream: unset"));
    }
}
