//! Session description for the RTP streams an SFU forwards to a worker.
//!
//! The SFU re-sends publisher media unchanged, so the payload types here must
//! match what the capture client negotiates: Opus on 111, VP8 on 100.

use thiserror::Error;

pub const AUDIO_PAYLOAD_TYPE: u8 = 111;
pub const VIDEO_PAYLOAD_TYPE: u8 = 100;
pub const FORWARD_HOST: &str = "127.0.0.1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    #[error("invalid {media} port: {port}")]
    InvalidPort { media: &'static str, port: u16 },
    #[error("audio and video cannot share port {0}")]
    SharedPort(u16),
}

/// Build the SDP describing inbound audio on `audio_port` and video on
/// `video_port`, both on the loopback interface.
pub fn synthesize(audio_port: u16, video_port: u16) -> Result<String, SdpError> {
    if audio_port == 0 {
        return Err(SdpError::InvalidPort {
            media: "audio",
            port: audio_port,
        });
    }
    if video_port == 0 {
        return Err(SdpError::InvalidPort {
            media: "video",
            port: video_port,
        });
    }
    if audio_port == video_port {
        return Err(SdpError::SharedPort(audio_port));
    }

    Ok(format!(
        "v=0\n\
         o=- 0 0 IN IP4 {host}\n\
         s=Janus RTP Forward\n\
         c=IN IP4 {host}\n\
         t=0 0\n\
         m=audio {audio_port} RTP/AVP {apt}\n\
         a=rtpmap:{apt} opus/48000/2\n\
         m=video {video_port} RTP/AVP {vpt}\n\
         a=rtpmap:{vpt} VP8/90000\n",
        host = FORWARD_HOST,
        apt = AUDIO_PAYLOAD_TYPE,
        vpt = VIDEO_PAYLOAD_TYPE,
    ))
}
