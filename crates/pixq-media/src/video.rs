//! H.264 re-encode for the single-stage encode job.

use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::fs_utils::{move_file, partial_path};

/// FFmpeg settings for video re-encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingConfig {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Kill FFmpeg after this long
    pub timeout: Option<Duration>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            timeout: None,
        }
    }
}

/// Build the FFmpeg command for a web-friendly MP4 re-encode.
pub fn encode_command(input: &Path, output: &Path, encoding: &EncodingConfig) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_codec(&encoding.codec)
        .preset(&encoding.preset)
        .crf(encoding.crf)
        .output_args(["-pix_fmt", "yuv420p"])
        .audio_codec(&encoding.audio_codec)
        .audio_bitrate(&encoding.audio_bitrate)
        .output_args(["-movflags", "+faststart"])
        .format("mp4")
}

/// Re-encode `input` to `output`.
///
/// FFmpeg writes a hidden sibling first; the finished file is moved into place.
pub async fn encode_video(input: &Path, output: &Path, encoding: &EncodingConfig) -> MediaResult<()> {
    let partial = partial_path(output);
    if let Some(parent) = partial.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut runner = FfmpegRunner::new();
    if let Some(timeout) = encoding.timeout {
        runner = runner.with_timeout(timeout);
    }

    let cmd = encode_command(input, &partial, encoding);
    if let Err(e) = runner.run(&cmd).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    move_file(&partial, output).await?;
    info!("Encoded {} -> {}", input.display(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command_targets_partial_mp4() {
        let output = Path::new("/work/clip-abc.mp4");
        let cmd = encode_command(Path::new("/work/clip.mov"), &partial_path(output), &EncodingConfig::default());
        let args = cmd.build_args();

        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libx264"));
        assert!(args.windows(2).any(|w| w[0] == "-movflags" && w[1] == "+faststart"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "mp4"));
        assert_eq!(args.last().unwrap(), "/work/.clip-abc.mp4.partial");
    }
}
