use {
    std::{
        io::{self, ErrorKind, Write},
        path::Path,
        process::{Command, Stdio},
    },
    image::RgbImage,
    tracing::info,
    crate::error::{Error, Result},
};

pub const DEFAULT_FPS: u32 = 12;

pub trait VideoEncoder: Send + Sync {
    /// Writes `frames` in order to `output` at `fps` frames per second.
    fn encode(&self, frames: &[RgbImage], fps: u32, output: &Path) -> Result<()>;
}

/// H.264 encoding through an `ffmpeg` child process fed with raw `bgr24` frames.
pub struct FfmpegVideoEncoder {
    program: String,
}

impl FfmpegVideoEncoder {
    pub fn new(program: String) -> Self {
        Self {
            program,
        }
    }

    fn command(&self, width: u32, height: u32, fps: u32, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "bgr24"])
            .arg("-s:v")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .args(["-i", "-", "-an"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-f", "mp4"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        command
    }
}

impl VideoEncoder for FfmpegVideoEncoder {
    fn encode(&self, frames: &[RgbImage], fps: u32, output: &Path) -> Result<()> {
        let (width, height) = match frames.first() {
            Some(frame) => frame.dimensions(),
            None => return Err(Error::Video("no frames to encode".to_owned())),
        };
        if let Some(frame) = frames.iter().find(|frame| frame.dimensions() != (width, height)) {
            return Err(Error::Video(format!(
                "frame size mismatch: expected {}x{}, got {}x{}",
                width, height, frame.width(), frame.height()
            )));
        }

        let directory = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(directory)?;
        let staging = tempfile::Builder::new()
            .prefix(".video-")
            .suffix(".mp4")
            .tempfile_in(directory)?;

        let mut child = self.command(width, height, fps, staging.path())
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => Error::Video(format!("{} was not found on PATH", self.program)),
                _ => Error::Video(format!("failed to spawn {}: {}", self.program, err)),
            })?;

        let written = match child.stdin.take() {
            Some(mut stdin) => write_frames(&mut stdin, frames),
            None => Err(io::Error::new(ErrorKind::BrokenPipe, "failed to capture ffmpeg stdin")),
        };

        // wait even when writing failed so the child is reaped
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::Video(format!("ffmpeg failed with status {}", status)));
        }
        written?;

        staging.persist(output).map_err(|err| Error::Io(err.error))?;
        info!("wrote {} frames at {} fps to {:?}", frames.len(), fps, output);

        Ok(())
    }
}

fn write_frames(stdin: &mut impl Write, frames: &[RgbImage]) -> io::Result<()> {
    for frame in frames {
        stdin.write_all(&to_bgr(frame))?;
    }
    stdin.flush()
}

/// Raw pixel bytes with the red and blue channels swapped.
pub fn to_bgr(frame: &RgbImage) -> Vec<u8> {
    frame.pixels()
        .flat_map(|pixel| {
            let [r, g, b] = pixel.0;
            [b, g, r]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        image::Rgb,
        tempfile::tempdir,
    };

    #[test]
    fn channels_are_swapped_to_bgr() {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, Rgb([1, 2, 3]));
        frame.put_pixel(1, 0, Rgb([250, 0, 9]));

        assert_eq!(to_bgr(&frame), vec![3, 2, 1, 9, 0, 250]);
    }

    #[test]
    fn command_describes_raw_bgr_input_at_requested_rate() {
        let encoder = FfmpegVideoEncoder::new("ffmpeg".to_owned());
        let command = encoder.command(512, 256, DEFAULT_FPS, Path::new("out.mp4"));

        let args: Vec<_> = command.get_args().map(|arg| arg.to_string_lossy().to_string()).collect();
        let position = |flag: &str| args.iter().position(|arg| arg == flag).unwrap();

        assert_eq!(args[position("-pix_fmt") + 1], "bgr24");
        assert_eq!(args[position("-s:v") + 1], "512x256");
        assert_eq!(args[position("-r") + 1], "12");
        assert_eq!(args[position("-c:v") + 1], "libx264");
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn empty_frame_list_is_rejected() {
        let encoder = FfmpegVideoEncoder::new("ffmpeg".to_owned());
        let dir = tempdir().unwrap();

        assert!(matches!(encoder.encode(&[], 12, &dir.path().join("v.mp4")), Err(Error::Video(_))));
    }

    #[test]
    fn mismatched_frame_sizes_are_rejected() {
        let encoder = FfmpegVideoEncoder::new("ffmpeg".to_owned());
        let dir = tempdir().unwrap();
        let frames = [RgbImage::new(64, 64), RgbImage::new(64, 128)];

        assert!(matches!(encoder.encode(&frames, 12, &dir.path().join("v.mp4")), Err(Error::Video(_))));
    }

    #[cfg(unix)]
    #[test]
    fn encoder_exiting_early_reports_its_status() {
        let encoder = FfmpegVideoEncoder::new("false".to_owned());
        let dir = tempdir().unwrap();
        let output = dir.path().join("v.mp4");
        let frames = vec![RgbImage::new(1024, 1024); 4];

        let err = encoder.encode(&frames, 12, &output).unwrap_err();

        assert!(matches!(&err, Error::Video(message) if message.contains("ffmpeg failed with status")), "got {:?}", err);
        assert!(!output.exists());
    }

    #[test]
    fn missing_ffmpeg_binary_is_reported() {
        let encoder = FfmpegVideoEncoder::new("ffmpeg-binary-that-does-not-exist".to_owned());
        let dir = tempdir().unwrap();
        let output = dir.path().join("v.mp4");

        let err = encoder.encode(&[RgbImage::new(64, 64)], 12, &output).unwrap_err();

        assert!(err.to_string().contains("was not found"));
        assert!(!output.exists());
    }
}
