//! Spoken feedback backends.

use crate::config::Config;
use std::path::Path;
use std::process::{Command, Stdio};

/// Something that can say a line of text. Calls block until playback ends.
pub trait Speaker: Send {
    fn speak(&self, text: &str) -> std::io::Result<()>;
}

/// Runs an external TTS program as `<program> -s <rate> <text>`.
pub struct CommandSpeaker {
    program: String,
    rate: u32,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>, rate: u32) -> Self {
        Self {
            program: program.into(),
            rate,
        }
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str) -> std::io::Result<()> {
        let status = Command::new(&self.program)
            .arg("-s")
            .arg(self.rate.to_string())
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            tracing::warn!(program = %self.program, %status, "speech program failed");
        }
        Ok(())
    }
}

/// Prints the text instead of speaking it.
pub struct ConsoleSpeaker;

impl Speaker for ConsoleSpeaker {
    fn speak(&self, text: &str) -> std::io::Result<()> {
        println!("🔊 {text}");
        Ok(())
    }
}

/// Resolve `program` against `$PATH` (or as a path if it contains a slash).
pub fn find_program(program: &str) -> Option<std::path::PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Speech program from config if audio is on and the program exists,
/// otherwise the console.
pub fn speaker_from_config(config: &Config) -> Box<dyn Speaker> {
    if !config.audio_enabled {
        tracing::info!("audio disabled; announcements are printed");
        return Box::new(ConsoleSpeaker);
    }
    match find_program(&config.speech_command) {
        Some(path) => {
            tracing::info!(program = %path.display(), rate = config.speech_rate, "speech enabled");
            Box::new(CommandSpeaker::new(config.speech_command.clone(), config.speech_rate))
        }
        None => {
            tracing::warn!(
                program = %config.speech_command,
                "speech program not found on PATH; announcements are printed"
            );
            Box::new(ConsoleSpeaker)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Speaker;
    use std::sync::{Arc, Mutex};

    /// Records every line it is asked to say.
    #[derive(Clone, Default)]
    pub struct RecordingSpeaker {
        pub said: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSpeaker {
        pub fn lines(&self) -> Vec<String> {
            self.said.lock().unwrap().clone()
        }
    }

    impl Speaker for RecordingSpeaker {
        fn speak(&self, text: &str) -> std::io::Result<()> {
            self.said.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }
}
