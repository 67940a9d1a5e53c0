//! Recognition through a sidecar process
//!
//! One sidecar per recognition stream. It reports JSON lines on stdout
//! (`start`, `result`, `error`, `end`) and accepts `stop` on stdin.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::voice::{
    RecognitionControl, RecognitionEvent, RecognitionOptions, RecognitionStream, SpeechRecognizer,
    VoiceError,
};

pub struct SidecarRecognizer {
    command: Vec<String>,
}

impl SidecarRecognizer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl SpeechRecognizer for SidecarRecognizer {
    async fn start(&self, options: &RecognitionOptions) -> Result<RecognitionStream, VoiceError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| VoiceError::EngineUnavailable("empty recognizer command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .env("VOICE_LOOP_LANGUAGE", &options.language)
            .env("VOICE_LOOP_CONTINUOUS", flag(options.continuous))
            .env("VOICE_LOOP_INTERIM_RESULTS", flag(options.interim_results))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    VoiceError::EngineUnavailable(format!("recognizer {} not found", program))
                }
                _ => VoiceError::Io(e),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| {
                VoiceError::EngineUnavailable("recognizer stdout unavailable".to_string())
            })?;
        let stdin = child.stdin.take();

        let (tx, events) = mpsc::unbounded_channel();
        tokio::spawn(read_events(stdout, tx));

        info!(program = %program, language = %options.language, "recognition sidecar started");
        Ok(RecognitionStream {
            events,
            control: Box::new(SidecarControl { child, stdin }),
        })
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "1"
    } else {
        "0"
    }
}

/// Parse one stdout line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<RecognitionEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

async fn read_events(stdout: ChildStdout, tx: mpsc::UnboundedSender<RecognitionEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(event)) => {
                    let end = event == RecognitionEvent::End;
                    if tx.send(event).is_err() || end {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%e, line = %line, "malformed sidecar line skipped"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(?e, "sidecar read failed");
                break;
            }
        }
    }
    debug!("sidecar stdout closed");
    let _ = tx.send(RecognitionEvent::End);
}

struct SidecarControl {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl RecognitionControl for SidecarControl {
    fn stop(&mut self) {
        let Some(mut stdin) = self.stdin.take() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(b"stop\n").await {
                warn!(?e, "failed to ask sidecar to stop");
                return;
            }
            let _ = stdin.flush().await;
        });
    }

    fn abort(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.start_kill() {
            debug!(?e, "sidecar already exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{Fragment, RecognitionErrorCode};

    fn sidecar(script: &str) -> SidecarRecognizer {
        SidecarRecognizer::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(parse_line(r#"{"type":"start"}"#).unwrap(), Some(RecognitionEvent::Start));
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(
            parse_line(r#"{"type":"result","fragments":[{"text":"hi","is_final":true}]}"#).unwrap(),
            Some(RecognitionEvent::Result {
                fragments: vec![Fragment::final_text("hi")]
            })
        );
        assert_eq!(
            parse_line(r#"{"type":"error","code":"network"}"#).unwrap(),
            Some(RecognitionEvent::Error {
                code: RecognitionErrorCode::Network,
                message: String::new()
            })
        );
        assert!(parse_line("not json").is_err());
    }

    #[tokio::test]
    async fn test_stop_is_graceful() {
        let script = r#"
            echo '{"type":"start"}'
            echo 'garbage'
            echo '{"type":"result","fragments":[{"text":"hello","is_final":true}]}'
            read cmd
            echo '{"type":"result","fragments":[{"text":"there","is_final":true}]}'
            echo '{"type":"end"}'
        "#;
        let mut stream = sidecar(script).start(&RecognitionOptions::new("en-US")).await.unwrap();

        assert_eq!(stream.events.recv().await, Some(RecognitionEvent::Start));
        assert!(matches!(stream.events.recv().await, Some(RecognitionEvent::Result { .. })));

        stream.control.stop();
        match stream.events.recv().await {
            Some(RecognitionEvent::Result { fragments }) => assert_eq!(fragments[0].text, "there"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stream.events.recv().await, Some(RecognitionEvent::End));
        assert_eq!(stream.events.recv().await, None);
    }

    #[tokio::test]
    async fn test_exit_without_end_reports_end() {
        let mut stream = sidecar(r#"echo '{"type":"start"}'"#)
            .start(&RecognitionOptions::new("en-US"))
            .await
            .unwrap();
        assert_eq!(stream.events.recv().await, Some(RecognitionEvent::Start));
        assert_eq!(stream.events.recv().await, Some(RecognitionEvent::End));
    }

    #[tokio::test]
    async fn test_abort_kills_sidecar() {
        let mut stream = sidecar(r#"echo '{"type":"start"}'; exec sleep 30"#)
            .start(&RecognitionOptions::new("en-US"))
            .await
            .unwrap();
        assert_eq!(stream.events.recv().await, Some(RecognitionEvent::Start));
        stream.control.abort();
        assert_eq!(stream.events.recv().await, Some(RecognitionEvent::End));
    }

    #[tokio::test]
    async fn test_language_is_passed_to_sidecar() {
        let script = r#"printf '{"type":"error","code":"language-not-supported","message":"%s"}\n' "$VOICE_LOOP_LANGUAGE""#;
        let mut stream = sidecar(script)
            .start(&RecognitionOptions::new("de-DE"))
            .await
            .unwrap();
        match stream.events.recv().await {
            Some(RecognitionEvent::Error { code, message }) => {
                assert_eq!(code, RecognitionErrorCode::LanguageNotSupported);
                assert_eq!(message, "de-DE");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_unavailable() {
        let recognizer = SidecarRecognizer::new(vec!["voice-loop-no-such-sidecar".to_string()]);
        let err = recognizer.start(&RecognitionOptions::new("en-US")).await.err().unwrap();
        assert!(matches!(err, VoiceError::EngineUnavailable(_)));
    }
}
