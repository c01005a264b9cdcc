//! Slash-command grammar for the interactive loop.

use std::path::PathBuf;

/// One line of learner input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Attach an image file.
    Image(PathBuf),
    /// Run mistake detection on the current image.
    Detect,
    /// Draw an annotation box between two corners (percent of the page).
    Box {
        /// First corner x.
        x1: f64,
        /// First corner y.
        y1: f64,
        /// Opposite corner x.
        x2: f64,
        /// Opposite corner y.
        y2: f64,
    },
    /// List annotation boxes.
    Boxes,
    /// Remove the most recent box.
    Undo,
    /// Remove the n-th box (1-based).
    Unbox(usize),
    /// Remove every box.
    ClearBoxes,
    /// Diagnose a question, optionally with the learner's answer.
    Diagnose {
        /// Question text.
        question: String,
        /// What the learner answered.
        answer: Option<String>,
    },
    /// Recognize a question image in the background.
    Recognize(PathBuf),
    /// Save and start a fresh conversation.
    New,
    /// List saved conversations and analyses.
    History,
    /// Print the learning summary.
    Summary,
    /// Write the conversation to a Markdown file.
    Export(PathBuf),
    /// Print session state.
    Status,
    /// Print the command list.
    Help,
    /// Save and exit.
    Quit,
    /// Anything else goes to the session.
    Submit(String),
}

/// Text printed by `/help`.
pub const HELP: &str = "\
Commands:
  /image <path>                 attach an exam page or question picture
  /detect                       find marked mistakes on the current image
  /box <x1> <y1> <x2> <y2>      mark a region (percent of the page)
  /boxes                        list marked regions
  /undo                         remove the last region
  /unbox <n>                    remove region n
  /clearboxes                   remove every region
  /diagnose <question> | <answer>
                                diagnose a mistake and start guidance
  /recognize <path>             recognize a question picture in the background
  /new                          save and start a new conversation
  /history                      list saved conversations and analyses
  /summary                      show the learning summary
  /export <file>                write the conversation as Markdown
  /status                       show session state
  /quit                         save and exit
Anything else is sent to the tutor. An empty line after /image runs detection.";

impl Command {
    /// Parses one input line. Errors carry a usage hint.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Submit(line.to_string()));
        };

        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));

        match name {
            "image" => required(arg, "/image <path>").map(|p| Self::Image(PathBuf::from(p))),
            "detect" => Ok(Self::Detect),
            "box" => parse_box(arg),
            "boxes" => Ok(Self::Boxes),
            "undo" => Ok(Self::Undo),
            "unbox" => arg
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Self::Unbox)
                .ok_or_else(|| "usage: /unbox <n> (n starts at 1)".to_string()),
            "clearboxes" => Ok(Self::ClearBoxes),
            "diagnose" => parse_diagnose(arg),
            "recognize" => {
                required(arg, "/recognize <path>").map(|p| Self::Recognize(PathBuf::from(p)))
            }
            "new" => Ok(Self::New),
            "history" => Ok(Self::History),
            "summary" => Ok(Self::Summary),
            "export" => required(arg, "/export <file>").map(|p| Self::Export(PathBuf::from(p))),
            "status" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("unknown command '/{other}', try /help")),
        }
    }
}

fn required<'a>(arg: &'a str, usage: &str) -> Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(arg)
    }
}

fn parse_box(arg: &str) -> Result<Command, String> {
    let usage = || "usage: /box <x1> <y1> <x2> <y2>".to_string();
    let numbers: Vec<f64> = arg
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| usage())?;
    match numbers.as_slice() {
        &[x1, y1, x2, y2] => Ok(Command::Box { x1, y1, x2, y2 }),
        _ => Err(usage()),
    }
}

fn parse_diagnose(arg: &str) -> Result<Command, String> {
    let (question, answer) = arg
        .split_once('|')
        .map_or((arg, None), |(q, a)| (q, Some(a.trim())));
    let question = required(question.trim(), "/diagnose <question> | <answer>")?;
    Ok(Command::Diagnose {
        question: question.to_string(),
        answer: answer.filter(|a| !a.is_empty()).map(ToString::to_string),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_submitted() {
        assert_eq!(
            Command::parse("  全部 ").unwrap(),
            Command::Submit("全部".to_string())
        );
        assert_eq!(Command::parse("").unwrap(), Command::Submit(String::new()));
    }

    #[test]
    fn test_image_path_keeps_spaces() {
        assert_eq!(
            Command::parse("/image my scans/page 1.png").unwrap(),
            Command::Image(PathBuf::from("my scans/page 1.png"))
        );
        assert!(Command::parse("/image").is_err());
    }

    #[test]
    fn test_box() {
        assert_eq!(
            Command::parse("/box 10 20 30.5 40").unwrap(),
            Command::Box {
                x1: 10.0,
                y1: 20.0,
                x2: 30.5,
                y2: 40.0
            }
        );
        assert!(Command::parse("/box 1 2 3").is_err());
        assert!(Command::parse("/box a b c d").is_err());
    }

    #[test]
    fn test_unbox_rejects_zero() {
        assert_eq!(Command::parse("/unbox 2").unwrap(), Command::Unbox(2));
        assert!(Command::parse("/unbox 0").is_err());
    }

    #[test]
    fn test_diagnose() {
        assert_eq!(
            Command::parse("/diagnose 1/2 + 1/3 = ? | 2/5").unwrap(),
            Command::Diagnose {
                question: "1/2 + 1/3 = ?".to_string(),
                answer: Some("2/5".to_string()),
            }
        );
        assert_eq!(
            Command::parse("/diagnose 3x = 9").unwrap(),
            Command::Diagnose {
                question: "3x = 9".to_string(),
                answer: None,
            }
        );
        assert!(Command::parse("/diagnose | 2").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::parse("/frobnicate").unwrap_err();
        assert!(err.contains("/help"));
    }

    #[test]
    fn test_quit_aliases() {
        for line in ["/quit", "/exit", "/q"] {
            assert_eq!(Command::parse(line).unwrap(), Command::Quit);
        }
    }
}
