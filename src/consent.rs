//! One-time legal notice acknowledgment.

use std::io::{self, BufRead, Write};

use crate::config::Preferences;
use crate::logging::log;

/// Legal text shown on first launch
pub const LEGAL_NOTICE: &str = "peerlaunch is a file sharing program. When you run a torrent, \
its data will be made available to others by means of upload. Any content you share is your \
sole responsibility.\n\nNo further notices will be issued.";

/// Presents the notice and collects a single yes/no answer
pub trait ConsentPrompt {
    /// Returns true only for the one affirmative answer
    fn confirm(&mut self, notice: &str) -> io::Result<bool>;
}

/// Terminal prompt: accepts `y` or `Y`, anything else (or EOF) declines
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsentPrompt for TerminalPrompt<R, W> {
    fn confirm(&mut self, notice: &str) -> io::Result<bool> {
        writeln!(self.output)?;
        writeln!(self.output, "*** Legal Notice ***")?;
        writeln!(self.output, "{}", notice)?;
        writeln!(self.output)?;
        writeln!(self.output, "Press 'y' key to accept and continue...")?;
        self.output.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(matches!(answer.chars().next(), Some('y') | Some('Y')))
    }
}

/// Consent gate over the persisted `accepted_legal` record
pub struct ConsentGate<'a> {
    preferences: &'a mut dyn Preferences,
}

impl<'a> ConsentGate<'a> {
    pub fn new(preferences: &'a mut dyn Preferences) -> Self {
        Self { preferences }
    }

    pub fn has_accepted(&self) -> bool {
        self.preferences.accepted_legal()
    }

    /// Shows the notice and records an affirmative answer
    ///
    /// Short-circuits to true without prompting when already accepted.
    /// A decline leaves the record untouched.
    pub fn prompt_and_record(&mut self, prompt: &mut dyn ConsentPrompt) -> io::Result<bool> {
        if self.has_accepted() {
            return Ok(true);
        }
        if !prompt.confirm(LEGAL_NOTICE)? {
            let _ = log("Legal notice declined");
            return Ok(false);
        }
        self.preferences.set_accepted_legal(true)?;
        let _ = log("Legal notice accepted");
        Ok(true)
    }

    /// Runs the gate for the current launch
    ///
    /// Non-interactive launches skip the prompt and count as accepted for
    /// this run only; nothing is persisted.
    pub fn check(&mut self, prompt: &mut dyn ConsentPrompt, interactive: bool) -> io::Result<bool> {
        if !interactive && !self.has_accepted() {
            let _ = log("No terminal attached, skipping legal notice prompt");
            return Ok(true);
        }
        self.prompt_and_record(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilePreferences;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn prefs() -> (tempfile::TempDir, FilePreferences) {
        let dir = tempdir().unwrap();
        let prefs = FilePreferences::load(dir.path().join("preferences.json")).unwrap();
        (dir, prefs)
    }

    #[test]
    fn test_terminal_prompt_answers() {
        for (input, expected) in [
            ("y\n", true),
            ("Y\n", true),
            ("yes\n", true),
            ("n\n", false),
            ("\n", false),
            ("", false),
        ] {
            let mut output = Vec::new();
            let mut prompt = TerminalPrompt::new(Cursor::new(input), &mut output);
            assert_eq!(prompt.confirm(LEGAL_NOTICE).unwrap(), expected, "{:?}", input);
            let shown = String::from_utf8(output).unwrap();
            assert!(shown.contains("Legal Notice"));
        }
    }

    #[test]
    fn test_accept_is_persisted_and_not_asked_again() {
        let (dir, mut prefs) = prefs();
        let mut output = Vec::new();
        let mut prompt = TerminalPrompt::new(Cursor::new("y\n"), &mut output);

        assert!(ConsentGate::new(&mut prefs)
            .prompt_and_record(&mut prompt)
            .unwrap());

        let mut reloaded = FilePreferences::load(dir.path().join("preferences.json")).unwrap();
        assert!(reloaded.accepted_legal());

        // Would decline if asked
        let mut silent = Vec::new();
        let mut prompt = TerminalPrompt::new(Cursor::new("n\n"), &mut silent);
        assert!(ConsentGate::new(&mut reloaded)
            .prompt_and_record(&mut prompt)
            .unwrap());
        assert!(silent.is_empty());
    }

    #[test]
    fn test_decline_leaves_record_unset() {
        let (_dir, mut prefs) = prefs();
        let mut output = Vec::new();
        let mut prompt = TerminalPrompt::new(Cursor::new("n\n"), &mut output);

        assert!(!ConsentGate::new(&mut prefs)
            .prompt_and_record(&mut prompt)
            .unwrap());
        assert!(!prefs.accepted_legal());
    }

    #[test]
    fn test_non_interactive_skips_without_persisting() {
        let (_dir, mut prefs) = prefs();
        let mut output = Vec::new();
        let mut prompt = TerminalPrompt::new(Cursor::new("n\n"), &mut output);

        assert!(ConsentGate::new(&mut prefs)
            .check(&mut prompt, false)
            .unwrap());
        assert!(output.is_empty());
        assert!(!prefs.accepted_legal());
    }
}
