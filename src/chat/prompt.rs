//! Interactive questions asked by command handlers.

use crate::store::Confirmed;

/// Reads answers from the user.
///
/// The binary implements this over `rustyline`; tests feed scripted answers.
pub trait Prompter {
    /// Ask one question.  `None` means the user cancelled (Ctrl+C or EOF).
    fn ask(&mut self, prompt: &str) -> Option<String>;

    /// Ask a yes/no question.  An empty answer takes `default`.
    fn confirm(&mut self, prompt: &str, default: bool) -> bool {
        let suffix = if default { "[Y/n]" } else { "[y/N]" };
        match self.ask(&format!("{prompt} {suffix}: ")) {
            Some(answer) if answer.trim().is_empty() => default,
            Some(answer) => Confirmed::from_answer(&answer).is_some(),
            None => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompter;
    use super::*;

    #[test]
    fn confirm_uses_default_on_empty_answer() {
        let mut prompter = ScriptedPrompter::new(["", ""]);
        assert!(prompter.confirm("Use it now?", true));
        assert!(!prompter.confirm("Replace?", false));
        assert_eq!(prompter.questions[0], "Use it now? [Y/n]: ");
        assert_eq!(prompter.questions[1], "Replace? [y/N]: ");
    }

    #[test]
    fn confirm_accepts_only_yes() {
        let mut prompter = ScriptedPrompter::new(["YES", "nope", "y"]);
        assert!(prompter.confirm("a", false));
        assert!(!prompter.confirm("b", true));
        assert!(prompter.confirm("c", false));
    }

    #[test]
    fn cancelled_confirm_is_no() {
        let mut prompter = ScriptedPrompter::default().cancel();
        assert!(!prompter.confirm("Replace?", true));
        assert_eq!(prompter.ask("again"), None);
    }
}
