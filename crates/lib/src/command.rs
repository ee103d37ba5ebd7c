//! Command routing: classify normalized message text into a bot command.
//!
//! Two grammars, selected by config and never fused: explicit !-prefixed
//! commands, or mention-addressed chat where any message starting with the
//! bot's own name (and any plain reply inside an existing thread) is a
//! threaded-chat trigger. Capability flags computed at startup gate each
//! command, so an unconfigured command reads as plain text.

use crate::config::CommandGrammar;
use regex::Regex;
use std::fmt;

/// What a command dispatches to; used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Complete,
    Chat,
    SearchChat,
    ThreadedChat,
    Image,
    Help,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandKind::Complete => "completion",
            CommandKind::Chat => "chat",
            CommandKind::SearchChat => "search chat",
            CommandKind::ThreadedChat => "threaded chat",
            CommandKind::Image => "image",
            CommandKind::Help => "help",
        };
        f.write_str(s)
    }
}

/// A classified command with its trimmed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Complete(String),
    Chat(String),
    SearchChat(String),
    ThreadedChat(String),
    Image(String),
    Help,
    None,
}

/// Which backends were configured at startup. Consulted by the router so a
/// command whose backend is disabled yields [`Command::None`], never an
/// error reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub completion: bool,
    pub chat: bool,
    pub search: bool,
    pub threaded: bool,
    pub image: bool,
}

/// Compiled command patterns plus the bot's own name for loop prevention
/// and mention matching. Built once; read-only afterwards.
pub struct CommandRouter {
    grammar: CommandGrammar,
    username: String,
    complete_re: Regex,
    chat_re: Regex,
    search_re: Regex,
    threaded_re: Regex,
    image_re: Regex,
    help_re: Regex,
}

impl CommandRouter {
    pub fn new(grammar: CommandGrammar, username: impl Into<String>) -> Self {
        // (?s) lets an argument span newlines; the capture is trimmed.
        Self {
            grammar,
            username: username.into(),
            complete_re: Regex::new(r"(?s)^\s*!gpt\s+(.+)$").unwrap(),
            chat_re: Regex::new(r"(?s)^\s*!chat\s+(.+)$").unwrap(),
            search_re: Regex::new(r"(?s)^\s*!bing\s+(.+)$").unwrap(),
            threaded_re: Regex::new(r"(?s)^\s*!bard\s+(.+)$").unwrap(),
            image_re: Regex::new(r"(?s)^\s*!pic\s+(.+)$").unwrap(),
            help_re: Regex::new(r"(?s)^\s*!help\s*.*$").unwrap(),
        }
    }

    /// True when the sender is the bot itself (Mattermost prefixes the
    /// sender name with `@`). Checked before classification to prevent
    /// reply loops.
    pub fn is_self(&self, sender_name: &str) -> bool {
        sender_name.trim().trim_start_matches('@') == self.username
    }

    /// Classify message text. `in_thread` is true when the post is a reply
    /// inside an existing thread (non-empty root id); the mention grammar
    /// treats such replies as threaded chat even without a leading mention.
    pub fn classify(&self, text: &str, caps: Capabilities, in_thread: bool) -> Command {
        match self.grammar {
            CommandGrammar::Prefix => self.classify_prefix(text, caps),
            CommandGrammar::Mention => self.classify_mention(text, caps, in_thread),
        }
    }

    fn classify_prefix(&self, text: &str, caps: Capabilities) -> Command {
        if caps.completion {
            if let Some(arg) = capture(&self.complete_re, text) {
                return Command::Complete(arg);
            }
        }
        if caps.chat {
            if let Some(arg) = capture(&self.chat_re, text) {
                return Command::Chat(arg);
            }
        }
        if caps.search {
            if let Some(arg) = capture(&self.search_re, text) {
                return Command::SearchChat(arg);
            }
        }
        if caps.threaded {
            if let Some(arg) = capture(&self.threaded_re, text) {
                return Command::ThreadedChat(arg);
            }
        }
        if caps.image {
            if let Some(arg) = capture(&self.image_re, text) {
                return Command::Image(arg);
            }
        }
        if self.help_re.is_match(text) {
            return Command::Help;
        }
        Command::None
    }

    fn classify_mention(&self, text: &str, caps: Capabilities, in_thread: bool) -> Command {
        if !caps.threaded {
            return Command::None;
        }
        let trimmed = text.trim_start();
        let mention = format!("@{}", self.username);
        if let Some(rest) = trimmed.strip_prefix(&mention) {
            // word boundary so "@matcha2" is not a mention of "matcha"
            if rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with(':') {
                let arg = rest.trim_start_matches(':').trim();
                if arg.is_empty() {
                    return Command::None;
                }
                return Command::ThreadedChat(arg.to_string());
            }
        }
        if in_thread {
            let arg = text.trim();
            if arg.is_empty() {
                return Command::None;
            }
            return Command::ThreadedChat(arg.to_string());
        }
        Command::None
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_caps() -> Capabilities {
        Capabilities {
            completion: true,
            chat: true,
            search: true,
            threaded: true,
            image: true,
        }
    }

    fn prefix_router() -> CommandRouter {
        CommandRouter::new(CommandGrammar::Prefix, "matcha")
    }

    #[test]
    fn prefix_commands_extract_trimmed_argument() {
        let r = prefix_router();
        assert_eq!(
            r.classify("!gpt what is 2+2", all_caps(), false),
            Command::Complete("what is 2+2".to_string())
        );
        assert_eq!(
            r.classify("  !chat   hello there  ", all_caps(), false),
            Command::Chat("hello there".to_string())
        );
        assert_eq!(
            r.classify("!bing latest rust release", all_caps(), false),
            Command::SearchChat("latest rust release".to_string())
        );
        assert_eq!(
            r.classify("!bard explain gravity", all_caps(), false),
            Command::ThreadedChat("explain gravity".to_string())
        );
        assert_eq!(
            r.classify("!pic a red fox", all_caps(), false),
            Command::Image("a red fox".to_string())
        );
    }

    #[test]
    fn multi_line_argument_is_kept() {
        let r = prefix_router();
        assert_eq!(
            r.classify("!gpt first line\nsecond line", all_caps(), false),
            Command::Complete("first line\nsecond line".to_string())
        );
    }

    #[test]
    fn help_matches_regardless_of_capabilities() {
        let r = prefix_router();
        assert_eq!(r.classify("  !help  ", Capabilities::default(), false), Command::Help);
        assert_eq!(r.classify("!help anything", all_caps(), false), Command::Help);
    }

    #[test]
    fn unrecognized_text_yields_none() {
        let r = prefix_router();
        assert_eq!(r.classify("just chatting", all_caps(), false), Command::None);
        assert_eq!(r.classify("!unknown foo", all_caps(), false), Command::None);
        // case-sensitive by contract
        assert_eq!(r.classify("!GPT hello", all_caps(), false), Command::None);
        // keyword without an argument
        assert_eq!(r.classify("!gpt", all_caps(), false), Command::None);
    }

    #[test]
    fn disabled_backend_reads_as_plain_text() {
        let r = prefix_router();
        let caps = Capabilities {
            threaded: false,
            ..all_caps()
        };
        assert_eq!(r.classify("!bard explain gravity", caps, false), Command::None);
    }

    #[test]
    fn self_authored_messages_are_detected() {
        let r = prefix_router();
        assert!(r.is_self("@matcha"));
        assert!(r.is_self("matcha"));
        assert!(!r.is_self("@alice"));
    }

    #[test]
    fn mention_grammar_strips_the_leading_mention() {
        let r = CommandRouter::new(CommandGrammar::Mention, "matcha");
        assert_eq!(
            r.classify("@matcha how are you", all_caps(), false),
            Command::ThreadedChat("how are you".to_string())
        );
        assert_eq!(
            r.classify("@matcha: hi", all_caps(), false),
            Command::ThreadedChat("hi".to_string())
        );
        // not our mention
        assert_eq!(r.classify("@matcha2 hi", all_caps(), false), Command::None);
        assert_eq!(r.classify("hello all", all_caps(), false), Command::None);
    }

    #[test]
    fn mention_grammar_ignores_prefix_commands() {
        let r = CommandRouter::new(CommandGrammar::Mention, "matcha");
        assert_eq!(r.classify("!gpt what is 2+2", all_caps(), false), Command::None);
    }

    #[test]
    fn mention_grammar_treats_thread_replies_as_chat() {
        let r = CommandRouter::new(CommandGrammar::Mention, "matcha");
        assert_eq!(
            r.classify("and a follow-up", all_caps(), true),
            Command::ThreadedChat("and a follow-up".to_string())
        );
        // no threaded backend configured: silent
        assert_eq!(
            r.classify("and a follow-up", Capabilities::default(), true),
            Command::None
        );
    }
}
