//! Turns a finished line into a [`CommandDescriptor`], and locates the word under the
//! cursor for completion.

use crate::alias::AliasTable;
use crate::env::Environment;
use crate::error::ParseError;
use crate::lexer;

pub use crate::lexer::{OpenQuote, Redirect, Stream};

/// A parsed command: its words and an optional output redirection.
///
/// An empty `tokens` list means there is nothing to run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandDescriptor {
    pub tokens: Vec<String>,
    pub redirect: Option<Redirect>,
}

impl CommandDescriptor {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Command name followed by its arguments, if any word was found.
    pub fn split_first(&self) -> Option<(&str, Vec<&str>)> {
        let (name, args) = self.tokens.split_first()?;
        Some((name.as_str(), args.iter().map(String::as_str).collect()))
    }
}

/// Parses `line` after trimming it and expanding an alias in command position.
pub fn parse(
    line: &str,
    aliases: &AliasTable,
    env: &Environment,
) -> Result<CommandDescriptor, ParseError> {
    let expanded = aliases.expand(line.trim());
    let scan = lexer::scan(expanded.trim(), env)?;
    Ok(CommandDescriptor {
        tokens: scan.words.into_iter().map(|w| w.text).collect(),
        redirect: scan.redirect,
    })
}

/// The word the cursor is in, as seen by Tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAt {
    /// Quote-resolved text of the word.
    pub text: String,
    /// Character range of the raw word in the line.
    pub start: usize,
    pub end: usize,
    /// No other word ends before this one.
    pub is_command: bool,
    /// The quote the word sits inside, when it was never closed.
    pub open_quote: Option<OpenQuote>,
}

/// Finds the word that contains `cursor` (or ends right at it).
///
/// The line is scanned leniently so a half-typed quote or redirection still yields a
/// word. When the cursor is between words, an empty word at the cursor is returned.
pub fn token_at(line: &[char], cursor: usize, env: &Environment) -> TokenAt {
    let text: String = line.iter().collect();
    let scan = lexer::scan_lenient(&text, env);
    let last = scan.words.len().saturating_sub(1);

    for (i, word) in scan.words.iter().enumerate() {
        if word.span.start <= cursor && cursor <= word.span.end {
            return TokenAt {
                text: word.text.clone(),
                start: word.span.start,
                end: word.span.end,
                is_command: i == 0,
                open_quote: if i == last { scan.open_quote } else { None },
            };
        }
    }

    if let Some(span) = scan.redirect_span.clone() {
        if span.start <= cursor && cursor <= span.end {
            let target = scan.redirect.map(|r| r.target).unwrap_or_default();
            return TokenAt {
                text: target,
                start: span.start,
                end: span.end,
                is_command: false,
                open_quote: None,
            };
        }
    }

    TokenAt {
        text: String::new(),
        start: cursor,
        end: cursor,
        is_command: !scan.words.iter().any(|w| w.span.end <= cursor),
        open_quote: scan.open_quote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut env = Environment::empty("/");
        env.set_var("HOME", "/home/ann");
        env
    }

    fn tokens(line: &str) -> Vec<String> {
        parse(line, &AliasTable::new(), &env()).unwrap().tokens
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_parses_plain_command() {
        assert_eq!(tokens("echo Hello, World!"), vec!["echo", "Hello,", "World!"]);
        assert_eq!(tokens("   "), Vec::<String>::new());
    }

    #[test]
    fn test_single_quotes_keep_inner_spaces() {
        assert_eq!(tokens("echo 'a b'"), vec!["echo", "a b"]);
        assert_eq!(tokens("echo 'a  b'"), vec!["echo", "a  b"]);
    }

    #[test]
    fn test_double_quote_escapes() {
        assert_eq!(tokens(r#"echo "a\"b""#), vec!["echo", "a\"b"]);
        assert_eq!(tokens(r#"echo "a\\b""#), vec!["echo", r"a\b"]);
        assert_eq!(tokens(r#"echo "a\ b""#), vec!["echo", r"a\ b"]);
    }

    #[test]
    fn test_unterminated_quotes_are_errors() {
        let aliases = AliasTable::new();
        assert_eq!(
            parse("echo 'a", &aliases, &env()),
            Err(ParseError::UnterminatedSingleQuote)
        );
        assert_eq!(
            parse("echo \"a", &aliases, &env()),
            Err(ParseError::UnterminatedDoubleQuote)
        );
    }

    #[test]
    fn test_parses_redirections() {
        let aliases = AliasTable::new();

        let cmd = parse("echo hi > out.txt", &aliases, &env()).unwrap();
        assert_eq!(cmd.tokens, vec!["echo", "hi"]);
        assert_eq!(
            cmd.redirect,
            Some(Redirect {
                target: "out.txt".into(),
                stream: Stream::Stdout,
                truncate: true,
            })
        );

        let cmd = parse("ls x 2>> err.txt", &aliases, &env()).unwrap();
        assert_eq!(cmd.tokens, vec!["ls", "x"]);
        let redirect = cmd.redirect.unwrap();
        assert_eq!(redirect.stream, Stream::Stderr);
        assert!(!redirect.truncate);

        let cmd = parse("cat file 2> err.log", &aliases, &env()).unwrap();
        assert_eq!(cmd.tokens, vec!["cat", "file"]);
        assert_eq!(cmd.redirect.unwrap().target, "err.log");
    }

    #[test]
    fn test_expands_aliases_before_scanning() {
        let mut aliases = AliasTable::new();
        aliases.set("ls", "ls -F");
        aliases.set("greet", "echo 'hello  there'");

        let cmd = parse("  ls /tmp  ", &aliases, &env()).unwrap();
        assert_eq!(cmd.tokens, vec!["ls", "-F", "/tmp"]);

        let cmd = parse("greet > x", &aliases, &env()).unwrap();
        assert_eq!(cmd.tokens, vec!["echo", "hello  there"]);
        assert_eq!(cmd.redirect.unwrap().target, "x");
    }

    #[test]
    fn test_split_first_gives_name_and_args() {
        let cmd = parse("cd /tmp", &AliasTable::new(), &env()).unwrap();
        assert_eq!(cmd.split_first(), Some(("cd", vec!["/tmp"])));
        assert_eq!(CommandDescriptor::default().split_first(), None);
    }

    #[test]
    fn test_token_at_command_position() {
        let line = chars("ec");
        let token = token_at(&line, 2, &env());
        assert_eq!(token.text, "ec");
        assert_eq!((token.start, token.end), (0, 2));
        assert!(token.is_command);
    }

    #[test]
    fn test_token_at_argument_and_middle_of_word() {
        let line = chars("cat sr/ma other");
        let token = token_at(&line, 6, &env());
        assert_eq!(token.text, "sr/ma");
        assert_eq!((token.start, token.end), (4, 9));
        assert!(!token.is_command);
    }

    #[test]
    fn test_token_at_between_words_is_empty() {
        let line = chars("cat  ");
        let token = token_at(&line, 5, &env());
        assert_eq!(token.text, "");
        assert_eq!((token.start, token.end), (5, 5));
        assert!(!token.is_command);

        let token = token_at(&[], 0, &env());
        assert!(token.is_command);
    }

    #[test]
    fn test_token_at_open_quote() {
        let line = chars("cat 'my fi");
        let token = token_at(&line, 10, &env());
        assert_eq!(token.text, "my fi");
        assert_eq!(token.open_quote, Some(OpenQuote::Single));
    }

    #[test]
    fn test_token_at_redirect_target() {
        let line = chars("echo hi > ou");
        let token = token_at(&line, 12, &env());
        assert_eq!(token.text, "ou");
        assert_eq!((token.start, token.end), (10, 12));
        assert!(!token.is_command);
    }

    #[test]
    fn test_token_at_keeps_tilde_unexpanded() {
        let line = chars("cd ~/sr");
        let token = token_at(&line, 7, &env());
        assert_eq!(token.text, "~/sr");
    }
}
