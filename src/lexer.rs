//! Byte-stream lexer: turns a line of input into an ordered token sequence,
//! honoring quoting and escaping. A four-state FSM (default/single-quote/
//! double-quote/escape) drives tokenization into a tagged `Token` enum.

use crate::error::LexError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word { text: String, adjacent_next: bool },
    Semi,
    Pipe,
    Amp,
    Lt,
    Gt,
    GtGt,
    AndAnd,
    OrOr,
    /// `>&`, the prefix of an fd-duplication redirect (`2>&1`).
    GtAmp,
    /// `<<<`, the here-string operator.
    LtLtLt,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    SingleQuote,
    DoubleQuote,
    Escape,
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n')
}

fn is_operator(b: u8) -> bool {
    matches!(b, b';' | b'|' | b'&' | b'<' | b'>')
}

pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut state = State::Default;
    let mut escape_origin = State::Default;
    let mut i = 0usize;

    macro_rules! flush_word {
        ($adjacent_next:expr) => {
            if !buf.is_empty() {
                tokens.push(Token::Word {
                    text: String::from_utf8_lossy(&buf).into_owned(),
                    adjacent_next: $adjacent_next,
                });
                buf.clear();
            }
        };
    }

    loop {
        let c = bytes.get(i).copied();
        match state {
            State::Default => match c {
                None => {
                    flush_word!(false);
                    break;
                }
                Some(b'\'') => {
                    state = State::SingleQuote;
                    i += 1;
                }
                Some(b'"') => {
                    state = State::DoubleQuote;
                    i += 1;
                }
                Some(b'\\') => {
                    escape_origin = State::Default;
                    state = State::Escape;
                    i += 1;
                }
                Some(b) if is_whitespace(b) => {
                    flush_word!(false);
                    i += 1;
                }
                Some(b) if is_operator(b) => {
                    flush_word!(true);
                    let (tok, consumed) = match b {
                        b';' => (Token::Semi, 1),
                        b'|' => {
                            if bytes.get(i + 1) == Some(&b'|') {
                                (Token::OrOr, 2)
                            } else {
                                (Token::Pipe, 1)
                            }
                        }
                        b'&' => {
                            if bytes.get(i + 1) == Some(&b'&') {
                                (Token::AndAnd, 2)
                            } else {
                                (Token::Amp, 1)
                            }
                        }
                        b'<' => {
                            if bytes.get(i + 1) == Some(&b'<') && bytes.get(i + 2) == Some(&b'<') {
                                (Token::LtLtLt, 3)
                            } else {
                                (Token::Lt, 1)
                            }
                        }
                        b'>' => {
                            if bytes.get(i + 1) == Some(&b'&') {
                                (Token::GtAmp, 2)
                            } else if bytes.get(i + 1) == Some(&b'>') {
                                (Token::GtGt, 2)
                            } else {
                                (Token::Gt, 1)
                            }
                        }
                        _ => unreachable!(),
                    };
                    i += consumed;
                    tokens.push(tok);
                }
                Some(b) => {
                    buf.push(b);
                    i += 1;
                }
            },
            State::SingleQuote => match c {
                None => return Err(LexError::UnterminatedSingleQuote),
                Some(b'\'') => {
                    state = State::Default;
                    i += 1;
                }
                Some(b) => {
                    buf.push(b);
                    i += 1;
                }
            },
            State::DoubleQuote => match c {
                None => return Err(LexError::UnterminatedDoubleQuote),
                Some(b'"') => {
                    state = State::Default;
                    i += 1;
                }
                Some(b'\\') => {
                    escape_origin = State::DoubleQuote;
                    state = State::Escape;
                    i += 1;
                }
                Some(b) => {
                    buf.push(b);
                    i += 1;
                }
            },
            State::Escape => match c {
                None => return Err(LexError::UnterminatedEscape),
                Some(b) => {
                    match escape_origin {
                        State::DoubleQuote => {
                            if b == b'\\' || b == b'"' {
                                buf.push(b);
                            } else {
                                buf.push(b'\\');
                                buf.push(b);
                            }
                            state = State::DoubleQuote;
                        }
                        _ => {
                            buf.push(b);
                            state = State::Default;
                        }
                    }
                    i += 1;
                }
            },
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, adjacent_next: bool) -> Token {
        Token::Word {
            text: text.to_string(),
            adjacent_next,
        }
    }

    #[test]
    fn empty_input_is_empty_token_sequence() {
        assert_eq!(lex("").unwrap(), vec![]);
    }

    #[test]
    fn whitespace_only_is_empty_token_sequence() {
        assert_eq!(lex("   \t \n ").unwrap(), vec![]);
    }

    #[test]
    fn simple_command() {
        assert_eq!(
            lex("ls -l /tmp").unwrap(),
            vec![word("ls", false), word("-l", false), word("/tmp", false)]
        );
    }

    #[test]
    fn operators_are_recognized() {
        assert_eq!(
            lex("a;b|c&d<e>f").unwrap(),
            vec![
                word("a", true),
                Token::Semi,
                word("b", true),
                Token::Pipe,
                word("c", true),
                Token::Amp,
                word("d", true),
                Token::Lt,
                word("e", true),
                Token::Gt,
                word("f", false),
            ]
        );
    }

    #[test]
    fn double_char_operators_take_priority() {
        assert_eq!(
            lex("a && b || c >> d").unwrap(),
            vec![
                word("a", false),
                Token::AndAnd,
                word("b", false),
                Token::OrOr,
                word("c", false),
                Token::GtGt,
                word("d", false),
            ]
        );
    }

    #[test]
    fn adjacent_next_true_only_without_whitespace() {
        let toks = lex("2>file").unwrap();
        assert_eq!(toks[0], word("2", true));
        assert_eq!(toks[1], Token::Gt);
        let toks = lex("2 >file").unwrap();
        assert_eq!(toks[0], word("2", false));
    }

    #[test]
    fn single_quotes_preserve_everything_verbatim() {
        assert_eq!(
            lex("echo 'a  b\\nc'").unwrap(),
            vec![word("echo", false), word("a  b\\nc", false)]
        );
    }

    #[test]
    fn double_quotes_preserve_spaces_and_unescape_backslash_and_quote() {
        assert_eq!(
            lex(r#"echo "a \"b\" \\c  d""#).unwrap(),
            vec![word("echo", false), word(r#"a "b" \c  d"#, false)]
        );
    }

    #[test]
    fn double_quote_escape_of_other_bytes_preserves_backslash() {
        assert_eq!(lex(r#""\n""#).unwrap(), vec![word("\\n", false)]);
    }

    #[test]
    fn unquoted_backslash_escapes_next_byte_verbatim() {
        assert_eq!(
            lex("a\\ b").unwrap(),
            vec![word("a b", false)]
        );
    }

    #[test]
    fn adjacent_quotes_join_into_one_word() {
        assert_eq!(
            lex("foo\"bar\"'baz'").unwrap(),
            vec![word("foobarbaz", false)]
        );
    }

    #[test]
    fn unterminated_single_quote_errors() {
        assert_eq!(lex("echo 'unterminated").unwrap_err(), LexError::UnterminatedSingleQuote);
    }

    #[test]
    fn unterminated_double_quote_errors() {
        assert_eq!(lex("echo \"unterminated").unwrap_err(), LexError::UnterminatedDoubleQuote);
    }

    #[test]
    fn unterminated_escape_errors() {
        assert_eq!(lex("echo \\").unwrap_err(), LexError::UnterminatedEscape);
    }

    #[test]
    fn unterminated_escape_inside_double_quote_errors() {
        assert_eq!(lex("echo \"a\\").unwrap_err(), LexError::UnterminatedEscape);
    }

    #[test]
    fn fd_duplication_operator_is_a_single_token() {
        assert_eq!(
            lex("2>&1").unwrap(),
            vec![word("2", true), Token::GtAmp, word("1", false)]
        );
    }

    #[test]
    fn here_string_operator_is_a_single_token() {
        assert_eq!(
            lex("<<<text").unwrap(),
            vec![Token::LtLtLt, word("text", false)]
        );
    }

    #[test]
    fn here_string_does_not_swallow_a_plain_redirect() {
        assert_eq!(lex("<<file").unwrap(), vec![Token::Lt, Token::Lt, word("file", false)]);
    }
}
