//! Recursive-descent parser: token sequence to AST, attaching redirections
//! to command leaves. Precedence climbs seq -> and/or -> pipe -> command,
//! with the `N>`/`N<` fd-prefix attached to the nearest command.

use crate::error::ParseError;
use crate::lexer::{self, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirKind {
    In,
    Out,
    Append,
    /// `>&N` / `N>&M`: duplicate fd `N` onto `fd` instead of opening a file.
    Dup(i32),
    /// `<<<word`: feed `path` (the literal word text plus a trailing
    /// newline) to `fd` as if it came from a file.
    HereString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redir {
    pub fd: i32,
    pub kind: RedirKind,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ast {
    Seq(Vec<Ast>),
    Bg(Box<Ast>),
    Pipe(Vec<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Cmd { argv: Vec<String>, redirs: Vec<Redir> },
}

pub fn parse_line(input: &str) -> Result<Ast, ParseError> {
    let tokens = lexer::lex(input)?;
    if tokens.is_empty() {
        return Ok(Ast::Seq(vec![Ast::Cmd {
            argv: Vec::new(),
            redirs: Vec::new(),
        }]));
    }
    let mut cursor = Cursor::new(&tokens);
    let ast = parse_seq(&mut cursor)?;
    if !cursor.at_end() {
        return Err(ParseError::UnexpectedToken);
    }
    Ok(ast)
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Cursor { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

fn is_separator(t: &Token) -> bool {
    matches!(t, Token::Semi | Token::Amp)
}

fn wrap_bg(node: Ast) -> Result<Ast, ParseError> {
    match node {
        Ast::Cmd { .. } | Ast::Pipe(_) => Ok(Ast::Bg(Box::new(node))),
        _ => Err(ParseError::BackgroundControlNode),
    }
}

fn parse_seq(c: &mut Cursor) -> Result<Ast, ParseError> {
    let mut children = Vec::new();
    loop {
        let node = parse_andor(c)?;
        match c.peek() {
            Some(Token::Semi) => {
                c.advance();
                children.push(node);
                if c.at_end() {
                    break;
                }
                if matches!(c.peek(), Some(t) if is_separator(t)) {
                    return Err(ParseError::EmptySegment);
                }
            }
            Some(Token::Amp) => {
                c.advance();
                children.push(wrap_bg(node)?);
                if c.at_end() {
                    break;
                }
                if matches!(c.peek(), Some(t) if is_separator(t)) {
                    return Err(ParseError::EmptySegment);
                }
            }
            None => {
                children.push(node);
                break;
            }
            Some(_) => return Err(ParseError::UnexpectedToken),
        }
    }
    Ok(Ast::Seq(children))
}

fn parse_andor(c: &mut Cursor) -> Result<Ast, ParseError> {
    let mut left = parse_pipe(c)?;
    loop {
        match c.peek() {
            Some(Token::AndAnd) => {
                c.advance();
                let right = parse_pipe(c)?;
                left = Ast::And(Box::new(left), Box::new(right));
            }
            Some(Token::OrOr) => {
                c.advance();
                let right = parse_pipe(c)?;
                left = Ast::Or(Box::new(left), Box::new(right));
            }
            _ => break,
        }
    }
    Ok(left)
}

fn parse_pipe(c: &mut Cursor) -> Result<Ast, ParseError> {
    let mut stages = vec![parse_cmd(c)?];
    while matches!(c.peek(), Some(Token::Pipe)) {
        c.advance();
        if matches!(c.peek(), None | Some(Token::Semi | Token::Amp | Token::Pipe)) {
            return Err(ParseError::MissingPipelineOperand);
        }
        stages.push(parse_cmd(c)?);
    }
    if stages.len() == 1 {
        Ok(stages.pop().unwrap())
    } else {
        Ok(Ast::Pipe(stages))
    }
}

fn is_redir_op(t: &Token) -> bool {
    matches!(t, Token::Lt | Token::Gt | Token::GtGt | Token::GtAmp | Token::LtLtLt)
}

fn parse_cmd(c: &mut Cursor) -> Result<Ast, ParseError> {
    let mut argv = Vec::new();
    let mut redirs = Vec::new();

    if matches!(c.peek(), None | Some(Token::Pipe)) {
        return Err(ParseError::MissingPipelineOperand);
    }
    if matches!(c.peek(), Some(t) if is_separator(t)) {
        return Err(ParseError::EmptySegment);
    }

    loop {
        match c.peek() {
            Some(Token::Word { text, adjacent_next }) => {
                let (text, adjacent_next) = (text.clone(), *adjacent_next);
                if adjacent_next
                    && matches!(c.peek_at(1), Some(t) if is_redir_op(t))
                    && text.parse::<u32>().is_ok()
                {
                    let fd: i32 = text.parse().unwrap();
                    c.advance();
                    redirs.push(parse_redir(c, Some(fd))?);
                } else {
                    c.advance();
                    argv.push(text);
                }
            }
            Some(t) if is_redir_op(t) => {
                redirs.push(parse_redir(c, None)?);
            }
            _ => break,
        }
    }

    if argv.is_empty() && redirs.is_empty() {
        return Err(ParseError::EmptySegment);
    }

    Ok(Ast::Cmd { argv, redirs })
}

fn parse_redir(c: &mut Cursor, explicit_fd: Option<i32>) -> Result<Redir, ParseError> {
    let op = c.advance().expect("caller checked operator is present");
    match op {
        Token::Lt => {
            let fd = explicit_fd.unwrap_or(0);
            let path = expect_word(c)?;
            Ok(Redir { fd, kind: RedirKind::In, path })
        }
        Token::Gt => {
            let fd = explicit_fd.unwrap_or(1);
            let path = expect_word(c)?;
            Ok(Redir { fd, kind: RedirKind::Out, path })
        }
        Token::GtGt => {
            let fd = explicit_fd.unwrap_or(1);
            let path = expect_word(c)?;
            Ok(Redir { fd, kind: RedirKind::Append, path })
        }
        Token::GtAmp => {
            let fd = explicit_fd.unwrap_or(1);
            let target = expect_word(c)?;
            let target_fd: i32 = target.parse().map_err(|_| ParseError::MissingRedirectTarget)?;
            Ok(Redir { fd, kind: RedirKind::Dup(target_fd), path: String::new() })
        }
        Token::LtLtLt => {
            let fd = explicit_fd.unwrap_or(0);
            let path = expect_word(c)?;
            Ok(Redir { fd, kind: RedirKind::HereString, path })
        }
        _ => unreachable!("caller checked this is a redirection operator"),
    }
}

fn expect_word(c: &mut Cursor) -> Result<String, ParseError> {
    match c.advance() {
        Some(Token::Word { text, .. }) => Ok(text.clone()),
        _ => Err(ParseError::MissingRedirectTarget),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(argv: &[&str]) -> Ast {
        Ast::Cmd {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            redirs: Vec::new(),
        }
    }

    #[test]
    fn empty_line_is_single_empty_cmd_noop() {
        assert_eq!(
            parse_line("").unwrap(),
            Ast::Seq(vec![Ast::Cmd {
                argv: vec![],
                redirs: vec![]
            }])
        );
    }

    #[test]
    fn whitespace_only_line_is_single_empty_cmd_noop() {
        assert_eq!(
            parse_line("   \t ").unwrap(),
            Ast::Seq(vec![Ast::Cmd {
                argv: vec![],
                redirs: vec![]
            }])
        );
    }

    #[test]
    fn simple_command() {
        assert_eq!(parse_line("ls -l /tmp").unwrap(), Ast::Seq(vec![cmd(&["ls", "-l", "/tmp"])]));
    }

    #[test]
    fn sequence_of_two() {
        assert_eq!(
            parse_line("echo a ; echo b").unwrap(),
            Ast::Seq(vec![cmd(&["echo", "a"]), cmd(&["echo", "b"])])
        );
    }

    #[test]
    fn trailing_semicolon_does_not_add_empty_segment() {
        assert_eq!(parse_line("echo a ;").unwrap(), Ast::Seq(vec![cmd(&["echo", "a"])]));
    }

    #[test]
    fn trailing_amp_wraps_in_bg() {
        assert_eq!(
            parse_line("sleep 5 &").unwrap(),
            Ast::Seq(vec![Ast::Bg(Box::new(cmd(&["sleep", "5"])))])
        );
    }

    #[test]
    fn double_semicolon_is_empty_segment_error() {
        assert_eq!(parse_line("echo a ;; echo b").unwrap_err(), ParseError::EmptySegment);
    }

    #[test]
    fn and_or_left_associative() {
        assert_eq!(
            parse_line("a && b || c").unwrap(),
            Ast::Seq(vec![Ast::Or(
                Box::new(Ast::And(Box::new(cmd(&["a"])), Box::new(cmd(&["b"])))),
                Box::new(cmd(&["c"]))
            )])
        );
    }

    #[test]
    fn pipeline_of_two() {
        assert_eq!(
            parse_line("cat foo | wc -l").unwrap(),
            Ast::Seq(vec![Ast::Pipe(vec![cmd(&["cat", "foo"]), cmd(&["wc", "-l"])])])
        );
    }

    #[test]
    fn pipeline_missing_right_side_is_parse_error() {
        assert_eq!(parse_line("cat foo |").unwrap_err(), ParseError::MissingPipelineOperand);
    }

    #[test]
    fn pipeline_missing_left_side_is_parse_error() {
        assert_eq!(parse_line("| cat foo").unwrap_err(), ParseError::MissingPipelineOperand);
    }

    #[test]
    fn redirection_without_explicit_fd_defaults() {
        let ast = parse_line("cat <in.txt | wc -l >out.txt").unwrap();
        assert_eq!(
            ast,
            Ast::Seq(vec![Ast::Pipe(vec![
                Ast::Cmd {
                    argv: vec!["cat".into()],
                    redirs: vec![Redir { fd: 0, kind: RedirKind::In, path: "in.txt".into() }],
                },
                Ast::Cmd {
                    argv: vec!["wc".into(), "-l".into()],
                    redirs: vec![Redir { fd: 1, kind: RedirKind::Out, path: "out.txt".into() }],
                },
            ])])
        );
    }

    #[test]
    fn explicit_fd_prefix_requires_adjacency_and_numeric() {
        let ast = parse_line("cmd 2>err.log").unwrap();
        assert_eq!(
            ast,
            Ast::Seq(vec![Ast::Cmd {
                argv: vec!["cmd".into()],
                redirs: vec![Redir { fd: 2, kind: RedirKind::Out, path: "err.log".into() }],
            }])
        );
    }

    #[test]
    fn non_adjacent_number_is_not_an_fd_prefix() {
        let ast = parse_line("cmd 2 >err.log").unwrap();
        assert_eq!(
            ast,
            Ast::Seq(vec![Ast::Cmd {
                argv: vec!["cmd".into(), "2".into()],
                redirs: vec![Redir { fd: 1, kind: RedirKind::Out, path: "err.log".into() }],
            }])
        );
    }

    #[test]
    fn redirection_missing_filename_is_parse_error() {
        assert_eq!(parse_line("cmd >").unwrap_err(), ParseError::MissingRedirectTarget);
    }

    #[test]
    fn background_applied_to_and_or_is_parse_error() {
        assert_eq!(
            parse_line("a && b &").unwrap_err(),
            ParseError::BackgroundControlNode
        );
    }

    #[test]
    fn append_operator() {
        let ast = parse_line("echo hi >>log.txt").unwrap();
        assert_eq!(
            ast,
            Ast::Seq(vec![Ast::Cmd {
                argv: vec!["echo".into(), "hi".into()],
                redirs: vec![Redir { fd: 1, kind: RedirKind::Append, path: "log.txt".into() }],
            }])
        );
    }

    #[test]
    fn quoted_word_is_never_treated_as_operator() {
        let ast = parse_line("echo \";\"").unwrap();
        assert_eq!(ast, Ast::Seq(vec![cmd(&["echo", ";"])]));
    }

    #[test]
    fn fd_duplication_with_explicit_source_fd() {
        let ast = parse_line("cmd 2>&1").unwrap();
        assert_eq!(
            ast,
            Ast::Seq(vec![Ast::Cmd {
                argv: vec!["cmd".into()],
                redirs: vec![Redir { fd: 2, kind: RedirKind::Dup(1), path: String::new() }],
            }])
        );
    }

    #[test]
    fn fd_duplication_defaults_to_stdout() {
        let ast = parse_line("cmd >&2").unwrap();
        assert_eq!(
            ast,
            Ast::Seq(vec![Ast::Cmd {
                argv: vec!["cmd".into()],
                redirs: vec![Redir { fd: 1, kind: RedirKind::Dup(2), path: String::new() }],
            }])
        );
    }

    #[test]
    fn fd_duplication_target_must_be_numeric() {
        assert_eq!(parse_line("cmd >&oops").unwrap_err(), ParseError::MissingRedirectTarget);
    }

    #[test]
    fn here_string_feeds_literal_text_to_stdin() {
        let ast = parse_line("cat <<<hello").unwrap();
        assert_eq!(
            ast,
            Ast::Seq(vec![Ast::Cmd {
                argv: vec!["cat".into()],
                redirs: vec![Redir { fd: 0, kind: RedirKind::HereString, path: "hello".into() }],
            }])
        );
    }
}
