//! Tokenizer for the script language.

use crate::error::ScriptError;

/// Block comment the harness template uses to mark where staged code goes.
pub const PLACEHOLDER_COMMENT: &str = "CODE HERE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Var,
    If,
    Else,
    While,
    For,
    Of,
    Break,
    Continue,
    Return,
    Function,
    Async,
    Await,
    Try,
    Catch,
    Finally,
    Throw,
    Typeof,
    New,
    True,
    False,
    Null,
    Undefined,
}

impl Keyword {
    fn from_ident(word: &str) -> Option<Self> {
        Some(match word {
            "let" => Self::Let,
            "const" => Self::Const,
            "var" => Self::Var,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "for" => Self::For,
            "of" => Self::Of,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "return" => Self::Return,
            "function" => Self::Function,
            "async" => Self::Async,
            "await" => Self::Await,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "finally" => Self::Finally,
            "throw" => Self::Throw,
            "typeof" => Self::Typeof,
            "new" => Self::New,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            "undefined" => Self::Undefined,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Question,
    QuestionDot,
    Nullish,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    Assign,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    Arrow,
}

/// One piece of a template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    /// Source of a `${...}` substitution and the line it starts on.
    Code { source: String, line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    Ident(String),
    Kw(Keyword),
    Punct(Punct),
    Placeholder,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self::starting_at(source, 1)
    }

    /// Lex `source` as if it began on `line` of an enclosing file.
    pub fn starting_at(source: &str, line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.tok == Tok::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    /// Skips whitespace and comments. Returns true if the placeholder
    /// comment was consumed.
    fn skip_trivia(&mut self) -> Result<bool, ScriptError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.line;
                    self.bump();
                    self.bump();
                    let mut body = String::new();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(c) => body.push(c),
                            None => {
                                return Err(ScriptError::Syntax {
                                    line: start,
                                    message: "unterminated comment".into(),
                                })
                            }
                        }
                    }
                    if body.trim() == PLACEHOLDER_COMMENT {
                        return Ok(true);
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ScriptError> {
        if self.skip_trivia()? {
            return Ok(Token {
                tok: Tok::Placeholder,
                line: self.line,
            });
        }
        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(Token { tok: Tok::Eof, line });
        };

        let tok = if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            self.number()?
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let mut word = String::new();
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() || c == '_' || c == '$' {
                    word.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            match Keyword::from_ident(&word) {
                Some(kw) => Tok::Kw(kw),
                None => Tok::Ident(word),
            }
        } else if c == '"' || c == '\'' {
            self.bump();
            Tok::Str(self.string(c)?)
        } else if c == '`' {
            self.bump();
            Tok::Template(self.template()?)
        } else {
            Tok::Punct(self.punct()?)
        };
        Ok(Token { tok, line })
    }

    fn number(&mut self) -> Result<Tok, ScriptError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.error(format!("invalid number `{text}`")))
    }

    fn escape(&mut self) -> Result<char, ScriptError> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some(c) => Ok(c),
            None => Err(self.error("unterminated escape")),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, ScriptError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.escape()?),
                Some('\n') | None => return Err(self.error("unterminated string")),
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> Result<Vec<TemplateChunk>, ScriptError> {
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') => text.push(self.escape()?),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    let line = self.line;
                    let source = self.substitution()?;
                    chunks.push(TemplateChunk::Code { source, line });
                }
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated template literal")),
            }
        }
        if !text.is_empty() || chunks.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        Ok(chunks)
    }

    /// Raw source up to the `}` closing a `${`.
    fn substitution(&mut self) -> Result<String, ScriptError> {
        let mut depth = 0usize;
        let mut source = String::new();
        loop {
            match self.bump() {
                Some('}') if depth == 0 => return Ok(source),
                Some(c) => {
                    match c {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    source.push(c);
                }
                None => return Err(self.error("unterminated template substitution")),
            }
        }
    }

    fn punct(&mut self) -> Result<Punct, ScriptError> {
        use Punct::*;

        let Some(c) = self.bump() else {
            return Err(self.error("unexpected end of input"));
        };
        let next = self.peek();
        let (punct, extra) = match (c, next) {
            ('(', _) => (LParen, 0),
            (')', _) => (RParen, 0),
            ('{', _) => (LBrace, 0),
            ('}', _) => (RBrace, 0),
            ('[', _) => (LBracket, 0),
            (']', _) => (RBracket, 0),
            (',', _) => (Comma, 0),
            (';', _) => (Semi, 0),
            (':', _) => (Colon, 0),
            ('.', _) => (Dot, 0),
            ('?', Some('.')) => (QuestionDot, 1),
            ('?', Some('?')) => (Nullish, 1),
            ('?', _) => (Question, 0),
            ('+', Some('+')) => (PlusPlus, 1),
            ('+', Some('=')) => (PlusEq, 1),
            ('+', _) => (Plus, 0),
            ('-', Some('-')) => (MinusMinus, 1),
            ('-', Some('=')) => (MinusEq, 1),
            ('-', _) => (Minus, 0),
            ('*', Some('=')) => (StarEq, 1),
            ('*', _) => (Star, 0),
            ('/', Some('=')) => (SlashEq, 1),
            ('/', _) => (Slash, 0),
            ('%', Some('=')) => (PercentEq, 1),
            ('%', _) => (Percent, 0),
            ('=', Some('=')) => {
                let extra = if self.peek_at(1) == Some('=') { 2 } else { 1 };
                (Eq, extra)
            }
            ('=', Some('>')) => (Arrow, 1),
            ('=', _) => (Assign, 0),
            ('!', Some('=')) => {
                let extra = if self.peek_at(1) == Some('=') { 2 } else { 1 };
                (NotEq, extra)
            }
            ('!', _) => (Not, 0),
            ('<', Some('=')) => (LtEq, 1),
            ('<', _) => (Lt, 0),
            ('>', Some('=')) => (GtEq, 1),
            ('>', _) => (Gt, 0),
            ('&', Some('&')) => (And, 1),
            ('|', Some('|')) => (Or, 1),
            (other, _) => return Err(self.error(format!("unexpected character `{other}`"))),
        };
        for _ in 0..extra {
            self.bump();
        }
        Ok(punct)
    }
}
