//! Loads host configurations from configuration text.
//!
//! The text is made of server blocks. A file without braces is a single
//! block whose first line lists the addresses and whose remaining lines are
//! directives:
//!
//! ```text
//! 127.0.0.1:3932
//! gzip
//! ```
//!
//! Several blocks are written with braces:
//!
//! ```text
//! # comments run to the end of the line
//! localhost:8080, 127.0.0.1:8080 {
//!     gzip
//!     header X-Served-By "vetis fleet"
//! }
//!
//! https://example.com {
//!     tls certs/example.der certs/example.key.der
//! }
//! ```
//!
//! Every address of a block yields its own [`Config`]; the `tls` directive
//! configures TLS and every other directive names a handler.

use std::io::Read;

use crate::{
    address,
    config::{Config, Directive, TlsConfig},
    errors::{FleetError, ParseError},
};

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Open,
    Close,
}

struct Line {
    number: usize,
    tokens: Vec<Token>,
}

struct Block {
    line: usize,
    addresses: Vec<String>,
    directives: Vec<Line>,
}

/// Reads configuration text and returns one `Config` per configured address,
/// in the order they appear.
///
/// `name` identifies the text in error messages.
///
/// # Errors
///
/// Returns [`FleetError::Parse`] when the text cannot be read, is empty or is
/// malformed.
pub fn load<R: Read>(name: &str, mut reader: R) -> Result<Vec<Config>, FleetError> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| parse_error(name, 0, &e.to_string()))?;

    let lines = tokenize(name, &text)?;
    if lines.is_empty() {
        return Err(parse_error(name, 1, "no server blocks").into());
    }

    let braced = lines
        .iter()
        .flat_map(|line| line.tokens.iter())
        .any(|token| !matches!(token, Token::Word(_)));

    let blocks = if !braced {
        vec![single_block(name, lines)?]
    } else {
        braced_blocks(name, lines)?
    };

    let mut configs = Vec::new();
    for block in blocks {
        configs.extend(block_configs(name, block)?);
    }

    Ok(configs)
}

fn parse_error(name: &str, line: usize, message: &str) -> ParseError {
    ParseError { name: name.to_string(), line, message: message.to_string() }
}

fn tokenize(name: &str, text: &str) -> Result<Vec<Line>, ParseError> {
    let mut lines = Vec::new();

    for (index, raw) in text
        .lines()
        .enumerate()
    {
        let number = index + 1;
        let mut tokens = Vec::new();
        let mut chars = raw
            .chars()
            .peekable();

        while let Some(c) = chars.next() {
            match c {
                c if c.is_whitespace() => {}
                '#' => break,
                '{' => tokens.push(Token::Open),
                '}' => tokens.push(Token::Close),
                '"' => {
                    let mut word = String::new();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        match c {
                            '\\' if chars.peek() == Some(&'"') => {
                                word.push('"');
                                chars.next();
                            }
                            '"' => {
                                closed = true;
                                break;
                            }
                            c => word.push(c),
                        }
                    }
                    if !closed {
                        return Err(parse_error(name, number, "unterminated quote"));
                    }
                    tokens.push(Token::Word(word));
                }
                c => {
                    let mut word = String::from(c);
                    while let Some(&next) = chars.peek() {
                        if next.is_whitespace() || next == '{' || next == '}' {
                            break;
                        }
                        word.push(next);
                        chars.next();
                    }
                    tokens.push(Token::Word(word));
                }
            }
        }

        if !tokens.is_empty() {
            lines.push(Line { number, tokens });
        }
    }

    Ok(lines)
}

fn words(tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .filter_map(|token| match token {
            Token::Word(word) => Some(word.clone()),
            _ => None,
        })
        .collect()
}

fn split_addresses(words: &[String]) -> Vec<String> {
    words
        .iter()
        .flat_map(|word| word.split(','))
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .collect()
}

fn single_block(name: &str, mut lines: Vec<Line>) -> Result<Block, ParseError> {
    let first = lines.remove(0);
    let addresses = split_addresses(&words(&first.tokens));
    if addresses.is_empty() {
        return Err(parse_error(name, first.number, "expected at least one address"));
    }
    Ok(Block { line: first.number, addresses, directives: lines })
}

fn braced_blocks(name: &str, lines: Vec<Line>) -> Result<Vec<Block>, ParseError> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for mut line in lines {
        match current.take() {
            None => {
                if line.tokens.last() != Some(&Token::Open) {
                    return Err(parse_error(name, line.number, "expected '{' after addresses"));
                }
                line.tokens
                    .pop();
                if line
                    .tokens
                    .iter()
                    .any(|token| !matches!(token, Token::Word(_)))
                {
                    return Err(parse_error(name, line.number, "unexpected brace"));
                }
                let addresses = split_addresses(&words(&line.tokens));
                if addresses.is_empty() {
                    return Err(parse_error(name, line.number, "expected at least one address"));
                }
                current = Some(Block { line: line.number, addresses, directives: Vec::new() });
            }
            Some(mut block) => {
                if line.tokens == [Token::Close] {
                    blocks.push(block);
                    continue;
                }
                if line
                    .tokens
                    .contains(&Token::Open)
                {
                    return Err(parse_error(name, line.number, "nested blocks are not supported"));
                }
                if line
                    .tokens
                    .contains(&Token::Close)
                {
                    return Err(parse_error(name, line.number, "'}' must be on its own line"));
                }
                block
                    .directives
                    .push(line);
                current = Some(block);
            }
        }
    }

    if let Some(block) = current {
        return Err(parse_error(name, block.line, "unclosed '{'"));
    }

    Ok(blocks)
}

fn block_configs(name: &str, block: Block) -> Result<Vec<Config>, ParseError> {
    let mut tls = None;
    let mut directives = Vec::new();

    for line in &block.directives {
        let mut words = words(&line.tokens);
        let directive = words.remove(0);
        if directive == "tls" {
            if words.len() != 2 {
                return Err(parse_error(name, line.number, "tls expects a certificate and a key"));
            }
            if tls.is_some() {
                return Err(parse_error(name, line.number, "tls is configured twice"));
            }
            let config = TlsConfig::builder()
                .cert(&words[0])
                .key(&words[1])
                .build()
                .map_err(|e| parse_error(name, line.number, &e.to_string()))?;
            tls = Some(config);
        } else {
            directives.push(Directive::new(&directive, words));
        }
    }

    let mut configs = Vec::new();
    for text in &block.addresses {
        let host_port =
            address::parse(text).map_err(|e| parse_error(name, block.line, &e.to_string()))?;

        if host_port.is_secure() && tls.is_none() {
            return Err(parse_error(
                name,
                block.line,
                &format!("{} requires a tls directive", text),
            ));
        }

        let mut builder = Config::builder()
            .host(host_port.host())
            .directives(directives.clone());
        if let Some(port) = host_port.port() {
            builder = builder.port(port);
        }
        if let Some(tls) = &tls {
            builder = builder.tls(tls.clone());
        }

        let config = builder
            .build()
            .map_err(|e| parse_error(name, block.line, &e.to_string()))?;
        configs.push(config);
    }

    Ok(configs)
}
