//! Two-pass assembler.
//!
//! Pass 1 walks the parsed lines and binds every label to the address of the
//! next instruction. Pass 2 emits instructions, validating operands per
//! opcode class and replacing label operands with their addresses. Because
//! all addresses are fixed before anything is emitted, jumps may refer to
//! labels defined further down.

use std::collections::BTreeMap;

use tracing::debug;

use crate::bytecode::ir::Program;
use crate::bytecode::op::{Instruction, OperandClass, Opcode};
use crate::frontend::assemble_error::AssembleError;
use crate::frontend::lexer::tokenize_line;
use crate::frontend::token::Token;
use crate::lang::value::Value;

/// Label name -> instruction address. Names are case-sensitive.
pub type LabelTable = BTreeMap<String, usize>;

/// One source line after tokenizing, before any validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub label: Option<String>,
    pub opcode: Option<Opcode>,
    pub operand: Option<Token>,
    /// 1-based source line.
    pub line: usize,
}

/// Output of a successful assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub program: Program,
    pub labels: LabelTable,
}

pub fn assemble(source: &str) -> Result<Assembly, AssembleError> {
    let lines = parse_lines(source)?;
    let labels = assign_addresses(&lines)?;
    let program = emit(&lines, &labels)?;

    debug!(
        instructions = program.len(),
        labels = labels.len(),
        "assembled program"
    );

    Ok(Assembly { program, labels })
}

/// Tokenize and split every non-empty line into label / opcode / operand.
pub fn parse_lines(source: &str) -> Result<Vec<ParsedLine>, AssembleError> {
    let mut parsed = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let tokens = tokenize_line(raw, line)?;
        if tokens.is_empty() {
            continue;
        }

        let parsed_line = parse_line(tokens, line);
        if parsed_line.label.is_none() && parsed_line.opcode.is_none() {
            debug!(line, "no opcode on line, skipping");
            continue;
        }
        parsed.push(parsed_line);
    }

    Ok(parsed)
}

fn parse_line(tokens: Vec<Token>, line: usize) -> ParsedLine {
    let mut rest = tokens.into_iter().peekable();
    let mut label = None;

    // `name:` prefix
    let mut lookahead = rest.clone();
    if let (Some(Token::Ident(name)), Some(Token::Colon)) = (lookahead.next(), lookahead.next()) {
        label = Some(name);
        rest = lookahead;
    }

    let opcode = match rest.peek() {
        Some(Token::Ident(name)) => Some(Opcode::from_mnemonic(name)),
        _ => None,
    };

    let operand = if opcode.is_some() {
        rest.next();
        rest.next()
    } else {
        None
    };

    ParsedLine {
        label,
        opcode,
        operand,
        line,
    }
}

/// Pass 1: bind each label to the address of the instruction that follows it.
pub fn assign_addresses(lines: &[ParsedLine]) -> Result<LabelTable, AssembleError> {
    let mut labels = LabelTable::new();
    let mut addr = 0usize;

    for pl in lines {
        if let Some(label) = &pl.label {
            if labels.contains_key(label) {
                return Err(AssembleError::DuplicateLabel {
                    label: label.clone(),
                    line: pl.line,
                });
            }
            labels.insert(label.clone(), addr);
        }
        if pl.opcode.is_some() {
            addr += 1;
        }
    }

    Ok(labels)
}

/// Pass 2: validate operands and emit one instruction per opcode line.
pub fn emit(lines: &[ParsedLine], labels: &LabelTable) -> Result<Program, AssembleError> {
    let mut instructions = Vec::new();

    for pl in lines {
        let Some(opcode) = &pl.opcode else {
            continue;
        };
        let operand = resolve_operand(opcode, pl, labels)?;
        instructions.push(Instruction {
            opcode: opcode.clone(),
            operand,
        });
    }

    Ok(Program::new(instructions))
}

fn resolve_operand(
    opcode: &Opcode,
    pl: &ParsedLine,
    labels: &LabelTable,
) -> Result<Option<Value>, AssembleError> {
    let missing = || AssembleError::MissingOperand {
        opcode: opcode.to_string(),
        line: pl.line,
    };
    let invalid = |expected: &'static str, token: &Token| AssembleError::InvalidOperand {
        opcode: opcode.to_string(),
        expected,
        found: format!("{} {}", token.kind_name(), token),
        line: pl.line,
    };

    match opcode.operand_class() {
        OperandClass::Jump => match &pl.operand {
            Some(Token::Ident(name)) => match labels.get(name) {
                Some(addr) => Ok(Some(Value::Integer(*addr as i64))),
                None => Err(AssembleError::UnknownLabel {
                    label: name.clone(),
                    line: pl.line,
                }),
            },
            Some(Token::Integer(addr)) => Ok(Some(Value::Integer(*addr))),
            Some(other) => Err(invalid("a label or address", other)),
            None => Err(missing()),
        },
        OperandClass::Variable => match &pl.operand {
            Some(Token::Ident(name)) => Ok(Some(Value::Text(name.clone()))),
            Some(other) => Err(invalid("a variable name", other)),
            None => Err(missing()),
        },
        OperandClass::Literal => match &pl.operand {
            Some(Token::Integer(n)) => Ok(Some(Value::Integer(*n))),
            Some(Token::Str(s)) | Some(Token::Ident(s)) => Ok(Some(Value::Text(s.clone()))),
            Some(other) => Err(invalid("an integer or string", other)),
            None => Err(missing()),
        },
        OperandClass::None => {
            if let Some(extra) = &pl.operand {
                debug!(line = pl.line, %opcode, operand = %extra, "ignoring operand");
            }
            Ok(None)
        }
    }
}
