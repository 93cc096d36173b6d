use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::ir::Program;
use crate::bytecode::op::Instruction;
use crate::frontend::assembler::LabelTable;
use crate::lang::value::Value;

/// Print disassembly of a program to stdout
pub fn print_program(program: &Program, labels: Option<&LabelTable>) {
    print!("{}", disassemble(program, labels));
}

/// Render a program listing, one instruction per line.
///
/// Jump targets get a `►` marker. When a label table is given, labels are
/// shown above the instruction they are bound to; labels bound one past the
/// last instruction are listed at the end.
pub fn disassemble(program: &Program, labels: Option<&LabelTable>) -> String {
    let jump_targets = collect_jump_targets(program);
    let mut out = String::new();

    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(out, " {} instructions", program.len());
    let _ = writeln!(out, "════════════════════════════════════════");

    for (ip, instr) in program.iter().enumerate() {
        write_labels_at(&mut out, labels, ip);

        let marker = if jump_targets.contains(&ip) { "► " } else { "  " };
        let _ = writeln!(out, "{:04} {}{}", ip, marker, format_instruction(instr));
    }

    write_labels_at(&mut out, labels, program.len());
    out
}

fn write_labels_at(out: &mut String, labels: Option<&LabelTable>, ip: usize) {
    let Some(labels) = labels else {
        return;
    };
    for (name, _) in labels.iter().filter(|(_, addr)| **addr == ip) {
        let _ = writeln!(out, "      {}:", name);
    }
}

/// Addresses named by integer jump operands.
fn collect_jump_targets(program: &Program) -> BTreeSet<usize> {
    program
        .iter()
        .filter(|instr| instr.opcode.is_jump())
        .filter_map(|instr| instr.operand.as_ref()?.as_integer())
        .filter_map(|target| usize::try_from(target).ok())
        .collect()
}

fn format_instruction(instr: &Instruction) -> String {
    match &instr.operand {
        Some(v) => format!("{:<11} {}", instr.opcode.mnemonic(), format_value(v)),
        None => instr.opcode.mnemonic().to_string(),
    }
}

/// Format a value for listings and diagnostics: text is quoted so that
/// `"1"` and `1` stay distinguishable.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Integer(n) => n.to_string(),
        Value::Text(s) => format!("\"{}\"", s),
    }
}
