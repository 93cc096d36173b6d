use std::collections::BTreeMap;
use std::io::Write;

use tracing::{info, trace};

use crate::bytecode::ir::Program;
use crate::bytecode::op::{Instruction, Opcode};
use crate::lang::value::Value;
use crate::runtime::runtime_error::{FaultKind, RuntimeError, format_stack, format_variables};

/// Target used for trace-mode lines.
pub const TRACE_TARGET: &str = "toyvm::trace";

#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    /// Log ip, instruction, stack and variables before every step.
    pub trace: bool,
}

impl VmConfig {
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Halted,
    Faulted,
}

/// Executes one program against its own stack and variable store.
///
/// `PRINT` writes one line per value to `out`. A `Vm` is meant for a single
/// run: after a fault it should be dropped, not resumed.
pub struct Vm<'p, W: Write> {
    program: &'p [Instruction],
    ip: usize,
    stack: Vec<Value>,
    variables: BTreeMap<String, Value>,
    out: W,
    config: VmConfig,
    state: VmState,
}

impl<'p, W: Write> Vm<'p, W> {
    pub fn new(program: &'p Program, out: W) -> Self {
        Self::with_config(program, out, VmConfig::default())
    }

    pub fn with_config(program: &'p Program, out: W, config: VmConfig) -> Self {
        Self {
            program: &program.instructions,
            ip: 0,
            stack: Vec::new(),
            variables: BTreeMap::new(),
            out,
            config,
            state: VmState::Running,
        }
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Step until `HALT` or the first fault.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.step()? == StepOutcome::Halted {
                break;
            }
        }

        self.out
            .flush()
            .map_err(|e| self.fault(FaultKind::Output(e)))
    }

    /// Execute the instruction at `ip`. Halted and faulted machines never
    /// execute again.
    pub fn step(&mut self) -> Result<StepOutcome, RuntimeError> {
        match self.state {
            VmState::Halted => return Ok(StepOutcome::Halted),
            VmState::Faulted => return Err(self.fault(FaultKind::AlreadyFaulted)),
            VmState::Running => {}
        }

        let result = self.exec_current();
        match &result {
            Ok(StepOutcome::Halted) => self.state = VmState::Halted,
            Ok(StepOutcome::Continue) => {}
            Err(_) => self.state = VmState::Faulted,
        }
        result
    }

    // Execution

    fn exec_current(&mut self) -> Result<StepOutcome, RuntimeError> {
        let program = self.program;
        let instr = program.get(self.ip).ok_or_else(|| {
            self.fault(FaultKind::IpOutOfRange {
                target: self.ip as i64,
                len: program.len(),
            })
        })?;

        if self.config.trace {
            self.trace(instr);
        }
        trace!(ip = self.ip, %instr, depth = self.stack.len(), "exec");

        let opcode = &instr.opcode;
        match opcode {
            Opcode::Push => {
                let v = self.operand(instr, "a value")?.clone();
                self.push(v);
            }

            // Arithmetic: second-from-top is the left operand.
            Opcode::Add => self.binary(opcode, i64::checked_add)?,
            Opcode::Sub => self.binary(opcode, i64::checked_sub)?,
            Opcode::Mul => self.binary(opcode, i64::checked_mul)?,
            Opcode::Div => {
                self.require(2)?;
                let b = self.pop_int(opcode)?;
                let a = self.pop_int(opcode)?;
                if b == 0 {
                    return Err(self.fault(FaultKind::DivisionByZero));
                }
                let q = floor_div(a, b).ok_or_else(|| {
                    self.fault(FaultKind::Overflow {
                        opcode: opcode.to_string(),
                    })
                })?;
                self.push(Value::Integer(q));
            }

            // Stack operations
            Opcode::Dup => {
                self.require(1)?;
                let top = self.stack[self.stack.len() - 1].clone();
                self.push(top);
            }
            Opcode::Swap => {
                self.require(2)?;
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }

            // Variables
            Opcode::Store => {
                let name = self.variable_name(instr)?;
                let v = self.pop()?;
                self.variables.insert(name.to_string(), v);
            }
            Opcode::Load => {
                let name = self.variable_name(instr)?;
                let v = self
                    .variables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| self.fault(FaultKind::UndefinedVariable(name.to_string())))?;
                self.push(v);
            }

            // Control flow. Jumps set ip themselves and skip the increment.
            Opcode::Jmp => {
                let target = self.jump_target(instr)?;
                return self.jump(target);
            }
            Opcode::Jz => {
                let target = self.jump_target(instr)?;
                if self.pop_int(opcode)? == 0 {
                    return self.jump(target);
                }
            }
            Opcode::Jnz => {
                let target = self.jump_target(instr)?;
                if self.pop_int(opcode)? != 0 {
                    return self.jump(target);
                }
            }

            // I/O
            Opcode::Print => {
                let v = self.pop()?;
                writeln!(self.out, "{}", v).map_err(|e| self.fault(FaultKind::Output(e)))?;
            }

            Opcode::Halt => return Ok(StepOutcome::Halted),

            Opcode::Unknown(name) => {
                return Err(self.fault(FaultKind::UnknownOpcode(name.clone())));
            }
        }

        self.ip += 1;
        Ok(StepOutcome::Continue)
    }

    fn trace(&self, instr: &Instruction) {
        info!(
            target: TRACE_TARGET,
            "[ip={}] EXEC {} | stack={} vars={}",
            self.ip,
            instr,
            format_stack(&self.stack),
            format_variables(&self.variables)
        );
    }

    fn jump(&mut self, target: i64) -> Result<StepOutcome, RuntimeError> {
        // A negative address can never be fetched; report it right away.
        let ip = usize::try_from(target).map_err(|_| {
            self.fault(FaultKind::IpOutOfRange {
                target,
                len: self.program.len(),
            })
        })?;
        self.ip = ip;
        Ok(StepOutcome::Continue)
    }

    fn fault(&self, kind: FaultKind) -> RuntimeError {
        RuntimeError::new(kind, self.ip, &self.stack, &self.variables)
    }

    fn type_error(
        &self,
        opcode: &Opcode,
        expected: &'static str,
        found: Option<&Value>,
    ) -> RuntimeError {
        self.fault(FaultKind::TypeMismatch {
            opcode: opcode.to_string(),
            expected,
            found: found.map_or("nothing", Value::type_name),
        })
    }

    // Operands. The assembler validates these already, but decoded programs
    // are not checked before they run.

    fn operand<'i>(
        &self,
        instr: &'i Instruction,
        expected: &'static str,
    ) -> Result<&'i Value, RuntimeError> {
        instr
            .operand
            .as_ref()
            .ok_or_else(|| self.type_error(&instr.opcode, expected, None))
    }

    fn variable_name<'i>(&self, instr: &'i Instruction) -> Result<&'i str, RuntimeError> {
        match self.operand(instr, "a variable name")? {
            Value::Text(name) => Ok(name.as_str()),
            other => Err(self.type_error(&instr.opcode, "a variable name", Some(other))),
        }
    }

    fn jump_target(&self, instr: &Instruction) -> Result<i64, RuntimeError> {
        match self.operand(instr, "an integer target")? {
            Value::Integer(target) => Ok(*target),
            other => Err(self.type_error(&instr.opcode, "an integer target", Some(other))),
        }
    }

    // Stack operations

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn require(&self, needed: usize) -> Result<(), RuntimeError> {
        if self.stack.len() < needed {
            return Err(self.fault(FaultKind::StackUnderflow {
                needed,
                had: self.stack.len(),
            }));
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.require(1)?;
        self.stack
            .pop()
            .ok_or_else(|| self.fault(FaultKind::StackUnderflow { needed: 1, had: 0 }))
    }

    fn pop_int(&mut self, opcode: &Opcode) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Value::Integer(n) => Ok(n),
            other => Err(self.type_error(opcode, "integer", Some(&other))),
        }
    }

    fn binary(
        &mut self,
        opcode: &Opcode,
        f: impl FnOnce(i64, i64) -> Option<i64>,
    ) -> Result<(), RuntimeError> {
        self.require(2)?;
        let b = self.pop_int(opcode)?;
        let a = self.pop_int(opcode)?;
        let result = f(a, b).ok_or_else(|| {
            self.fault(FaultKind::Overflow {
                opcode: opcode.to_string(),
            })
        })?;
        self.push(Value::Integer(result));
        Ok(())
    }
}

/// Integer division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    // ============================================================
    // Test Helpers
    // ============================================================

    fn push(v: impl Into<Value>) -> Instruction {
        Instruction::with_operand(Opcode::Push, v)
    }

    fn op(opcode: Opcode) -> Instruction {
        Instruction::new(opcode)
    }

    fn int(n: i64) -> Value {
        Value::Integer(n)
    }

    /// Run ops to HALT and return the final stack and printed output
    fn run_ops(ops: Vec<Instruction>) -> Result<(Vec<Value>, String), RuntimeError> {
        let program = Program::new(ops);
        let mut vm = Vm::new(&program, Vec::new());
        vm.run()?;
        let stack = vm.stack().to_vec();
        let out = String::from_utf8(vm.into_output()).expect("output is utf-8");
        Ok((stack, out))
    }

    /// Assert stack contains expected values after the ops and a HALT
    fn assert_stack(mut ops: Vec<Instruction>, expected: Vec<Value>) {
        ops.push(op(Opcode::Halt));
        let (stack, _) = run_ops(ops).expect("execution should succeed");
        assert_eq!(stack, expected, "stack mismatch");
    }

    /// Run ops and return the fault they must produce
    fn fault_of(ops: Vec<Instruction>) -> RuntimeError {
        match run_ops(ops) {
            Ok((stack, _)) => panic!("expected a fault, got stack: {:?}", stack),
            Err(e) => e,
        }
    }

    // ============================================================
    // Stack and arithmetic
    // ============================================================

    #[test]
    fn test_push_integer_and_text() {
        assert_stack(vec![push(42), push("hi")], vec![int(42), Value::from("hi")]);
    }

    #[test]
    fn test_add() {
        assert_stack(vec![push(2), push(3), op(Opcode::Add)], vec![int(5)]);
    }

    #[test]
    fn test_sub_operand_order() {
        assert_stack(vec![push(10), push(3), op(Opcode::Sub)], vec![int(7)]);
    }

    #[test]
    fn test_mul() {
        assert_stack(vec![push(-4), push(6), op(Opcode::Mul)], vec![int(-24)]);
    }

    #[test]
    fn test_div_floors() {
        assert_stack(vec![push(7), push(2), op(Opcode::Div)], vec![int(3)]);
        assert_stack(vec![push(-7), push(2), op(Opcode::Div)], vec![int(-4)]);
        assert_stack(vec![push(7), push(-2), op(Opcode::Div)], vec![int(-4)]);
        assert_stack(vec![push(-7), push(-2), op(Opcode::Div)], vec![int(3)]);
        assert_stack(vec![push(-8), push(2), op(Opcode::Div)], vec![int(-4)]);
    }

    #[test]
    fn test_div_by_zero() {
        let err = fault_of(vec![push(5), push(0), op(Opcode::Div)]);
        assert!(matches!(err.kind, FaultKind::DivisionByZero));
        assert_eq!(err.ip, 2);
        assert!(err.stack.is_empty());
    }

    #[test]
    fn test_overflow_faults() {
        let err = fault_of(vec![push(i64::MAX), push(1), op(Opcode::Add)]);
        assert!(matches!(err.kind, FaultKind::Overflow { .. }));

        let err = fault_of(vec![push(i64::MIN), push(-1), op(Opcode::Div)]);
        assert!(matches!(err.kind, FaultKind::Overflow { .. }));
    }

    #[test]
    fn test_add_underflow() {
        let err = fault_of(vec![push(1), op(Opcode::Add)]);
        assert!(matches!(
            err.kind,
            FaultKind::StackUnderflow { needed: 2, had: 1 }
        ));
        // nothing was popped before the check
        assert_eq!(err.stack, vec![int(1)]);
    }

    #[test]
    fn test_add_type_error() {
        let err = fault_of(vec![push(1), push("x"), op(Opcode::Add)]);
        match err.kind {
            FaultKind::TypeMismatch { expected, found, .. } => {
                assert_eq!(expected, "integer");
                assert_eq!(found, "text");
            }
            other => panic!("unexpected fault: {}", other),
        }
    }

    #[test]
    fn test_dup() {
        assert_stack(vec![push(5), op(Opcode::Dup)], vec![int(5), int(5)]);
    }

    #[test]
    fn test_dup_empty_stack() {
        let err = fault_of(vec![op(Opcode::Dup)]);
        assert!(matches!(
            err.kind,
            FaultKind::StackUnderflow { needed: 1, had: 0 }
        ));
    }

    #[test]
    fn test_swap() {
        assert_stack(
            vec![push(1), push("b"), op(Opcode::Swap)],
            vec![Value::from("b"), int(1)],
        );
    }

    #[test]
    fn test_swap_insufficient_stack() {
        let err = fault_of(vec![push(1), op(Opcode::Swap)]);
        assert!(matches!(err.kind, FaultKind::StackUnderflow { needed: 2, .. }));
    }

    // ============================================================
    // Variables
    // ============================================================

    #[test]
    fn test_store_and_load() {
        assert_stack(
            vec![
                push(7),
                Instruction::with_operand(Opcode::Store, "x"),
                Instruction::with_operand(Opcode::Load, "x"),
                Instruction::with_operand(Opcode::Load, "x"),
            ],
            vec![int(7), int(7)],
        );
    }

    #[test]
    fn test_store_overwrites() {
        assert_stack(
            vec![
                push(1),
                Instruction::with_operand(Opcode::Store, "x"),
                push("two"),
                Instruction::with_operand(Opcode::Store, "x"),
                Instruction::with_operand(Opcode::Load, "x"),
            ],
            vec![Value::from("two")],
        );
    }

    #[test]
    fn test_load_undefined() {
        let err = fault_of(vec![Instruction::with_operand(Opcode::Load, "nope")]);
        assert!(matches!(err.kind, FaultKind::UndefinedVariable(ref n) if n == "nope"));
    }

    #[test]
    fn test_store_empty_stack() {
        let err = fault_of(vec![Instruction::with_operand(Opcode::Store, "x")]);
        assert!(matches!(err.kind, FaultKind::StackUnderflow { .. }));
    }

    #[test]
    fn test_store_with_integer_name_is_type_error() {
        let err = fault_of(vec![push(1), Instruction::with_operand(Opcode::Store, 3)]);
        assert!(matches!(err.kind, FaultKind::TypeMismatch { .. }));
    }

    // ============================================================
    // Control flow
    // ============================================================

    #[test]
    fn test_jmp_skips() {
        assert_stack(
            vec![
                Instruction::with_operand(Opcode::Jmp, 2),
                push(999),
                push(1),
            ],
            vec![int(1)],
        );
    }

    #[test]
    fn test_jz_taken_and_not_taken() {
        assert_stack(
            vec![
                push(0),
                Instruction::with_operand(Opcode::Jz, 3),
                push(1),
                push(2),
            ],
            vec![int(2)],
        );
        assert_stack(
            vec![
                push(5),
                Instruction::with_operand(Opcode::Jz, 3),
                push(1),
                push(2),
            ],
            vec![int(1), int(2)],
        );
    }

    #[test]
    fn test_jnz_loop_counts_down() {
        let (stack, out) = run_ops(vec![
            push(3),
            op(Opcode::Dup),
            op(Opcode::Print),
            push(1),
            op(Opcode::Sub),
            op(Opcode::Dup),
            Instruction::with_operand(Opcode::Jnz, 1),
            op(Opcode::Halt),
        ])
        .unwrap();
        assert_eq!(out, "3\n2\n1\n");
        assert_eq!(stack, vec![int(0)]);
    }

    #[test]
    fn test_jz_requires_integer_condition() {
        let err = fault_of(vec![push("x"), Instruction::with_operand(Opcode::Jz, 0)]);
        assert!(matches!(err.kind, FaultKind::TypeMismatch { .. }));
    }

    #[test]
    fn test_jump_target_must_be_integer() {
        let err = fault_of(vec![Instruction::with_operand(Opcode::Jmp, "L")]);
        assert!(matches!(err.kind, FaultKind::TypeMismatch { .. }));

        let err = fault_of(vec![op(Opcode::Jmp)]);
        assert!(matches!(
            err.kind,
            FaultKind::TypeMismatch { found: "nothing", .. }
        ));
    }

    #[test]
    fn test_jump_past_end_faults_on_fetch() {
        let err = fault_of(vec![Instruction::with_operand(Opcode::Jmp, 10)]);
        assert!(matches!(
            err.kind,
            FaultKind::IpOutOfRange { target: 10, len: 1 }
        ));
        assert_eq!(err.ip, 10);
    }

    #[test]
    fn test_negative_jump_faults() {
        let err = fault_of(vec![Instruction::with_operand(Opcode::Jmp, -1)]);
        assert!(matches!(err.kind, FaultKind::IpOutOfRange { target: -1, .. }));
    }

    #[test]
    fn test_missing_halt_runs_off_the_end() {
        let err = fault_of(vec![push(1), push(2)]);
        assert!(matches!(err.kind, FaultKind::IpOutOfRange { target: 2, len: 2 }));
        assert_eq!(err.stack, vec![int(1), int(2)]);
    }

    #[test]
    fn test_empty_program_faults() {
        let err = fault_of(vec![]);
        assert!(matches!(err.kind, FaultKind::IpOutOfRange { target: 0, len: 0 }));
    }

    #[test]
    fn test_unknown_opcode() {
        let err = fault_of(vec![push(1), op(Opcode::Unknown("NOP".into()))]);
        assert!(matches!(err.kind, FaultKind::UnknownOpcode(ref n) if n == "NOP"));
        assert_eq!(err.ip, 1);
    }

    // ============================================================
    // Output, state, trace
    // ============================================================

    #[test]
    fn test_print_formats() {
        let (stack, out) = run_ops(vec![
            push(-12),
            op(Opcode::Print),
            push("hello world"),
            op(Opcode::Print),
            op(Opcode::Halt),
        ])
        .unwrap();
        assert_eq!(out, "-12\nhello world\n");
        assert!(stack.is_empty());
    }

    #[test]
    fn test_print_empty_stack() {
        let err = fault_of(vec![op(Opcode::Print)]);
        assert!(matches!(err.kind, FaultKind::StackUnderflow { .. }));
    }

    #[test]
    fn test_state_transitions() {
        let program = Program::new(vec![push(1), op(Opcode::Halt)]);
        let mut vm = Vm::new(&program, Vec::new());
        assert_eq!(vm.state(), VmState::Running);
        assert_eq!(vm.step().unwrap(), StepOutcome::Continue);
        assert_eq!(vm.ip(), 1);
        assert_eq!(vm.step().unwrap(), StepOutcome::Halted);
        assert_eq!(vm.state(), VmState::Halted);
        // halting is terminal
        assert_eq!(vm.step().unwrap(), StepOutcome::Halted);
        assert_eq!(vm.ip(), 1);
    }

    #[test]
    fn test_step_after_fault_stays_faulted() {
        let program = Program::new(vec![
            push(5),
            push(2),
            push("x"),
            op(Opcode::Add),
            op(Opcode::Print),
            op(Opcode::Halt),
        ]);
        let mut vm = Vm::new(&program, Vec::new());
        let err = vm.run().unwrap_err();
        assert!(matches!(err.kind, FaultKind::TypeMismatch { .. }));
        assert_eq!(vm.state(), VmState::Faulted);

        for _ in 0..2 {
            let err = vm.step().unwrap_err();
            assert!(matches!(err.kind, FaultKind::AlreadyFaulted));
            assert_eq!(err.ip, 3);
        }
        assert_eq!(vm.state(), VmState::Faulted);
        assert_eq!(vm.stack(), &[int(5), int(2)]);
        assert!(vm.output().is_empty());
        assert!(vm.run().is_err());
    }

    #[test]
    fn test_fault_state_and_partial_effects() {
        let program = Program::new(vec![
            push(4),
            Instruction::with_operand(Opcode::Store, "a"),
            push(1),
            op(Opcode::Print),
            Instruction::with_operand(Opcode::Load, "b"),
        ]);
        let mut vm = Vm::new(&program, Vec::new());
        let err = vm.run().unwrap_err();

        assert_eq!(vm.state(), VmState::Faulted);
        assert_eq!(err.ip, 4);
        assert_eq!(err.variables.get("a"), Some(&int(4)));
        assert_eq!(vm.output().as_slice(), b"1\n");
    }

    /// Log sink shared with a fmt subscriber.
    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_trace_does_not_change_output() {
        let ops = vec![
            push(2),
            Instruction::with_operand(Opcode::Store, "x"),
            Instruction::with_operand(Opcode::Load, "x"),
            op(Opcode::Print),
            op(Opcode::Halt),
        ];
        let program = Program::new(ops);

        let mut plain = Vm::new(&program, Vec::new());
        plain.run().unwrap();

        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let traced = tracing::subscriber::with_default(subscriber, || {
            let config = VmConfig::default().with_trace(true);
            let mut traced = Vm::with_config(&program, Vec::new(), config);
            traced.run().unwrap();
            traced.into_output()
        });

        assert_eq!(plain.into_output(), traced);
        assert_eq!(traced, b"2\n");

        let lines = log.text();
        assert!(lines.contains("[ip=0] EXEC PUSH 2 | stack=[] vars={}"));
        assert!(lines.contains("[ip=2] EXEC LOAD x | stack=[] vars={x: 2}"));
        assert!(lines.contains("[ip=3] EXEC PRINT | stack=[2]"));
    }

    #[test]
    fn test_trace_disabled_logs_nothing() {
        let program = Program::new(vec![push(1), op(Opcode::Halt)]);
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            Vm::new(&program, Vec::new()).run().unwrap();
        });

        assert!(!log.text().contains("EXEC"));
    }

    #[test]
    fn test_floor_div_helper() {
        assert_eq!(floor_div(9, 3), Some(3));
        assert_eq!(floor_div(-1, 3), Some(-1));
        assert_eq!(floor_div(i64::MIN, -1), None);
    }
}
